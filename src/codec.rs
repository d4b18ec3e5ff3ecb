//! Block transform codec
//!
//! The container stores each frame as an opaque payload produced by a
//! [`BlockTransformCodec`]. [`QuantizingBlockCodec`] is the built-in codec:
//! every plane is quantized, split into 8x8 blocks, and each block is coded
//! either as a raster DPCM run or as a DC value followed by residuals, with
//! all values written as LEB128 varints.
//!
//! Payload layout:
//!
//! ```text
//! u8       version (1)
//! varint   width, height
//! u8       bit depth
//! u8       channel layout
//! u8       flags (bit 0: alpha plane present)
//! per plane (3 color planes, then alpha if present):
//!   varint quantizer step
//!   varint body length
//!   body   per 8x8 block: mode byte, then signed varints
//! ```

use crate::image::{ChannelLayout, SampleBuffer, is_supported_depth, try_plane};
use imgref::{ImgRef, ImgVec};
use std::io;

/// Current payload version
pub const PAYLOAD_VERSION: u8 = 1;

const BLOCK: usize = 8;
const FLAG_ALPHA: u8 = 0x01;
const MODE_DPCM: u8 = 0;
const MODE_DC: u8 = 1;
/// Speeds at or below this try every block mode and keep the smallest
const EXHAUSTIVE_SPEED: u8 = 5;

/// Errors reported by a codec. The decode and encode pipelines wrap these
/// into [`Error::FrameDecodeFailed`](crate::Error::FrameDecodeFailed) and
/// [`Error::EncodeFailed`](crate::Error::EncodeFailed).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("payload ends early")]
    Truncated,

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("out of memory")]
    OutOfMemory,

    #[error("payload write failed: {0}")]
    Write(#[from] io::Error),
}

/// Encoder knobs passed to [`BlockTransformCodec::encode_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    /// 0-100, 100 is lossless
    pub quality: u8,
    /// 0-100, applied to the alpha plane
    pub alpha_quality: u8,
    /// 0-10, 0 is slowest
    pub speed: u8,
}

impl CodecParams {
    fn validate(&self) -> Result<(), CodecError> {
        if self.quality > 100 {
            return Err(CodecError::InvalidParameter("quality must be 0-100"));
        }
        if self.alpha_quality > 100 {
            return Err(CodecError::InvalidParameter("alpha quality must be 0-100"));
        }
        if self.speed > 10 {
            return Err(CodecError::InvalidParameter("speed must be 0-10"));
        }
        Ok(())
    }
}

/// An encoded frame payload
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// The full payload
    pub data: Vec<u8>,
    /// Bytes spent on the header and color planes
    pub color_bytes: usize,
    /// Bytes spent on the alpha plane
    pub alpha_bytes: usize,
}

/// Turns sample buffers into frame payloads and back
pub trait BlockTransformCodec {
    fn encode_frame(
        &self,
        samples: &SampleBuffer,
        params: &CodecParams,
    ) -> Result<EncodedFrame, CodecError>;

    fn decode_frame(&self, payload: &[u8]) -> Result<SampleBuffer, CodecError>;
}

/// Built-in quantizing block codec
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizingBlockCodec;

impl QuantizingBlockCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Quantizer step for a quality setting, scaled to the bit depth
pub(crate) fn step_for_quality(quality: u8, bit_depth: u8) -> u32 {
    let loss = u32::from(100 - quality.min(100));
    (1 + loss * loss / 400) << (bit_depth - 8)
}

#[derive(Debug, Clone, Copy)]
enum Quantizer {
    /// Evenly spaced levels that always include 0 and max
    Levels { max: u32, levels: u32 },
    /// Steps around the mid value, used for chroma
    Centered { max: i64, mid: i64, step: i64 },
}

impl Quantizer {
    fn levels(bit_depth: u8, step: u32) -> Self {
        let max = (1u32 << bit_depth) - 1;
        let levels = max.div_ceil(step).max(1);
        Quantizer::Levels { max, levels }
    }

    fn centered(bit_depth: u8, step: u32) -> Self {
        Quantizer::Centered {
            max: (1i64 << bit_depth) - 1,
            mid: 1i64 << (bit_depth - 1),
            step: i64::from(step),
        }
    }

    fn for_plane(layout: ChannelLayout, plane: usize, bit_depth: u8, step: u32) -> Self {
        if (plane == 1 || plane == 2) && !layout.is_rgb() {
            Self::centered(bit_depth, step)
        } else {
            Self::levels(bit_depth, step)
        }
    }

    fn index(self, v: u16) -> i64 {
        match self {
            Quantizer::Levels { max, levels } => {
                i64::from((u32::from(v) * levels + max / 2) / max)
            }
            Quantizer::Centered { mid, step, .. } => {
                let d = i64::from(v) - mid;
                // round half away from zero
                if d >= 0 {
                    (d + step / 2) / step
                } else {
                    -((-d + step / 2) / step)
                }
            }
        }
    }

    fn reconstruct(self, idx: i64) -> Result<u16, CodecError> {
        match self {
            Quantizer::Levels { max, levels } => {
                let idx = u32::try_from(idx)
                    .ok()
                    .filter(|&i| i <= levels)
                    .ok_or(CodecError::InvalidPayload("sample index out of range"))?;
                Ok(((idx * max + levels / 2) / levels) as u16)
            }
            Quantizer::Centered { max, mid, step } => {
                let v = idx
                    .checked_mul(step)
                    .and_then(|d| d.checked_add(mid))
                    .ok_or(CodecError::InvalidPayload("sample index out of range"))?;
                Ok(v.clamp(0, max) as u16)
            }
        }
    }
}

fn write_unsigned(out: &mut Vec<u8>, v: u64) -> io::Result<()> {
    leb128::write::unsigned(out, v)?;
    Ok(())
}

fn write_signed(out: &mut Vec<u8>, v: i64) -> io::Result<()> {
    leb128::write::signed(out, v)?;
    Ok(())
}

fn varint_error(e: leb128::read::Error) -> CodecError {
    match e {
        leb128::read::Error::Overflow => CodecError::InvalidPayload("varint overflows 64 bits"),
        leb128::read::Error::IoError(_) => CodecError::Truncated,
    }
}

fn read_unsigned(src: &mut &[u8]) -> Result<u64, CodecError> {
    leb128::read::unsigned(src).map_err(varint_error)
}

fn read_signed(src: &mut &[u8]) -> Result<i64, CodecError> {
    leb128::read::signed(src).map_err(varint_error)
}

fn read_byte(src: &mut &[u8]) -> Result<u8, CodecError> {
    let (&b, rest) = src.split_first().ok_or(CodecError::Truncated)?;
    *src = rest;
    Ok(b)
}

/// Visit the 8x8 blocks of a `width`x`height` plane in raster order
fn blocks(width: usize, height: usize) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    (0..height.div_ceil(BLOCK)).flat_map(move |by| {
        (0..width.div_ceil(BLOCK)).map(move |bx| {
            let (x0, y0) = (bx * BLOCK, by * BLOCK);
            (x0, y0, (x0 + BLOCK).min(width), (y0 + BLOCK).min(height))
        })
    })
}

fn encode_dpcm(indices: &[i64], out: &mut Vec<u8>) -> io::Result<()> {
    out.push(MODE_DPCM);
    let mut prev = 0;
    for &idx in indices {
        write_signed(out, idx - prev)?;
        prev = idx;
    }
    Ok(())
}

fn encode_dc(indices: &[i64], out: &mut Vec<u8>) -> io::Result<()> {
    out.push(MODE_DC);
    let sum: i64 = indices.iter().sum();
    let dc = (sum as f64 / indices.len() as f64).round() as i64;
    write_signed(out, dc)?;
    for &idx in indices {
        write_signed(out, idx - dc)?;
    }
    Ok(())
}

fn encode_plane(plane: ImgRef<'_, u16>, q: Quantizer, exhaustive: bool) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(plane.width() * plane.height());
    let mut indices = Vec::with_capacity(BLOCK * BLOCK);
    let mut alt = Vec::new();
    for (x0, y0, x1, y1) in blocks(plane.width(), plane.height()) {
        indices.clear();
        for y in y0..y1 {
            for x in x0..x1 {
                indices.push(q.index(plane[(x, y)]));
            }
        }
        if exhaustive {
            alt.clear();
            encode_dc(&indices, &mut alt)?;
            let mark = body.len();
            encode_dpcm(&indices, &mut body)?;
            if alt.len() < body.len() - mark {
                body.truncate(mark);
                body.extend_from_slice(&alt);
            }
        } else {
            encode_dpcm(&indices, &mut body)?;
        }
    }
    Ok(body)
}

fn decode_plane(
    mut body: &[u8],
    width: usize,
    height: usize,
    q: Quantizer,
) -> Result<ImgVec<u16>, CodecError> {
    // every sample costs at least one byte
    if width * height > body.len() {
        return Err(CodecError::Truncated);
    }
    let mut plane = try_plane(width, height, 0).map_err(|_| CodecError::OutOfMemory)?;
    for (x0, y0, x1, y1) in blocks(width, height) {
        let mode = read_byte(&mut body)?;
        let base = match mode {
            MODE_DPCM => None,
            MODE_DC => Some(read_signed(&mut body)?),
            _ => return Err(CodecError::InvalidPayload("unknown block mode")),
        };
        let mut prev = 0i64;
        for y in y0..y1 {
            for x in x0..x1 {
                let r = read_signed(&mut body)?;
                let idx = base
                    .unwrap_or(prev)
                    .checked_add(r)
                    .ok_or(CodecError::InvalidPayload("residual overflows"))?;
                prev = idx;
                plane[(x, y)] = q.reconstruct(idx)?;
            }
        }
    }
    if !body.is_empty() {
        return Err(CodecError::InvalidPayload("trailing bytes after plane"));
    }
    Ok(plane)
}

fn write_plane_section(out: &mut Vec<u8>, step: u32, body: &[u8]) -> io::Result<()> {
    write_unsigned(out, u64::from(step))?;
    write_unsigned(out, body.len() as u64)?;
    out.extend_from_slice(body);
    Ok(())
}

impl BlockTransformCodec for QuantizingBlockCodec {
    fn encode_frame(
        &self,
        samples: &SampleBuffer,
        params: &CodecParams,
    ) -> Result<EncodedFrame, CodecError> {
        params.validate()?;
        let depth = samples.bit_depth();
        let layout = samples.layout();
        let exhaustive = params.speed <= EXHAUSTIVE_SPEED;

        let mut data = Vec::new();
        data.push(PAYLOAD_VERSION);
        write_unsigned(&mut data, u64::from(samples.width()))?;
        write_unsigned(&mut data, u64::from(samples.height()))?;
        data.push(depth);
        data.push(layout.payload_code());
        data.push(if samples.alpha().is_some() { FLAG_ALPHA } else { 0 });

        let step = step_for_quality(params.quality, depth);
        for i in 0..3 {
            let q = Quantizer::for_plane(layout, i, depth, step);
            let body = encode_plane(samples.plane(i), q, exhaustive)?;
            write_plane_section(&mut data, step, &body)?;
        }
        let color_bytes = data.len();

        if let Some(alpha) = samples.alpha() {
            let step = step_for_quality(params.alpha_quality, depth);
            let body = encode_plane(alpha, Quantizer::levels(depth, step), exhaustive)?;
            write_plane_section(&mut data, step, &body)?;
        }
        let alpha_bytes = data.len() - color_bytes;

        log::trace!(
            "encoded {}x{} frame: {color_bytes} color bytes, {alpha_bytes} alpha bytes",
            samples.width(),
            samples.height()
        );
        Ok(EncodedFrame {
            data,
            color_bytes,
            alpha_bytes,
        })
    }

    fn decode_frame(&self, payload: &[u8]) -> Result<SampleBuffer, CodecError> {
        let mut src = payload;
        let version = read_byte(&mut src)?;
        if version != PAYLOAD_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let width = usize::try_from(read_unsigned(&mut src)?)
            .map_err(|_| CodecError::InvalidPayload("width too large"))?;
        let height = usize::try_from(read_unsigned(&mut src)?)
            .map_err(|_| CodecError::InvalidPayload("height too large"))?;
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidPayload("zero dimension"));
        }
        if width > u32::MAX as usize || height > u32::MAX as usize {
            return Err(CodecError::InvalidPayload("dimension too large"));
        }
        if width.checked_mul(height).is_none_or(|n| n > payload.len()) {
            return Err(CodecError::Truncated);
        }
        let depth = read_byte(&mut src)?;
        if !is_supported_depth(depth) {
            return Err(CodecError::InvalidPayload("unsupported bit depth"));
        }
        let layout = ChannelLayout::from_payload_code(read_byte(&mut src)?)
            .ok_or(CodecError::InvalidPayload("unknown channel layout"))?;
        let flags = read_byte(&mut src)?;
        if flags & !FLAG_ALPHA != 0 {
            return Err(CodecError::InvalidPayload("reserved flags set"));
        }

        let max_step = (1u64 << depth) - 1;
        let mut next_plane = |w: usize, h: usize, index: usize| -> Result<ImgVec<u16>, CodecError> {
            let step = read_unsigned(&mut src)?;
            if step == 0 || step > max_step {
                return Err(CodecError::InvalidPayload("quantizer step out of range"));
            }
            let len = usize::try_from(read_unsigned(&mut src)?)
                .map_err(|_| CodecError::Truncated)?;
            if len > src.len() {
                return Err(CodecError::Truncated);
            }
            let (body, rest) = src.split_at(len);
            src = rest;
            let q = if index == 3 {
                Quantizer::levels(depth, step as u32)
            } else {
                Quantizer::for_plane(layout, index, depth, step as u32)
            };
            decode_plane(body, w, h, q)
        };

        let (cw, ch) = layout.chroma_dimensions(width, height);
        let planes = [
            next_plane(width, height, 0)?,
            next_plane(cw, ch, 1)?,
            next_plane(cw, ch, 2)?,
        ];
        let alpha = if flags & FLAG_ALPHA != 0 {
            Some(next_plane(width, height, 3)?)
        } else {
            None
        };
        if !src.is_empty() {
            return Err(CodecError::InvalidPayload("trailing bytes after planes"));
        }

        SampleBuffer::from_planes(layout, depth, planes, alpha)
            .map_err(|_| CodecError::InvalidPayload("inconsistent plane geometry"))
    }
}
