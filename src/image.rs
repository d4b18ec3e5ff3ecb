//! Pixel buffers, decoded image types and metadata

use crate::error::{Error, Result};
use imgref::{ImgRef, ImgVec};
use rgb::Rgba;
use whereat::at;

/// Channel layout of the samples stored in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// 4:2:0 - chroma is half resolution in both dimensions
    #[default]
    Yuv420,
    /// 4:2:2 - chroma is half resolution horizontally
    Yuv422,
    /// 4:4:4 - no chroma subsampling
    Yuv444,
    /// R, G, B planes stored directly (identity matrix)
    Rgba,
}

impl ChannelLayout {
    /// Horizontal and vertical chroma shift
    pub fn chroma_shift(self) -> (u8, u8) {
        match self {
            ChannelLayout::Yuv420 => (1, 1),
            ChannelLayout::Yuv422 => (1, 0),
            ChannelLayout::Yuv444 | ChannelLayout::Rgba => (0, 0),
        }
    }

    /// Dimensions of the second and third planes for a `width`x`height` image
    pub fn chroma_dimensions(self, width: usize, height: usize) -> (usize, usize) {
        let (sx, sy) = self.chroma_shift();
        ((width + sx as usize) >> sx, (height + sy as usize) >> sy)
    }

    /// Whether the planes hold R, G, B instead of Y, Cb, Cr
    pub fn is_rgb(self) -> bool {
        self == ChannelLayout::Rgba
    }

    /// Map the raw boundary's chroma argument (1 = 4:4:4, 2 = 4:2:2, 3 = 4:2:0)
    pub fn from_chroma_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ChannelLayout::Yuv444),
            2 => Some(ChannelLayout::Yuv422),
            3 => Some(ChannelLayout::Yuv420),
            _ => None,
        }
    }

    pub(crate) fn payload_code(self) -> u8 {
        match self {
            ChannelLayout::Yuv444 => 0,
            ChannelLayout::Yuv422 => 1,
            ChannelLayout::Yuv420 => 2,
            ChannelLayout::Rgba => 3,
        }
    }

    pub(crate) fn from_payload_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChannelLayout::Yuv444),
            1 => Some(ChannelLayout::Yuv422),
            2 => Some(ChannelLayout::Yuv420),
            3 => Some(ChannelLayout::Rgba),
            _ => None,
        }
    }
}

pub(crate) fn is_supported_depth(bit_depth: u8) -> bool {
    matches!(bit_depth, 8 | 10 | 12)
}

/// Allocate a `width`x`height` plane filled with `fill`, reporting allocation failure
pub(crate) fn try_plane(width: usize, height: usize, fill: u16) -> Result<ImgVec<u16>> {
    let len = width
        .checked_mul(height)
        .ok_or_else(|| at(Error::OutOfMemory))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| at(Error::from(e)))?;
    buf.resize(len, fill);
    Ok(ImgVec::new(buf, width, height))
}

/// Format descriptor of a [`SampleBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Plane arrangement
    pub layout: ChannelLayout,
    /// 8, 10 or 12
    pub bit_depth: u8,
    /// Stride of the first plane, in samples
    pub row_stride: usize,
}

impl SampleFormat {
    /// Bytes one sample occupies when serialized
    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth > 8 { 2 } else { 1 }
    }

    /// Largest representable sample value
    pub fn max_value(&self) -> u16 {
        ((1u32 << self.bit_depth) - 1) as u16
    }
}

/// Planar samples in the codec's internal format
///
/// Planes 0..3 are Y, Cb, Cr (or R, G, B for [`ChannelLayout::Rgba`]); the
/// optional fourth plane is alpha at full resolution. Every sample is stored
/// in a `u16` regardless of bit depth.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    format: SampleFormat,
    planes: [ImgVec<u16>; 3],
    alpha: Option<ImgVec<u16>>,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer. Chroma planes start at mid-gray, alpha at opaque.
    pub fn new(
        width: u32,
        height: u32,
        layout: ChannelLayout,
        bit_depth: u8,
        with_alpha: bool,
    ) -> Result<Self> {
        if !is_supported_depth(bit_depth) {
            return Err(at(Error::UnsupportedConversion(
                "bit depth must be 8, 10 or 12",
            )));
        }
        if width == 0 || height == 0 {
            return Err(at(Error::UnsupportedConversion("zero-sized sample buffer")));
        }
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = layout.chroma_dimensions(w, h);
        let max = ((1u32 << bit_depth) - 1) as u16;
        let mid = if layout.is_rgb() { 0 } else { 1u16 << (bit_depth - 1) };
        let planes = [
            try_plane(w, h, 0)?,
            try_plane(cw, ch, mid)?,
            try_plane(cw, ch, mid)?,
        ];
        let alpha = if with_alpha {
            Some(try_plane(w, h, max)?)
        } else {
            None
        };
        Ok(Self {
            format: SampleFormat {
                width,
                height,
                layout,
                bit_depth,
                row_stride: w,
            },
            planes,
            alpha,
        })
    }

    /// Assemble a buffer from existing planes, checking their geometry
    pub fn from_planes(
        layout: ChannelLayout,
        bit_depth: u8,
        planes: [ImgVec<u16>; 3],
        alpha: Option<ImgVec<u16>>,
    ) -> Result<Self> {
        if !is_supported_depth(bit_depth) {
            return Err(at(Error::UnsupportedConversion(
                "bit depth must be 8, 10 or 12",
            )));
        }
        let (w, h) = (planes[0].width(), planes[0].height());
        let (cw, ch) = layout.chroma_dimensions(w, h);
        let chroma_ok = planes[1..]
            .iter()
            .all(|p| p.width() == cw && p.height() == ch);
        let alpha_ok = alpha
            .as_ref()
            .is_none_or(|a| a.width() == w && a.height() == h);
        if !chroma_ok || !alpha_ok || w == 0 || h == 0 {
            return Err(at(Error::UnsupportedConversion(
                "plane dimensions do not match channel layout",
            )));
        }
        if planes[0].stride() < w || planes[0].buf().len() < planes[0].stride() * (h - 1) + w {
            return Err(at(Error::UnsupportedConversion("row stride shorter than width")));
        }
        Ok(Self {
            format: SampleFormat {
                width: w as u32,
                height: h as u32,
                layout,
                bit_depth,
                row_stride: planes[0].stride(),
            },
            planes,
            alpha,
        })
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn layout(&self) -> ChannelLayout {
        self.format.layout
    }

    pub fn bit_depth(&self) -> u8 {
        self.format.bit_depth
    }

    /// Plane 0, 1 or 2
    pub fn plane(&self, index: usize) -> ImgRef<'_, u16> {
        self.planes[index].as_ref()
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut ImgVec<u16> {
        &mut self.planes[index]
    }

    pub fn alpha(&self) -> Option<ImgRef<'_, u16>> {
        self.alpha.as_ref().map(|a| a.as_ref())
    }

    pub fn alpha_mut(&mut self) -> Option<&mut ImgVec<u16>> {
        self.alpha.as_mut()
    }

    /// Drop the alpha plane, e.g. when it is fully opaque
    pub fn remove_alpha(&mut self) {
        self.alpha = None;
    }

    /// True when there is no alpha plane or every alpha sample is at max
    pub fn is_opaque(&self) -> bool {
        let max = self.format.max_value();
        self.alpha
            .as_ref()
            .is_none_or(|a| a.as_ref().pixels().all(|v| v == max))
    }
}

/// RGBA pixels as they cross the system boundary
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ExchangePixels {
    /// 8 bits per channel
    Rgba8(ImgVec<Rgba<u8>>),
    /// 16 bits per channel (10/12-bit sources expanded to the full range)
    Rgba16(ImgVec<Rgba<u16>>),
}

/// RGBA exchange buffer with its alpha interpretation
#[derive(Debug, Clone)]
pub struct ExchangeBuffer {
    pixels: ExchangePixels,
    premultiplied: bool,
}

impl ExchangeBuffer {
    pub fn new(pixels: ExchangePixels, premultiplied: bool) -> Self {
        Self {
            pixels,
            premultiplied,
        }
    }

    /// Wrap 8-bit RGBA pixels
    pub fn from_rgba8(img: ImgVec<Rgba<u8>>, premultiplied: bool) -> Self {
        Self::new(ExchangePixels::Rgba8(img), premultiplied)
    }

    /// Parse packed RGBA bytes: 4 bytes per pixel for `depth` 8, 8 bytes per
    /// pixel (little-endian channels) for `depth` 16
    pub fn from_bytes(
        bytes: &[u8],
        width: u32,
        height: u32,
        depth: u8,
        premultiplied: bool,
    ) -> Result<Self> {
        let pixel_count = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| at(Error::UnsupportedConversion("pixel count overflows")))?;
        let (w, h) = (width as usize, height as usize);
        match depth {
            8 => {
                if pixel_count.checked_mul(4) != Some(bytes.len()) {
                    return Err(at(Error::UnsupportedConversion(
                        "buffer length does not match width * height",
                    )));
                }
                let pixels = bytes
                    .chunks_exact(4)
                    .map(|c| Rgba::new(c[0], c[1], c[2], c[3]))
                    .collect();
                Ok(Self::from_rgba8(ImgVec::new(pixels, w, h), premultiplied))
            }
            16 => {
                if pixel_count.checked_mul(8) != Some(bytes.len()) {
                    return Err(at(Error::UnsupportedConversion(
                        "buffer length does not match width * height",
                    )));
                }
                let pixels = bytes
                    .chunks_exact(8)
                    .map(|c| {
                        Rgba::new(
                            u16::from_le_bytes([c[0], c[1]]),
                            u16::from_le_bytes([c[2], c[3]]),
                            u16::from_le_bytes([c[4], c[5]]),
                            u16::from_le_bytes([c[6], c[7]]),
                        )
                    })
                    .collect();
                Ok(Self::new(
                    ExchangePixels::Rgba16(ImgVec::new(pixels, w, h)),
                    premultiplied,
                ))
            }
            _ => Err(at(Error::UnsupportedConversion(
                "exchange depth must be 8 or 16",
            ))),
        }
    }

    pub fn pixels(&self) -> &ExchangePixels {
        &self.pixels
    }

    pub fn into_pixels(self) -> ExchangePixels {
        self.pixels
    }

    pub fn width(&self) -> usize {
        match &self.pixels {
            ExchangePixels::Rgba8(img) => img.width(),
            ExchangePixels::Rgba16(img) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match &self.pixels {
            ExchangePixels::Rgba8(img) => img.height(),
            ExchangePixels::Rgba16(img) => img.height(),
        }
    }

    /// Bits per channel: 8 or 16
    pub fn depth(&self) -> u8 {
        match &self.pixels {
            ExchangePixels::Rgba8(_) => 8,
            ExchangePixels::Rgba16(_) => 16,
        }
    }

    /// Whether color channels are premultiplied by alpha
    pub fn premultiplied(&self) -> bool {
        self.premultiplied
    }

    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.depth()) / 2
    }

    /// Length of the packed byte representation
    pub fn byte_len(&self) -> usize {
        self.width() * self.height() * self.bytes_per_pixel()
    }

    /// Write packed rows into `out`, which must be exactly [`byte_len`](Self::byte_len) long
    pub fn write_bytes(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.byte_len() {
            return Err(at(Error::UnsupportedConversion(
                "destination length does not match image size",
            )));
        }
        match &self.pixels {
            ExchangePixels::Rgba8(img) => {
                let row_bytes = img.width() * 4;
                for (row, dst) in img.rows().zip(out.chunks_exact_mut(row_bytes)) {
                    dst.copy_from_slice(bytemuck::cast_slice(row));
                }
            }
            ExchangePixels::Rgba16(img) => {
                let row_bytes = img.width() * 8;
                for (row, dst) in img.rows().zip(out.chunks_exact_mut(row_bytes)) {
                    for (px, d) in row.iter().zip(dst.chunks_exact_mut(8)) {
                        d[0..2].copy_from_slice(&px.r.to_le_bytes());
                        d[2..4].copy_from_slice(&px.g.to_le_bytes());
                        d[4..6].copy_from_slice(&px.b.to_le_bytes());
                        d[6..8].copy_from_slice(&px.a.to_le_bytes());
                    }
                }
            }
        }
        Ok(())
    }

    /// Convert into packed bytes
    ///
    /// Tightly packed 8-bit buffers are reinterpreted in place without copying.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if let ExchangePixels::Rgba8(img) = self.pixels {
            let (w, h) = (img.width(), img.height());
            if img.stride() == w && img.buf().len() == w * h {
                return match bytemuck::allocation::try_cast_vec::<Rgba<u8>, u8>(img.into_buf()) {
                    Ok(bytes) => Ok(bytes),
                    Err((_, buf)) => Ok(bytemuck::cast_slice(buf.as_slice()).to_vec()),
                };
            }
            return Self::from_rgba8(img, self.premultiplied).copy_to_vec();
        }
        self.copy_to_vec()
    }

    fn copy_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.byte_len())
            .map_err(|e| at(Error::from(e)))?;
        out.resize(self.byte_len(), 0);
        self.write_bytes(&mut out)?;
        Ok(out)
    }
}

/// Color primaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPrimaries(pub u16);

impl ColorPrimaries {
    pub const BT709: Self = Self(1);
    pub const UNSPECIFIED: Self = Self(2);
    pub const BT601: Self = Self(6);
    pub const BT2020: Self = Self(9);
}

impl Default for ColorPrimaries {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

/// Transfer characteristics (gamma curve)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCharacteristics(pub u16);

impl TransferCharacteristics {
    pub const BT709: Self = Self(1);
    pub const UNSPECIFIED: Self = Self(2);
    pub const LINEAR: Self = Self(8);
    pub const SRGB: Self = Self(13);
    pub const SMPTE2084: Self = Self(16);
    pub const HLG: Self = Self(18);
}

impl Default for TransferCharacteristics {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

/// Matrix coefficients for YUV to RGB conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixCoefficients(pub u16);

impl MatrixCoefficients {
    pub const IDENTITY: Self = Self(0);
    pub const BT709: Self = Self(1);
    pub const UNSPECIFIED: Self = Self(2);
    pub const BT470BG: Self = Self(5);
    pub const BT601: Self = Self(6);
    pub const BT2020_NCL: Self = Self(9);
}

impl Default for MatrixCoefficients {
    fn default() -> Self {
        Self::BT601
    }
}

/// Color range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    /// Limited/studio range (Y: 16-235, UV: 16-240 for 8-bit)
    Limited,
    /// Full range (0-255 for 8-bit)
    #[default]
    Full,
}

/// Metadata about a container, available without decoding pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Stored bit depth (8, 10, or 12)
    pub bit_depth: u8,
    /// Number of frames (1 for stills, 0 for an empty container)
    pub frame_count: u32,
    /// Whether the container holds an image sequence (`avis`)
    pub is_sequence: bool,
    /// Whether frames carry an alpha plane
    pub has_alpha: bool,
    /// Whether decoded exchange pixels are premultiplied
    pub premultiplied_alpha: bool,
    /// Plane arrangement
    pub layout: ChannelLayout,
    /// Color primaries
    pub color_primaries: ColorPrimaries,
    /// Transfer characteristics
    pub transfer_characteristics: TransferCharacteristics,
    /// Matrix coefficients
    pub matrix_coefficients: MatrixCoefficients,
    /// Color range (limited or full)
    pub color_range: ColorRange,
}

impl ImageInfo {
    /// Bits per channel of decoded exchange pixels: 16 when the stored depth exceeds 8
    pub fn exchange_depth(&self) -> u8 {
        if self.bit_depth > 8 { 16 } else { 8 }
    }
}

/// One decoded frame in exchange format
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Zero-based position in the sequence
    pub index: u32,
    /// RGBA pixels
    pub pixels: ExchangeBuffer,
    /// Display duration in microseconds
    pub duration_micros: u64,
}

impl DecodedFrame {
    /// Display duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration_micros as f64 / 1_000_000.0
    }
}

/// Result of a decode: metadata plus zero or more frames
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Container metadata
    pub info: ImageInfo,
    /// Decoded frames; empty for metadata-only requests
    pub frames: Vec<DecodedFrame>,
}

impl DecodedImage {
    pub fn first_frame(&self) -> Option<&DecodedFrame> {
        self.frames.first()
    }

    /// Per-frame durations in microseconds, in frame order
    pub fn durations_micros(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.duration_micros).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_dimensions_round_up() {
        assert_eq!(ChannelLayout::Yuv420.chroma_dimensions(5, 3), (3, 2));
        assert_eq!(ChannelLayout::Yuv422.chroma_dimensions(5, 3), (3, 3));
        assert_eq!(ChannelLayout::Yuv444.chroma_dimensions(5, 3), (5, 3));
        assert_eq!(ChannelLayout::Rgba.chroma_dimensions(5, 3), (5, 3));
    }

    #[test]
    fn sample_buffer_rejects_bad_depth() {
        let err = SampleBuffer::new(4, 4, ChannelLayout::Yuv420, 9, false).unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
    }

    #[test]
    fn sample_buffer_defaults() {
        let buf = SampleBuffer::new(4, 2, ChannelLayout::Yuv420, 10, true).unwrap();
        assert_eq!(buf.format().row_stride, 4);
        assert_eq!(buf.plane(1).width(), 2);
        assert_eq!(buf.plane(1).height(), 1);
        assert!(buf.plane(1).pixels().all(|v| v == 512));
        assert!(buf.is_opaque());
    }

    #[test]
    fn from_planes_checks_geometry() {
        let y = ImgVec::new(vec![0u16; 16], 4, 4);
        let u = ImgVec::new(vec![0u16; 4], 2, 2);
        let v = ImgVec::new(vec![0u16; 16], 4, 4);
        let err = SampleBuffer::from_planes(ChannelLayout::Yuv420, 8, [y, u, v], None).unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
    }

    #[test]
    fn exchange_from_bytes_length_mismatch() {
        let err = ExchangeBuffer::from_bytes(&[0; 15], 2, 2, 8, true).unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
    }

    #[test]
    fn exchange_bytes_16bit_little_endian() {
        let img = ImgVec::new(vec![Rgba::new(0x0102u16, 0, 0xFFFF, 0x8000)], 1, 1);
        let buf = ExchangeBuffer::new(ExchangePixels::Rgba16(img), false);
        let bytes = buf.into_bytes().unwrap();
        assert_eq!(bytes, [0x02, 0x01, 0, 0, 0xFF, 0xFF, 0x00, 0x80]);
    }

    #[test]
    fn exchange_bytes_8bit_packed() {
        let img = ImgVec::new(vec![Rgba::new(1u8, 2, 3, 4), Rgba::new(5, 6, 7, 8)], 2, 1);
        let bytes = ExchangeBuffer::from_rgba8(img, true).into_bytes().unwrap();
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn exchange_bytes_8bit_strided() {
        let buf = vec![
            Rgba::new(1u8, 1, 1, 1),
            Rgba::new(9, 9, 9, 9),
            Rgba::new(2, 2, 2, 2),
        ];
        let img = ImgVec::new_stride(buf, 1, 2, 2);
        let bytes = ExchangeBuffer::from_rgba8(img, true).into_bytes().unwrap();
        assert_eq!(bytes, [1, 1, 1, 1, 2, 2, 2, 2]);
    }
}
