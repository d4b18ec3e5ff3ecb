//! Sample buffer <-> exchange format conversion, premultiplication, and bit depth scaling

use crate::error::{Error, Result};
use crate::image::{
    ChannelLayout, ColorRange, ExchangeBuffer, ExchangePixels, MatrixCoefficients, SampleBuffer,
};
use crate::yuv_convert::{self, Upsampling, YuvMatrix};
use imgref::{ImgRef, ImgVec};
use rgb::prelude::*;
use rgb::{Rgb, Rgba};
use whereat::at;

/// How [`to_exchange_format`] renders samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Premultiply color by alpha in the output
    pub alpha_premultiplied: bool,
    /// Chroma upsampling filter for subsampled layouts
    pub upsampling: Upsampling,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            alpha_premultiplied: true,
            upsampling: Upsampling::Bilinear,
        }
    }
}

/// Widen a `bit_depth` sample to 16 bits.
///
/// The sample's top bits are repeated into the vacated low bits, so the
/// largest stored value lands exactly on `0xFFFF` (1023 at 10 bits, 4095 at
/// 12 bits).
#[inline]
pub fn scale_to_u16(v: u16, bit_depth: u8) -> u16 {
    match 16u8.saturating_sub(bit_depth) {
        0 => v,
        pad => (v << pad) | (v >> bit_depth.saturating_sub(pad)),
    }
}

/// Narrow a 16-bit sample to `bit_depth` by dropping its low bits.
///
/// Exact inverse of [`scale_to_u16`] for every in-range stored value.
#[inline]
pub fn scale_from_u16(v: u16, bit_depth: u8) -> u16 {
    v >> 16u8.saturating_sub(bit_depth)
}

fn try_vec<T>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| at(Error::from(e)))?;
    Ok(v)
}

/// Premultiply color by alpha for 8-bit RGBA
#[inline(never)]
pub fn premultiply8(img_row: &mut [Rgba<u8>]) {
    for px in img_row.iter_mut() {
        if px.a != 255 {
            let a = u16::from(px.a);
            *px.rgb_mut() = px.rgb().map(|c| ((u16::from(c) * a + 127) / 255) as u8);
        }
    }
}

/// Premultiply color by alpha for 16-bit RGBA
#[inline(never)]
pub fn premultiply16(img_row: &mut [Rgba<u16>]) {
    for px in img_row.iter_mut() {
        if px.a != 0xFFFF {
            let a = u32::from(px.a);
            *px.rgb_mut() = px
                .rgb()
                .map(|c| ((u32::from(c) * a + 0x7FFF) / 0xFFFF) as u16);
        }
    }
}

/// Convert premultiplied alpha to straight alpha for 8-bit RGBA
#[inline(never)]
pub fn unpremultiply8(img_row: &mut [Rgba<u8>]) {
    for px in img_row.iter_mut() {
        if px.a != 255 && px.a != 0 {
            let a = u16::from(px.a);
            *px.rgb_mut() = px
                .rgb()
                .map(|c| ((u16::from(c) * 255 + a / 2) / a).min(255) as u8);
        }
    }
}

/// Convert premultiplied alpha to straight alpha for 16-bit RGBA
#[inline(never)]
pub fn unpremultiply16(img_row: &mut [Rgba<u16>]) {
    for px in img_row.iter_mut() {
        if px.a != 0xFFFF && px.a != 0 {
            let a = u32::from(px.a);
            *px.rgb_mut() = px
                .rgb()
                .map(|c| ((u32::from(c) * 0xFFFF + a / 2) / a).min(0xFFFF) as u16);
        }
    }
}

fn yuv_matrix(matrix: MatrixCoefficients) -> Result<YuvMatrix> {
    YuvMatrix::from_coefficients(matrix).ok_or_else(|| {
        at(Error::UnsupportedConversion(
            "identity matrix requires RGB planes",
        ))
    })
}

/// Color planes as native-depth RGB
fn planes_to_rgb(
    samples: &SampleBuffer,
    upsampling: Upsampling,
    matrix: MatrixCoefficients,
    range: ColorRange,
) -> Result<ImgVec<Rgb<u16>>> {
    let layout = samples.layout();
    if layout.is_rgb() {
        let (w, h) = (samples.width() as usize, samples.height() as usize);
        let mut out = try_vec(w * h)?;
        let (r, g, b) = (samples.plane(0), samples.plane(1), samples.plane(2));
        for ((r, g), b) in r.rows().zip(g.rows()).zip(b.rows()) {
            out.extend(
                r.iter()
                    .zip(g.iter().zip(b.iter()))
                    .map(|(&r, (&g, &b))| Rgb::new(r, g, b)),
            );
        }
        return Ok(ImgVec::new(out, w, h));
    }
    yuv_convert::yuv_to_rgb(
        samples.plane(0),
        samples.plane(1),
        samples.plane(2),
        layout,
        samples.bit_depth(),
        yuv_matrix(matrix)?,
        range,
        upsampling,
    )
}

/// Render a sample buffer as RGBA exchange pixels.
///
/// Stored depths above 8 produce 16-bit exchange pixels; a missing alpha
/// plane produces opaque pixels.
pub fn to_exchange_format(
    samples: &SampleBuffer,
    options: &ConversionOptions,
    matrix: MatrixCoefficients,
    range: ColorRange,
) -> Result<ExchangeBuffer> {
    let depth = samples.bit_depth();
    let max = samples.format().max_value();
    let alpha = samples.alpha();
    let alpha_at = |x: usize, y: usize| alpha.as_ref().map_or(max, |a| a[(x, y)]);
    let premultiply = options.alpha_premultiplied && alpha.is_some();

    let pixels = if depth <= 8 {
        let mut img = if samples.layout() == ChannelLayout::Yuv444 {
            let mut img = yuv_convert::yuv444_to_rgba8(
                samples.plane(0),
                samples.plane(1),
                samples.plane(2),
                yuv_matrix(matrix)?,
                range,
            )?;
            if let Some(a) = alpha.as_ref() {
                for (row, a_row) in img.rows_mut().zip(a.rows()) {
                    for (px, &a) in row.iter_mut().zip(a_row) {
                        px.a = a as u8;
                    }
                }
            }
            img
        } else {
            let rgb = planes_to_rgb(samples, options.upsampling, matrix, range)?;
            let (w, h) = (rgb.width(), rgb.height());
            let mut out = try_vec(w * h)?;
            for (y, row) in rgb.rows().enumerate() {
                out.extend(row.iter().enumerate().map(|(x, px)| {
                    Rgba::new(px.r as u8, px.g as u8, px.b as u8, alpha_at(x, y) as u8)
                }));
            }
            ImgVec::new(out, w, h)
        };
        if premultiply {
            for row in img.rows_mut() {
                premultiply8(row);
            }
        }
        ExchangePixels::Rgba8(img)
    } else {
        let rgb = planes_to_rgb(samples, options.upsampling, matrix, range)?;
        let (w, h) = (rgb.width(), rgb.height());
        let mut out = try_vec(w * h)?;
        for (y, row) in rgb.rows().enumerate() {
            out.extend(row.iter().enumerate().map(|(x, px)| Rgba {
                r: scale_to_u16(px.r, depth),
                g: scale_to_u16(px.g, depth),
                b: scale_to_u16(px.b, depth),
                a: scale_to_u16(alpha_at(x, y), depth),
            }));
        }
        let mut img = ImgVec::new(out, w, h);
        if premultiply {
            for row in img.rows_mut() {
                premultiply16(row);
            }
        }
        ExchangePixels::Rgba16(img)
    };

    Ok(ExchangeBuffer::new(pixels, options.alpha_premultiplied))
}

/// Straight-alpha RGBA at full u16 range, whatever the exchange depth
fn straight_rgba16(buf: &ExchangeBuffer) -> Result<ImgVec<Rgba<u16>>> {
    let (w, h) = (buf.width(), buf.height());
    let mut out = try_vec(w * h)?;
    match buf.pixels() {
        ExchangePixels::Rgba8(img) => {
            let mut row_buf = Vec::with_capacity(w);
            for row in img.rows() {
                row_buf.clear();
                row_buf.extend_from_slice(row);
                if buf.premultiplied() {
                    unpremultiply8(&mut row_buf);
                }
                out.extend(row_buf.iter().map(|px| px.map(|c| scale_to_u16(c.into(), 8))));
            }
        }
        ExchangePixels::Rgba16(img) => {
            for row in img.rows() {
                let start = out.len();
                out.extend_from_slice(row);
                if buf.premultiplied() {
                    unpremultiply16(&mut out[start..]);
                }
            }
        }
    }
    Ok(ImgVec::new(out, w, h))
}

fn narrow_plane(
    src: ImgRef<'_, Rgba<u16>>,
    bit_depth: u8,
    channel: impl Fn(&Rgba<u16>) -> u16,
) -> Result<ImgVec<u16>> {
    let mut out = try_vec(src.width() * src.height())?;
    out.extend(src.pixels().map(|px| scale_from_u16(channel(&px), bit_depth)));
    Ok(ImgVec::new(out, src.width(), src.height()))
}

/// Convert RGBA exchange pixels into planar samples for encoding.
///
/// Premultiplied input is unpremultiplied first. The result always carries an
/// alpha plane; callers drop it when it is fully opaque.
pub fn from_exchange_format(
    buf: &ExchangeBuffer,
    layout: ChannelLayout,
    bit_depth: u8,
    matrix: MatrixCoefficients,
    range: ColorRange,
) -> Result<SampleBuffer> {
    if !crate::image::is_supported_depth(bit_depth) {
        return Err(at(Error::UnsupportedConversion(
            "bit depth must be 8, 10 or 12",
        )));
    }
    if buf.width() == 0 || buf.height() == 0 {
        return Err(at(Error::UnsupportedConversion("zero-sized exchange buffer")));
    }
    let rgba = straight_rgba16(buf)?;
    let src = rgba.as_ref();

    let planes = if layout.is_rgb() {
        [
            narrow_plane(src, bit_depth, |px| px.r)?,
            narrow_plane(src, bit_depth, |px| px.g)?,
            narrow_plane(src, bit_depth, |px| px.b)?,
        ]
    } else {
        let coefficients = yuv_matrix(matrix)?;
        let mut rgb = try_vec(src.width() * src.height())?;
        rgb.extend(src.pixels().map(|px| px.rgb().map(|c| scale_from_u16(c, bit_depth))));
        let rgb = ImgVec::new(rgb, src.width(), src.height());
        yuv_convert::rgb_to_yuv(rgb.as_ref(), layout, bit_depth, coefficients, range)?
    };
    let alpha = narrow_plane(src, bit_depth, |px| px.a)?;

    SampleBuffer::from_planes(layout, bit_depth, planes, Some(alpha))
}
