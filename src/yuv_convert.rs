//! YUV <-> RGB color space conversion
//!
//! Scalar conversions for 8, 10 and 12-bit planes in any of the supported
//! subsamplings. Decoding upsamples chroma either bilinearly or by
//! nearest-neighbor replication; encoding downsamples with a box filter.
//!
//! References:
//! - ITU-R BT.601 (SD video)
//! - ITU-R BT.709 (HD video)
//! - ITU-R BT.2020 (UHD video)

use crate::chroma;
use crate::error::{Error, Result};
use crate::image::{ChannelLayout, ColorRange, MatrixCoefficients};
use imgref::{ImgRef, ImgVec};
use rgb::{Rgb, Rgba};
use whereat::at;
use yuv::{YuvPlanarImage, YuvRange, YuvStandardMatrix};
use yuv_pixel::YUV;

/// YUV matrix coefficients (color space)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YuvMatrix {
    /// ITU-R BT.601 (SD video, NTSC/PAL)
    Bt601,
    /// ITU-R BT.709 (HD video)
    Bt709,
    /// ITU-R BT.2020 (UHD video, HDR)
    Bt2020,
}

impl YuvMatrix {
    /// Matrix for the signalled coefficients. Unknown values fall back to
    /// BT.601; the identity matrix has no YUV form and yields `None`.
    pub fn from_coefficients(mc: MatrixCoefficients) -> Option<Self> {
        match mc {
            MatrixCoefficients::IDENTITY => None,
            MatrixCoefficients::BT709 => Some(YuvMatrix::Bt709),
            MatrixCoefficients::BT2020_NCL | MatrixCoefficients(10) => Some(YuvMatrix::Bt2020),
            _ => Some(YuvMatrix::Bt601),
        }
    }

    fn standard(self) -> YuvStandardMatrix {
        match self {
            YuvMatrix::Bt601 => YuvStandardMatrix::Bt601,
            YuvMatrix::Bt709 => YuvStandardMatrix::Bt709,
            YuvMatrix::Bt2020 => YuvStandardMatrix::Bt2020,
        }
    }
}

fn to_yuv_range(range: ColorRange) -> YuvRange {
    match range {
        ColorRange::Full => YuvRange::Full,
        ColorRange::Limited => YuvRange::Limited,
    }
}

/// Chroma upsampling filter used when decoding subsampled planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsampling {
    /// Bilinear interpolation between chroma sample centers
    Bilinear,
    /// Each chroma sample replicated over the pixels it covers
    Nearest,
}

/// Get matrix coefficients (Kr, Kb) for the specified color space
fn matrix_coefficients(matrix: YuvMatrix) -> (f32, f32) {
    match matrix {
        // ITU-R BT.601 (SD)
        YuvMatrix::Bt601 => (0.299, 0.114),
        // ITU-R BT.709 (HD)
        YuvMatrix::Bt709 => (0.2126, 0.0722),
        // ITU-R BT.2020 (UHD)
        YuvMatrix::Bt2020 => (0.2627, 0.0593),
    }
}

/// Matrix plus the range scaling for one bit depth
#[derive(Debug, Clone, Copy)]
struct Transform {
    kr: f32,
    kg: f32,
    kb: f32,
    max: f32,
    mid: f32,
    y_offset: f32,
    y_scale: f32,
    c_scale: f32,
}

impl Transform {
    fn new(matrix: YuvMatrix, range: ColorRange, bit_depth: u8) -> Self {
        let (kr, kb) = matrix_coefficients(matrix);
        let max = ((1u32 << bit_depth) - 1) as f32;
        let mid = (1u32 << (bit_depth - 1)) as f32;
        let unit = (1u32 << (bit_depth - 8)) as f32;
        let (y_offset, y_scale, c_scale) = match range {
            ColorRange::Full => (0.0, max, max),
            ColorRange::Limited => (16.0 * unit, 219.0 * unit, 224.0 * unit),
        };
        Self {
            kr,
            kg: 1.0 - kr - kb,
            kb,
            max,
            mid,
            y_offset,
            y_scale,
            c_scale,
        }
    }

    /// Convert YUV to RGB using the given matrix coefficients
    ///
    /// Formula on normalized values:
    /// ```text
    /// R = Y + Vr * V
    /// G = Y + Ug * U + Vg * V
    /// B = Y + Ub * U
    ///
    /// where:
    /// Vr = 2 * (1 - Kr)
    /// Ug = -2 * Kb * (1 - Kb) / Kg
    /// Vg = -2 * Kr * (1 - Kr) / Kg
    /// Ub = 2 * (1 - Kb)
    /// ```
    fn yuv_to_rgb(&self, y: f32, u: f32, v: f32) -> Rgb<u16> {
        let y = (y - self.y_offset) / self.y_scale;
        let u = (u - self.mid) / self.c_scale;
        let v = (v - self.mid) / self.c_scale;

        let vr = 2.0 * (1.0 - self.kr);
        let ug = -2.0 * self.kb * (1.0 - self.kb) / self.kg;
        let vg = -2.0 * self.kr * (1.0 - self.kr) / self.kg;
        let ub = 2.0 * (1.0 - self.kb);

        let r = y + vr * v;
        let g = y + ug * u + vg * v;
        let b = y + ub * u;

        Rgb {
            r: self.quantize(r * self.max),
            g: self.quantize(g * self.max),
            b: self.quantize(b * self.max),
        }
    }

    /// Inverse of [`yuv_to_rgb`](Self::yuv_to_rgb), returning unrounded samples
    fn rgb_to_yuv(&self, px: Rgb<u16>) -> (f32, f32, f32) {
        let r = f32::from(px.r) / self.max;
        let g = f32::from(px.g) / self.max;
        let b = f32::from(px.b) / self.max;

        let y = self.kr * r + self.kg * g + self.kb * b;
        let u = (b - y) / (2.0 * (1.0 - self.kb));
        let v = (r - y) / (2.0 * (1.0 - self.kr));

        (
            y * self.y_scale + self.y_offset,
            u * self.c_scale + self.mid,
            v * self.c_scale + self.mid,
        )
    }

    fn quantize(&self, v: f32) -> u16 {
        v.round().clamp(0.0, self.max) as u16
    }
}

/// Sample position along one axis of a subsampled plane, with the chroma
/// sample centered between the two luma samples it covers
#[inline]
fn chroma_position(x: usize, shift: u8, chroma_len: usize) -> (usize, usize, f32) {
    if shift == 0 {
        return (x, x, 0.0);
    }
    let raw = (x as f32 + 0.5) * 0.5 - 0.5;
    // clamp before floor so edge pixels do not extrapolate
    let c = raw.max(0.0).min(chroma_len as f32 - 1.0);
    let c0 = c.floor() as usize;
    let c1 = (c0 + 1).min(chroma_len - 1);
    (c0, c1, c - c0 as f32)
}

fn check_planes(
    y: &ImgRef<'_, u16>,
    u: &ImgRef<'_, u16>,
    v: &ImgRef<'_, u16>,
    layout: ChannelLayout,
) -> Result<()> {
    let (cw, ch) = layout.chroma_dimensions(y.width(), y.height());
    if u.width() != cw || u.height() != ch || v.width() != cw || v.height() != ch {
        return Err(at(Error::UnsupportedConversion(
            "chroma planes do not match channel layout",
        )));
    }
    Ok(())
}

/// Convert Y, Cb, Cr planes to RGB at the same bit depth
pub fn yuv_to_rgb(
    y: ImgRef<'_, u16>,
    u: ImgRef<'_, u16>,
    v: ImgRef<'_, u16>,
    layout: ChannelLayout,
    bit_depth: u8,
    matrix: YuvMatrix,
    range: ColorRange,
    upsampling: Upsampling,
) -> Result<ImgVec<Rgb<u16>>> {
    if layout.is_rgb() {
        return Err(at(Error::UnsupportedConversion(
            "RGB planes need no matrix conversion",
        )));
    }
    check_planes(&y, &u, &v, layout)?;
    let t = Transform::new(matrix, range, bit_depth);
    let (width, height) = (y.width(), y.height());

    let mut out = Vec::new();
    out.try_reserve_exact(width * height)
        .map_err(|e| at(Error::from(e)))?;

    match (layout, upsampling) {
        (ChannelLayout::Yuv444, _) => {
            out.extend(
                chroma::yuv_444(y.rows(), u.rows(), v.rows())
                    .map(|YUV { y, u, v }| t.yuv_to_rgb(y.into(), u.into(), v.into())),
            );
        }
        (ChannelLayout::Yuv422, Upsampling::Nearest) => {
            out.extend(
                chroma::yuv_422(y.rows(), u.rows(), v.rows())
                    .map(|YUV { y, u, v }| t.yuv_to_rgb(y.into(), u.into(), v.into())),
            );
        }
        (ChannelLayout::Yuv420, Upsampling::Nearest) => {
            out.extend(
                chroma::yuv_420(y.rows(), u.rows(), v.rows())
                    .map(|YUV { y, u, v }| t.yuv_to_rgb(y.into(), u.into(), v.into())),
            );
        }
        _ => {
            let (sx, sy) = layout.chroma_shift();
            let (cw, ch) = (u.width(), u.height());
            for py in 0..height {
                let (cy0, cy1, fy) = chroma_position(py, sy, ch);
                let fy1 = 1.0 - fy;
                for px in 0..width {
                    let (cx0, cx1, fx) = chroma_position(px, sx, cw);
                    let fx1 = 1.0 - fx;

                    let sample = |plane: &ImgRef<'_, u16>| {
                        let p00 = f32::from(plane[(cx0, cy0)]);
                        let p01 = f32::from(plane[(cx1, cy0)]);
                        let p10 = f32::from(plane[(cx0, cy1)]);
                        let p11 = f32::from(plane[(cx1, cy1)]);
                        p00 * fx1 * fy1 + p01 * fx * fy1 + p10 * fx1 * fy + p11 * fx * fy
                    };

                    out.push(t.yuv_to_rgb(f32::from(y[(px, py)]), sample(&u), sample(&v)));
                }
            }
        }
    }

    Ok(ImgVec::new(out, width, height))
}

/// Convert 8-bit 4:4:4 planes directly to opaque RGBA with the yuv crate's
/// planar converter. No chroma resampling is involved at this layout.
pub fn yuv444_to_rgba8(
    y: ImgRef<'_, u16>,
    u: ImgRef<'_, u16>,
    v: ImgRef<'_, u16>,
    matrix: YuvMatrix,
    range: ColorRange,
) -> Result<ImgVec<Rgba<u8>>> {
    check_planes(&y, &u, &v, ChannelLayout::Yuv444)?;
    let (width, height) = (y.width(), y.height());
    let narrow = |plane: ImgRef<'_, u16>| -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(width * height)
            .map_err(|e| at(Error::from(e)))?;
        out.extend(plane.pixels().map(|s| s.min(255) as u8));
        Ok(out)
    };
    let (y_plane, u_plane, v_plane) = (narrow(y)?, narrow(u)?, narrow(v)?);
    let stride = width as u32;
    let planar = YuvPlanarImage {
        y_plane: &y_plane,
        y_stride: stride,
        u_plane: &u_plane,
        u_stride: stride,
        v_plane: &v_plane,
        v_stride: stride,
        width: stride,
        height: height as u32,
    };

    let mut out = Vec::new();
    out.try_reserve_exact(width * height)
        .map_err(|e| at(Error::from(e)))?;
    out.resize(width * height, Rgba::new(0u8, 0, 0, 255));
    yuv::yuv444_to_rgba(
        &planar,
        bytemuck::cast_slice_mut(out.as_mut_slice()),
        stride * 4,
        to_yuv_range(range),
        matrix.standard(),
    )
    .map_err(|e| at(Error::from(e)))?;
    Ok(ImgVec::new(out, width, height))
}

/// Convert RGB to Y, Cb, Cr planes, box-filtering chroma down to `layout`
pub fn rgb_to_yuv(
    rgb: ImgRef<'_, Rgb<u16>>,
    layout: ChannelLayout,
    bit_depth: u8,
    matrix: YuvMatrix,
    range: ColorRange,
) -> Result<[ImgVec<u16>; 3]> {
    if layout.is_rgb() {
        return Err(at(Error::UnsupportedConversion(
            "RGB planes need no matrix conversion",
        )));
    }
    let t = Transform::new(matrix, range, bit_depth);
    let (width, height) = (rgb.width(), rgb.height());
    let (cw, ch) = layout.chroma_dimensions(width, height);
    let (sx, sy) = layout.chroma_shift();

    let mut luma = Vec::new();
    let mut u_full = Vec::new();
    let mut v_full = Vec::new();
    for buf in [&mut u_full, &mut v_full] {
        buf.try_reserve_exact(width * height)
            .map_err(|e| at(Error::from(e)))?;
    }
    luma.try_reserve_exact(width * height)
        .map_err(|e| at(Error::from(e)))?;

    for row in rgb.rows() {
        for &px in row {
            let (y, u, v) = t.rgb_to_yuv(px);
            luma.push(t.quantize(y));
            u_full.push(u);
            v_full.push(v);
        }
    }

    let downsample = |full: &[f32]| -> Vec<u16> {
        let mut plane = Vec::with_capacity(cw * ch);
        for cy in 0..ch {
            let rows = (cy << sy)..((cy + 1) << sy).min(height);
            for cx in 0..cw {
                let cols = (cx << sx)..((cx + 1) << sx).min(width);
                let mut sum = 0.0;
                let mut n = 0.0;
                for py in rows.clone() {
                    for px in cols.clone() {
                        sum += full[py * width + px];
                        n += 1.0;
                    }
                }
                plane.push(t.quantize(sum / n));
            }
        }
        plane
    };

    Ok([
        ImgVec::new(luma, width, height),
        ImgVec::new(downsample(&u_full), cw, ch),
        ImgVec::new(downsample(&v_full), cw, ch),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt601_8bit() -> Transform {
        Transform::new(YuvMatrix::Bt601, ColorRange::Full, 8)
    }

    #[test]
    fn test_yuv_to_rgb_gray() {
        // YUV (128, 128, 128) should be gray (128, 128, 128)
        let px = bt601_8bit().yuv_to_rgb(128.0, 128.0, 128.0);
        assert_eq!((px.r, px.g, px.b), (128, 128, 128));
    }

    #[test]
    fn test_yuv_to_rgb_black() {
        let px = bt601_8bit().yuv_to_rgb(0.0, 128.0, 128.0);
        assert_eq!((px.r, px.g, px.b), (0, 0, 0));
    }

    #[test]
    fn test_yuv_to_rgb_white() {
        let px = bt601_8bit().yuv_to_rgb(255.0, 128.0, 128.0);
        assert_eq!((px.r, px.g, px.b), (255, 255, 255));
    }

    #[test]
    fn limited_range_black_and_white() {
        let t = Transform::new(YuvMatrix::Bt709, ColorRange::Limited, 10);
        let black = t.yuv_to_rgb(64.0, 512.0, 512.0);
        let white = t.yuv_to_rgb(940.0, 512.0, 512.0);
        assert_eq!((black.r, black.g, black.b), (0, 0, 0));
        assert_eq!((white.r, white.g, white.b), (1023, 1023, 1023));
    }

    #[test]
    fn red_matches_bt601_reference() {
        let (y, u, v) = bt601_8bit().rgb_to_yuv(Rgb::new(255, 0, 0));
        assert_eq!(y.round(), 76.0);
        assert_eq!(u.round(), 85.0);
        // V saturates just above the top of the range
        assert!(v > 255.0 && v < 256.0);
    }

    #[test]
    fn identity_has_no_yuv_matrix() {
        assert_eq!(YuvMatrix::from_coefficients(MatrixCoefficients::IDENTITY), None);
        assert_eq!(
            YuvMatrix::from_coefficients(MatrixCoefficients::UNSPECIFIED),
            Some(YuvMatrix::Bt601)
        );
    }

    #[test]
    fn roundtrip_444_is_close() {
        let pixels: Vec<Rgb<u16>> = (0..64u16)
            .map(|i| Rgb::new(i * 4, 255 - i * 3, (i * 37) % 256))
            .collect();
        let img = ImgVec::new(pixels.clone(), 8, 8);
        let [y, u, v] = rgb_to_yuv(
            img.as_ref(),
            ChannelLayout::Yuv444,
            8,
            YuvMatrix::Bt709,
            ColorRange::Full,
        )
        .unwrap();
        let back = yuv_to_rgb(
            y.as_ref(),
            u.as_ref(),
            v.as_ref(),
            ChannelLayout::Yuv444,
            8,
            YuvMatrix::Bt709,
            ColorRange::Full,
            Upsampling::Bilinear,
        )
        .unwrap();
        for (a, b) in pixels.iter().zip(back.buf()) {
            for (ca, cb) in [(a.r, b.r), (a.g, b.g), (a.b, b.b)] {
                assert!(ca.abs_diff(cb) <= 2, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn flat_chroma_upsamples_identically() {
        let y = ImgVec::new(vec![100u16; 15], 5, 3);
        let u = ImgVec::new(vec![90u16; 6], 3, 2);
        let v = ImgVec::new(vec![170u16; 6], 3, 2);
        let run = |mode| {
            yuv_to_rgb(
                y.as_ref(),
                u.as_ref(),
                v.as_ref(),
                ChannelLayout::Yuv420,
                8,
                YuvMatrix::Bt601,
                ColorRange::Full,
                mode,
            )
            .unwrap()
        };
        let bilinear = run(Upsampling::Bilinear);
        let nearest = run(Upsampling::Nearest);
        assert_eq!(bilinear.buf(), nearest.buf());
        assert_eq!((bilinear.width(), bilinear.height()), (5, 3));
    }

    #[test]
    fn bilinear_smooths_chroma_edge() {
        // left chroma column neutral, right column strongly blue
        let y = ImgVec::new(vec![128u16; 16], 4, 4);
        let u = ImgVec::new(vec![128u16, 228, 128, 228], 2, 2);
        let v = ImgVec::new(vec![128u16; 4], 2, 2);
        let run = |mode| {
            yuv_to_rgb(
                y.as_ref(),
                u.as_ref(),
                v.as_ref(),
                ChannelLayout::Yuv420,
                8,
                YuvMatrix::Bt601,
                ColorRange::Full,
                mode,
            )
            .unwrap()
        };
        let bilinear = run(Upsampling::Bilinear);
        let nearest = run(Upsampling::Nearest);
        // pixel 1 sits left of the edge; bilinear blends toward blue
        assert_eq!(nearest[(1usize, 0usize)].b, nearest[(0usize, 0usize)].b);
        assert!(bilinear[(1usize, 0usize)].b > bilinear[(0usize, 0usize)].b);
        assert!(bilinear[(1usize, 0usize)].b < nearest[(2usize, 0usize)].b);
    }

    #[test]
    fn downsample_averages_block() {
        let pixels = vec![
            Rgb::new(255u16, 0, 0),
            Rgb::new(0, 0, 255),
            Rgb::new(255, 0, 0),
            Rgb::new(0, 0, 255),
        ];
        let img = ImgVec::new(pixels, 2, 2);
        let [_, u, v] = rgb_to_yuv(
            img.as_ref(),
            ChannelLayout::Yuv420,
            8,
            YuvMatrix::Bt601,
            ColorRange::Full,
        )
        .unwrap();
        assert_eq!((u.width(), u.height()), (1, 1));
        let t = bt601_8bit();
        let (_, ur, vr) = t.rgb_to_yuv(Rgb::new(255, 0, 0));
        let (_, ub, vb) = t.rgb_to_yuv(Rgb::new(0, 0, 255));
        assert_eq!(u[(0usize, 0usize)], t.quantize((ur + ub) / 2.0));
        assert_eq!(v[(0usize, 0usize)], t.quantize((vr + vb) / 2.0));
    }

    #[test]
    fn planar_444_agrees_with_scalar_path() {
        let y = ImgVec::new((0..16u16).map(|i| i * 15 + 10).collect(), 4, 4);
        let u = ImgVec::new((0..16u16).map(|i| 100 + i * 3).collect(), 4, 4);
        let v = ImgVec::new((0..16u16).map(|i| 160 - i * 2).collect(), 4, 4);
        let scalar = yuv_to_rgb(
            y.as_ref(),
            u.as_ref(),
            v.as_ref(),
            ChannelLayout::Yuv444,
            8,
            YuvMatrix::Bt709,
            ColorRange::Full,
            Upsampling::Bilinear,
        )
        .unwrap();
        let planar =
            yuv444_to_rgba8(y.as_ref(), u.as_ref(), v.as_ref(), YuvMatrix::Bt709, ColorRange::Full)
                .unwrap();
        assert_eq!((planar.width(), planar.height()), (4, 4));
        for (a, b) in scalar.buf().iter().zip(planar.buf()) {
            assert_eq!(b.a, 255);
            for (ca, cb) in [(a.r, b.r), (a.g, b.g), (a.b, b.b)] {
                assert!(ca.abs_diff(u16::from(cb)) <= 2, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn mismatched_chroma_rejected() {
        let y = ImgVec::new(vec![0u16; 16], 4, 4);
        let c = ImgVec::new(vec![0u16; 16], 4, 4);
        let err = yuv_to_rgb(
            y.as_ref(),
            c.as_ref(),
            c.as_ref(),
            ChannelLayout::Yuv420,
            8,
            YuvMatrix::Bt601,
            ColorRange::Full,
            Upsampling::Bilinear,
        )
        .unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
    }
}
