//! Container writing
//!
//! Produces the box layout read by [`crate::Container`]: a still image keeps
//! its payload location in `iloc`; a sequence describes its frames in a
//! `moov` sample table. Payloads always go last, in a single `mdat`.

use crate::container::BTCC_VERSION;
use crate::error::{Error, Result};
use crate::image::{ChannelLayout, ColorRange, MatrixCoefficients};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io;
use whereat::at;

/// Geometry and format shared by every frame of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub layout: ChannelLayout,
    pub has_alpha: bool,
}

/// Serializes payloads into a container
#[derive(Debug, Clone)]
pub struct ContainerWriter {
    frame: FrameLayout,
    timescale: u32,
    matrix: MatrixCoefficients,
    range: ColorRange,
}

impl ContainerWriter {
    /// Sequences default to a microsecond timescale
    pub fn new(frame: FrameLayout) -> Self {
        let matrix = if frame.layout.is_rgb() {
            MatrixCoefficients::IDENTITY
        } else {
            MatrixCoefficients::BT601
        };
        Self {
            frame,
            timescale: 1_000_000,
            matrix,
            range: ColorRange::Full,
        }
    }

    /// Media timescale (ticks per second) for sequence durations
    pub fn timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale;
        self
    }

    pub fn matrix(mut self, matrix: MatrixCoefficients) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn range(mut self, range: ColorRange) -> Self {
        self.range = range;
        self
    }

    /// Write an `avif` still image holding one payload
    pub fn write_still(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.still_boxes(payload)
            .map_err(|e| at(Error::EncodeFailed(e.to_string())))
    }

    /// Write an `avis` sequence. Durations are in [`timescale`](Self::timescale) ticks.
    pub fn write_sequence(&self, frames: &[(&[u8], u32)]) -> Result<Vec<u8>> {
        if self.timescale == 0 {
            return Err(at(Error::EncodeFailed("timescale must be non-zero".into())));
        }
        self.sequence_boxes(frames)
            .map_err(|e| at(Error::EncodeFailed(e.to_string())))
    }

    fn still_boxes(&self, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_ftyp(&mut buf, b"avif", &[b"avif", b"mif1", b"miaf"])?;

        let meta = begin_full_box(&mut buf, b"meta", 0, 0)?;
        write_hdlr(&mut buf)?;

        let pitm = begin_full_box(&mut buf, b"pitm", 0, 0)?;
        buf.write_u16::<BigEndian>(1)?;
        end_box(&mut buf, pitm)?;

        let iloc = begin_full_box(&mut buf, b"iloc", 0, 0)?;
        buf.write_u8(0x44)?; // offset_size = 4, length_size = 4
        buf.write_u8(0x00)?; // base_offset_size = 0
        buf.write_u16::<BigEndian>(1)?; // item_count
        buf.write_u16::<BigEndian>(1)?; // item_id
        buf.write_u16::<BigEndian>(0)?; // data_reference_index
        buf.write_u16::<BigEndian>(1)?; // extent_count
        let offset_patch = buf.len();
        buf.write_u32::<BigEndian>(0)?;
        buf.write_u32::<BigEndian>(to_u32(payload.len())?)?;
        end_box(&mut buf, iloc)?;

        self.write_iprp(&mut buf, true)?;
        end_box(&mut buf, meta)?;

        let payload_offset = buf.len() + 8;
        BigEndian::write_u32(&mut buf[offset_patch..], to_u32(payload_offset)?);
        write_mdat(&mut buf, &[payload])?;
        Ok(buf)
    }

    fn sequence_boxes(&self, frames: &[(&[u8], u32)]) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_ftyp(&mut buf, b"avis", &[b"avis", b"msf1", b"miaf", b"mif1"])?;

        let meta = begin_full_box(&mut buf, b"meta", 0, 0)?;
        write_hdlr(&mut buf)?;
        self.write_iprp(&mut buf, false)?;
        end_box(&mut buf, meta)?;

        let total_duration = frames
            .iter()
            .fold(0u32, |acc, &(_, d)| acc.saturating_add(d));

        let moov = begin_box(&mut buf, b"moov")?;
        let mvhd = begin_full_box(&mut buf, b"mvhd", 0, 0)?;
        buf.write_u32::<BigEndian>(0)?; // creation_time
        buf.write_u32::<BigEndian>(0)?; // modification_time
        buf.write_u32::<BigEndian>(self.timescale)?;
        buf.write_u32::<BigEndian>(total_duration)?;
        buf.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
        buf.write_u16::<BigEndian>(0x0100)?; // volume 1.0
        buf.extend_from_slice(&[0; 10]);
        for m in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            buf.write_u32::<BigEndian>(m)?;
        }
        buf.extend_from_slice(&[0; 24]);
        buf.write_u32::<BigEndian>(2)?; // next_track_ID
        end_box(&mut buf, mvhd)?;

        let trak = begin_box(&mut buf, b"trak")?;
        let mdia = begin_box(&mut buf, b"mdia")?;
        let mdhd = begin_full_box(&mut buf, b"mdhd", 0, 0)?;
        buf.write_u32::<BigEndian>(0)?;
        buf.write_u32::<BigEndian>(0)?;
        buf.write_u32::<BigEndian>(self.timescale)?;
        buf.write_u32::<BigEndian>(total_duration)?;
        buf.write_u16::<BigEndian>(0x55C4)?; // 'und'
        buf.write_u16::<BigEndian>(0)?;
        end_box(&mut buf, mdhd)?;
        write_hdlr(&mut buf)?;

        let minf = begin_box(&mut buf, b"minf")?;
        let stbl = begin_box(&mut buf, b"stbl")?;

        let stts = begin_full_box(&mut buf, b"stts", 0, 0)?;
        let runs = duration_runs(frames);
        buf.write_u32::<BigEndian>(to_u32(runs.len())?)?;
        for (count, delta) in runs {
            buf.write_u32::<BigEndian>(count)?;
            buf.write_u32::<BigEndian>(delta)?;
        }
        end_box(&mut buf, stts)?;

        let stsc = begin_full_box(&mut buf, b"stsc", 0, 0)?;
        buf.write_u32::<BigEndian>(1)?;
        buf.write_u32::<BigEndian>(1)?; // first_chunk
        buf.write_u32::<BigEndian>(1)?; // samples_per_chunk
        buf.write_u32::<BigEndian>(1)?; // sample_description_index
        end_box(&mut buf, stsc)?;

        let stsz = begin_full_box(&mut buf, b"stsz", 0, 0)?;
        buf.write_u32::<BigEndian>(0)?; // sample_size: per-sample table follows
        buf.write_u32::<BigEndian>(to_u32(frames.len())?)?;
        for (payload, _) in frames {
            buf.write_u32::<BigEndian>(to_u32(payload.len())?)?;
        }
        end_box(&mut buf, stsz)?;

        let stco = begin_full_box(&mut buf, b"stco", 0, 0)?;
        buf.write_u32::<BigEndian>(to_u32(frames.len())?)?;
        let offsets_patch = buf.len();
        for _ in frames {
            buf.write_u32::<BigEndian>(0)?;
        }
        end_box(&mut buf, stco)?;

        end_box(&mut buf, stbl)?;
        end_box(&mut buf, minf)?;
        end_box(&mut buf, mdia)?;
        end_box(&mut buf, trak)?;
        end_box(&mut buf, moov)?;

        let mut offset = buf.len() + 8;
        for (i, (payload, _)) in frames.iter().enumerate() {
            let pos = offsets_patch + i * 4;
            BigEndian::write_u32(&mut buf[pos..pos + 4], to_u32(offset)?);
            offset += payload.len();
        }
        let payloads: Vec<&[u8]> = frames.iter().map(|&(p, _)| p).collect();
        write_mdat(&mut buf, &payloads)?;
        Ok(buf)
    }

    fn write_iprp(&self, buf: &mut Vec<u8>, with_associations: bool) -> io::Result<()> {
        let iprp = begin_box(buf, b"iprp")?;
        let ipco = begin_box(buf, b"ipco")?;

        let ispe = begin_full_box(buf, b"ispe", 0, 0)?;
        buf.write_u32::<BigEndian>(self.frame.width)?;
        buf.write_u32::<BigEndian>(self.frame.height)?;
        end_box(buf, ispe)?;

        let colr = begin_box(buf, b"colr")?;
        buf.extend_from_slice(b"nclx");
        buf.write_u16::<BigEndian>(2)?; // primaries: unspecified
        buf.write_u16::<BigEndian>(2)?; // transfer: unspecified
        buf.write_u16::<BigEndian>(self.matrix.0)?;
        buf.write_u8(if self.range == ColorRange::Full { 0x80 } else { 0 })?;
        end_box(buf, colr)?;

        let btcc = begin_box(buf, b"btcC")?;
        buf.extend_from_slice(&btcc_bytes(&self.frame));
        end_box(buf, btcc)?;

        end_box(buf, ipco)?;

        if with_associations {
            let ipma = begin_full_box(buf, b"ipma", 0, 0)?;
            buf.write_u32::<BigEndian>(1)?; // entry_count
            buf.write_u16::<BigEndian>(1)?; // item_ID
            buf.write_u8(3)?;
            // essential bit + 1-based property index
            for index in [0x81u8, 0x02, 0x83] {
                buf.write_u8(index)?;
            }
            end_box(buf, ipma)?;
        }
        end_box(buf, iprp)
    }
}

fn btcc_bytes(frame: &FrameLayout) -> [u8; 4] {
    let (sx, sy) = frame.layout.chroma_shift();
    let mut flags = 0u8;
    if frame.bit_depth > 8 {
        flags |= 0x80;
    }
    if frame.bit_depth == 12 {
        flags |= 0x40;
    }
    if sx > 0 {
        flags |= 0x20;
    }
    if sy > 0 {
        flags |= 0x10;
    }
    if frame.layout.is_rgb() {
        flags |= 0x08;
    }
    if frame.has_alpha {
        flags |= 0x04;
    }
    [0x80 | BTCC_VERSION, flags, 0, 0]
}

/// Run-length encode frame durations for `stts`
fn duration_runs(frames: &[(&[u8], u32)]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &(_, delta) in frames {
        match runs.last_mut() {
            Some((count, d)) if *d == delta => *count += 1,
            _ => runs.push((1, delta)),
        }
    }
    runs
}

fn to_u32(v: usize) -> io::Result<u32> {
    u32::try_from(v).map_err(|_| io::Error::other("container larger than 4 GiB"))
}

fn begin_box(buf: &mut Vec<u8>, name: &[u8; 4]) -> io::Result<usize> {
    let pos = buf.len();
    buf.write_u32::<BigEndian>(0)?;
    buf.extend_from_slice(name);
    Ok(pos)
}

fn begin_full_box(buf: &mut Vec<u8>, name: &[u8; 4], version: u8, flags: u32) -> io::Result<usize> {
    let pos = begin_box(buf, name)?;
    buf.write_u8(version)?;
    buf.write_u24::<BigEndian>(flags)?;
    Ok(pos)
}

/// Patch the size field of the box started at `pos`
fn end_box(buf: &mut [u8], pos: usize) -> io::Result<()> {
    let size = to_u32(buf.len() - pos)?;
    BigEndian::write_u32(&mut buf[pos..pos + 4], size);
    Ok(())
}

fn write_ftyp(buf: &mut Vec<u8>, major: &[u8; 4], compatible: &[&[u8; 4]]) -> io::Result<()> {
    let ftyp = begin_box(buf, b"ftyp")?;
    buf.extend_from_slice(major);
    buf.write_u32::<BigEndian>(0)?;
    for brand in compatible {
        buf.extend_from_slice(*brand);
    }
    end_box(buf, ftyp)
}

fn write_hdlr(buf: &mut Vec<u8>) -> io::Result<()> {
    let hdlr = begin_full_box(buf, b"hdlr", 0, 0)?;
    buf.write_u32::<BigEndian>(0)?; // pre_defined
    buf.extend_from_slice(b"pict");
    buf.extend_from_slice(&[0; 12]);
    buf.write_u8(0)?; // empty name
    end_box(buf, hdlr)
}

fn write_mdat(buf: &mut Vec<u8>, payloads: &[&[u8]]) -> io::Result<()> {
    let mdat = begin_box(buf, b"mdat")?;
    for payload in payloads {
        buf.extend_from_slice(payload);
    }
    end_box(buf, mdat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    fn frame(layout: ChannelLayout, bit_depth: u8, has_alpha: bool) -> FrameLayout {
        FrameLayout {
            width: 7,
            height: 5,
            bit_depth,
            layout,
            has_alpha,
        }
    }

    #[test]
    fn runs_merge_equal_durations() {
        let frames: [(&[u8], u32); 4] = [(&[], 5), (&[], 5), (&[], 7), (&[], 5)];
        assert_eq!(duration_runs(&frames), [(2, 5), (1, 7), (1, 5)]);
    }

    #[test]
    fn codec_config_survives_parse() {
        for (layout, depth, alpha) in [
            (ChannelLayout::Yuv420, 8, false),
            (ChannelLayout::Yuv422, 10, true),
            (ChannelLayout::Yuv444, 12, false),
            (ChannelLayout::Rgba, 8, true),
        ] {
            let bytes = ContainerWriter::new(frame(layout, depth, alpha))
                .write_still(&[0xAA; 3])
                .unwrap();
            let container = Container::parse(&bytes).unwrap();
            let info = container.info();
            assert_eq!((info.width, info.height), (7, 5));
            assert_eq!(info.layout, layout);
            assert_eq!(info.bit_depth, depth);
            assert_eq!(info.has_alpha, alpha);
        }
    }

    #[test]
    fn limited_range_and_matrix_recorded() {
        let bytes = ContainerWriter::new(frame(ChannelLayout::Yuv420, 8, false))
            .matrix(MatrixCoefficients::BT709)
            .range(ColorRange::Limited)
            .write_still(&[1])
            .unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert_eq!(container.info().matrix_coefficients, MatrixCoefficients::BT709);
        assert_eq!(container.info().color_range, ColorRange::Limited);
    }

    #[test]
    fn sequence_payloads_and_durations() {
        let frames: [(&[u8], u32); 3] = [(&[1, 1], 40), (&[2], 40), (&[3, 3, 3], 120)];
        let bytes = ContainerWriter::new(frame(ChannelLayout::Yuv420, 8, false))
            .timescale(1000)
            .write_sequence(&frames)
            .unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert!(container.info().is_sequence);
        let got: Vec<(Vec<u8>, u64)> = container
            .frames()
            .map(|f| (f.data.to_vec(), f.duration_micros))
            .collect();
        assert_eq!(
            got,
            [
                (vec![1, 1], 40_000),
                (vec![2], 40_000),
                (vec![3, 3, 3], 120_000)
            ]
        );
    }

    #[test]
    fn zero_timescale_rejected() {
        let err = ContainerWriter::new(frame(ChannelLayout::Yuv420, 8, false))
            .timescale(0)
            .write_sequence(&[])
            .unwrap_err();
        assert!(matches!(err.error(), Error::EncodeFailed(_)));
    }
}
