//! Container parsing
//!
//! [`Container::parse`] validates the `ftyp` signature, walks the box tree and
//! extracts image metadata and the location of every frame payload without
//! decoding any pixels. Frame payloads are then read through a
//! [`FrameCursor`].

use crate::boxes::{
    BRAND_SEQUENCE, BRAND_STILL, BmffBox, BoxIter, BoxType, FourCC, be_u16, be_u32, be_u64,
    read_fourcc, read_fullbox_version_no_flags, read_u8,
};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::image::{
    ChannelLayout, ColorPrimaries, ColorRange, ImageInfo, MatrixCoefficients,
    TransferCharacteristics,
};
use bitreader::BitReader;
use log::{debug, trace};
use whereat::{At, at};

/// Duration reported for a still image: one second, matching a timescale of 1
/// with a duration of 1.
pub const STILL_DURATION_MICROS: u64 = 1_000_000;

/// Per-frame metadata extracted during parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub frame_index: u32,
    pub duration_micros: u64,
}

/// One frame payload yielded by a [`FrameCursor`]
#[derive(Debug, Clone, Copy)]
pub struct FramePayload<'data> {
    /// Zero-based frame index
    pub index: u32,
    /// Encoded payload bytes, borrowed from the container input
    pub data: &'data [u8],
    /// Display duration in microseconds
    pub duration_micros: u64,
}

/// Decoded contents of the block codec configuration record (`btcC`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodecConfig {
    pub bit_depth: u8,
    pub layout: ChannelLayout,
    pub has_alpha: bool,
}

#[derive(Debug, Clone, Copy)]
struct ColorInfo {
    primaries: ColorPrimaries,
    transfer: TransferCharacteristics,
    matrix: MatrixCoefficients,
    range: ColorRange,
}

impl Default for ColorInfo {
    fn default() -> Self {
        Self {
            primaries: ColorPrimaries::default(),
            transfer: TransferCharacteristics::default(),
            matrix: MatrixCoefficients::default(),
            range: ColorRange::Full,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ItemLocation {
    item_id: u32,
    offset: u64,
    /// `None` when the extent runs to the end of the input
    length: Option<u64>,
}

#[derive(Debug, Default)]
struct MetaBox {
    primary_item: Option<u32>,
    locations: Vec<ItemLocation>,
    extents: Option<(u32, u32)>,
    codec: Option<CodecConfig>,
    foreign_codec: Option<FourCC>,
    color: Option<ColorInfo>,
}

#[derive(Debug, Default)]
struct SampleTable {
    time_to_sample: Vec<(u32, u32)>,
    sample_to_chunk: Vec<(u32, u32)>,
    sample_sizes: Vec<u32>,
    uniform_size: u32,
    sample_count: u32,
    chunk_offsets: Vec<u64>,
}

#[derive(Debug, Default)]
struct Track {
    timescale: u32,
    samples: Option<SampleTable>,
}

#[derive(Debug, Clone, Copy)]
struct FrameLocation {
    offset: u64,
    length: Option<u64>,
    duration_micros: u64,
}

/// A parsed container borrowing its input bytes
#[derive(Debug)]
pub struct Container<'data> {
    data: &'data [u8],
    info: ImageInfo,
    frames: Vec<FrameLocation>,
}

/// Check the leading `ftyp` box without parsing anything else.
///
/// Returns the major brand.
pub fn check_signature(data: &[u8]) -> Result<[u8; 4]> {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return Err(at(Error::MalformedContainer("missing ftyp signature")));
    }
    let brand = [data[8], data[9], data[10], data[11]];
    if brand != BRAND_STILL && brand != BRAND_SEQUENCE {
        return Err(at(Error::MalformedContainer("major brand is not avif or avis")));
    }
    Ok(brand)
}

impl<'data> Container<'data> {
    /// Parse with default (strict) options
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        Self::parse_with(data, &DecoderConfig::default())
    }

    /// Parse using the strictness setting of `config`. Resource limits are
    /// not applied here.
    pub fn parse_with(data: &'data [u8], config: &DecoderConfig) -> Result<Self> {
        let strict = config.strict;
        let brand = check_signature(data)?;

        let mut meta: Option<MetaBox> = None;
        let mut track: Option<Track> = None;
        let mut seen_ftyp = false;

        let mut iter = BoxIter::new(data);
        while let Some(b) = iter.next_box()? {
            match b.head.name {
                BoxType::FileTypeBox => {
                    if seen_ftyp {
                        return Err(at(Error::MalformedContainer("duplicate ftyp box")));
                    }
                    seen_ftyp = true;
                    read_ftyp(&b)?;
                }
                BoxType::MetadataBox => {
                    if meta.is_some() {
                        return Err(at(Error::MalformedContainer("duplicate meta box")));
                    }
                    meta = Some(read_meta(&b, strict)?);
                }
                BoxType::MovieBox => {
                    if track.is_some() {
                        return Err(at(Error::MalformedContainer("duplicate moov box")));
                    }
                    track = read_moov(&b, strict)?;
                }
                BoxType::MediaDataBox => {
                    trace!("mdat: {} bytes", b.content.len());
                }
                other => debug!("skipping top-level box '{other:?}'"),
            }
        }

        let meta = meta.ok_or_else(|| at(Error::MalformedContainer("missing meta box")))?;
        let codec = match (meta.codec, meta.foreign_codec) {
            (Some(codec), _) => codec,
            (None, Some(foreign)) => {
                debug!("codec configuration '{foreign}' requires an external decoder");
                return Err(at(Error::UnsupportedFeature(
                    "payloads are not encoded with the block transform codec",
                )));
            }
            (None, None) => {
                return Err(at(Error::MalformedContainer(
                    "missing codec configuration",
                )));
            }
        };
        let (width, height) = meta
            .extents
            .ok_or_else(|| at(Error::MalformedContainer("missing ispe property")))?;

        let frames = match track.and_then(|t| t.samples.map(|s| (t.timescale, s))) {
            Some((timescale, samples)) if samples.sample_count > 0 => {
                sample_locations(&samples, timescale, data.len() as u64)?
            }
            _ => match meta.primary_item {
                Some(item_id) => {
                    let loc = meta
                        .locations
                        .iter()
                        .find(|l| l.item_id == item_id)
                        .ok_or_else(|| {
                            at(Error::MalformedContainer("primary item has no location"))
                        })?;
                    vec![FrameLocation {
                        offset: loc.offset,
                        length: loc.length,
                        duration_micros: STILL_DURATION_MICROS,
                    }]
                }
                None => Vec::new(),
            },
        };

        let color = meta.color.unwrap_or_default();
        let info = ImageInfo {
            width,
            height,
            bit_depth: codec.bit_depth,
            frame_count: frames.len() as u32,
            is_sequence: brand == BRAND_SEQUENCE,
            has_alpha: codec.has_alpha,
            premultiplied_alpha: false,
            layout: codec.layout,
            color_primaries: color.primaries,
            transfer_characteristics: color.transfer,
            matrix_coefficients: if codec.layout.is_rgb() {
                MatrixCoefficients::IDENTITY
            } else {
                color.matrix
            },
            color_range: color.range,
        };
        debug!(
            "parsed {}x{} {}-bit {:?} container with {} frame(s)",
            info.width, info.height, info.bit_depth, info.layout, info.frame_count
        );

        Ok(Self { data, info, frames })
    }

    /// Container metadata
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn frame_count(&self) -> u32 {
        self.info.frame_count
    }

    /// Per-frame metadata, in frame order
    pub fn frame_records(&self) -> impl Iterator<Item = FrameRecord> + '_ {
        self.frames.iter().enumerate().map(|(i, f)| FrameRecord {
            width: self.info.width,
            height: self.info.height,
            bit_depth: self.info.bit_depth,
            frame_index: i as u32,
            duration_micros: f.duration_micros,
        })
    }

    /// Forward-only cursor over frame payloads, starting at frame 0
    pub fn frames(&self) -> FrameCursor<'_, 'data> {
        FrameCursor {
            container: self,
            next: 0,
            error: None,
        }
    }

    fn payload(&self, loc: &FrameLocation) -> Result<&'data [u8]> {
        let start = usize::try_from(loc.offset)
            .ok()
            .filter(|&s| s <= self.data.len())
            .ok_or_else(|| at(Error::TruncatedInput("frame payload starts past end of input")))?;
        let end = match loc.length {
            Some(len) => usize::try_from(len)
                .ok()
                .and_then(|len| start.checked_add(len))
                .filter(|&e| e <= self.data.len())
                .ok_or_else(|| {
                    at(Error::TruncatedInput("frame payload extends past end of input"))
                })?,
            None => self.data.len(),
        };
        Ok(&self.data[start..end])
    }
}

/// Restartable, forward-only cursor over the frame payloads of a [`Container`].
///
/// Returns `None` when frames are exhausted or when a payload cannot be
/// located; the latter is reported by [`error`](Self::error).
pub struct FrameCursor<'c, 'data> {
    container: &'c Container<'data>,
    next: usize,
    error: Option<At<Error>>,
}

impl<'data> FrameCursor<'_, 'data> {
    pub fn next_frame_payload(&mut self) -> Option<FramePayload<'data>> {
        if self.error.is_some() {
            return None;
        }
        let loc = self.container.frames.get(self.next)?;
        match self.container.payload(loc) {
            Ok(data) => {
                let index = self.next as u32;
                self.next += 1;
                Some(FramePayload {
                    index,
                    data,
                    duration_micros: loc.duration_micros,
                })
            }
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    /// The failure that ended iteration early, if any
    pub fn error(&self) -> Option<&At<Error>> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<At<Error>> {
        self.error.take()
    }

    /// Index of the next frame to be returned
    pub fn position(&self) -> usize {
        self.next
    }

    /// Restart from frame 0 and clear any recorded error
    pub fn rewind(&mut self) {
        self.next = 0;
        self.error = None;
    }
}

impl<'data> Iterator for FrameCursor<'_, 'data> {
    type Item = FramePayload<'data>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame_payload()
    }
}

/// See ISO 14496-12:2015 § 4.3
fn read_ftyp(b: &BmffBox<'_>) -> Result<()> {
    let mut src = b.content;
    let major = read_fourcc(&mut src)?;
    let _minor_version = be_u32(&mut src)?;
    if src.len() % 4 != 0 {
        return Err(at(Error::MalformedContainer("invalid ftyp size")));
    }
    let compatible: Vec<FourCC> = src
        .chunks_exact(4)
        .map(|c| FourCC([c[0], c[1], c[2], c[3]]))
        .collect();
    trace!("ftyp major={major} compatible={compatible:?}");
    Ok(())
}

fn read_meta(b: &BmffBox<'_>, strict: bool) -> Result<MetaBox> {
    let mut src = b.content;
    let version = read_fullbox_version_no_flags(&mut src, strict)?;
    if version != 0 {
        return Err(at(Error::UnsupportedFeature("unsupported meta version")));
    }

    let mut meta = MetaBox::default();
    let mut iter = BoxIter::new(src);
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::HandlerBox => trace!("hdlr: {} bytes", b.content.len()),
            BoxType::PrimaryItemBox => {
                if meta.primary_item.is_some() {
                    return Err(at(Error::MalformedContainer("duplicate pitm box")));
                }
                meta.primary_item = Some(read_pitm(&b, strict)?);
            }
            BoxType::ItemLocationBox => {
                meta.locations = read_iloc(&b, strict)?;
            }
            BoxType::ItemPropertiesBox => read_iprp(&b, strict, &mut meta)?,
            other => debug!("skipping meta child '{other:?}'"),
        }
    }
    Ok(meta)
}

/// See ISO 14496-12:2015 § 8.11.4
fn read_pitm(b: &BmffBox<'_>, strict: bool) -> Result<u32> {
    let mut src = b.content;
    let version = read_fullbox_version_no_flags(&mut src, strict)?;
    match version {
        0 => Ok(be_u16(&mut src)?.into()),
        1 => be_u32(&mut src),
        _ => Err(at(Error::UnsupportedFeature("unsupported pitm version"))),
    }
}

fn iloc_field_size(bits: u8) -> Result<u8> {
    match bits {
        0 | 4 | 8 => Ok(bits),
        _ => Err(at(Error::MalformedContainer("invalid iloc field size"))),
    }
}

fn bit_error(_: bitreader::BitReaderError) -> At<Error> {
    at(Error::TruncatedInput("packed record shorter than its fields"))
}

/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc(b: &BmffBox<'_>, strict: bool) -> Result<Vec<ItemLocation>> {
    let mut src = b.content;
    let version = read_fullbox_version_no_flags(&mut src, strict)?;
    if version != 0 {
        return Err(at(Error::UnsupportedFeature("unsupported iloc version")));
    }

    let mut iloc = BitReader::new(src);
    let offset_size = iloc_field_size(iloc.read_u8(4).map_err(bit_error)?)?;
    let length_size = iloc_field_size(iloc.read_u8(4).map_err(bit_error)?)?;
    let base_offset_size = iloc_field_size(iloc.read_u8(4).map_err(bit_error)?)?;
    // reserved
    iloc.skip(4).map_err(bit_error)?;
    let item_count = iloc.read_u16(16).map_err(bit_error)?;

    // each item takes at least 6 bytes
    if u64::from(item_count) * 6 > src.len() as u64 {
        return Err(at(Error::TruncatedInput("iloc item count exceeds box size")));
    }
    let mut items = Vec::new();
    items
        .try_reserve_exact(item_count as usize)
        .map_err(|e| at(Error::from(e)))?;

    for _ in 0..item_count {
        let item_id = u32::from(iloc.read_u16(16).map_err(bit_error)?);
        let data_reference_index = iloc.read_u16(16).map_err(bit_error)?;
        if data_reference_index != 0 {
            return Err(at(Error::UnsupportedFeature(
                "external data references are not supported",
            )));
        }
        let base_offset = iloc
            .read_u64(base_offset_size * 8)
            .map_err(bit_error)?;
        let extent_count = iloc.read_u16(16).map_err(bit_error)?;
        if extent_count != 1 {
            return Err(at(Error::UnsupportedFeature(
                "items must have exactly one extent",
            )));
        }
        let extent_offset = iloc.read_u64(offset_size * 8).map_err(bit_error)?;
        let extent_length = iloc.read_u64(length_size * 8).map_err(bit_error)?;
        let offset = base_offset
            .checked_add(extent_offset)
            .ok_or_else(|| at(Error::MalformedContainer("iloc offset overflows")))?;
        items.push(ItemLocation {
            item_id,
            offset,
            length: (extent_length != 0).then_some(extent_length),
        });
    }
    Ok(items)
}

fn read_iprp(b: &BmffBox<'_>, strict: bool, meta: &mut MetaBox) -> Result<()> {
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::ItemPropertyContainerBox => read_ipco(&b, strict, meta)?,
            // associations are implied: every property applies to the image
            other => debug!("skipping iprp child '{other:?}'"),
        }
    }
    Ok(())
}

fn read_ipco(b: &BmffBox<'_>, strict: bool, meta: &mut MetaBox) -> Result<()> {
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::ImageSpatialExtentsProperty => {
                meta.extents = Some(read_ispe(&b, strict)?);
            }
            BoxType::ColourInformationBox => {
                if let Some(color) = read_colr(&b)? {
                    meta.color = Some(color);
                }
            }
            BoxType::BlockCodecConfigurationBox => {
                meta.codec = Some(read_btcc(&b)?);
            }
            other if other.is_foreign_codec_config() => {
                meta.foreign_codec = Some(FourCC::from(other));
            }
            other => debug!("skipping property '{other:?}'"),
        }
    }
    Ok(())
}

fn read_ispe(b: &BmffBox<'_>, strict: bool) -> Result<(u32, u32)> {
    let mut src = b.content;
    let _version = read_fullbox_version_no_flags(&mut src, strict)?;
    let width = be_u32(&mut src)?;
    let height = be_u32(&mut src)?;
    if width == 0 || height == 0 {
        return Err(at(Error::MalformedContainer("ispe dimensions cannot be zero")));
    }
    Ok((width, height))
}

/// Only `nclx` colour information is interpreted; ICC profiles are skipped.
fn read_colr(b: &BmffBox<'_>) -> Result<Option<ColorInfo>> {
    let mut src = b.content;
    let colour_type = read_fourcc(&mut src)?;
    if colour_type != FourCC(*b"nclx") {
        debug!("skipping colr type '{colour_type}'");
        return Ok(None);
    }
    let primaries = be_u16(&mut src)?;
    let transfer = be_u16(&mut src)?;
    let matrix = be_u16(&mut src)?;
    let full_range = read_u8(&mut src)? & 0x80 != 0;
    Ok(Some(ColorInfo {
        primaries: ColorPrimaries(primaries),
        transfer: TransferCharacteristics(transfer),
        matrix: MatrixCoefficients(matrix),
        range: if full_range {
            ColorRange::Full
        } else {
            ColorRange::Limited
        },
    }))
}

pub(crate) const BTCC_VERSION: u8 = 1;

/// Block codec configuration record:
///
/// ```text
/// marker(1) version(7)
/// high_bitdepth(1) twelve_bit(1) subsampling_x(1) subsampling_y(1) rgb(1) alpha(1) reserved(2)
/// reserved(16)
/// ```
fn read_btcc(b: &BmffBox<'_>) -> Result<CodecConfig> {
    let mut r = BitReader::new(b.content);
    let marker = r.read_u8(1).map_err(bit_error)?;
    let version = r.read_u8(7).map_err(bit_error)?;
    if marker != 1 {
        return Err(at(Error::MalformedContainer("invalid btcC marker")));
    }
    if version != BTCC_VERSION {
        return Err(at(Error::UnsupportedFeature("unsupported btcC version")));
    }
    let high_bitdepth = r.read_bool().map_err(bit_error)?;
    let twelve_bit = r.read_bool().map_err(bit_error)?;
    let subsampling_x = r.read_bool().map_err(bit_error)?;
    let subsampling_y = r.read_bool().map_err(bit_error)?;
    let rgb = r.read_bool().map_err(bit_error)?;
    let has_alpha = r.read_bool().map_err(bit_error)?;
    r.skip(2 + 16).map_err(bit_error)?;

    let bit_depth = match (high_bitdepth, twelve_bit) {
        (false, _) => 8,
        (true, false) => 10,
        (true, true) => 12,
    };
    let layout = match (rgb, subsampling_x, subsampling_y) {
        (true, false, false) => ChannelLayout::Rgba,
        (false, true, true) => ChannelLayout::Yuv420,
        (false, true, false) => ChannelLayout::Yuv422,
        (false, false, false) => ChannelLayout::Yuv444,
        _ => {
            return Err(at(Error::MalformedContainer(
                "invalid chroma subsampling in btcC",
            )));
        }
    };
    Ok(CodecConfig {
        bit_depth,
        layout,
        has_alpha,
    })
}

fn read_moov(b: &BmffBox<'_>, strict: bool) -> Result<Option<Track>> {
    let mut track = None;
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::TrackBox if track.is_none() => track = Some(read_trak(&b, strict)?),
            BoxType::TrackBox => debug!("ignoring additional trak"),
            BoxType::MovieHeaderBox => trace!("mvhd: {} bytes", b.content.len()),
            other => debug!("skipping moov child '{other:?}'"),
        }
    }
    Ok(track)
}

fn read_trak(b: &BmffBox<'_>, strict: bool) -> Result<Track> {
    let mut track = Track::default();
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::MediaBox => read_mdia(&b, strict, &mut track)?,
            other => debug!("skipping trak child '{other:?}'"),
        }
    }
    Ok(track)
}

fn read_mdia(b: &BmffBox<'_>, strict: bool, track: &mut Track) -> Result<()> {
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        match b.head.name {
            BoxType::MediaHeaderBox => track.timescale = read_mdhd(&b, strict)?,
            BoxType::MediaInformationBox => {
                let mut minf = b.box_iter();
                while let Some(b) = minf.next_box()? {
                    match b.head.name {
                        BoxType::SampleTableBox => track.samples = Some(read_stbl(&b, strict)?),
                        other => debug!("skipping minf child '{other:?}'"),
                    }
                }
            }
            other => debug!("skipping mdia child '{other:?}'"),
        }
    }
    Ok(())
}

/// See ISO 14496-12:2015 § 8.4.2. Returns the media timescale.
fn read_mdhd(b: &BmffBox<'_>, strict: bool) -> Result<u32> {
    let mut src = b.content;
    let version = read_fullbox_version_no_flags(&mut src, strict)?;
    let timescale = match version {
        0 => {
            let _creation_time = be_u32(&mut src)?;
            let _modification_time = be_u32(&mut src)?;
            let timescale = be_u32(&mut src)?;
            let _duration = be_u32(&mut src)?;
            timescale
        }
        1 => {
            let _creation_time = be_u64(&mut src)?;
            let _modification_time = be_u64(&mut src)?;
            let timescale = be_u32(&mut src)?;
            let _duration = be_u64(&mut src)?;
            timescale
        }
        _ => return Err(at(Error::UnsupportedFeature("unsupported mdhd version"))),
    };
    Ok(timescale)
}

fn read_stbl(b: &BmffBox<'_>, strict: bool) -> Result<SampleTable> {
    let mut table = SampleTable::default();
    let mut iter = b.box_iter();
    while let Some(b) = iter.next_box()? {
        let mut src = b.content;
        match b.head.name {
            BoxType::TimeToSampleBox => {
                read_fullbox_version_no_flags(&mut src, strict)?;
                table.time_to_sample = read_pairs(&mut src)?;
            }
            BoxType::SampleToChunkBox => {
                read_fullbox_version_no_flags(&mut src, strict)?;
                let count = counted_entries(&mut src, 12)?;
                let mut entries = Vec::new();
                entries
                    .try_reserve_exact(count)
                    .map_err(|e| at(Error::from(e)))?;
                for _ in 0..count {
                    let first_chunk = be_u32(&mut src)?;
                    let samples_per_chunk = be_u32(&mut src)?;
                    let _sample_description_index = be_u32(&mut src)?;
                    entries.push((first_chunk, samples_per_chunk));
                }
                table.sample_to_chunk = entries;
            }
            BoxType::SampleSizeBox => {
                read_fullbox_version_no_flags(&mut src, strict)?;
                table.uniform_size = be_u32(&mut src)?;
                table.sample_count = be_u32(&mut src)?;
                if table.uniform_size == 0 {
                    let count = table.sample_count as usize;
                    if count.saturating_mul(4) > src.len() {
                        return Err(at(Error::TruncatedInput("stsz shorter than its entries")));
                    }
                    table.sample_sizes = (0..count)
                        .map(|_| be_u32(&mut src))
                        .collect::<Result<_>>()?;
                }
            }
            BoxType::ChunkOffsetBox => {
                read_fullbox_version_no_flags(&mut src, strict)?;
                let count = counted_entries(&mut src, 4)?;
                table.chunk_offsets = (0..count)
                    .map(|_| be_u32(&mut src).map(u64::from))
                    .collect::<Result<_>>()?;
            }
            BoxType::ChunkLargeOffsetBox => {
                read_fullbox_version_no_flags(&mut src, strict)?;
                let count = counted_entries(&mut src, 8)?;
                table.chunk_offsets = (0..count)
                    .map(|_| be_u64(&mut src))
                    .collect::<Result<_>>()?;
            }
            other => debug!("skipping stbl child '{other:?}'"),
        }
    }
    Ok(table)
}

/// Read a 32-bit entry count and check the entries fit in what remains
fn counted_entries(src: &mut &[u8], entry_size: usize) -> Result<usize> {
    let count = be_u32(src)? as usize;
    if count.saturating_mul(entry_size) > src.len() {
        return Err(at(Error::TruncatedInput("entry table shorter than its count")));
    }
    Ok(count)
}

fn read_pairs(src: &mut &[u8]) -> Result<Vec<(u32, u32)>> {
    let count = counted_entries(src, 8)?;
    let mut entries = Vec::new();
    entries
        .try_reserve_exact(count)
        .map_err(|e| at(Error::from(e)))?;
    for _ in 0..count {
        entries.push((be_u32(src)?, be_u32(src)?));
    }
    Ok(entries)
}

/// Resolve a sample table into absolute payload locations and durations
fn sample_locations(
    table: &SampleTable,
    timescale: u32,
    input_len: u64,
) -> Result<Vec<FrameLocation>> {
    if timescale == 0 {
        return Err(at(Error::MalformedContainer("media timescale is zero")));
    }
    let count = table.sample_count as usize;
    if table.uniform_size != 0
        && u64::from(table.sample_count) * u64::from(table.uniform_size) > input_len
    {
        return Err(at(Error::TruncatedInput("samples larger than the input")));
    }

    let mut durations = Vec::new();
    durations
        .try_reserve_exact(count)
        .map_err(|e| at(Error::from(e)))?;
    for &(run, delta) in &table.time_to_sample {
        let micros = (u128::from(delta) * 1_000_000 / u128::from(timescale)) as u64;
        let take = (run as usize).min(count - durations.len());
        durations.extend(std::iter::repeat_n(micros, take));
        if durations.len() == count {
            break;
        }
    }
    if durations.len() < count {
        return Err(at(Error::MalformedContainer("stts covers fewer samples than stsz")));
    }

    let size_of = |i: usize| -> u64 {
        if table.uniform_size != 0 {
            u64::from(table.uniform_size)
        } else {
            u64::from(table.sample_sizes[i])
        }
    };

    let mut frames = Vec::new();
    frames
        .try_reserve_exact(count)
        .map_err(|e| at(Error::from(e)))?;
    for (chunk_index, &chunk_offset) in table.chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_index as u64 + 1;
        let samples_in_chunk = table
            .sample_to_chunk
            .iter()
            .rev()
            .find(|(first, _)| u64::from(*first) <= chunk_number)
            .map_or(1, |&(_, n)| n);
        let mut offset = chunk_offset;
        for _ in 0..samples_in_chunk {
            if frames.len() == count {
                break;
            }
            let i = frames.len();
            let size = size_of(i);
            frames.push(FrameLocation {
                offset,
                length: Some(size),
                duration_micros: durations[i],
            });
            offset = offset.saturating_add(size);
        }
    }
    if frames.len() < count {
        return Err(at(Error::MalformedContainer(
            "chunks hold fewer samples than stsz declares",
        )));
    }
    Ok(frames)
}
