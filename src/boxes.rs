//! Box types and low-level box reading
//!
//! Boxes are a 32-bit big-endian size, a four-character type, and content.
//! A size of 1 means a 64-bit size follows the type; a size of 0 means the
//! box runs to the end of its parent.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use core::fmt;
use whereat::at;

/// Four-character code, printed as text when it is printable
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl From<u32> for FourCC {
    fn from(v: u32) -> Self {
        Self(v.to_be_bytes())
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        Self::from(u32::from(t))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
            for &c in &self.0 {
                write!(f, "{}", c as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:expr),* $(,)?) => {
        /// Known box types
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                match t {
                    $(x if x == $boxtype => BoxType::$boxenum),*,
                    _ => BoxType::UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                match b {
                    $(BoxType::$boxenum => $boxtype),*,
                    BoxType::UnknownBox(t) => t,
                }
            }
        }
    };
}

const fn fourcc(s: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*s)
}

box_database!(
    FileTypeBox fourcc(b"ftyp"),
    MetadataBox fourcc(b"meta"),
    HandlerBox fourcc(b"hdlr"),
    PrimaryItemBox fourcc(b"pitm"),
    ItemLocationBox fourcc(b"iloc"),
    ItemPropertiesBox fourcc(b"iprp"),
    ItemPropertyContainerBox fourcc(b"ipco"),
    ImageSpatialExtentsProperty fourcc(b"ispe"),
    ColourInformationBox fourcc(b"colr"),
    BlockCodecConfigurationBox fourcc(b"btcC"),
    AV1CodecConfigurationBox fourcc(b"av1C"),
    HEVCCodecConfigurationBox fourcc(b"hvcC"),
    AVCCodecConfigurationBox fourcc(b"avcC"),
    VVCCodecConfigurationBox fourcc(b"vvcC"),
    MovieBox fourcc(b"moov"),
    MovieHeaderBox fourcc(b"mvhd"),
    TrackBox fourcc(b"trak"),
    MediaBox fourcc(b"mdia"),
    MediaHeaderBox fourcc(b"mdhd"),
    MediaInformationBox fourcc(b"minf"),
    SampleTableBox fourcc(b"stbl"),
    TimeToSampleBox fourcc(b"stts"),
    SampleToChunkBox fourcc(b"stsc"),
    SampleSizeBox fourcc(b"stsz"),
    ChunkOffsetBox fourcc(b"stco"),
    ChunkLargeOffsetBox fourcc(b"co64"),
    MediaDataBox fourcc(b"mdat"),
);

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&FourCC::from(*self), f)
    }
}

impl BoxType {
    /// Codec configuration records this crate recognizes but cannot decode
    pub(crate) fn is_foreign_codec_config(self) -> bool {
        matches!(
            self,
            BoxType::AV1CodecConfigurationBox
                | BoxType::HEVCCodecConfigurationBox
                | BoxType::AVCCodecConfigurationBox
                | BoxType::VVCCodecConfigurationBox
        )
    }
}

/// Major brand of a still image
pub const BRAND_STILL: [u8; 4] = *b"avif";
/// Major brand of an image sequence
pub const BRAND_SEQUENCE: [u8; 4] = *b"avis";

#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxHeader {
    pub name: BoxType,
    /// Total size including the header
    pub size: u64,
    /// Header length (8 or 16)
    pub offset: u64,
}

impl BoxHeader {
    pub const MIN_SIZE: u64 = 8;
    pub const MIN_LARGE_SIZE: u64 = 16;
}

/// A box with its content borrowed from the input
pub(crate) struct BmffBox<'a> {
    pub head: BoxHeader,
    pub content: &'a [u8],
}

impl<'a> BmffBox<'a> {
    pub fn box_iter(&self) -> BoxIter<'a> {
        BoxIter::new(self.content)
    }
}

/// Walks sibling boxes inside a byte range
pub(crate) struct BoxIter<'a> {
    src: &'a [u8],
}

impl<'a> BoxIter<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src }
    }

    pub fn next_box(&mut self) -> Result<Option<BmffBox<'a>>> {
        if self.src.is_empty() {
            return Ok(None);
        }
        let head = read_box_header(self.src)?;
        let size = usize::try_from(head.size)
            .map_err(|_| at(Error::TruncatedInput("box extends past end of input")))?;
        let content = &self.src[head.offset as usize..size];
        self.src = &self.src[size..];
        Ok(Some(BmffBox { head, content }))
    }
}

/// Read and validate a box header at the start of `src`.
///
/// A size-0 box is resolved to the length of `src`. The returned size never
/// exceeds `src.len()`.
pub(crate) fn read_box_header(src: &[u8]) -> Result<BoxHeader> {
    let mut r = src;
    if r.len() < BoxHeader::MIN_SIZE as usize {
        return Err(at(Error::TruncatedInput("box header cut short")));
    }
    let size32 = be_u32(&mut r)?;
    let name = BoxType::from(be_u32(&mut r)?);
    let available = src.len() as u64;
    let (size, offset) = match size32 {
        0 => (available, BoxHeader::MIN_SIZE),
        1 => {
            if r.len() < 8 {
                return Err(at(Error::TruncatedInput("box header cut short")));
            }
            let size64 = be_u64(&mut r)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(at(Error::MalformedContainer("malformed wide size")));
            }
            (size64, BoxHeader::MIN_LARGE_SIZE)
        }
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(at(Error::MalformedContainer("malformed size")));
            }
            (u64::from(size32), BoxHeader::MIN_SIZE)
        }
    };
    if size > available {
        return Err(at(Error::TruncatedInput("box extends past end of input")));
    }
    Ok(BoxHeader { name, size, offset })
}

/// Parse the version and 24-bit flags of a full box
pub(crate) fn read_fullbox_extra(src: &mut &[u8]) -> Result<(u8, u32)> {
    let version = read_u8(src)?;
    let flags_a = read_u8(src)?;
    let flags_b = read_u8(src)?;
    let flags_c = read_u8(src)?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

/// Parse a full box header whose flags must be zero
pub(crate) fn read_fullbox_version_no_flags(src: &mut &[u8], strict: bool) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;
    if flags != 0 {
        if strict {
            return Err(at(Error::MalformedContainer("expected flags to be 0")));
        }
        log::debug!("ignoring non-zero full box flags {flags:#x}");
    }
    Ok(version)
}

fn short_read(_: std::io::Error) -> whereat::At<Error> {
    at(Error::TruncatedInput("box content shorter than its fields"))
}

pub(crate) fn read_u8(src: &mut &[u8]) -> Result<u8> {
    src.read_u8().map_err(short_read)
}

pub(crate) fn be_u16(src: &mut &[u8]) -> Result<u16> {
    src.read_u16::<BigEndian>().map_err(short_read)
}

pub(crate) fn be_u32(src: &mut &[u8]) -> Result<u32> {
    src.read_u32::<BigEndian>().map_err(short_read)
}

pub(crate) fn be_u64(src: &mut &[u8]) -> Result<u64> {
    src.read_u64::<BigEndian>().map_err(short_read)
}

pub(crate) fn read_fourcc(src: &mut &[u8]) -> Result<FourCC> {
    be_u32(src).map(FourCC::from)
}
