//! Decoder and encoder configuration

use crate::image::ChannelLayout;

/// Chroma upsampling policy for subsampled (4:2:0 / 4:2:2) images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaUpsampling {
    /// Bilinear for stills and single-frame decodes; nearest-neighbor
    /// when every frame of a multi-frame sequence is requested
    #[default]
    Automatic,
    /// Always bilinear
    BestQuality,
}

/// Configuration for decoding
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Upsampling policy for subsampled chroma
    pub(crate) chroma_upsampling: ChromaUpsampling,
    /// Whether exchange pixels carry premultiplied alpha
    pub(crate) alpha_premultiplied: bool,
    /// Reject non-zero flags on boxes that define none
    pub(crate) strict: bool,
    /// Largest accepted width * height, or 0 for unbounded
    pub(crate) frame_size_limit: u32,
    /// Maximum number of frames in a sequence (0 = no limit)
    pub(crate) max_frames: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chroma_upsampling: ChromaUpsampling::default(),
            alpha_premultiplied: true,
            strict: true,
            frame_size_limit: 0,
            max_frames: 10_000,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chroma upsampling policy
    pub fn chroma_upsampling(mut self, policy: ChromaUpsampling) -> Self {
        self.chroma_upsampling = policy;
        self
    }

    /// Premultiply color by alpha in the decoded output (default: true)
    pub fn alpha_premultiplied(mut self, premultiplied: bool) -> Self {
        self.alpha_premultiplied = premultiplied;
        self
    }

    /// Enable or disable strict box validation
    ///
    /// When disabled, reserved flag bits on full boxes are ignored instead of
    /// rejected.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Cap the pixel count of a frame.
    ///
    /// Containers declaring a larger canvas fail with
    /// [`Error::ImageTooLarge`](crate::Error::ImageTooLarge) before any
    /// payload is decoded. Pass 0 to disable the check.
    pub fn frame_size_limit(mut self, limit: u32) -> Self {
        self.frame_size_limit = limit;
        self
    }

    /// Set the maximum number of frames a sequence may declare. 0 means no limit.
    pub fn max_frames(mut self, limit: u32) -> Self {
        self.max_frames = limit;
        self
    }
}

/// Configuration for encoding
///
/// Uses a builder pattern matching [`DecoderConfig`].
///
/// # Example
///
/// ```
/// use avifkit::{ChannelLayout, EncoderConfig};
///
/// let config = EncoderConfig::new()
///     .quality(80)
///     .speed(6)
///     .layout(ChannelLayout::Yuv444);
/// ```
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub(crate) quality: u8,
    pub(crate) alpha_quality: Option<u8>,
    pub(crate) speed: u8,
    pub(crate) layout: ChannelLayout,
    pub(crate) alpha_premultiplied: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 60,
            alpha_quality: None,
            speed: 10,
            layout: ChannelLayout::Yuv420,
            alpha_premultiplied: true,
        }
    }
}

impl EncoderConfig {
    /// Create a new encoder configuration with default settings
    ///
    /// Defaults: quality 60, speed 10, 4:2:0, premultiplied input
    pub fn new() -> Self {
        Self::default()
    }

    /// Set encoding quality (0 = worst, 100 = lossless)
    ///
    /// Values above 100 are passed to the codec unchanged and rejected there.
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Set separate quality for the alpha channel
    ///
    /// If not set, uses the same quality as color.
    pub fn alpha_quality(mut self, quality: u8) -> Self {
        self.alpha_quality = Some(quality);
        self
    }

    /// Set encoding speed (0 = slowest/smallest, 10 = fastest)
    pub fn speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }

    /// Set the channel layout stored in the container
    pub fn layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Whether the input pixels have premultiplied alpha (default: true)
    pub fn alpha_premultiplied(mut self, premultiplied: bool) -> Self {
        self.alpha_premultiplied = premultiplied;
        self
    }

    pub(crate) fn effective_alpha_quality(&self) -> u8 {
        self.alpha_quality.unwrap_or(self.quality)
    }
}
