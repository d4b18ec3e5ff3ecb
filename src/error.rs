//! Error types for avifkit

/// Error type for container parsing, decoding, encoding and buffer bridging
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing signature or structurally invalid box layout
    #[error("Malformed container: {0}")]
    MalformedContainer(&'static str),

    /// A declared length runs past the end of the input
    #[error("Truncated input: {0}")]
    TruncatedInput(&'static str),

    /// A mandatory record uses a version or codec this crate does not handle
    #[error("Unsupported: {0}")]
    UnsupportedFeature(&'static str),

    /// The block transform codec rejected a frame payload
    #[error("Frame {frame_index} failed to decode: {reason}")]
    FrameDecodeFailed {
        /// Zero-based index of the failing frame
        frame_index: u32,
        /// Codec diagnostic
        reason: String,
    },

    /// Invalid pixel format combination or buffer size
    #[error("Unsupported conversion: {0}")]
    UnsupportedConversion(&'static str),

    /// The YUV to RGB converter rejected the plane geometry
    #[error("Color conversion error: {0}")]
    ColorConversion(#[from] yuv::YuvError),

    /// The block transform codec rejected the encode parameters or input
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Image dimensions exceed configured limit
    #[error("Image too large: {width}x{height}")]
    ImageTooLarge {
        /// Image width
        width: u32,
        /// Image height
        height: u32,
    },

    /// A configured resource limit (other than frame size) was exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// Memory allocation failed
    #[error("Out of memory")]
    OutOfMemory,
}

impl Error {
    /// Stable numeric code for this error, used across the raw `extern "C"` boundary.
    ///
    /// `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Error::MalformedContainer(_) => 1,
            Error::TruncatedInput(_) => 2,
            Error::UnsupportedFeature(_) => 3,
            Error::FrameDecodeFailed { .. } => 4,
            Error::UnsupportedConversion(_) => 5,
            Error::EncodeFailed(_) => 6,
            Error::OutOfMemory => 7,
            Error::ImageTooLarge { .. } => 8,
            Error::LimitExceeded(_) => 9,
            Error::ColorConversion(_) => 10,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

/// Result type for avifkit operations with location tracking
pub type Result<T, E = whereat::At<Error>> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_nonzero() {
        let errors = [
            Error::MalformedContainer("x"),
            Error::TruncatedInput("x"),
            Error::UnsupportedFeature("x"),
            Error::FrameDecodeFailed {
                frame_index: 0,
                reason: String::new(),
            },
            Error::UnsupportedConversion("x"),
            Error::EncodeFailed(String::new()),
            Error::OutOfMemory,
            Error::ImageTooLarge {
                width: 1,
                height: 1,
            },
            Error::LimitExceeded("x"),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn frame_index_in_message() {
        let err = Error::FrameDecodeFailed {
            frame_index: 3,
            reason: "truncated payload".into(),
        };
        assert_eq!(
            err.to_string(),
            "Frame 3 failed to decode: truncated payload"
        );
    }
}
