//! # avifkit
//!
//! Self-contained AVIF-style image container codec core.
//!
//! The crate parses and writes ISO-BMFF shaped `avif` (still) and `avis`
//! (sequence) containers whose frame payloads are compressed with a built-in
//! block transform codec, and converts between the codec's planar samples and
//! RGBA exchange pixels. A [`MemoryBridge`] owns buffers handed across a host
//! boundary; the `c_api` feature exposes the same operations as raw
//! `extern "C"` functions.
//!
//! ## Quick Start
//!
//! ```no_run
//! let data = std::fs::read("image.avif").unwrap();
//! let image = avifkit::decode(&data).unwrap();
//!
//! let frame = image.first_frame().unwrap();
//! println!(
//!     "{}x{}, {} bits per channel",
//!     frame.pixels.width(),
//!     frame.pixels.height(),
//!     frame.pixels.depth()
//! );
//! ```
//!
//! ## Encoding
//!
//! ```
//! use avifkit::{EncoderConfig, encode_rgba8};
//! use imgref::ImgVec;
//! use rgb::Rgba;
//!
//! let img = ImgVec::new(vec![Rgba::new(255u8, 0, 0, 255); 16], 4, 4);
//! let encoded = encode_rgba8(img.as_ref(), &EncoderConfig::new().quality(90)).unwrap();
//! let decoded = avifkit::decode(&encoded.avif_file).unwrap();
//! assert_eq!(decoded.info.width, 4);
//! ```
//!
//! ## Configuration
//!
//! For more control over decoding, use [`decode_request`] with a
//! [`DecoderConfig`]:
//!
//! ```no_run
//! use avifkit::{ChromaUpsampling, DecodeRequest, DecoderConfig, decode_request};
//!
//! let config = DecoderConfig::new()
//!     .chroma_upsampling(ChromaUpsampling::BestQuality)
//!     .frame_size_limit(8192 * 8192);
//!
//! let data = std::fs::read("animation.avif").unwrap();
//! let image = decode_request(&DecodeRequest::new(&data), &config).unwrap();
//! println!("{} frames", image.frames.len());
//! ```

#![deny(unsafe_code)]

mod boxes;
mod bridge;
mod chroma;
mod codec;
mod config;
mod container;
mod convert;
mod decoder;
mod encoder;
mod error;
#[cfg(feature = "c_api")]
#[allow(unsafe_code)]
pub mod ffi;
mod image;
mod mux;
#[cfg(feature = "_dev")]
#[doc(hidden)]
pub mod yuv_convert;
#[cfg(not(feature = "_dev"))]
mod yuv_convert;

pub use boxes::FourCC;
pub use bridge::{
    BridgeDecodeOutput, BudgetAllocator, BufferHandle, DecodeFlags, HostAllocator, MemoryBridge,
    SystemAllocator,
};
pub use codec::{
    BlockTransformCodec, CodecError, CodecParams, EncodedFrame, PAYLOAD_VERSION,
    QuantizingBlockCodec,
};
pub use config::{ChromaUpsampling, DecoderConfig, EncoderConfig};
pub use container::{
    Container, FrameCursor, FramePayload, FrameRecord, STILL_DURATION_MICROS, check_signature,
};
pub use convert::{ConversionOptions, from_exchange_format, to_exchange_format};
pub use decoder::{DecodeRequest, decode_request, decode_with_codec};
pub use encoder::{
    EncodeRequest, EncodedImage, SequenceFrame, encode_request, encode_rgba8, encode_sequence,
    encode_with_codec,
};
pub use error::{Error, Result};
pub use image::{
    ChannelLayout, ColorPrimaries, ColorRange, DecodedFrame, DecodedImage, ExchangeBuffer,
    ExchangePixels, ImageInfo, MatrixCoefficients, SampleBuffer, SampleFormat,
    TransferCharacteristics,
};
pub use mux::{ContainerWriter, FrameLayout};
pub use yuv_convert::Upsampling;

/// Decode the first frame with default settings
///
/// This is a convenience function for still images. Use [`decode_all`] for
/// every frame of a sequence.
///
/// # Example
///
/// ```no_run
/// let data = std::fs::read("image.avif").unwrap();
/// let image = avifkit::decode(&data).unwrap();
/// ```
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    decode_request(
        &DecodeRequest::new(data).decode_all(false),
        &DecoderConfig::default(),
    )
}

/// Decode every frame with default settings
pub fn decode_all(data: &[u8]) -> Result<DecodedImage> {
    decode_request(&DecodeRequest::new(data), &DecoderConfig::default())
}

/// Read container metadata without decoding any pixels
pub fn probe(data: &[u8]) -> Result<ImageInfo> {
    decode_request(
        &DecodeRequest::new(data).config_only(true),
        &DecoderConfig::default(),
    )
    .map(|image| image.info)
}
