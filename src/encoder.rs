//! Frame encode pipeline
//!
//! Provides [`encode_rgba8`] / [`encode_request`] for still images and
//! [`encode_sequence`] for animations. Pixels are converted to planar samples,
//! compressed by a [`BlockTransformCodec`] and wrapped in a container.

use crate::Result;
use crate::codec::{BlockTransformCodec, CodecParams, QuantizingBlockCodec};
use crate::config::EncoderConfig;
use crate::convert::from_exchange_format;
use crate::error::Error;
use crate::image::{ColorRange, ExchangeBuffer, MatrixCoefficients, SampleBuffer};
use crate::mux::{ContainerWriter, FrameLayout};
use imgref::{ImgRef, ImgVec};
use rgb::Rgba;
use whereat::at;

/// Encoded container output
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// The complete container bytes
    pub avif_file: Vec<u8>,
    /// Bytes used for color payload data
    pub color_byte_size: usize,
    /// Bytes used for alpha payload data
    pub alpha_byte_size: usize,
}

/// Encode parameters for packed 8-bit RGBA bytes
#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    /// `width * height * 4` bytes of RGBA
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub config: EncoderConfig,
}

impl<'a> EncodeRequest<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            config: EncoderConfig::default(),
        }
    }

    pub fn config(mut self, config: EncoderConfig) -> Self {
        self.config = config;
        self
    }
}

/// One frame of an animation
#[derive(Debug, Clone, Copy)]
pub struct SequenceFrame<'a> {
    pub pixels: ImgRef<'a, Rgba<u8>>,
    /// Display duration in microseconds
    pub duration_micros: u64,
}

/// Samples are always stored at 8 bits
const ENCODE_DEPTH: u8 = 8;

fn matrix_for(config: &EncoderConfig) -> MatrixCoefficients {
    if config.layout.is_rgb() {
        MatrixCoefficients::IDENTITY
    } else {
        MatrixCoefficients::BT601
    }
}

fn codec_params(config: &EncoderConfig) -> CodecParams {
    CodecParams {
        quality: config.quality,
        alpha_quality: config.effective_alpha_quality(),
        speed: config.speed,
    }
}

fn to_samples(pixels: &ExchangeBuffer, config: &EncoderConfig) -> Result<SampleBuffer> {
    from_exchange_format(
        pixels,
        config.layout,
        ENCODE_DEPTH,
        matrix_for(config),
        ColorRange::Full,
    )
}

fn exchange_from_img(img: ImgRef<'_, Rgba<u8>>, premultiplied: bool) -> Result<ExchangeBuffer> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(img.width() * img.height())
        .map_err(|e| at(Error::from(e)))?;
    buf.extend(img.pixels());
    Ok(ExchangeBuffer::from_rgba8(
        ImgVec::new(buf, img.width(), img.height()),
        premultiplied,
    ))
}

fn frame_layout(samples: &SampleBuffer, has_alpha: bool) -> FrameLayout {
    FrameLayout {
        width: samples.width(),
        height: samples.height(),
        bit_depth: samples.bit_depth(),
        layout: samples.layout(),
        has_alpha,
    }
}

/// Encode an exchange buffer as a still image with a caller-supplied codec
pub fn encode_with_codec<C: BlockTransformCodec + ?Sized>(
    pixels: &ExchangeBuffer,
    config: &EncoderConfig,
    codec: &C,
) -> Result<EncodedImage> {
    let mut samples = to_samples(pixels, config)?;
    if samples.is_opaque() {
        samples.remove_alpha();
    }
    let frame = codec
        .encode_frame(&samples, &codec_params(config))
        .map_err(|e| at(Error::EncodeFailed(e.to_string())))?;
    let layout = frame_layout(&samples, samples.alpha().is_some());
    drop(samples);

    let avif_file = ContainerWriter::new(layout)
        .matrix(matrix_for(config))
        .write_still(&frame.data)?;
    log::debug!(
        "encoded {}x{} still: {} bytes",
        layout.width,
        layout.height,
        avif_file.len()
    );
    Ok(EncodedImage {
        avif_file,
        color_byte_size: frame.color_bytes,
        alpha_byte_size: frame.alpha_bytes,
    })
}

/// Encode an 8-bit RGBA image
///
/// Whether the input is premultiplied is taken from
/// [`EncoderConfig::alpha_premultiplied`].
pub fn encode_rgba8(img: ImgRef<'_, Rgba<u8>>, config: &EncoderConfig) -> Result<EncodedImage> {
    let pixels = exchange_from_img(img, config.alpha_premultiplied)?;
    encode_with_codec(&pixels, config, &QuantizingBlockCodec)
}

/// Encode packed RGBA bytes
///
/// Fails with [`Error::UnsupportedConversion`] when the byte length is not
/// `width * height * 4`.
pub fn encode_request(request: &EncodeRequest<'_>) -> Result<EncodedImage> {
    let pixels = ExchangeBuffer::from_bytes(
        request.pixels,
        request.width,
        request.height,
        8,
        request.config.alpha_premultiplied,
    )?;
    encode_with_codec(&pixels, &request.config, &QuantizingBlockCodec)
}

/// Encode equally sized frames as an image sequence
pub fn encode_sequence(frames: &[SequenceFrame<'_>], config: &EncoderConfig) -> Result<EncodedImage> {
    let first = frames
        .first()
        .ok_or_else(|| at(Error::EncodeFailed("sequence has no frames".into())))?;
    let (width, height) = (first.pixels.width(), first.pixels.height());
    if frames
        .iter()
        .any(|f| f.pixels.width() != width || f.pixels.height() != height)
    {
        return Err(at(Error::UnsupportedConversion(
            "sequence frames differ in size",
        )));
    }

    let mut samples = Vec::with_capacity(frames.len());
    for frame in frames {
        let pixels = exchange_from_img(frame.pixels, config.alpha_premultiplied)?;
        samples.push(to_samples(&pixels, config)?);
    }
    // alpha is all-or-nothing across a sequence
    let has_alpha = samples.iter().any(|s| !s.is_opaque());
    if !has_alpha {
        samples.iter_mut().for_each(SampleBuffer::remove_alpha);
    }

    let params = codec_params(config);
    let codec = QuantizingBlockCodec;
    let mut payloads = Vec::with_capacity(frames.len());
    let (mut color_byte_size, mut alpha_byte_size) = (0, 0);
    for (i, (s, frame)) in samples.iter().zip(frames).enumerate() {
        let encoded = codec
            .encode_frame(s, &params)
            .map_err(|e| at(Error::EncodeFailed(e.to_string())))?;
        let duration = u32::try_from(frame.duration_micros).map_err(|_| {
            at(Error::EncodeFailed(format!("frame {i} duration too long")))
        })?;
        color_byte_size += encoded.color_bytes;
        alpha_byte_size += encoded.alpha_bytes;
        payloads.push((encoded.data, duration));
    }
    let layout = frame_layout(&samples[0], has_alpha);
    drop(samples);

    let entries: Vec<(&[u8], u32)> = payloads
        .iter()
        .map(|(data, duration)| (data.as_slice(), *duration))
        .collect();
    let avif_file = ContainerWriter::new(layout)
        .matrix(matrix_for(config))
        .write_sequence(&entries)?;
    log::debug!(
        "encoded {} frame {}x{} sequence: {} bytes",
        frames.len(),
        width,
        height,
        avif_file.len()
    );
    Ok(EncodedImage {
        avif_file,
        color_byte_size,
        alpha_byte_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::image::ChannelLayout;

    fn solid(width: usize, height: usize, px: Rgba<u8>) -> ImgVec<Rgba<u8>> {
        ImgVec::new(vec![px; width * height], width, height)
    }

    #[test]
    fn opaque_input_drops_alpha() {
        let img = solid(6, 5, Rgba::new(10, 200, 30, 255));
        let out = encode_rgba8(img.as_ref(), &EncoderConfig::new()).unwrap();
        assert_eq!(out.alpha_byte_size, 0);
        let container = Container::parse(&out.avif_file).unwrap();
        assert!(!container.info().has_alpha);
        assert_eq!((container.info().width, container.info().height), (6, 5));
        assert!(!container.info().is_sequence);
    }

    #[test]
    fn translucent_input_keeps_alpha() {
        let img = solid(4, 4, Rgba::new(10, 20, 30, 40));
        let out = encode_rgba8(img.as_ref(), &EncoderConfig::new()).unwrap();
        assert!(out.alpha_byte_size > 0);
        assert!(Container::parse(&out.avif_file).unwrap().info().has_alpha);
    }

    #[test]
    fn request_length_mismatch() {
        let request = EncodeRequest::new(&[0u8; 63], 4, 4);
        let err = encode_request(&request).unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
    }

    #[test]
    fn codec_rejections_become_encode_failed() {
        let bytes = [255u8; 64];
        for config in [EncoderConfig::new().quality(101), EncoderConfig::new().speed(11)] {
            let request = EncodeRequest::new(&bytes, 4, 4).config(config);
            let err = encode_request(&request).unwrap_err();
            assert!(matches!(err.error(), Error::EncodeFailed(_)));
        }
    }

    #[test]
    fn rgba_layout_signals_identity_matrix() {
        let img = solid(3, 3, Rgba::new(1, 2, 3, 255));
        let config = EncoderConfig::new().layout(ChannelLayout::Rgba);
        let out = encode_rgba8(img.as_ref(), &config).unwrap();
        let info = Container::parse(&out.avif_file).unwrap().info().clone();
        assert_eq!(info.layout, ChannelLayout::Rgba);
        assert_eq!(info.matrix_coefficients, MatrixCoefficients::IDENTITY);
    }

    #[test]
    fn sequence_rejects_mixed_sizes_and_empty() {
        let a = solid(4, 4, Rgba::new(0, 0, 0, 255));
        let b = solid(4, 5, Rgba::new(0, 0, 0, 255));
        let frames = [
            SequenceFrame {
                pixels: a.as_ref(),
                duration_micros: 1,
            },
            SequenceFrame {
                pixels: b.as_ref(),
                duration_micros: 1,
            },
        ];
        let err = encode_sequence(&frames, &EncoderConfig::new()).unwrap_err();
        assert!(matches!(err.error(), Error::UnsupportedConversion(_)));
        let err = encode_sequence(&[], &EncoderConfig::new()).unwrap_err();
        assert!(matches!(err.error(), Error::EncodeFailed(_)));
    }

    #[test]
    fn sequence_alpha_follows_any_translucent_frame() {
        let a = solid(4, 4, Rgba::new(9, 9, 9, 255));
        let b = solid(4, 4, Rgba::new(9, 9, 9, 100));
        let frames = [
            SequenceFrame {
                pixels: a.as_ref(),
                duration_micros: 40_000,
            },
            SequenceFrame {
                pixels: b.as_ref(),
                duration_micros: 60_000,
            },
        ];
        let out = encode_sequence(&frames, &EncoderConfig::new()).unwrap();
        let container = Container::parse(&out.avif_file).unwrap();
        assert!(container.info().has_alpha);
        assert!(container.info().is_sequence);
        let durations: Vec<u64> = container.frame_records().map(|r| r.duration_micros).collect();
        assert_eq!(durations, [40_000, 60_000]);
    }
}
