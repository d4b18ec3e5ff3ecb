//! Frame decode pipeline
//!
//! Parses a container, runs each requested frame payload through a
//! [`BlockTransformCodec`] and converts the samples to exchange pixels.

use crate::codec::{BlockTransformCodec, QuantizingBlockCodec};
use crate::config::{ChromaUpsampling, DecoderConfig};
use crate::container::Container;
use crate::convert::{ConversionOptions, to_exchange_format};
use crate::error::{Error, Result};
use crate::image::{DecodedFrame, DecodedImage, ImageInfo, SampleBuffer};
use crate::yuv_convert::Upsampling;
use log::{debug, trace};
use whereat::at;

/// What to decode from a container
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    pub(crate) data: &'a [u8],
    pub(crate) config_only: bool,
    pub(crate) decode_all: bool,
}

impl<'a> DecodeRequest<'a> {
    /// Decode every frame of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            config_only: false,
            decode_all: true,
        }
    }

    /// Return metadata only, allocating no pixels
    pub fn config_only(mut self, config_only: bool) -> Self {
        self.config_only = config_only;
        self
    }

    /// Decode all frames, or stop after the first
    pub fn decode_all(mut self, decode_all: bool) -> Self {
        self.decode_all = decode_all;
        self
    }
}

/// Decode with the built-in codec
pub fn decode_request(request: &DecodeRequest<'_>, config: &DecoderConfig) -> Result<DecodedImage> {
    decode_with_codec(request, config, &QuantizingBlockCodec)
}

fn check_limits(info: &ImageInfo, config: &DecoderConfig) -> Result<()> {
    if config.frame_size_limit != 0
        && u64::from(info.width) * u64::from(info.height) > u64::from(config.frame_size_limit)
    {
        return Err(at(Error::ImageTooLarge {
            width: info.width,
            height: info.height,
        }));
    }
    if config.max_frames != 0 && info.frame_count > config.max_frames {
        return Err(at(Error::LimitExceeded("frame count exceeds max_frames")));
    }
    Ok(())
}

fn check_frame(samples: &SampleBuffer, info: &ImageInfo) -> std::result::Result<(), &'static str> {
    if samples.width() != info.width || samples.height() != info.height {
        return Err("frame dimensions differ from container");
    }
    if samples.bit_depth() != info.bit_depth {
        return Err("frame bit depth differs from container");
    }
    if samples.layout() != info.layout {
        return Err("frame channel layout differs from container");
    }
    if samples.alpha().is_some() && !info.has_alpha {
        return Err("frame has alpha but container declares none");
    }
    Ok(())
}

/// Decode with a caller-supplied codec
pub fn decode_with_codec<C: BlockTransformCodec + ?Sized>(
    request: &DecodeRequest<'_>,
    config: &DecoderConfig,
    codec: &C,
) -> Result<DecodedImage> {
    let container = Container::parse_with(request.data, config)?;
    let mut info = container.info().clone();
    info.premultiplied_alpha = config.alpha_premultiplied;

    if request.config_only {
        return Ok(DecodedImage {
            info,
            frames: Vec::new(),
        });
    }
    check_limits(&info, config)?;

    let wanted = if request.decode_all {
        info.frame_count as usize
    } else {
        info.frame_count.min(1) as usize
    };
    let upsampling = match config.chroma_upsampling {
        ChromaUpsampling::Automatic if request.decode_all && info.frame_count > 1 => {
            Upsampling::Nearest
        }
        _ => Upsampling::Bilinear,
    };
    debug!("decoding {wanted} of {} frame(s), {upsampling:?} chroma", info.frame_count);
    let options = ConversionOptions {
        alpha_premultiplied: config.alpha_premultiplied,
        upsampling,
    };

    let mut frames = Vec::new();
    frames
        .try_reserve_exact(wanted)
        .map_err(|e| at(Error::from(e)))?;

    let mut cursor = container.frames();
    for payload in cursor.by_ref().take(wanted) {
        let frame_failed = |reason: String| {
            at(Error::FrameDecodeFailed {
                frame_index: payload.index,
                reason,
            })
        };
        let samples = codec
            .decode_frame(payload.data)
            .map_err(|e| frame_failed(e.to_string()))?;
        check_frame(&samples, &info).map_err(|reason| frame_failed(reason.into()))?;

        let pixels = to_exchange_format(
            &samples,
            &options,
            info.matrix_coefficients,
            info.color_range,
        )?;
        trace!(
            "frame {}: {} payload bytes, {} us",
            payload.index,
            payload.data.len(),
            payload.duration_micros
        );
        frames.push(DecodedFrame {
            index: payload.index,
            pixels,
            duration_micros: payload.duration_micros,
        });
    }
    if let Some(e) = cursor.take_error() {
        return Err(e);
    }

    Ok(DecodedImage { info, frames })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, CodecParams, EncodedFrame};
    use crate::image::{ChannelLayout, ExchangePixels};
    use crate::mux::{ContainerWriter, FrameLayout};

    fn layout(width: u32, height: u32) -> FrameLayout {
        FrameLayout {
            width,
            height,
            bit_depth: 8,
            layout: ChannelLayout::Yuv420,
            has_alpha: false,
        }
    }

    fn payload(width: u32, height: u32, luma: u16) -> Vec<u8> {
        let mut samples = SampleBuffer::new(width, height, ChannelLayout::Yuv420, 8, false).unwrap();
        for v in samples.plane_mut(0).buf_mut() {
            *v = luma;
        }
        let params = CodecParams {
            quality: 100,
            alpha_quality: 100,
            speed: 10,
        };
        QuantizingBlockCodec.encode_frame(&samples, &params).unwrap().data
    }

    fn sequence(count: usize) -> Vec<u8> {
        let payloads: Vec<Vec<u8>> = (0..count).map(|i| payload(4, 4, 40 * i as u16)).collect();
        let frames: Vec<(&[u8], u32)> = payloads.iter().map(|p| (p.as_slice(), 100_000)).collect();
        ContainerWriter::new(layout(4, 4)).write_sequence(&frames).unwrap()
    }

    /// Fails on one chosen frame, decodes the rest normally
    struct FailingCodec {
        fail_at: usize,
        calls: std::cell::Cell<usize>,
    }

    impl BlockTransformCodec for FailingCodec {
        fn encode_frame(
            &self,
            samples: &SampleBuffer,
            params: &CodecParams,
        ) -> std::result::Result<EncodedFrame, CodecError> {
            QuantizingBlockCodec.encode_frame(samples, params)
        }

        fn decode_frame(&self, payload: &[u8]) -> std::result::Result<SampleBuffer, CodecError> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if call == self.fail_at {
                return Err(CodecError::InvalidPayload("injected failure"));
            }
            QuantizingBlockCodec.decode_frame(payload)
        }
    }

    #[test]
    fn config_only_has_metadata_and_no_frames() {
        let data = sequence(3);
        let config = DecoderConfig::new().frame_size_limit(1);
        let image = decode_request(&DecodeRequest::new(&data).config_only(true), &config).unwrap();
        assert!(image.frames.is_empty());
        assert_eq!(image.info.frame_count, 3);

        let full = decode_request(&DecodeRequest::new(&data), &DecoderConfig::new()).unwrap();
        assert_eq!(full.info, image.info);
    }

    #[test]
    fn decode_all_false_returns_first_frame() {
        let data = sequence(3);
        let image =
            decode_request(&DecodeRequest::new(&data).decode_all(false), &DecoderConfig::new())
                .unwrap();
        assert_eq!(image.frames.len(), 1);
        assert_eq!(image.frames[0].index, 0);
    }

    #[test]
    fn frame_size_limit_enforced() {
        let data = sequence(1);
        let config = DecoderConfig::new().frame_size_limit(15);
        let err = decode_request(&DecodeRequest::new(&data), &config).unwrap_err();
        assert!(matches!(err.error(), Error::ImageTooLarge { width: 4, height: 4 }));
    }

    #[test]
    fn max_frames_enforced() {
        let data = sequence(3);
        let config = DecoderConfig::new().max_frames(2);
        let err = decode_request(&DecodeRequest::new(&data), &config).unwrap_err();
        assert!(matches!(err.error(), Error::LimitExceeded(_)));
        let config = DecoderConfig::new().max_frames(0);
        assert!(decode_request(&DecodeRequest::new(&data), &config).is_ok());
    }

    #[test]
    fn codec_failure_reports_frame_index() {
        let data = sequence(3);
        let codec = FailingCodec {
            fail_at: 1,
            calls: std::cell::Cell::new(0),
        };
        let err =
            decode_with_codec(&DecodeRequest::new(&data), &DecoderConfig::new(), &codec).unwrap_err();
        match err.error() {
            Error::FrameDecodeFailed { frame_index, reason } => {
                assert_eq!(*frame_index, 1);
                assert!(reason.contains("injected failure"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn payload_geometry_must_match_container() {
        let p = payload(8, 4, 10);
        let data = ContainerWriter::new(layout(4, 4)).write_still(&p).unwrap();
        let err = decode_request(&DecodeRequest::new(&data), &DecoderConfig::new()).unwrap_err();
        assert!(matches!(err.error(), Error::FrameDecodeFailed { frame_index: 0, .. }));
    }

    #[test]
    fn still_decodes_to_eight_bit_exchange() {
        let p = payload(4, 4, 200);
        let data = ContainerWriter::new(layout(4, 4)).write_still(&p).unwrap();
        let image = decode_request(&DecodeRequest::new(&data), &DecoderConfig::new()).unwrap();
        let frame = image.first_frame().unwrap();
        assert_eq!(frame.duration_micros, 1_000_000);
        match frame.pixels.pixels() {
            ExchangePixels::Rgba8(img) => {
                // neutral chroma decodes to gray
                assert!(img.as_ref().pixels().all(|px| px.r == 200 && px.g == 200 && px.b == 200));
                assert!(img.as_ref().pixels().all(|px| px.a == 255));
            }
            other => panic!("expected 8-bit pixels, got {other:?}"),
        }
    }
}
