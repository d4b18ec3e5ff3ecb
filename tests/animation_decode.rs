//! Sequence decoding tests

use avifkit::{
    ChannelLayout, ChromaUpsampling, ContainerWriter, DecodeRequest, DecodedImage, DecoderConfig,
    EncoderConfig, ExchangePixels, FrameLayout, SequenceFrame, decode_request, encode_sequence,
};
use imgref::{ImgVec, ImgRef};
use rgb::Rgba;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn solid(width: usize, height: usize, px: Rgba<u8>) -> ImgVec<Rgba<u8>> {
    ImgVec::new(vec![px; width * height], width, height)
}

fn frame_pixels(image: &DecodedImage, index: usize) -> ImgRef<'_, Rgba<u8>> {
    match image.frames[index].pixels.pixels() {
        ExchangePixels::Rgba8(img) => img.as_ref(),
        other => panic!("expected 8-bit frame, got {other:?}"),
    }
}

fn three_frame_sequence() -> Vec<u8> {
    let frames = [
        solid(8, 8, Rgba::new(255, 0, 0, 255)),
        solid(8, 8, Rgba::new(0, 255, 0, 255)),
        solid(8, 8, Rgba::new(0, 0, 255, 255)),
    ];
    let durations = [40_000u64, 100_000, 1_500_000];
    let seq: Vec<SequenceFrame<'_>> = frames
        .iter()
        .zip(durations)
        .map(|(img, duration_micros)| SequenceFrame {
            pixels: img.as_ref(),
            duration_micros,
        })
        .collect();
    let config = EncoderConfig::new().quality(95).layout(ChannelLayout::Yuv444);
    encode_sequence(&seq, &config)
        .expect("sequence encode")
        .avif_file
}

#[test]
fn decode_all_frames_in_order() {
    init_logging();
    let data = three_frame_sequence();
    let image = avifkit::decode_all(&data).expect("decode");

    assert!(image.info.is_sequence);
    assert_eq!(image.info.frame_count, 3);
    assert_eq!(image.frames.len(), 3);
    let indices: Vec<u32> = image.frames.iter().map(|f| f.index).collect();
    assert_eq!(indices, [0, 1, 2]);
    assert_eq!(image.durations_micros(), [40_000, 100_000, 1_500_000]);
    assert!((image.frames[0].duration_secs() - 0.04).abs() < 1e-9);

    // dominant channel follows the frame color
    let dominant = |px: Rgba<u8>| {
        let c = [px.r, px.g, px.b];
        (0..3).max_by_key(|&i| c[i]).unwrap()
    };
    for (i, expected) in [0, 1, 2].into_iter().enumerate() {
        let px = frame_pixels(&image, i)[(4usize, 4usize)];
        assert_eq!(dominant(px), expected, "frame {i}: {px:?}");
    }
}

#[test]
fn first_frame_only() {
    let data = three_frame_sequence();
    let image = avifkit::decode(&data).expect("decode");
    assert_eq!(image.info.frame_count, 3);
    assert_eq!(image.frames.len(), 1);
    assert_eq!(image.frames[0].index, 0);
    assert_eq!(image.frames[0].duration_micros, 40_000);
}

#[test]
fn config_only_returns_metadata() {
    let data = three_frame_sequence();
    let full = avifkit::decode_all(&data).unwrap();
    let probe = decode_request(
        &DecodeRequest::new(&data).config_only(true),
        &DecoderConfig::default(),
    )
    .unwrap();
    assert!(probe.frames.is_empty());
    assert_eq!(probe.info, full.info);
}

#[test]
fn durations_follow_media_timescale() {
    let layout = FrameLayout {
        width: 8,
        height: 8,
        bit_depth: 8,
        layout: ChannelLayout::Yuv420,
        has_alpha: false,
    };
    let img = solid(8, 8, Rgba::new(90, 90, 90, 255));
    let encoded = avifkit::encode_rgba8(img.as_ref(), &EncoderConfig::new())
        .expect("still encode");
    let still = avifkit::Container::parse(&encoded.avif_file).unwrap();
    let payload = still
        .frames()
        .next_frame_payload()
        .expect("still payload")
        .data
        .to_vec();

    let data = ContainerWriter::new(layout)
        .timescale(600)
        .write_sequence(&[(payload.as_slice(), 20), (payload.as_slice(), 600)])
        .unwrap();
    let image = avifkit::decode_all(&data).unwrap();
    assert_eq!(image.durations_micros(), [33_333, 1_000_000]);
}

#[test]
fn empty_sequence_has_no_frames() {
    let layout = FrameLayout {
        width: 4,
        height: 4,
        bit_depth: 8,
        layout: ChannelLayout::Yuv420,
        has_alpha: false,
    };
    let data = ContainerWriter::new(layout).write_sequence(&[]).unwrap();
    let image = avifkit::decode_all(&data).unwrap();
    assert!(image.info.is_sequence);
    assert_eq!(image.info.frame_count, 0);
    assert!(image.frames.is_empty());
}

#[test]
fn automatic_upsampling_is_nearest_for_sequences() {
    init_logging();
    // red left half, blue right half: the chroma edge sits between x = 3 and x = 4
    let mut pixels = Vec::with_capacity(64);
    for _ in 0..8 {
        for x in 0..8 {
            pixels.push(if x < 4 {
                Rgba::new(255u8, 0, 0, 255)
            } else {
                Rgba::new(0, 0, 255, 255)
            });
        }
    }
    let img = ImgVec::new(pixels, 8, 8);
    let seq = [
        SequenceFrame {
            pixels: img.as_ref(),
            duration_micros: 50_000,
        },
        SequenceFrame {
            pixels: img.as_ref(),
            duration_micros: 50_000,
        },
    ];
    let config = EncoderConfig::new()
        .quality(100)
        .layout(ChannelLayout::Yuv420);
    let data = encode_sequence(&seq, &config).unwrap().avif_file;

    let automatic = avifkit::decode_all(&data).unwrap();
    let frame = frame_pixels(&automatic, 0);
    assert_eq!(frame[(3usize, 2usize)], frame[(0usize, 2usize)]);

    let best = decode_request(
        &DecodeRequest::new(&data),
        &DecoderConfig::new().chroma_upsampling(ChromaUpsampling::BestQuality),
    )
    .unwrap();
    let frame = frame_pixels(&best, 0);
    assert_ne!(frame[(3usize, 2usize)], frame[(0usize, 2usize)]);

    // a single requested frame keeps bilinear
    let single = avifkit::decode(&data).unwrap();
    let frame = frame_pixels(&single, 0);
    assert_ne!(frame[(3usize, 2usize)], frame[(0usize, 2usize)]);
}
