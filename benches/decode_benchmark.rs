//! Benchmarks for avifkit encode and decode

use avifkit::{ChannelLayout, EncoderConfig, SequenceFrame, encode_rgba8, encode_sequence};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use imgref::ImgVec;
use rgb::Rgba;

fn gradient(width: usize, height: usize) -> ImgVec<Rgba<u8>> {
    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            pixels.push(Rgba::new(
                (x * 255 / width) as u8,
                (y * 255 / height) as u8,
                ((x + y) % 256) as u8,
                255,
            ));
        }
    }
    ImgVec::new(pixels, width, height)
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let small = gradient(64, 64);
    let small_file = encode_rgba8(small.as_ref(), &EncoderConfig::new())
        .expect("encode small")
        .avif_file;
    group.bench_function("small_420", |b| {
        b.iter(|| black_box(avifkit::decode(black_box(&small_file))))
    });

    let medium = gradient(512, 384);
    let medium_file = encode_rgba8(
        medium.as_ref(),
        &EncoderConfig::new().layout(ChannelLayout::Yuv444),
    )
    .expect("encode medium")
    .avif_file;
    group.bench_function("medium_444", |b| {
        b.iter(|| black_box(avifkit::decode(black_box(&medium_file))))
    });

    let frames: Vec<SequenceFrame<'_>> = (0..8)
        .map(|_| SequenceFrame {
            pixels: small.as_ref(),
            duration_micros: 41_667,
        })
        .collect();
    let sequence_file = encode_sequence(&frames, &EncoderConfig::new())
        .expect("encode sequence")
        .avif_file;
    group.bench_function("sequence_8_frames", |b| {
        b.iter(|| black_box(avifkit::decode_all(black_box(&sequence_file))))
    });

    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let img = gradient(256, 256);

    for speed in [0, 10] {
        let config = EncoderConfig::new().speed(speed);
        group.bench_function(format!("256x256_speed{speed}"), |b| {
            b.iter(|| black_box(encode_rgba8(black_box(img.as_ref()), &config)))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_decode, benchmark_encode);
criterion_main!(benches);
