//! Benchmark YUV to RGB conversion (bilinear vs nearest chroma)

use avifkit::yuv_convert::{Upsampling, YuvMatrix, yuv_to_rgb};
use avifkit::{ChannelLayout, ColorRange};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use imgref::ImgVec;

fn bench_yuv420_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("yuv420_to_rgb");

    let sizes = [
        ("512x256", 512, 256),     // Small (131k pixels)
        ("1920x1080", 1920, 1080), // FHD (2M pixels)
    ];

    for (name, width, height) in sizes {
        let (cw, ch) = ChannelLayout::Yuv420.chroma_dimensions(width, height);
        let y_plane = ImgVec::new(vec![128u16; width * height], width, height);
        let u_plane = ImgVec::new(vec![100u16; cw * ch], cw, ch);
        let v_plane = ImgVec::new(vec![160u16; cw * ch], cw, ch);

        group.throughput(criterion::Throughput::Elements((width * height) as u64));

        for upsampling in [Upsampling::Bilinear, Upsampling::Nearest] {
            group.bench_with_input(
                BenchmarkId::new(format!("{upsampling:?}"), name),
                &upsampling,
                |b, &upsampling| {
                    b.iter(|| {
                        yuv_to_rgb(
                            black_box(y_plane.as_ref()),
                            black_box(u_plane.as_ref()),
                            black_box(v_plane.as_ref()),
                            ChannelLayout::Yuv420,
                            8,
                            YuvMatrix::Bt709,
                            ColorRange::Full,
                            upsampling,
                        )
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_yuv420_conversion);
criterion_main!(benches);
