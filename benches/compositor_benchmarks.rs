use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imgly_bgremove_client::{
    apply_alpha_chunked, compute_inference_size, mask_from_tensor, RgbaSurface,
};
use ndarray::Array4;
use tokio::runtime::Runtime;

const SIZES: [(u32, u32); 3] = [(640, 480), (1920, 1080), (3840, 2160)];

fn test_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

fn test_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
}

fn bench_apply_alpha(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("apply_alpha_chunked");

    for (width, height) in SIZES {
        let mask = test_mask(width, height);
        for chunk_rows in [64_u32, 256, 1024] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}x{}", width, height), chunk_rows),
                &chunk_rows,
                |b, &chunk_rows| {
                    b.iter_batched(
                        || test_image(width, height),
                        |mut image| {
                            rt.block_on(async {
                                apply_alpha_chunked(
                                    &mut RgbaSurface::new(&mut image),
                                    &mask,
                                    chunk_rows,
                                )
                                .await
                                .unwrap();
                            });
                            black_box(image)
                        },
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
    }
    group.finish();
}

fn bench_mask_from_tensor(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_from_tensor");

    for (width, height) in SIZES {
        let tensor = Array4::from_shape_fn((1, 1, height as usize, width as usize), |(_, _, y, x)| {
            ((x + y) % 100) as f32 / 100.0
        });
        group.bench_function(format!("{}x{}", width, height), |b| {
            b.iter(|| mask_from_tensor(black_box(&tensor)).unwrap());
        });
    }
    group.finish();
}

fn bench_inference_size(c: &mut Criterion) {
    c.bench_function("compute_inference_size", |b| {
        b.iter(|| {
            compute_inference_size(
                black_box(6000),
                black_box(4000),
                1024 * 1024,
                1920 * 1080,
                black_box(true),
            )
        });
    });
}

criterion_group!(
    compositor_benches,
    bench_apply_alpha,
    bench_mask_from_tensor,
    bench_inference_size
);
criterion_main!(compositor_benches);
