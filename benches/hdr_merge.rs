use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hdr_recon_rs::image_pipeline::{
    CrfEstimator, ExposureImage, MergeDomain, Merger, RadianceMap, RadianceWriter,
    StandardTiffWriter, TiffCompression, WeightScheme,
};

const EXPOSURES: [f32; 3] = [0.25, 1.0, 4.0];

/// Gamma 2.2 exposures of a diagonal radiance ramp.
fn generate_mock_stack(width: usize, height: usize) -> Vec<ExposureImage> {
    EXPOSURES
        .iter()
        .map(|&t| {
            let mut data = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                for x in 0..width {
                    let radiance = 0.001f32.powf(1.0 - (x + y) as f32 / (width + height) as f32);
                    let value = (radiance * t).clamp(0.0, 1.0).powf(1.0 / 2.2);
                    let code = (value * 255.0).round() / 255.0;
                    data.extend_from_slice(&[code, code, code]);
                }
            }
            ExposureImage::from_vec(width, height, 3, data, t).unwrap()
        })
        .collect()
}

fn benchmark_merge_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_by_size");
    let crf = CrfEstimator::srgb_like();

    let sizes = vec![(100, 100, "100x100"), (500, 500, "500x500"), (1000, 1000, "1000x1000")];

    for (width, height, label) in sizes {
        let stack = generate_mock_stack(width, height);
        group.bench_with_input(BenchmarkId::from_parameter(label), &stack, |b, stack| {
            b.iter(|| {
                let _ = Merger::assemble(
                    black_box(stack),
                    Some(&crf),
                    WeightScheme::Debevec97,
                    MergeDomain::Log,
                );
            });
        });
    }

    group.finish();
}

fn benchmark_response_fits(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_fit");
    group.sample_size(10);
    let stack = generate_mock_stack(256, 256);

    #[cfg(feature = "solver")]
    group.bench_function("debevec_malik", |b| {
        b.iter(|| {
            let mut crf = CrfEstimator::new();
            let _ = crf.estimate_debevec_malik(black_box(&stack), WeightScheme::Debevec97, 256, 20.0);
        });
    });

    group.bench_function("robertson_10_iterations", |b| {
        b.iter(|| {
            let mut crf = CrfEstimator::new();
            let _ = crf.estimate_robertson(black_box(&stack), 10);
        });
    });

    group.finish();
}

fn benchmark_compression_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression_methods");
    let stack = generate_mock_stack(500, 500);
    let radiance: RadianceMap = Merger::assemble(
        &stack,
        Some(&CrfEstimator::srgb_like()),
        WeightScheme::Debevec97,
        MergeDomain::Log,
    )
    .unwrap();

    let compressions = vec![
        (TiffCompression::None, "none"),
        (TiffCompression::Lzw, "lzw"),
        (TiffCompression::DeflateFast, "deflate_fast"),
        (TiffCompression::DeflateBest, "deflate_best"),
    ];

    for (compression, label) in compressions {
        group.bench_with_input(BenchmarkId::from_parameter(label), &radiance, |b, radiance| {
            b.iter(|| {
                let mut output = Vec::new();
                let _ = StandardTiffWriter.write_radiance(black_box(radiance), &mut output, compression);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_merge_sizes,
    benchmark_response_fits,
    benchmark_compression_methods
);
criterion_main!(benches);
