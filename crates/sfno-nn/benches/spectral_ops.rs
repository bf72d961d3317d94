use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sfno_nn::transform::{InverseRealFft2, RealFft2};
use sfno_nn::{
    FieldTensor, ForwardTransform, InverseTransform, Module, SpectralAttention,
    SpectralAttentionConfig, SpectralConv, SpectralConvConfig, SpectralOperatorType,
};
use std::sync::Arc;

type TransformPair = (Arc<dyn ForwardTransform>, Arc<dyn InverseTransform>);

fn transforms(nlat: usize, nlon: usize) -> TransformPair {
    let lmax = Some(nlat / 2);
    let mmax = Some(nlon / 4);
    (
        Arc::new(RealFft2::new(nlat, nlon, lmax, mmax).expect("forward transform")),
        Arc::new(InverseRealFft2::new(nlat, nlon, lmax, mmax).expect("inverse transform")),
    )
}

fn bench_transforms(c: &mut Criterion) {
    let mut group = c.benchmark_group("real_fft2");
    for (nlat, nlon) in [(32, 64), (64, 128)] {
        let (forward, inverse) = transforms(nlat, nlon);
        let input = FieldTensor::random_normal([2, 8, nlat, nlon], 0.0, 1.0, Some(1))
            .expect("input field");
        let spectral = forward.forward(&input).expect("spectral input");
        group.bench_with_input(
            BenchmarkId::new("forward", format!("{nlat}x{nlon}")),
            &input,
            |b, input| b.iter(|| black_box(forward.forward(input).expect("forward"))),
        );
        group.bench_with_input(
            BenchmarkId::new("inverse", format!("{nlat}x{nlon}")),
            &spectral,
            |b, spectral| b.iter(|| black_box(inverse.inverse(spectral).expect("inverse"))),
        );
    }
    group.finish();
}

fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectral_operators");
    let (forward, inverse) = transforms(32, 64);
    let input = FieldTensor::random_normal([2, 16, 32, 64], 0.0, 1.0, Some(2)).expect("input");

    for operator_type in [SpectralOperatorType::Dhconv, SpectralOperatorType::Diagonal] {
        let config = SpectralConvConfig {
            in_channels: 16,
            out_channels: 16,
            num_groups: 4,
            operator_type,
            seed: Some(3),
            ..SpectralConvConfig::default()
        };
        let conv = SpectralConv::new("bench", forward.clone(), inverse.clone(), &config)
            .expect("spectral conv");
        group.bench_function(BenchmarkId::new("conv", operator_type), |b| {
            b.iter(|| black_box(conv.forward(&input).expect("conv forward")))
        });
    }

    let attention = SpectralAttention::new(
        "bench",
        forward,
        inverse,
        &SpectralAttentionConfig {
            seed: Some(4),
            ..SpectralAttentionConfig::new(16, 16)
        },
    )
    .expect("spectral attention");
    group.bench_function("attention/diagonal", |b| {
        b.iter(|| black_box(attention.forward(&input).expect("attention forward")))
    });
    group.finish();
}

criterion_group!(benches, bench_transforms, bench_operators);
criterion_main!(benches);
