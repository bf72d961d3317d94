// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, Axis};
use sfno_nn::transform::{InverseRealFft2, RealFft2};
use sfno_nn::{
    AttentionOperatorType, AutocastGuard, Complex32, FieldTensor, ForwardTransform, GridKind,
    InverseTransform, Module, ModeDistribution, Precision, ProcessGrid, PureResult,
    SpectralAttention, SpectralAttentionConfig, SpectralConv, SpectralConvConfig,
    SpectralOperator, SpectralOperatorType, SpectralTensor, TensorError, TransformDescriptor,
};
use std::sync::Arc;

fn fft_pair(
    nlat: usize,
    nlon: usize,
    lmax: Option<usize>,
    mmax: Option<usize>,
) -> (Arc<dyn ForwardTransform>, Arc<dyn InverseTransform>) {
    (
        Arc::new(RealFft2::new(nlat, nlon, lmax, mmax).unwrap()),
        Arc::new(InverseRealFft2::new(nlat, nlon, lmax, mmax).unwrap()),
    )
}

fn field(shape: [usize; 4], seed: u64) -> FieldTensor {
    FieldTensor::random_normal(shape, 0.0, 1.0, Some(seed)).unwrap()
}

#[test]
fn indivisible_channels_fail_at_construction_for_every_operator_type() {
    let (fwd, inv) = fft_pair(8, 8, None, None);
    for operator_type in [SpectralOperatorType::Diagonal, SpectralOperatorType::Dhconv] {
        for (in_channels, out_channels) in [(3, 4), (4, 3)] {
            let config = SpectralConvConfig {
                in_channels,
                out_channels,
                num_groups: 2,
                operator_type,
                ..SpectralConvConfig::default()
            };
            let err = SpectralConv::new("conv", fwd.clone(), inv.clone(), &config).unwrap_err();
            assert!(
                matches!(err, TensorError::IndivisibleChannels { groups: 2, .. }),
                "{operator_type}: {err}"
            );
        }
    }
}

#[test]
fn separable_dhconv_with_unit_weights_is_a_pass_through() {
    let (fwd, inv) = fft_pair(8, 12, None, None);
    let config = SpectralConvConfig {
        in_channels: 3,
        out_channels: 3,
        separable: true,
        seed: Some(1),
        ..SpectralConvConfig::default()
    };
    let mut conv = SpectralConv::new("identity", fwd.clone(), inv.clone(), &config).unwrap();
    conv.weight_mut()
        .as_complex_mut()
        .unwrap()
        .fill(Complex32::new(1.0, 0.0));

    let input = field([2, 3, 8, 12], 42);
    let (out, residual) = conv.forward_with_residual(&input).unwrap();
    let round_trip = inv.inverse(&fwd.forward(&input).unwrap()).unwrap();
    assert!(out.max_abs_diff(&round_trip).unwrap() < 1e-5);
    assert!(out.max_abs_diff(&input).unwrap() < 1e-4);
    assert_eq!(residual, input);
}

fn mean_power_per_lat_mode(weight: &ArrayD<Complex32>, lat_axis: usize) -> Vec<f64> {
    weight
        .axis_iter(Axis(lat_axis))
        .map(|slice| {
            slice.iter().map(|z| f64::from(z.norm_sqr())).sum::<f64>() / slice.len() as f64
        })
        .collect()
}

#[test]
fn mean_mode_initialisation_has_twice_the_variance() {
    let (fwd, inv) = fft_pair(8, 8, Some(4), Some(3));
    for (operator_type, lat_axis) in [
        (SpectralOperatorType::Dhconv, 3),
        (SpectralOperatorType::Diagonal, 3),
    ] {
        let config = SpectralConvConfig {
            in_channels: 1,
            out_channels: 8192,
            operator_type,
            seed: Some(2024),
            ..SpectralConvConfig::default()
        };
        let conv = SpectralConv::new("init", fwd.clone(), inv.clone(), &config).unwrap();
        let weight = conv.weight().as_complex().unwrap();
        let power = mean_power_per_lat_mode(weight, lat_axis);
        assert_eq!(power.len(), 4);
        let others = power[1..].iter().sum::<f64>() / 3.0;
        let ratio = power[0] / others;
        assert!((1.9..2.1).contains(&ratio), "{operator_type}: ratio {ratio}");
        assert!((others - 1.0).abs() < 0.05, "{operator_type}: variance {others}");
    }
}

#[test]
fn output_ignores_ambient_autocast_and_keeps_input_precision() {
    let (fwd, inv) = fft_pair(8, 8, Some(6), Some(4));
    let config = SpectralConvConfig {
        in_channels: 4,
        out_channels: 4,
        num_groups: 2,
        operator_type: SpectralOperatorType::Diagonal,
        bias: true,
        seed: Some(9),
        ..SpectralConvConfig::default()
    };
    let conv = SpectralConv::new("conv", fwd.clone(), inv.clone(), &config).unwrap();
    let attention = SpectralAttention::new(
        "attn",
        fwd,
        inv,
        &SpectralAttentionConfig {
            in_channels: 4,
            out_channels: 4,
            operator_type: AttentionOperatorType::ModeDependent,
            seed: Some(9),
            ..SpectralAttentionConfig::default()
        },
    )
    .unwrap();
    let input = field([1, 4, 8, 8], 5);

    let operators: [&dyn Module; 2] = [&conv, &attention];
    for operator in operators {
        let reference = operator.forward(&input).unwrap();
        let under_autocast = {
            let _guard = AutocastGuard::enable(Precision::Half);
            let out = operator.forward(&input).unwrap();
            assert_eq!(sfno_nn::autocast_precision(), Some(Precision::Half));
            out
        };
        assert_eq!(reference.data(), under_autocast.data());
        assert_eq!(reference.precision(), Precision::Full);

        let half = input.to_precision(Precision::Half);
        let out = operator.forward(&half).unwrap();
        assert_eq!(out.precision(), Precision::Half);
        assert!(out
            .data()
            .iter()
            .all(|&v| Precision::Half.round(v) == v));
    }
}

#[test]
fn resampled_residual_is_cast_back_to_input_precision() {
    let fwd: Arc<dyn ForwardTransform> =
        Arc::new(RealFft2::new(8, 16, Some(4), Some(5)).unwrap());
    let inv: Arc<dyn InverseTransform> =
        Arc::new(InverseRealFft2::new(16, 32, Some(4), Some(5)).unwrap());
    let conv = SpectralConv::new("up", fwd, inv, &SpectralConvConfig::new(2, 2)).unwrap();
    assert!(conv.scale_residual());
    let input = field([1, 2, 8, 16], 77).to_precision(Precision::BFloat16);
    let (out, residual) = conv.forward_with_residual(&input).unwrap();
    assert_eq!(out.shape(), [1, 2, 16, 32]);
    assert_eq!(residual.shape(), [1, 2, 16, 32]);
    assert_eq!(residual.precision(), Precision::BFloat16);
    assert_eq!(out.precision(), Precision::BFloat16);
}

#[test]
fn attention_resamples_residual_onto_the_inverse_grid() {
    let fwd: Arc<dyn ForwardTransform> =
        Arc::new(RealFft2::new(8, 16, Some(4), Some(5)).unwrap());
    let inv: Arc<dyn InverseTransform> =
        Arc::new(InverseRealFft2::new(16, 32, Some(4), Some(5)).unwrap());
    let mut config = SpectralAttentionConfig::new(2, 3);
    config.operator_type = AttentionOperatorType::ModeDependent;
    config.seed = Some(12);
    let attn = SpectralAttention::new("up", fwd, inv, &config).unwrap();
    assert!(attn.scale_residual());
    let input = field([1, 2, 8, 16], 78).to_precision(Precision::BFloat16);
    let (out, residual) = attn.forward_with_residual(&input).unwrap();
    assert_eq!(out.shape(), [1, 3, 16, 32]);
    assert_eq!(residual.shape(), [1, 2, 16, 32]);
    assert_eq!(residual.precision(), Precision::BFloat16);
    assert_eq!(out.precision(), Precision::BFloat16);
}

/// Inverse FFT that reports a different quadrature than its forward
/// counterpart while keeping the same grid size.
#[derive(Debug)]
struct Regridded {
    inner: InverseRealFft2,
    descriptor: TransformDescriptor,
}

impl Regridded {
    fn new(nlat: usize, nlon: usize, lmax: usize, mmax: usize, grid: GridKind) -> Self {
        let inner = InverseRealFft2::new(nlat, nlon, Some(lmax), Some(mmax)).unwrap();
        let descriptor = TransformDescriptor {
            grid,
            ..*InverseTransform::descriptor(&inner)
        };
        Self { inner, descriptor }
    }
}

impl InverseTransform for Regridded {
    fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    fn inverse(&self, spectral: &SpectralTensor) -> PureResult<FieldTensor> {
        self.inner.inverse(spectral)
    }
}

#[test]
fn grid_kind_change_alone_resamples_the_residual() {
    let fwd: Arc<dyn ForwardTransform> =
        Arc::new(RealFft2::new(8, 16, Some(4), Some(5)).unwrap());
    let same: Arc<dyn InverseTransform> =
        Arc::new(Regridded::new(8, 16, 4, 5, GridKind::Periodic));
    let regridded: Arc<dyn InverseTransform> =
        Arc::new(Regridded::new(8, 16, 4, 5, GridKind::Equiangular));
    let input = field([1, 2, 8, 16], 79).to_precision(Precision::Half);

    let conv_config = SpectralConvConfig::new(2, 2);
    let kept = SpectralConv::new("kept", fwd.clone(), same.clone(), &conv_config).unwrap();
    assert!(!kept.scale_residual());
    assert_eq!(kept.forward_with_residual(&input).unwrap().1, input);

    let conv = SpectralConv::new("regrid", fwd.clone(), regridded.clone(), &conv_config).unwrap();
    assert!(conv.scale_residual());
    let (_, residual) = conv.forward_with_residual(&input).unwrap();
    assert_eq!(residual.shape(), [1, 2, 8, 16]);
    assert_eq!(residual.precision(), Precision::Half);
    assert_ne!(residual, input);

    let attn_config = SpectralAttentionConfig::new(2, 2);
    let kept = SpectralAttention::new("kept", fwd.clone(), same, &attn_config).unwrap();
    assert!(!kept.scale_residual());
    assert_eq!(kept.forward_with_residual(&input).unwrap().1, input);

    let attn = SpectralAttention::new("regrid", fwd, regridded, &attn_config).unwrap();
    assert!(attn.scale_residual());
    let (out, residual) = attn.forward_with_residual(&input).unwrap();
    assert_eq!(out.shape(), [1, 2, 8, 16]);
    assert_eq!(residual.shape(), [1, 2, 8, 16]);
    assert_eq!(residual.precision(), Precision::Half);
    assert_ne!(residual, input);
}

/// Transform stand-in that only reports a distributed layout.
#[derive(Debug)]
struct ShardedLayout {
    descriptor: TransformDescriptor,
    distribution: ModeDistribution,
}

impl ShardedLayout {
    fn new(grid: ProcessGrid) -> Self {
        let descriptor = TransformDescriptor {
            nlat: 10,
            nlon: 20,
            lmax: 10,
            mmax: 9,
            grid: GridKind::LegendreGauss,
        };
        Self {
            distribution: ModeDistribution::balanced(grid, &descriptor),
            descriptor,
        }
    }
}

impl ForwardTransform for ShardedLayout {
    fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    fn distribution(&self) -> Option<&ModeDistribution> {
        Some(&self.distribution)
    }

    fn forward(&self, _field: &FieldTensor) -> PureResult<SpectralTensor> {
        Err(TensorError::BackendFailure {
            backend: "test",
            message: "layout only".into(),
        })
    }
}

impl InverseTransform for ShardedLayout {
    fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    fn distribution(&self) -> Option<&ModeDistribution> {
        Some(&self.distribution)
    }

    fn inverse(&self, _spectral: &SpectralTensor) -> PureResult<FieldTensor> {
        Err(TensorError::BackendFailure {
            backend: "test",
            message: "layout only".into(),
        })
    }
}

#[test]
fn weights_cover_the_local_mode_shard() {
    let grid = ProcessGrid::new(1, 2, 1, 2).unwrap();
    let layout = Arc::new(ShardedLayout::new(grid));
    let fwd: Arc<dyn ForwardTransform> = layout.clone();
    let inv: Arc<dyn InverseTransform> = layout;

    let dhconv =
        SpectralConv::new("dh", fwd.clone(), inv.clone(), &SpectralConvConfig::new(2, 2)).unwrap();
    assert_eq!(dhconv.weight().shape(), &[1, 2, 2, 5]);
    let diagonal = SpectralConv::new(
        "diag",
        fwd.clone(),
        inv.clone(),
        &SpectralConvConfig {
            operator_type: SpectralOperatorType::Diagonal,
            ..SpectralConvConfig::new(2, 2)
        },
    )
    .unwrap();
    assert_eq!(diagonal.weight().shape(), &[1, 2, 2, 5, 4]);
    let extent = diagonal.local_extent();
    assert_eq!((extent.nlat, extent.nlon), (5, 10));

    let err = dhconv.forward(&field([1, 2, 10, 20], 1)).unwrap_err();
    assert!(matches!(err, TensorError::BackendFailure { .. }));
}

#[test]
fn grouped_dhconv_matches_a_hand_computed_contraction() {
    let (fwd, inv) = fft_pair(4, 8, None, None);
    let config = SpectralConvConfig {
        in_channels: 4,
        out_channels: 2,
        num_groups: 2,
        seed: Some(13),
        ..SpectralConvConfig::default()
    };
    let conv = SpectralConv::new("grouped", fwd.clone(), inv.clone(), &config).unwrap();
    let input = field([1, 4, 4, 8], 8);
    let out = conv.forward(&input).unwrap();

    // group g mixes input channels 2g, 2g+1 into output channel g
    let spectral = fwd.forward(&input).unwrap();
    let weight = conv.weight().as_complex().unwrap();
    let mut expected = SpectralTensor::zeros([1, 2, 4, 5]).unwrap();
    for g in 0..2 {
        for l in 0..4 {
            for m in 0..5 {
                let mut acc = Complex32::new(0.0, 0.0);
                for i in 0..2 {
                    acc += spectral.data()[[0, 2 * g + i, l, m]] * weight[[g, i, 0, l]];
                }
                expected.data_mut()[[0, g, l, m]] = acc;
            }
        }
    }
    let expected = inv.inverse(&expected).unwrap();
    assert!(out.max_abs_diff(&expected).unwrap() < 1e-5);
}
