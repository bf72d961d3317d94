// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, IxDyn};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use sfno_tensor::Complex32;
use std::f32::consts::{FRAC_1_SQRT_2, SQRT_2};

/// Complex normal sample with unit total variance (real and imaginary parts
/// each carry half of it).
fn sample(rng: &mut StdRng) -> Complex32 {
    let re: f32 = StandardNormal.sample(rng);
    let im: f32 = StandardNormal.sample(rng);
    Complex32::new(re, im) * FRAC_1_SQRT_2
}

pub(crate) fn complex_normal(shape: &[usize], scale: f32, rng: &mut StdRng) -> ArrayD<Complex32> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || sample(rng) * scale)
}

/// Like [`complex_normal`] but entries at index 0 of `lat_axis` get an extra
/// factor of `sqrt(2)`: the mean latitudinal mode is effectively real.
pub(crate) fn mode_scaled_complex_normal(
    shape: &[usize],
    lat_axis: usize,
    scale: f32,
    rng: &mut StdRng,
) -> ArrayD<Complex32> {
    ArrayD::from_shape_fn(IxDyn(shape), |index| {
        let factor = if index[lat_axis] == 0 { scale * SQRT_2 } else { scale };
        sample(rng) * factor
    })
}
