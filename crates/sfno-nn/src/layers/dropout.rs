// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::Rng;
use sfno_config::determinism;
use sfno_tensor::{Complex32, PureResult, TensorError};
use std::cell::{Cell, RefCell};

/// Bernoulli dropout over complex spectral coefficients.
///
/// A dropped coefficient loses both its real and imaginary part; kept ones
/// are rescaled by `1 / (1 - p)`. Evaluation mode is the identity.
pub struct ComplexDropout {
    probability: f32,
    keep_scale: f32,
    train: Cell<bool>,
    rng: RefCell<StdRng>,
}

impl core::fmt::Debug for ComplexDropout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ComplexDropout")
            .field("probability", &self.probability)
            .field("training", &self.train.get())
            .finish()
    }
}

impl ComplexDropout {
    pub fn new(probability: f32) -> PureResult<Self> {
        Self::with_seed(probability, None)
    }

    /// Builds a dropout layer with a deterministic RNG seed.
    pub fn with_seed(probability: f32, seed: Option<u64>) -> PureResult<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(TensorError::InvalidValue {
                label: "dropout_probability",
            });
        }
        Ok(Self {
            probability,
            keep_scale: 1.0 / (1.0 - probability),
            train: Cell::new(true),
            rng: RefCell::new(determinism::rng_from_optional(seed, "sfno-nn/dropout")),
        })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn is_training(&self) -> bool {
        self.train.get()
    }

    pub fn set_training(&self, training: bool) {
        self.train.set(training);
    }

    pub fn apply(&self, input: Array4<Complex32>) -> Array4<Complex32> {
        if !self.train.get() || self.probability == 0.0 {
            return input;
        }
        let mut rng = self.rng.borrow_mut();
        let keep_scale = self.keep_scale;
        let probability = self.probability;
        input.mapv_into(|z| {
            if rng.gen::<f32>() < probability {
                Complex32::new(0.0, 0.0)
            } else {
                z * keep_scale
            }
        })
    }
}
