// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::TensorError;
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric precision a tensor logically lives in.
///
/// Storage is always `f32`; reduced precisions are represented by rounding
/// each value to the nearest representable number of that format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// IEEE binary32.
    #[default]
    Full,
    /// IEEE binary16.
    Half,
    /// Brain floating point (8 exponent bits, 7 mantissa bits).
    BFloat16,
}

impl Precision {
    /// Returns `true` for the 16-bit formats.
    pub fn is_reduced(self) -> bool {
        !matches!(self, Precision::Full)
    }

    /// Storage width in bits.
    pub fn bits(self) -> u32 {
        match self {
            Precision::Full => 32,
            Precision::Half | Precision::BFloat16 => 16,
        }
    }

    /// Rounds a single value into this precision.
    #[inline]
    pub fn round(self, value: f32) -> f32 {
        match self {
            Precision::Full => value,
            Precision::Half => f16::from_f32(value).to_f32(),
            Precision::BFloat16 => bf16::from_f32(value).to_f32(),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Precision::Full => "float32",
            Precision::Half => "float16",
            Precision::BFloat16 => "bfloat16",
        };
        f.write_str(label)
    }
}

impl FromStr for Precision {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "f32" | "fp32" | "float32" => Ok(Precision::Full),
            "half" | "f16" | "fp16" | "float16" => Ok(Precision::Half),
            "bf16" | "bfloat16" => Ok(Precision::BFloat16),
            other => Err(TensorError::UnknownVariant {
                kind: "precision",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_formats_lose_mantissa_bits() {
        let value = 1.0 + 1.0 / 1024.0 + 1.0 / 4096.0;
        assert_eq!(Precision::Full.round(value), value);
        assert_eq!(Precision::Half.round(value), 1.0 + 1.0 / 1024.0);
        assert_eq!(Precision::BFloat16.round(value), 1.0);
    }

    #[test]
    fn parses_common_aliases() {
        assert_eq!("fp16".parse::<Precision>().unwrap(), Precision::Half);
        assert_eq!("BF16".parse::<Precision>().unwrap(), Precision::BFloat16);
        assert!("int8".parse::<Precision>().is_err());
    }
}
