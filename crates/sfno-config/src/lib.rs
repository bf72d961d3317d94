// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide knobs shared by every sfno crate: the tracing subscriber,
//! deterministic RNG derivation and layered configuration files.

pub mod determinism;
pub mod layered;
pub mod tracing;

pub use layered::{ConfigFiles, ConfigSection, LayeredConfig, LayeredConfigError};
