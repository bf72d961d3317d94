// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sfno_tensor::Precision;
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static AUTOCAST: Cell<Option<Precision>> = const { Cell::new(None) };
}

/// Returns the reduced precision autocast currently runs at on this thread,
/// or `None` when computations run in full precision.
pub fn autocast_precision() -> Option<Precision> {
    AUTOCAST.with(|state| state.get())
}

/// Returns whether autocast has been enabled for the current thread.
pub fn autocast_enabled() -> bool {
    autocast_precision().is_some()
}

/// Guard that overrides the autocast state for the duration of its lifetime.
///
/// The previous state is restored when the guard drops, which also covers
/// early returns through `?` and unwinding panics. The guard is tied to the
/// thread that created it.
#[derive(Debug)]
pub struct AutocastGuard {
    previous: Option<Precision>,
    _thread_bound: PhantomData<*const ()>,
}

impl AutocastGuard {
    /// Creates a new guard setting the autocast precision to `precision`.
    /// `Some(Precision::Full)` is treated as disabling autocast.
    pub fn new(precision: Option<Precision>) -> Self {
        let next = precision.filter(|p| p.is_reduced());
        let previous = AUTOCAST.with(|state| state.replace(next));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }

    /// Enables autocast at `precision` for the guard lifetime.
    pub fn enable(precision: Precision) -> Self {
        Self::new(Some(precision))
    }

    /// Forces full precision for the guard lifetime.
    pub fn disable() -> Self {
        Self::new(None)
    }

    /// Precision that will be restored when the guard drops.
    pub fn previous(&self) -> Option<Precision> {
        self.previous
    }
}

impl Drop for AutocastGuard {
    fn drop(&mut self) {
        AUTOCAST.with(|state| state.set(self.previous));
    }
}

/// Runs `f` with autocast disabled and restores the ambient state afterwards.
pub fn with_full_precision<T>(f: impl FnOnce() -> T) -> T {
    let _guard = AutocastGuard::disable();
    f()
}
