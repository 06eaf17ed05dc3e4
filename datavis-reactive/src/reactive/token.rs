//! Cancellation Token
//!
//! Every stage owns one token and hands a reference to its function. The
//! token is advisory: setting it never interrupts a running function, the
//! function has to poll [`Token::is_cancelled`] and return early.
//!
//! A token is set either by an explicit [`Cell::cancel`] or implicitly when
//! the stage's output cell is dropped before it was completed.
//!
//! Besides the cancellation flag the token carries a progress figure the
//! function may publish for observers of its result cell.
//!
//! [`Cell::cancel`]: crate::reactive::Cell::cancel

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Shared cancellation flag and progress report of one stage.
#[derive(Clone, Default)]
pub struct Token {
    inner: Arc<TokenState>,
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    /// `f32` bit pattern; `0` is `0.0`.
    progress: AtomicU32,
}

impl Token {
    /// Create a token that is not cancelled and reports no progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Publish progress in the range `[0, 1]`. Out of range values are clamped.
    pub fn set_progress(&self, progress: f32) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.inner
            .progress
            .store(progress.to_bits(), Ordering::Relaxed);
    }

    /// Last published progress.
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.inner.progress.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
