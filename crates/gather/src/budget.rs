use crate::error::{GatherError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Safe upper bound applied to every budget regardless of advertised model
/// context. Leaves room for the system prompt (~5-10k tokens), the response,
/// and estimator variance.
pub const MAX_SAFE_CONTEXT_TOKENS: usize = 80_000;

/// Rough token estimate shared by budget, gatherer, and chunker: one token
/// per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Thread-safe token accountant with a fixed capacity.
///
/// The only mutable process-wide counter in a gather; safe to share across
/// collector threads.
#[derive(Debug)]
pub struct ContextBudget {
    total: usize,
    used: AtomicUsize,
}

impl ContextBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            used: AtomicUsize::new(0),
        }
    }

    /// Budget for a requested model context, clamped to the safety cap.
    pub fn for_model(requested: usize) -> Self {
        Self::new(requested.min(MAX_SAFE_CONTEXT_TOKENS))
    }

    /// Reserve `n` tokens. Fails atomically: either the whole reservation
    /// lands or `used` is untouched.
    pub fn reserve(&self, n: usize) -> Result<()> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(n) else {
                return Err(GatherError::BudgetExceeded {
                    requested: n,
                    remaining: self.total.saturating_sub(current),
                });
            };
            if next > self.total {
                return Err(GatherError::BudgetExceeded {
                    requested: n,
                    remaining: self.total.saturating_sub(current),
                });
            }
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Boolean form of [`reserve`](Self::reserve).
    pub fn try_reserve(&self, n: usize) -> bool {
        self.reserve(n).is_ok()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.used())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
