//! Process-wide boot state.
//!
//! Created once at startup and handed to the composition root. The
//! booted flag is set at most once and never reset.

use std::sync::{Arc, OnceLock};

/// Shared boot token. Clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct BootState {
    booted_at: Arc<OnceLock<u64>>,
}

impl BootState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first completed boot. Returns `true` only for the call
    /// that actually flipped the flag.
    pub fn mark_booted(&self) -> bool {
        let mut first = false;
        self.booted_at.get_or_init(|| {
            first = true;
            strata_types::now_millis()
        });
        first
    }

    pub fn is_booted(&self) -> bool {
        self.booted_at.get().is_some()
    }

    /// Milliseconds since epoch of the first boot, if any.
    pub fn booted_at(&self) -> Option<u64> {
        self.booted_at.get().copied()
    }
}
