use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Run-wide killswitch.
///
/// Monotonic: once raised it stays raised for the life of the token. Clones
/// share the same flag, so the hotkey listener, the TUI and the executor can
/// each hold one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. the one the global hotkey thread sets).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
