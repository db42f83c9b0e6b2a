use core::sync::atomic::{AtomicBool, Ordering};

/// One-shot initialization flag.
///
/// `init_once()` returns true exactly once; later calls (from any context)
/// return false. Used to guard boot-time setup that must not run twice.
pub struct InitFlag {
    set: AtomicBool,
}

impl InitFlag {
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Attempt to claim initialization. Returns true for the single winner.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}
