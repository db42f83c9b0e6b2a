//! Minimal signal ABI: dispositions and masks.
//!
//! Full POSIX signal delivery lives elsewhere in the kernel; this crate only
//! defines what the process-image subsystem needs; the disposition table
//! that exec resets to defaults while preserving the mask.

/// Number of signals tracked per process (1..=NSIG, slot 0 unused).
pub const NSIG: usize = 32;

/// A signal disposition as userland sees it: `SIG_DFL`, `SIG_IGN`, or a
/// handler address in the process's address space.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigDisposition(pub u32);

impl SigDisposition {
    pub const DEFAULT: Self = Self(0);
    pub const IGNORE: Self = Self(1);

    #[inline]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

/// Per-process signal state. Exec resets `dispositions` to default but keeps
/// `mask` (POSIX: the signal mask survives execve).
#[derive(Clone, Copy, Debug)]
pub struct SigState {
    pub dispositions: [SigDisposition; NSIG],
    pub mask: u32,
}

impl SigState {
    pub const fn new() -> Self {
        Self {
            dispositions: [SigDisposition::DEFAULT; NSIG],
            mask: 0,
        }
    }

    /// Reset every handler to the default disposition, preserving the mask.
    pub fn reset_handlers(&mut self) {
        self.dispositions = [SigDisposition::DEFAULT; NSIG];
    }
}

impl Default for SigState {
    fn default() -> Self {
        Self::new()
    }
}
