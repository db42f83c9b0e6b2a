//! Thin architecture layer: interrupt flag save/restore.
//!
//! On the target machine (i386) these compile to `pushf; cli` / `popf`. On
//! any other architecture (notably the 64-bit hosts the unit tests run on)
//! they degrade to no-ops, which is sound because hosted builds have no
//! interrupt context to race against.

#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn irq_save_disable() -> u32 {
    let flags: u32;
    unsafe {
        core::arch::asm!(
            "pushfd",
            "pop {0}",
            "cli",
            out(reg) flags,
            options(nomem, preserves_flags)
        );
    }
    flags
}

#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn irq_restore(flags: u32) {
    unsafe {
        core::arch::asm!(
            "push {0}",
            "popfd",
            in(reg) flags,
            options(nomem)
        );
    }
}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
pub fn irq_save_disable() -> u32 {
    0
}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
pub fn irq_restore(_flags: u32) {}
