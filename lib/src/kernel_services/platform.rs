//! Platform service interface.
//!
//! Registered once during early boot by the crate with visibility into the
//! hardware drivers and the credential bookkeeping.

use super::ServiceCell;

pub struct PlatformServices {
    /// Fill `buf` with bytes from the kernel entropy pool.
    pub rng_fill: fn(buf: &mut [u8]),

    /// Program the GS segment base for the current task's TLS.
    pub gdt_set_gs_base: fn(base: u32),

    /// Real/effective uid and gid of the current task.
    pub current_uid: fn() -> u32,
    pub current_gid: fn() -> u32,

    /// Scheduler tick rate in Hz (reported to userland via the aux vector).
    pub clock_tick_hz: fn() -> u32,
}

static PLATFORM_SERVICES: ServiceCell<PlatformServices> = ServiceCell::new("platform");

pub fn register_platform_services(table: &'static PlatformServices) {
    PLATFORM_SERVICES.register(table);
}

#[inline]
pub fn rng_fill(buf: &mut [u8]) {
    (PLATFORM_SERVICES.get().rng_fill)(buf)
}

#[inline]
pub fn gdt_set_gs_base(base: u32) {
    (PLATFORM_SERVICES.get().gdt_set_gs_base)(base)
}

#[inline]
pub fn current_uid() -> u32 {
    (PLATFORM_SERVICES.get().current_uid)()
}

#[inline]
pub fn current_gid() -> u32 {
    (PLATFORM_SERVICES.get().current_gid)()
}

#[inline]
pub fn clock_tick_hz() -> u32 {
    (PLATFORM_SERVICES.get().clock_tick_hz)()
}
