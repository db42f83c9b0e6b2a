//! Task-related ABI types.

/// Scheduler-visible lifecycle state of a task.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Unused = 0,
    /// Reserved but not yet runnable (image still being built).
    Blocked = 1,
    Ready = 2,
    Running = 3,
    /// Exited; exit code held until the parent reaps it.
    Zombie = 4,
}

/// The `struct user_desc` userland passes to `set_thread_area`.
///
/// Field order matches glibc/musl's i386 definition. The kernel only honors
/// `base_addr` and writes the allocated GDT slot back into `entry_number`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UserDesc {
    pub entry_number: u32,
    pub base_addr: u32,
    pub limit: u32,
    pub flags: u32,
}

/// GDT entry reserved for the TLS segment; `set_thread_area` always reports
/// this slot.
pub const TLS_GDT_ENTRY: u32 = 6;

/// Exit code forced on a process whose exec failed after the old image was
/// already torn down (there is nothing left to resume).
pub const EXEC_FAILED_EXIT_CODE: u32 = 127;
