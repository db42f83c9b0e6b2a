#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod alignment;
pub mod arch;
pub mod init_flag;
pub mod kernel_services;
pub mod klog;
pub mod spinlock;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u32, align_down_usize, align_up_u32, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use init_flag::InitFlag;
pub use klog::{KlogLevel, klog_get_level, klog_init, klog_register_backend, klog_set_level};
pub use spinlock::{IrqMutex, IrqMutexGuard};
