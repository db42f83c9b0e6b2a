//! Filesystem service interface.
//!
//! The VFS registers this table during boot. The memory subsystem consumes
//! exactly two operations: pulling a whole executable image into a buffer,
//! and reading a slice of a file for file-backed mappings.

use super::ServiceCell;

pub struct FsServices {
    /// Read the whole file at `path` into `buf`. Returns the number of bytes
    /// read, or a negative errno. A file larger than `buf` is an error, not
    /// a truncation; executable images must be read completely or not at
    /// all.
    pub read_file: fn(path: &str, buf: &mut [u8]) -> isize,

    /// Read up to `buf.len()` bytes from the file identified by `inode`,
    /// starting at byte `offset`. Returns the number of bytes read (short
    /// reads past EOF are normal), or a negative errno.
    pub read_at: fn(inode: u32, buf: &mut [u8], offset: u32) -> isize,
}

static FS_SERVICES: ServiceCell<FsServices> = ServiceCell::new("fs");

pub fn register_fs_services(table: &'static FsServices) {
    FS_SERVICES.register(table);
}

#[inline]
pub fn fs_read_file(path: &str, buf: &mut [u8]) -> isize {
    (FS_SERVICES.get().read_file)(path, buf)
}

#[inline]
pub fn fs_read_at(inode: u32, buf: &mut [u8], offset: u32) -> isize {
    (FS_SERVICES.get().read_at)(inode, buf, offset)
}
