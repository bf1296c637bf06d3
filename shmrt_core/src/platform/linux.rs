//! Linux-specific shared memory operations
//!
//! Backing objects live in the POSIX shm namespace (`/dev/shm`). Every
//! function here takes the full OS object name, including the leading `/`.

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::getpid;
use std::fs::File;

/// Linux-specific memory mapping configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxMemoryConfig {
    /// Prefault pages with `MAP_POPULATE`
    pub populate: bool,
}

/// Create a new backing object of exactly `size` bytes.
///
/// Fails with `EEXIST` (as a raw `Errno`) if the name is taken, so callers
/// can decide how to treat leftovers. The kernel zero-fills the new range.
pub fn create_object(os_name: &str, size: usize, mode: u32) -> Result<File, Errno> {
    let fd = shm_open(
        os_name,
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        Mode::from_bits_truncate(mode as libc::mode_t),
    )?;
    let file = File::from(fd);

    if let Err(e) = file.set_len(size as u64) {
        let _ = shm_unlink(os_name);
        return Err(e
            .raw_os_error()
            .map(Errno::from_raw)
            .unwrap_or(Errno::EIO));
    }

    Ok(file)
}

/// Open an existing backing object read/write.
pub fn open_object(os_name: &str) -> Result<File, Errno> {
    let fd = shm_open(os_name, OFlag::O_RDWR, Mode::empty())?;
    Ok(File::from(fd))
}

/// Open a backing object, creating it with at least `min_size` zeroed bytes.
///
/// Safe to race with other processes doing the same: growing to the same
/// length never clobbers bytes another process already wrote.
pub fn open_or_create_object(os_name: &str, min_size: usize, mode: u32) -> ShmResult<File> {
    let fd = shm_open(
        os_name,
        OFlag::O_CREAT | OFlag::O_RDWR,
        Mode::from_bits_truncate(mode as libc::mode_t),
    )
    .map_err(|e| ShmError::resource(os_name, e))?;
    let file = File::from(fd);

    if object_len(&file).map_err(|e| ShmError::resource(os_name, e))? < min_size {
        file.set_len(min_size as u64)
            .map_err(|e| ShmError::resource(os_name, e))?;
    }

    Ok(file)
}

/// Remove an object name from the shm namespace.
///
/// Existing mappings stay valid until unmapped.
pub fn unlink_object(os_name: &str) -> Result<(), Errno> {
    shm_unlink(os_name)
}

/// Current length of a backing object in bytes.
pub fn object_len(file: &File) -> std::io::Result<usize> {
    Ok(file.metadata()?.len() as usize)
}

/// Map `len` bytes of a backing object shared and read/write.
pub fn map_object(
    os_name: &str,
    file: &File,
    len: usize,
    config: &LinuxMemoryConfig,
) -> ShmResult<MmapMut> {
    let mut mmap_options = MmapOptions::new();
    mmap_options.len(len);

    if config.populate {
        mmap_options.populate();
    }

    // SAFETY: the object is shared by design; all access to the mapped bytes
    // goes through volatile or pthread operations, never through references
    // that assume exclusivity.
    let mmap = unsafe { mmap_options.map_mut(file) }.map_err(|e| ShmError::resource(os_name, e))?;
    Ok(mmap)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true, // exists, not ours to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
