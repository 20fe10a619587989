//! Anonymous shared memory regions
//!
//! A region is a memory-backed file with no filesystem path. On Linux it is a
//! sealed memfd; on other unix targets it is a POSIX shm object that is
//! unlinked immediately after creation. Either way the only handle to it is
//! the descriptor, which is shared with consumers over the control socket.

use crate::{Result, SharedMemoryError};
use memmap2::{Mmap, MmapOptions, MmapRaw};
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use tracing::debug;

/// Name shown in `/proc/<pid>/fd` for the memfd
const MEMFD_NAME: &str = "vitals-portal-ring";

/// Shared memory region handle
#[derive(Debug)]
pub struct SharedRegion {
    file: File,
    size: usize,
}

impl SharedRegion {
    /// Allocate a region of exactly `size` bytes
    pub fn create(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SharedMemoryError::InvalidSize { size, min: 1 });
        }

        let fd = create_anonymous_fd()?;
        let file = File::from(fd);
        file.set_len(size as u64)?;
        seal_size(&file)?;

        debug!("Allocated {} byte shared region on fd {}", size, file.as_raw_fd());

        Ok(Self { file, size })
    }

    /// Region size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Duplicate the descriptor for handing to a consumer
    pub fn share_descriptor(&self) -> Result<OwnedFd> {
        Ok(self.file.as_fd().try_clone_to_owned()?)
    }

    /// Map the whole region read-write for the producer
    pub fn map_writable(&self) -> Result<MmapRaw> {
        MmapOptions::new()
            .len(self.size)
            .map_raw(&self.file)
            .map_err(|e| SharedMemoryError::MappingFailed(format!("read-write mmap failed: {}", e)))
    }
}

impl AsFd for SharedRegion {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Map a received region descriptor read-only.
///
/// The descriptor is consumed; the mapping stays valid after it is closed.
pub fn map_read_only(fd: OwnedFd, len: usize) -> Result<Mmap> {
    let file = File::from(fd);
    let actual = file.metadata()?.len() as usize;
    if actual < len {
        return Err(SharedMemoryError::InvalidSize {
            size: actual,
            min: len,
        });
    }

    // Safety: the producer never truncates the region (it is size-sealed on
    // Linux) and this side only reads it.
    unsafe { MmapOptions::new().len(len).map(&file) }
        .map_err(|e| SharedMemoryError::MappingFailed(format!("read-only mmap failed: {}", e)))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_anonymous_fd() -> Result<OwnedFd> {
    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
    use std::ffi::CString;

    let name = CString::new(MEMFD_NAME)
        .map_err(|_| SharedMemoryError::Platform("invalid memfd name".to_string()))?;

    memfd_create(
        name.as_c_str(),
        MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
    )
    .map_err(|e| SharedMemoryError::from_errno(e, "memfd_create failed"))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_anonymous_fd() -> Result<OwnedFd> {
    use crate::platform::PlatformUtils;
    use nix::fcntl::OFlag;
    use nix::sys::mman::{shm_open, shm_unlink};
    use nix::sys::stat::Mode;
    use std::ffi::CString;

    let name = CString::new(PlatformUtils::generate_region_name("vp"))
        .map_err(|_| SharedMemoryError::Platform("invalid shm name".to_string()))?;

    let fd = shm_open(
        name.as_c_str(),
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
    .map_err(|e| SharedMemoryError::from_errno(e, "shm_open failed"))?;

    // Drop the name right away so the object lives only as long as its descriptors
    shm_unlink(name.as_c_str()).map_err(|e| SharedMemoryError::from_errno(e, "shm_unlink failed"))?;

    debug!("Using unlinked shm object in place of memfd ({})", MEMFD_NAME);
    Ok(fd)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn seal_size(file: &File) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, SealFlag};

    fcntl(
        file.as_raw_fd(),
        FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW),
    )
    .map(|_| ())
    .map_err(|e| SharedMemoryError::from_errno(e, "sealing region failed"))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn seal_size(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_share() {
        let region = SharedRegion::create(8192).unwrap();
        assert_eq!(region.size(), 8192);

        let shared = region.share_descriptor().unwrap();
        assert_ne!(shared.as_raw_fd(), region.as_fd().as_raw_fd());

        let mapping = map_read_only(shared, 8192).unwrap();
        assert_eq!(mapping.len(), 8192);
        assert!(mapping.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_writes_visible_through_shared_descriptor() {
        let region = SharedRegion::create(4096).unwrap();
        let writable = region.map_writable().unwrap();
        unsafe { *writable.as_mut_ptr().add(100) = 0x5A };

        let mapping = map_read_only(region.share_descriptor().unwrap(), 4096).unwrap();
        assert_eq!(mapping[100], 0x5A);
    }

    #[test]
    fn test_mapping_survives_region_drop() {
        let region = SharedRegion::create(4096).unwrap();
        let writable = region.map_writable().unwrap();
        unsafe { *writable.as_mut_ptr() = 7 };

        let mapping = map_read_only(region.share_descriptor().unwrap(), 4096).unwrap();
        drop(writable);
        drop(region);

        assert_eq!(mapping[0], 7);
    }

    #[test]
    fn test_rejects_oversized_mapping() {
        let region = SharedRegion::create(4096).unwrap();
        let result = map_read_only(region.share_descriptor().unwrap(), 8192);
        assert!(matches!(result, Err(SharedMemoryError::InvalidSize { size: 4096, min: 8192 })));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(SharedRegion::create(0).is_err());
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_region_is_size_sealed() {
        let region = SharedRegion::create(4096).unwrap();
        let file = File::from(region.share_descriptor().unwrap());
        assert!(file.set_len(1024).is_err());
        assert!(file.set_len(8192).is_err());
    }
}
