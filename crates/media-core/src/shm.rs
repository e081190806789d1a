//! POSIX named shared memory: `shm_open` + `ftruncate` + `mmap`, wrapped
//! in an owning handle that `munmap`s on drop. Opening is idempotent
//! across the producer and the consumer — whichever side gets there
//! first creates and sizes the region; the other attaches to it.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::error::{MediaError, Result};

/// An attached POSIX shared memory region of a fixed, known size.
pub struct ShmRegion {
    name: String,
    ptr: *mut libc::c_void,
    len: usize,
    owns_unlink: bool,
}

// The region is a raw mapped pointer shared across processes by
// construction; within this process it is Send/Sync because all access
// to the mapped bytes goes through atomics defined by the ring layout.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Open (creating if necessary) a shared region named `name` (must
    /// start with `/`, per `shm_open(3)`) sized exactly `len` bytes. If
    /// this call creates the segment, `owns_unlink` controls whether
    /// dropping this handle also `shm_unlink`s it (the side that tears
    /// down the call, not every attacher, should own that).
    pub fn open_or_create(name: &str, len: usize, owns_unlink: bool) -> Result<Self> {
        let c_name = CString::new(name).expect("shm name must not contain NUL");

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(MediaError::ShmOpen {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        // ftruncate is a no-op if the segment is already exactly this
        // size (the common "attaching, not creating" case); it is only
        // destructive the first time, when the fresh segment is 0 bytes.
        let current_size = unsafe {
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 {
                libc::close(fd);
                return Err(MediaError::ShmOpen {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            stat.st_size as u64
        };
        if current_size == 0 {
            if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(MediaError::Truncate {
                    name: name.to_string(),
                    source: err,
                });
            }
        } else if current_size != len as u64 {
            unsafe { libc::close(fd) };
            return Err(MediaError::SizeMismatch {
                name: name.to_string(),
                actual: current_size,
                expected: len as u64,
            });
        }

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // fd is no longer needed once mapped; mmap keeps its own reference.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(MediaError::Mmap {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(ShmRegion {
            name: name.to_string(),
            ptr,
            len,
            owns_unlink,
        })
    }

    /// Raw pointer to the start of the mapped region.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Remove the named segment from the filesystem namespace. Safe to
    /// call even if other processes still have it mapped — they keep
    /// their existing mapping until they `munmap`.
    pub fn unlink(name: &str) {
        if let Ok(c_name) = CString::new(name) {
            unsafe {
                libc::shm_unlink(c_name.as_ptr());
            }
        }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
        if self.owns_unlink {
            Self::unlink(&self.name);
        }
    }
}
