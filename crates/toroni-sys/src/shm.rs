//! POSIX shared-memory carrier.
//!
//! Backs the RMP ring and the reader-info table. A region is named (a
//! `shm_open` path such as `/toroni_bus_rmp`), created or attached with
//! [`SharedRegion::create_or_open`], and the creator zero-fills it via
//! `ftruncate` before anyone else can observe it (the OS zero-fills the
//! extension). Non-creators attach with the same call and distinguish
//! themselves via [`SharedRegion::is_creator`].
//!
//! Regions are never implicitly unmapped or unlinked: the OS object outlives
//! the mapping so other processes can still attach after this one exits.
//! Callers that want to reclaim the name call [`SharedRegion::unlink`]
//! explicitly.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;

use memmap2::{Mmap, MmapMut};

use crate::error::SysError;

fn shm_name(name: &str) -> Result<CString, SysError> {
    CString::new(name).map_err(|_| SysError::InvalidName(name.to_string()))
}

/// A read-write shared-memory region, possibly just created by this process.
pub struct SharedRegion {
    _file: File,
    mmap: Option<MmapMut>,
    creator: bool,
    name: String,
}

impl SharedRegion {
    /// Creates the named region if it does not exist, or attaches to it if
    /// it does. Only the creator truncates the backing object to `len`
    /// bytes; an attacher trusts the creator already did so.
    pub fn create_or_open(name: &str, len: usize, mode: libc::mode_t) -> Result<Self, SysError> {
        let cname = shm_name(name)?;

        let created_fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                mode as libc::c_int,
            )
        };

        let (fd, creator) = if created_fd >= 0 {
            (created_fd, true)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(SysError::ShmOpen {
                    name: name.to_string(),
                    source: err,
                });
            }
            let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, mode as libc::c_int) };
            if fd < 0 {
                return Err(SysError::ShmOpen {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            (fd, false)
        };

        // SAFETY: fd was just returned by a successful shm_open call above.
        let file = unsafe { File::from_raw_fd(fd) };

        if creator {
            file.set_len(len as u64).map_err(|source| SysError::Truncate {
                name: name.to_string(),
                source,
            })?;
            tracing::debug!(name, len, "created shared memory region");
        } else {
            tracing::debug!(name, "attached to existing shared memory region");
        }

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| SysError::Mmap {
            name: name.to_string(),
            source,
        })?;
        if mmap.len() < len {
            return Err(SysError::RegionTooSmall {
                name: name.to_string(),
                expected: len,
                actual: mmap.len(),
            });
        }

        Ok(Self {
            _file: file,
            mmap: Some(mmap),
            creator,
            name: name.to_string(),
        })
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.mmap.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    #[inline]
    pub fn ptr(&self) -> *const u8 {
        self.mmap.as_ref().expect("region unmapped").as_ptr()
    }

    #[inline]
    pub fn ptr_mut(&mut self) -> *mut u8 {
        self.mmap.as_mut().expect("region unmapped").as_mut_ptr()
    }

    /// Drops the in-process mapping. The backing shared-memory object is
    /// left alive; other processes may still be attached to it.
    pub fn unmap(&mut self) {
        self.mmap = None;
    }

    /// Removes the name from the system so no future process can attach.
    /// Processes already mapped in keep their mapping valid until they exit.
    pub fn unlink(name: &str) -> Result<(), SysError> {
        let cname = shm_name(name)?;
        let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
        if rc != 0 {
            return Err(SysError::Unlink {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

/// A read-only attachment, for processes that only ever read a region (e.g.
/// a reader attaching to the reader-info table's public fields).
pub struct SharedRegionRo {
    _file: File,
    mmap: Option<Mmap>,
    name: String,
}

impl SharedRegionRo {
    pub fn open_read_only(name: &str, len: usize) -> Result<Self, SysError> {
        let cname = shm_name(name)?;
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return Err(SysError::ShmOpen {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        let file = unsafe { File::from_raw_fd(fd) };
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| SysError::Mmap {
            name: name.to_string(),
            source,
        })?;
        if mmap.len() < len {
            return Err(SysError::RegionTooSmall {
                name: name.to_string(),
                expected: len,
                actual: mmap.len(),
            });
        }
        Ok(Self {
            _file: file,
            mmap: Some(mmap),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.mmap.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    #[inline]
    pub fn ptr(&self) -> *const u8 {
        self.mmap.as_ref().expect("region unmapped").as_ptr()
    }

    pub fn unmap(&mut self) {
        self.mmap = None;
    }
}
