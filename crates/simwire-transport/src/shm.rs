use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::SharedSegment;

/// A System V shared memory segment mapped into this process.
///
/// The simulator can write large image frames here and send only an offset
/// through the stream. A segment created by this process is removed when the
/// value is dropped or destroyed; an attached one is only unmapped.
pub struct SharedMemory {
    id: libc::c_int,
    base: NonNull<u8>,
    size: usize,
    owner: bool,
}

// SAFETY: the mapping is plain memory owned by this value; access goes through
// `&self`/`&mut self`, so Rust's aliasing rules cover it within this process.
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Create a private segment of `size` bytes and map it.
    pub fn create(size: usize) -> Result<Self> {
        // SAFETY: plain syscall with value arguments.
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return Err(shm_error("shmget"));
        }

        match Self::map(id, size, true) {
            Ok(segment) => {
                debug!(id, size, "created shared memory segment");
                Ok(segment)
            }
            Err(err) => {
                // SAFETY: `id` names the segment created above; no mapping exists.
                unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
                Err(err)
            }
        }
    }

    /// Map an existing segment created by another process.
    pub fn attach(id: i32) -> Result<Self> {
        // SAFETY: an all-zero shmid_ds is a valid value for the kernel to overwrite.
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `ds` is a valid, writable shmid_ds.
        let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) };
        if rc != 0 {
            return Err(shm_error("shmctl(IPC_STAT)"));
        }
        let segment = Self::map(id, ds.shm_segsz as usize, false)?;
        debug!(id, size = segment.size, "attached shared memory segment");
        Ok(segment)
    }

    fn map(id: libc::c_int, size: usize, owner: bool) -> Result<Self> {
        // SAFETY: a null address lets the kernel choose the mapping location.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(shm_error("shmat"));
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| shm_error("shmat"))?;
        Ok(Self {
            id,
            base,
            size,
            owner,
        })
    }

    /// Identifier other processes attach with.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True for a zero-sized segment.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `base` points at a live mapping of `size` bytes until drop.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.size) }
    }

    /// The mapped bytes, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access here.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.size) }
    }

    /// Unmap without removing the segment.
    pub fn detach(mut self) -> Result<()> {
        self.owner = false;
        let result = self.unmap();
        std::mem::forget(self);
        result
    }

    /// Unmap and mark the segment for removal.
    pub fn destroy(self) -> Result<()> {
        let unmapped = self.unmap();
        // SAFETY: `id` names a segment this value created or attached to.
        let rc = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        std::mem::forget(self);
        unmapped?;
        if rc != 0 {
            return Err(shm_error("shmctl(IPC_RMID)"));
        }
        Ok(())
    }

    fn unmap(&self) -> Result<()> {
        // SAFETY: `base` was returned by shmat and has not been detached yet.
        let rc = unsafe { libc::shmdt(self.base.as_ptr().cast::<libc::c_void>()) };
        if rc != 0 {
            return Err(shm_error("shmdt"));
        }
        Ok(())
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            warn!(id = self.id, error = %err, "failed to unmap shared memory");
        }
        if self.owner {
            // SAFETY: this process created the segment.
            unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        }
    }
}

impl SharedSegment for SharedMemory {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("owner", &self.owner)
            .finish()
    }
}

fn shm_error(op: &'static str) -> TransportError {
    TransportError::SharedMemory {
        op,
        source: std::io::Error::last_os_error(),
    }
}
