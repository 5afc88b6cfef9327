use std::io::{Read, Write};

use crate::error::Result;

/// A connected duplex stream to the simulator. Implements `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations.
/// On Unix it wraps either a Unix domain socket stream or a pair of
/// named pipes (one per direction).
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Fifo(crate::fifo::FifoStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(unix)]
            IpcStreamInner::Fifo(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(unix)]
            IpcStreamInner::Fifo(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
            #[cfg(unix)]
            IpcStreamInner::Fifo(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create an IpcStream from an opened named pipe pair.
    #[cfg(unix)]
    pub(crate) fn from_fifo(stream: crate::fifo::FifoStream) -> Self {
        Self {
            inner: IpcStreamInner::Fifo(stream),
        }
    }

    /// A connected loopback pair. Whatever one end writes the other end reads.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpcStreamInner::Fifo(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Set write timeout on the underlying stream.
    ///
    /// Named pipes ignore write timeouts; the simulator drains its end
    /// before it responds.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpcStreamInner::Fifo(_) => Ok(()),
        }
    }

    /// Try to clone this stream (creates new file descriptors).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
            #[cfg(unix)]
            IpcStreamInner::Fifo(stream) => Ok(Self::from_fifo(stream.try_clone()?)),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(unix)]
            IpcStreamInner::Fifo(_) => "named-pipes",
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

/// A readable view of a shared memory region that large frames may be
/// placed in instead of being copied through the stream.
///
/// The frame reader depends only on this trait, never on the system calls
/// behind a particular segment.
pub trait SharedSegment: Send {
    /// The whole mapped region.
    fn as_bytes(&self) -> &[u8];
}

impl SharedSegment for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}
