use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Two named pipes, one per direction, shared with the simulator.
///
/// The host reads what the simulator writes to the server pipe and writes
/// actions into the client pipe. Both FIFOs are created on construction and
/// unlinked on drop.
#[derive(Debug)]
pub struct NamedPipePair {
    server_path: PathBuf,
    client_path: PathBuf,
}

impl NamedPipePair {
    /// File name of the simulator-to-host pipe.
    pub const SERVER_PIPE: &'static str = "server.pipe";
    /// File name of the host-to-simulator pipe.
    pub const CLIENT_PIPE: &'static str = "client.pipe";
    const FIFO_MODE: libc::mode_t = 0o600;

    /// Create both FIFOs inside `dir`, reusing FIFOs left by a previous run.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let pair = Self {
            server_path: dir.join(Self::SERVER_PIPE),
            client_path: dir.join(Self::CLIENT_PIPE),
        };
        make_fifo(&pair.server_path)?;
        make_fifo(&pair.client_path)?;
        info!(server = ?pair.server_path, client = ?pair.client_path, "created named pipes");
        Ok(pair)
    }

    /// Pipe the simulator writes responses into.
    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    /// Pipe the simulator reads actions from.
    pub fn client_path(&self) -> &Path {
        &self.client_path
    }

    /// Open the host end (blocking until the simulator opens its end).
    ///
    /// The client pipe is opened first, then the server pipe; the simulator
    /// must open them in the same order for neither side to deadlock.
    pub fn open(&self) -> Result<IpcStream> {
        let writer = open_fifo(&self.client_path, false)?;
        let reader = open_fifo(&self.server_path, true)?;
        debug!("host end of named pipes open");
        Ok(IpcStream::from_fifo(FifoStream::new(reader, writer)))
    }

    /// Open the simulator end. Used by stand-in simulators and tests.
    pub fn open_peer(&self) -> Result<IpcStream> {
        let reader = open_fifo(&self.client_path, true)?;
        let writer = open_fifo(&self.server_path, false)?;
        debug!("simulator end of named pipes open");
        Ok(IpcStream::from_fifo(FifoStream::new(reader, writer)))
    }
}

impl Drop for NamedPipePair {
    fn drop(&mut self) {
        for path in [&self.server_path, &self.client_path] {
            if let Ok(meta) = std::fs::symlink_metadata(path) {
                if meta.file_type().is_fifo() {
                    debug!(?path, "removing named pipe");
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }
}

fn make_fifo(path: &Path) -> Result<()> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_fifo() {
            return Ok(());
        }
        return Err(pipe_error(
            path,
            std::io::Error::new(ErrorKind::AlreadyExists, "existing path is not a fifo"),
        ));
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| pipe_error(path, std::io::Error::new(ErrorKind::InvalidInput, e)))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), NamedPipePair::FIFO_MODE) };
    if rc != 0 {
        return Err(pipe_error(path, std::io::Error::last_os_error()));
    }
    Ok(())
}

fn open_fifo(path: &Path, read: bool) -> Result<File> {
    OpenOptions::new()
        .read(read)
        .write(!read)
        .open(path)
        .map_err(|e| pipe_error(path, e))
}

fn pipe_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Pipe {
        path: path.to_path_buf(),
        source,
    }
}

/// One reading and one writing pipe presented as a single duplex stream.
pub(crate) struct FifoStream {
    reader: File,
    writer: File,
    // Milliseconds; 0 means no timeout.
    read_timeout_ms: Arc<AtomicU64>,
}

impl FifoStream {
    fn new(reader: File, writer: File) -> Self {
        Self {
            reader,
            writer,
            read_timeout_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) {
        let ms = timeout.map_or(0, |t| (t.as_millis() as u64).max(1));
        self.read_timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            reader: self.reader.try_clone()?,
            writer: self.writer.try_clone()?,
            read_timeout_ms: Arc::clone(&self.read_timeout_ms),
        })
    }

    fn wait_readable(&self, timeout_ms: u64) -> std::io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.reader.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = timeout_ms.min(libc::c_int::MAX as u64) as libc::c_int;
        // SAFETY: `pfd` is a valid pollfd for an open descriptor and we pass a count of 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
        match rc {
            0 => Err(std::io::Error::new(
                ErrorKind::TimedOut,
                "named pipe read timed out",
            )),
            n if n < 0 => Err(std::io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}

impl Read for FifoStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let timeout_ms = self.read_timeout_ms.load(Ordering::Relaxed);
        if timeout_ms > 0 {
            self.wait_readable(timeout_ms)?;
        }
        self.reader.read(buf)
    }
}

impl Write for FifoStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "simwire-fifo-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn host_and_simulator_exchange_bytes() {
        let dir = scratch_dir("exchange");
        let pipes = Arc::new(NamedPipePair::create(&dir).unwrap());

        let peer_pipes = Arc::clone(&pipes);
        let simulator = std::thread::spawn(move || {
            let mut stream = peer_pipes.open_peer().unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"action");
            stream.write_all(b"result").unwrap();
        });

        let mut host = pipes.open().unwrap();
        assert_eq!(host.transport_name(), "named-pipes");
        host.write_all(b"action").unwrap();
        let mut buf = [0u8; 6];
        host.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"result");

        simulator.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_timeout_is_reported_as_timed_out() {
        let dir = scratch_dir("timeout");
        let pipes = Arc::new(NamedPipePair::create(&dir).unwrap());

        let peer_pipes = Arc::clone(&pipes);
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let simulator = std::thread::spawn(move || {
            let _stream = peer_pipes.open_peer().unwrap();
            // Hold the pipes open without writing until the host gives up.
            let _ = done_rx.recv();
        });

        let mut host = pipes.open().unwrap();
        host.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 1];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        done_tx.send(()).unwrap();
        simulator.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_reuses_existing_fifos_and_drop_removes_them() {
        let dir = scratch_dir("reuse");
        let first = NamedPipePair::create(&dir).unwrap();
        let second = NamedPipePair::create(&dir).unwrap();
        assert_eq!(first.server_path(), second.server_path());

        drop(first);
        assert!(!dir.join(NamedPipePair::SERVER_PIPE).exists());
        assert!(!dir.join(NamedPipePair::CLIENT_PIPE).exists());

        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_regular_file_in_the_way() {
        let dir = scratch_dir("regular");
        std::fs::write(dir.join(NamedPipePair::SERVER_PIPE), b"x").unwrap();

        let err = NamedPipePair::create(&dir).unwrap_err();
        assert!(matches!(err, TransportError::Pipe { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
