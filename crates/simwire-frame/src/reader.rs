use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use simwire_transport::{IpcStream, SharedSegment};
use tracing::trace;

use crate::codec::{decode_frame, decode_header, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::field::FieldType;

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads complete frames and composite messages from any `Read` stream.
///
/// Handles partial reads internally, and resolves shared memory
/// indirections when a segment is attached, so callers always get complete
/// frames with their real field type.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    segment: Option<Box<dyn SharedSegment>>,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            segment: None,
        }
    }

    /// Attach the shared memory segment indirection frames point into.
    pub fn with_shared_segment(mut self, segment: Box<dyn SharedSegment>) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let frame = self.read_wire_frame()?;
        if frame.field_type == FieldType::SharedMemory {
            return self.resolve_indirection(&frame);
        }
        Ok(frame)
    }

    /// Read frames until END_OF_MESSAGE and return them in arrival order.
    ///
    /// The terminator itself is not included.
    pub fn read_message(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame()?;
            trace!(
                field = %frame.field_type,
                size = frame.payload.len(),
                "received frame"
            );
            if frame.field_type == FieldType::EndOfMessage {
                return Ok(frames);
            }
            frames.push(frame);
        }
    }

    fn read_wire_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn resolve_indirection(&self, frame: &Frame) -> Result<Frame> {
        let segment = self.segment.as_ref().ok_or_else(|| {
            FrameError::SharedMemory("indirection received but no segment is attached".into())
        })?;
        let offset_bytes: [u8; 4] = frame.payload.as_ref().try_into().map_err(|_| {
            FrameError::SharedMemory(format!(
                "offset body must be 4 bytes, got {}",
                frame.payload.len()
            ))
        })?;
        let offset = u32::from_be_bytes(offset_bytes) as usize;
        let region = segment.as_bytes();

        let header: &[u8; HEADER_SIZE] = region
            .get(offset..offset + HEADER_SIZE)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| {
                FrameError::SharedMemory(format!(
                    "header at offset {offset} exceeds segment of {} bytes",
                    region.len()
                ))
            })?;
        let (field_type, length) = decode_header(header, self.config.max_payload_size)?;
        if field_type == FieldType::SharedMemory {
            return Err(FrameError::SharedMemory(
                "nested indirection is not allowed".into(),
            ));
        }

        let start = offset + HEADER_SIZE;
        let body = region.get(start..start + length).ok_or_else(|| {
            FrameError::SharedMemory(format!(
                "{length}-byte body at offset {start} exceeds segment of {} bytes",
                region.len()
            ))
        })?;

        trace!(field = %field_type, offset, size = length, "resolved shared memory frame");
        // Copy out: the simulator reuses the segment for the next payload.
        Ok(Frame::new(field_type, Bytes::copy_from_slice(body)))
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout for subsequent reads.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

pub(crate) fn transport_to_frame_error(err: simwire_transport::TransportError) -> FrameError {
    use simwire_transport::TransportError;

    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Pipe { source, .. }
        | TransportError::SharedMemory { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
