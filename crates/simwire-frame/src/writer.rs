use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use simwire_transport::IpcStream;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::field::FieldType;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes frames and composite messages to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write one complete frame and flush.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.field_type, frame.payload.as_ref())
    }

    /// Encode and send a single frame, then flush.
    pub fn send(&mut self, field_type: FieldType, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        self.encode(field_type, payload)?;
        self.write_buffered()?;
        self.flush()
    }

    /// Send one logical message: every frame, then END_OF_MESSAGE, then a
    /// single flush.
    pub fn send_message(&mut self, frames: &[Frame]) -> Result<()> {
        self.buf.clear();
        for frame in frames {
            self.encode(frame.field_type, frame.payload.as_ref())?;
        }
        self.encode(FieldType::EndOfMessage, &[])?;
        trace!(
            frames = frames.len(),
            bytes = self.buf.len(),
            "sending message"
        );
        self.write_buffered()?;
        self.flush()
    }

    fn encode(&mut self, field_type: FieldType, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(field_type, payload, &mut self.buf)
    }

    /// A `WouldBlock` or `TimedOut` from the stream surfaces as a timeout
    /// error; only `Interrupted` is retried.
    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn single_frame_layout() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send(FieldType::Action, b"{}").unwrap();

        let bytes = written(writer);
        assert_eq!(bytes.as_ref(), &[2, 0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn message_is_terminated() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer
            .send_message(&[Frame::new(FieldType::Action, b"{\"action\":\"Pass\"}".to_vec())])
            .unwrap();

        let mut bytes = written(writer);
        let action = decode_frame(&mut bytes, usize::MAX).unwrap().unwrap();
        let end = decode_frame(&mut bytes, usize::MAX).unwrap().unwrap();
        assert_eq!(action.field_type, FieldType::Action);
        assert_eq!(end, Frame::end_of_message());
        assert!(bytes.is_empty());
    }

    #[test]
    fn empty_message_is_just_the_terminator() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send_message(&[]).unwrap();
        assert_eq!(written(writer).len(), HEADER_SIZE);
    }

    #[test]
    fn message_flushes_once() {
        let sink = CountingSink::default();
        let flushes = Arc::clone(&sink.flushes);
        let mut writer = FrameWriter::new(sink);

        writer
            .send_message(&[
                Frame::new(FieldType::Metadata, b"{}".to_vec()),
                Frame::new(FieldType::RgbImage, vec![0u8; 48]),
            ])
            .unwrap();

        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_frame_rejected_before_writing() {
        let config = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);

        let err = writer
            .send_message(&[Frame::new(FieldType::RgbImage, vec![0u8; 5])])
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 5, max: 4 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn interrupted_write_is_retried() {
        let mut writer = FrameWriter::new(InterruptOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer.send(FieldType::Action, b"retry").unwrap();
        assert_eq!(writer.into_inner().data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        assert!(matches!(
            writer.send(FieldType::Action, b"x").unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn broken_pipe_means_closed() {
        let mut writer = FrameWriter::new(BrokenPipeWriter);
        assert!(matches!(
            writer.send(FieldType::Action, b"x").unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn would_block_surfaces_as_timeout() {
        let mut writer = FrameWriter::new(BlockedWriter { flush_blocks: false });
        let err = writer.send(FieldType::Action, b"x").unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn blocked_flush_surfaces_as_timeout() {
        let mut writer = FrameWriter::new(BlockedWriter { flush_blocks: true });
        let err = writer.flush().unwrap_err();
        assert!(err.is_timeout());
    }

    #[cfg(unix)]
    #[test]
    fn stalled_peer_times_out_the_writer() {
        let (local, _peer) = IpcStream::pair().unwrap();
        let config = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_ipc(local, config).unwrap();

        let chunk = vec![0u8; 64 * 1024];
        let err = (0..1024)
            .find_map(|_| writer.send(FieldType::RgbImage, &chunk).err())
            .expect("socket buffer never filled");
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    struct BlockedWriter {
        flush_blocks: bool,
    }

    impl Write for BlockedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.flush_blocks {
                return Ok(buf.len());
            }
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if self.flush_blocks {
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        flushes: Arc<AtomicUsize>,
        data: Vec<u8>,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipeWriter;

    impl Write for BrokenPipeWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
