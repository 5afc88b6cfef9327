use std::io::{Read, Write};

use simwire_event::Payload;
use simwire_frame::{FrameConfig, FrameReader, FrameWriter};
use simwire_transport::{IpcStream, SharedSegment};
use tracing::{debug, info};

use crate::action::Action;
use crate::error::WireError;
use crate::wire::{decode_message, encode_action};

/// A channel that carries one action out and one response back.
///
/// Implementations only move and decode bytes; the controller decides what
/// a failure means for the session.
pub trait Transport {
    /// Send one action.
    fn send_action(&mut self, action: &Action) -> Result<(), WireError>;

    /// Block until one complete response has arrived.
    fn recv_payload(&mut self) -> Result<Payload, WireError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// [`Transport`] over a framed byte stream pair.
pub struct FramedTransport<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    name: &'static str,
}

impl<R: Read, W: Write> FramedTransport<R, W> {
    pub fn new(reader: FrameReader<R>, writer: FrameWriter<W>) -> Self {
        Self {
            reader,
            writer,
            name: "framed",
        }
    }

    /// Resolve shared memory indirections against `segment`.
    pub fn with_shared_segment(self, segment: Box<dyn SharedSegment>) -> Self {
        let Self {
            reader,
            writer,
            name,
        } = self;
        Self {
            reader: reader.with_shared_segment(segment),
            writer,
            name,
        }
    }

    pub fn reader(&self) -> &FrameReader<R> {
        &self.reader
    }

    pub fn writer(&self) -> &FrameWriter<W> {
        &self.writer
    }

    pub fn into_parts(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

impl FramedTransport<IpcStream, IpcStream> {
    /// Split one duplex stream into a reader and a writer half.
    pub fn from_stream(stream: IpcStream, config: FrameConfig) -> crate::Result<Self> {
        let name = stream.transport_name();
        let reader_stream = stream.try_clone()?;

        let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;
        info!(transport = name, "framed channel ready");

        Ok(Self {
            reader,
            writer,
            name,
        })
    }
}

impl<R: Read, W: Write> Transport for FramedTransport<R, W> {
    fn send_action(&mut self, action: &Action) -> Result<(), WireError> {
        let frame = encode_action(action)?;
        debug!(
            action = action.name(),
            sequence_id = ?action.sequence_id(),
            size = frame.payload.len(),
            "sending action"
        );
        self.writer.send_message(std::slice::from_ref(&frame))?;
        Ok(())
    }

    fn recv_payload(&mut self) -> Result<Payload, WireError> {
        let frames = self.reader.read_message()?;
        decode_message(frames)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
