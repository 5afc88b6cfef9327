use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::field::FieldType;

/// Frame header: field type (1) + body length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Default maximum body size: 256 MiB, enough for a float32 depth plane at 8K.
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// One typed chunk of a composite message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What the body holds.
    pub field_type: FieldType,
    /// The frame body.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(field_type: FieldType, payload: impl Into<Bytes>) -> Self {
        Self {
            field_type,
            payload: payload.into(),
        }
    }

    /// The zero-length terminator of a composite message.
    pub fn end_of_message() -> Self {
        Self::new(FieldType::EndOfMessage, Bytes::new())
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────┬──────────────────┐
/// │ Field type │ Body length  │ Body             │
/// │ (1B)       │ (4B BE)      │ (length bytes)   │
/// └────────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_frame(field_type: FieldType, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(field_type.tag());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Parse a 5-byte header into its field type and body length.
pub fn decode_header(header: &[u8; HEADER_SIZE], max_payload: usize) -> Result<(FieldType, usize)> {
    let field_type =
        FieldType::from_tag(header[0]).ok_or(FrameError::UnknownFieldType(header[0]))?;
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if field_type == FieldType::EndOfMessage {
        // The length of a terminator is unused.
        return Ok((field_type, 0));
    }
    if length > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: max_payload,
        });
    }
    Ok((field_type, length))
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let (field_type, length) = decode_header(&header, max_payload)?;

    let total = HEADER_SIZE + length;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();

    Ok(Some(Frame {
        field_type,
        payload,
    }))
}

/// Configuration for the frame reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 256 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
