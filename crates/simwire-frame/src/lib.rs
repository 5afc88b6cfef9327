//! Typed message framing between the host and the simulator.
//!
//! Every frame is a 5-byte header followed by its body:
//! - a 1-byte field-type tag ([`FieldType`])
//! - a 4-byte big-endian body length
//!
//! A composite message is a run of frames closed by an END_OF_MESSAGE
//! header. Large bodies may instead live in a shared memory segment and be
//! referenced by offset; the reader resolves those transparently.

pub mod codec;
pub mod error;
pub mod field;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_header, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use field::FieldType;
pub use reader::FrameReader;
pub use writer::FrameWriter;
