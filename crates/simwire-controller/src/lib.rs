//! Drives an external simulator one action at a time.
//!
//! The [`Controller`] sends an [`Action`] over a [`Transport`], waits for
//! the matching response and decodes it into a
//! [`MultiAgentEvent`](simwire_event::MultiAgentEvent). Failures are
//! classified by [`ErrorKind`] so callers can tell a dead channel from a
//! rejected request.

pub mod action;
pub mod compat;
pub mod config;
pub mod controller;
pub mod error;
pub mod multipart;
pub mod transport;
pub mod wire;

pub use action::{Action, Vec3};
pub use config::{ControllerConfig, SimulatorSettings, DEFAULT_TIMEOUT};
pub use controller::{Controller, DriverState, StepOptions, CALLER_MISTAKE_CODES};
pub use error::{ControllerError, ErrorKind, ProtocolError, Result, WireError};
pub use multipart::{decode_multipart, encode_action_response, encode_multipart};
pub use transport::{FramedTransport, Transport};
pub use wire::{decode_message, encode_action, verify_sequence};
