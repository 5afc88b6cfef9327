use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use simwire_event::{DecodeError, MultiAgentEvent};
use simwire_frame::{FieldType, FrameError};
use simwire_transport::TransportError;

use crate::controller::DriverState;

/// Violations of the host/simulator message contract.
///
/// All of these leave the channel out of sync; it must be re-established.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The response answers a different request.
    #[error("sequence id mismatch: expected {expected}, received {received}")]
    SequenceMismatch { expected: u64, received: u64 },

    /// The response metadata carries no `sequenceId`.
    #[error("response metadata has no sequenceId")]
    MissingSequenceId,

    /// The response has no metadata frame or part.
    #[error("response has no metadata")]
    MissingMetadata,

    /// The response has more than one metadata frame or part.
    #[error("response carries more than one metadata block")]
    DuplicateMetadata,

    /// A frame type the simulator never sends in a response.
    #[error("unexpected {0} frame in a response")]
    UnexpectedField(FieldType),

    /// A multipart part whose name is not a known image plane.
    #[error("unknown multipart part '{0}'")]
    UnknownPart(String),

    /// A multipart body that does not follow the form-data layout.
    #[error("malformed multipart body: {0}")]
    Multipart(String),

    /// Malformed framing: unknown tag, oversized body or bad indirection.
    #[error("malformed frame: {0}")]
    Frame(#[source] FrameError),
}

/// Failures of one send or receive on a transport, before the driver
/// decides what they mean for the channel.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("could not encode action: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Closed classification of [`ControllerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Channel out of sync; tear down and reconnect.
    Protocol,
    /// Channel or simulator process gone; restart and reset.
    Transport,
    /// No response in time; the channel is indeterminate.
    Timeout,
    /// The request itself was wrong.
    CallerMistake,
    /// The simulator could not perform a well-formed action.
    SoftActionFailure,
    /// The response could not be decoded.
    Decode,
    /// The driver cannot accept a request right now.
    State,
    /// Invalid configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CallerMistake => "caller-mistake",
            ErrorKind::SoftActionFailure => "soft-action-failure",
            ErrorKind::Decode => "decode",
            ErrorKind::State => "state",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the [`Controller`](crate::Controller).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The response broke the message contract.
    #[error("{action}: protocol error: {source}")]
    Protocol {
        action: String,
        #[source]
        source: ProtocolError,
    },

    /// The channel closed or failed; the simulator most likely died.
    /// The action is never resent.
    #[error("{action}: simulator connection lost: {source}")]
    Crashed {
        action: String,
        #[source]
        source: FrameError,
    },

    /// No complete response arrived within the configured timeout.
    #[error("{action}: no response within {timeout:?}")]
    Timeout {
        action: String,
        timeout: Option<Duration>,
    },

    /// The simulator rejected the request as malformed.
    #[error("{action}: {error_code}: {message}")]
    CallerMistake {
        action: String,
        error_code: String,
        message: String,
    },

    /// The action failed and the caller asked for failures to be raised.
    #[error("{action} failed: {message}")]
    ActionFailed {
        action: String,
        error_code: Option<String>,
        message: String,
        event: Arc<MultiAgentEvent>,
    },

    /// The response was well-framed but its contents could not be decoded.
    #[error("{action}: could not decode response: {source}")]
    Decode {
        action: String,
        #[source]
        source: DecodeError,
    },

    /// The action could not be serialized.
    #[error("{action}: could not encode action: {source}")]
    Encode {
        action: String,
        #[source]
        source: serde_json::Error,
    },

    /// A request was made while the driver was not idle.
    #[error("{action}: driver is {state}, not idle")]
    NotIdle { action: String, state: DriverState },

    /// Setting up the channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuring framing on a new channel failed.
    #[error("channel setup failed: {0}")]
    Setup(#[from] FrameError),

    /// A configuration value could not be parsed.
    #[error("invalid {key} value '{value}': {reason}")]
    Config {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ControllerError {
    /// Classification callers can match on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Protocol { .. } => ErrorKind::Protocol,
            ControllerError::Crashed { .. }
            | ControllerError::Transport(_)
            | ControllerError::Setup(_) => ErrorKind::Transport,
            ControllerError::Timeout { .. } => ErrorKind::Timeout,
            ControllerError::CallerMistake { .. } | ControllerError::Encode { .. } => {
                ErrorKind::CallerMistake
            }
            ControllerError::ActionFailed { .. } => ErrorKind::SoftActionFailure,
            ControllerError::Decode { .. } => ErrorKind::Decode,
            ControllerError::NotIdle { .. } => ErrorKind::State,
            ControllerError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Name of the action the error belongs to, when there is one.
    pub fn action(&self) -> Option<&str> {
        match self {
            ControllerError::Protocol { action, .. }
            | ControllerError::Crashed { action, .. }
            | ControllerError::Timeout { action, .. }
            | ControllerError::CallerMistake { action, .. }
            | ControllerError::ActionFailed { action, .. }
            | ControllerError::Decode { action, .. }
            | ControllerError::Encode { action, .. }
            | ControllerError::NotIdle { action, .. } => Some(action),
            ControllerError::Transport(_)
            | ControllerError::Setup(_)
            | ControllerError::Config { .. } => None,
        }
    }

    /// The simulator's own error message, for action failures.
    pub fn simulator_message(&self) -> Option<&str> {
        match self {
            ControllerError::CallerMistake { message, .. }
            | ControllerError::ActionFailed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// True when the channel must be torn down before another request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Protocol | ErrorKind::Transport | ErrorKind::Timeout
        )
    }

    /// Map a transport failure during `action` onto the driver's taxonomy.
    pub(crate) fn from_wire(action: &str, timeout: Option<Duration>, err: WireError) -> Self {
        let action = action.to_owned();
        match err {
            WireError::Frame(err) if err.is_timeout() => ControllerError::Timeout { action, timeout },
            WireError::Frame(err @ (FrameError::ConnectionClosed | FrameError::Io(_))) => {
                ControllerError::Crashed {
                    action,
                    source: err,
                }
            }
            WireError::Frame(err) => ControllerError::Protocol {
                action,
                source: ProtocolError::Frame(err),
            },
            WireError::Protocol(source) => ControllerError::Protocol { action, source },
            WireError::Decode(source) => ControllerError::Decode { action, source },
            WireError::Encode(source) => ControllerError::Encode { action, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
