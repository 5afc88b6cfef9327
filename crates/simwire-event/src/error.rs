use crate::field::ImageField;

/// Errors raised while turning a response into an [`Event`](crate::Event).
///
/// A decode error is never papered over with an empty or zeroed frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A buffer's length does not correspond to a supported pixel encoding.
    #[error("{field}: {len} bytes is not a supported pixel encoding for {width}x{height}")]
    PixelWidth {
        field: ImageField,
        len: usize,
        width: usize,
        height: usize,
    },

    /// The metadata frame is not valid JSON.
    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A metadata value that must be an object is something else.
    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),

    /// A required metadata field is absent.
    #[error("metadata field '{0}' is missing")]
    MissingField(&'static str),

    /// A metadata field is present but malformed.
    #[error("metadata field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A deprecated key that has no replacement for the response's action.
    #[error("metadata key '{key}' is not available after {last_action}")]
    LegacyKey {
        key: &'static str,
        last_action: String,
    },

    /// `activeAgentId` does not name one of the agents.
    #[error("activeAgentId {active} is out of range for {agents} agent(s)")]
    ActiveAgent { active: u64, agents: usize },

    /// Clip planes that cannot calibrate depth.
    #[error("invalid depth calibration: near plane {near} must be positive and below far plane {far}")]
    Calibration { near: f32, far: f32 },

    /// A depth noise pattern was applied to a frame of another size.
    #[error("depth noise built for {expected_width}x{expected_height} applied to {width}x{height}")]
    NoiseShape {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;
