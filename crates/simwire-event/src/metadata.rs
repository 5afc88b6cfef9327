//! Read-only view over a step's metadata object.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{DecodeError, Result};

/// Deprecated keys and the keys they are now served from.
pub const LEGACY_KEY_ALIASES: &[(&str, &str)] = &[
    (REACHABLE_POSITIONS, ACTION_RETURN),
    (HAND, HELD_OBJECT_POSE),
];

const REACHABLE_POSITIONS: &str = "reachablePositions";
const ACTION_RETURN: &str = "actionReturn";
const HAND: &str = "hand";
const HELD_OBJECT_POSE: &str = "heldObjectPose";
const GET_REACHABLE_POSITIONS: &str = "GetReachablePositions";
const GET_SCENE_BOUNDS: &str = "GetSceneBounds";

/// Metadata for one agent, as sent by the simulator.
///
/// [`get`](Self::get) resolves deprecated keys; [`raw`](Self::raw) does not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    raw: Map<String, Value>,
}

impl Metadata {
    pub fn new(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// The unaliased map.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }

    /// Key a read of `key` is served from.
    ///
    /// `reachablePositions` depends on the action that produced the response:
    /// - after `GetReachablePositions` it always reads `actionReturn`;
    /// - after `GetSceneBounds` a raw `reachablePositions` entry wins, and
    ///   only its absence redirects to `actionReturn`;
    /// - after any other action it is an error.
    ///
    /// `hand` reads `heldObjectPose` when no `hand` entry is present.
    pub fn resolve_key<'a>(&self, key: &'a str) -> Result<&'a str> {
        match key {
            REACHABLE_POSITIONS => match self.last_action() {
                Some(GET_REACHABLE_POSITIONS) => Ok(redirect(key, ACTION_RETURN)),
                Some(GET_SCENE_BOUNDS) if self.raw.contains_key(key) => Ok(key),
                Some(GET_SCENE_BOUNDS) => Ok(redirect(key, ACTION_RETURN)),
                other => Err(DecodeError::LegacyKey {
                    key: REACHABLE_POSITIONS,
                    last_action: other.unwrap_or("an unnamed action").to_owned(),
                }),
            },
            HAND if !self.raw.contains_key(key) => Ok(redirect(key, HELD_OBJECT_POSE)),
            _ => Ok(key),
        }
    }

    /// Value for `key`, following deprecated aliases.
    ///
    /// Fails only for a deprecated key with no replacement for this response.
    pub fn lookup(&self, key: &str) -> Result<Option<&Value>> {
        Ok(self.raw.get(self.resolve_key(key)?))
    }

    /// [`lookup`](Self::lookup), with unresolvable keys reading as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.lookup(key).ok().flatten()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }

    fn array_field(&self, key: &str) -> &[Value] {
        self.raw
            .get(key)
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    pub fn sequence_id(&self) -> Option<u64> {
        self.raw.get("sequenceId").and_then(Value::as_u64)
    }

    pub fn screen_width(&self) -> Option<usize> {
        self.raw
            .get("screenWidth")
            .and_then(Value::as_u64)
            .and_then(|w| usize::try_from(w).ok())
    }

    pub fn screen_height(&self) -> Option<usize> {
        self.raw
            .get("screenHeight")
            .and_then(Value::as_u64)
            .and_then(|h| usize::try_from(h).ok())
    }

    /// `false` when the field is absent.
    pub fn last_action_success(&self) -> bool {
        self.raw
            .get("lastActionSuccess")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn last_action(&self) -> Option<&str> {
        self.str_field("lastAction")
    }

    pub fn error_code(&self) -> Option<&str> {
        self.str_field("errorCode").filter(|code| !code.is_empty())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.str_field("errorMessage")
    }

    pub fn action_return(&self) -> Option<&Value> {
        self.raw.get("actionReturn")
    }

    /// The agent block, if this metadata carries one.
    pub fn agent(&self) -> Option<&Map<String, Value>> {
        self.raw.get("agent").and_then(Value::as_object)
    }

    pub fn objects(&self) -> &[Value] {
        self.array_field("objects")
    }

    pub fn colors(&self) -> &[Value] {
        self.array_field("colors")
    }

    pub fn third_party_cameras(&self) -> &[Value] {
        self.array_field("thirdPartyCameras")
    }
}

fn redirect(key: &str, replacement: &'static str) -> &'static str {
    warn!(key, replacement, "deprecated metadata key");
    replacement
}

impl From<Map<String, Value>> for Metadata {
    fn from(raw: Map<String, Value>) -> Self {
        Self::new(raw)
    }
}
