use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ACTION_KEY: &str = "action";
const SEQUENCE_KEY: &str = "sequenceId";

/// One request to the simulator: `{"action": <name>, ...arguments}`.
///
/// Arguments are held as plain JSON, so any serializable numeric type
/// ends up as an ordinary JSON number on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action {
    body: Map<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert(ACTION_KEY.to_owned(), Value::String(name.into()));
        Self { body }
    }

    /// Add or replace an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Add an argument from any serializable value.
    pub fn try_arg<T: Serialize + ?Sized>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<Self> {
        self.body.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Build from a JSON object; `None` without a string `action` field.
    pub fn from_map(body: Map<String, Value>) -> Option<Self> {
        body.get(ACTION_KEY)?.as_str()?;
        Some(Self { body })
    }

    pub fn name(&self) -> &str {
        self.body
            .get(ACTION_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Caller-supplied or driver-assigned sequence id.
    pub fn sequence_id(&self) -> Option<u64> {
        self.try_sequence_id().ok().flatten()
    }

    /// Like [`sequence_id`](Self::sequence_id), but a present value that is
    /// not a `u64` comes back as the error.
    pub fn try_sequence_id(&self) -> Result<Option<u64>, &Value> {
        match self.body.get(SEQUENCE_KEY) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or(value),
        }
    }

    pub fn set_sequence_id(&mut self, sequence_id: u64) {
        self.body
            .insert(SEQUENCE_KEY.to_owned(), Value::from(sequence_id));
    }

    pub fn with_sequence_id(mut self, sequence_id: u64) -> Self {
        self.set_sequence_id(sequence_id);
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub(crate) fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.body
    }
}

/// A point or Euler rotation in simulator coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        serde_json::json!({ "x": v.x, "y": v.y, "z": v.z })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fixed_width_numbers_encode_as_plain_json() {
        let action = Action::new("Teleport")
            .arg("rotation", json!({ "y": 24i16 }))
            .arg("moveMagnitude", 55.5f32)
            .with_sequence_id(1);

        let encoded: Value = serde_json::from_slice(&serde_json::to_vec(&action).unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "action": "Teleport",
                "sequenceId": 1,
                "rotation": { "y": 24 },
                "moveMagnitude": 55.5
            })
        );
    }

    #[test]
    fn try_arg_serializes_structs() {
        let action = Action::new("TeleportFull")
            .try_arg("position", &Vec3::new(1.0, 0.9, -1.5))
            .unwrap();
        assert_eq!(action.get("position"), Some(&json!({ "x": 1.0, "y": 0.9, "z": -1.5 })));
        assert_eq!(Value::from(Vec3::new(1.0, 0.9, -1.5)), json!({ "x": 1.0, "y": 0.9, "z": -1.5 }));
    }

    #[test]
    fn from_map_requires_a_name() {
        let body = json!({ "action": "Pass", "sequenceId": 4 });
        let action = Action::from_map(body.as_object().cloned().unwrap()).unwrap();
        assert_eq!(action.name(), "Pass");
        assert_eq!(action.sequence_id(), Some(4));

        let nameless = json!({ "moveMagnitude": 1 });
        assert!(Action::from_map(nameless.as_object().cloned().unwrap()).is_none());
    }

    #[test]
    fn malformed_sequence_ids_are_reported() {
        assert_eq!(Action::new("Pass").try_sequence_id(), Ok(None));
        assert_eq!(Action::new("Pass").with_sequence_id(7).try_sequence_id(), Ok(Some(7)));

        let text = Action::new("Pass").arg("sequenceId", "5");
        assert_eq!(text.try_sequence_id(), Err(&json!("5")));
        assert_eq!(text.sequence_id(), None);

        let negative = Action::new("Pass").arg("sequenceId", -1);
        assert_eq!(negative.try_sequence_id(), Err(&json!(-1)));
    }
}
