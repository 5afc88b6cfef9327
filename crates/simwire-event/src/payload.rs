use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::field::ImageField;

/// A decoded response before it becomes an event: the metadata object plus
/// every raw image plane, grouped by field in arrival order.
///
/// Positional order matters. The Nth buffer of a per-agent field belongs to
/// the Nth agent; the Nth buffer of a third-party field to the Nth camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub metadata: Map<String, Value>,
    pub fields: BTreeMap<ImageField, Vec<Bytes>>,
}

impl Payload {
    /// Payload with metadata and no image planes.
    pub fn new(metadata: Map<String, Value>) -> Self {
        Self {
            metadata,
            fields: BTreeMap::new(),
        }
    }

    /// Append a buffer to a field, keeping arrival order.
    pub fn push(&mut self, field: ImageField, buffer: impl Into<Bytes>) {
        self.fields.entry(field).or_default().push(buffer.into());
    }

    /// Buffers received for a field, possibly none.
    pub fn buffers(&self, field: ImageField) -> &[Bytes] {
        self.fields.get(&field).map_or(&[], Vec::as_slice)
    }

    /// The `sequenceId` the simulator stamped on this response.
    pub fn sequence_id(&self) -> Option<u64> {
        self.metadata.get("sequenceId").and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_positional_order() {
        let mut payload = Payload::default();
        payload.push(ImageField::Rgb, vec![1u8]);
        payload.push(ImageField::Rgb, vec![2u8]);

        let buffers = payload.buffers(ImageField::Rgb);
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[1].as_ref(), &[2]);
        assert!(payload.buffers(ImageField::Depth).is_empty());
    }

    #[test]
    fn sequence_id_reads_metadata() {
        let metadata = serde_json::json!({ "sequenceId": 7 });
        let payload = Payload::new(metadata.as_object().cloned().unwrap());
        assert_eq!(payload.sequence_id(), Some(7));
        assert_eq!(Payload::default().sequence_id(), None);
    }
}
