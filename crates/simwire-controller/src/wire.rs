//! Framed-channel message codec.
//!
//! Requests go out as one ACTION frame carrying the action's JSON. Responses
//! come back as one METADATA frame plus any number of image frames, in the
//! order the simulator rendered them.

use serde_json::Value;
use simwire_event::{DecodeError, ImageField, Payload};
use simwire_frame::{FieldType, Frame};
use tracing::debug;

use crate::action::Action;
use crate::error::{ProtocolError, WireError};

/// Image plane an image frame type carries, `None` for non-image frames.
pub fn image_field(field_type: FieldType) -> Option<ImageField> {
    match field_type {
        FieldType::RgbImage => Some(ImageField::Rgb),
        FieldType::DepthImage => Some(ImageField::Depth),
        FieldType::NormalsImage => Some(ImageField::Normals),
        FieldType::FlowsImage => Some(ImageField::Flow),
        FieldType::ClassesImage => Some(ImageField::Classes),
        FieldType::IdsImage => Some(ImageField::Ids),
        FieldType::ThirdPartyImage => Some(ImageField::ThirdPartyRgb),
        FieldType::Metadata
        | FieldType::Action
        | FieldType::ActionResult
        | FieldType::SharedMemory
        | FieldType::EndOfMessage => None,
    }
}

/// Frame carrying `action` as JSON.
pub fn encode_action(action: &Action) -> Result<Frame, WireError> {
    let body = serde_json::to_vec(action)?;
    Ok(Frame::new(FieldType::Action, body))
}

/// Parse a metadata body into a JSON object.
pub fn parse_metadata(body: &[u8]) -> Result<serde_json::Map<String, Value>, WireError> {
    match serde_json::from_slice::<Value>(body).map_err(DecodeError::from)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject("metadata").into()),
    }
}

/// Assemble one response from its frames (terminator excluded).
pub fn decode_message(frames: Vec<Frame>) -> Result<Payload, WireError> {
    let mut metadata = None;
    let mut payload = Payload::default();

    for frame in frames {
        if frame.field_type == FieldType::Metadata {
            if metadata.is_some() {
                return Err(ProtocolError::DuplicateMetadata.into());
            }
            metadata = Some(parse_metadata(&frame.payload)?);
            continue;
        }

        match image_field(frame.field_type) {
            Some(field) => payload.push(field, frame.payload),
            None => return Err(ProtocolError::UnexpectedField(frame.field_type).into()),
        }
    }

    payload.metadata = metadata.ok_or(ProtocolError::MissingMetadata)?;
    debug!(
        sequence_id = ?payload.sequence_id(),
        planes = payload.fields.values().map(Vec::len).sum::<usize>(),
        "decoded response"
    );
    Ok(payload)
}

/// Check that a response answers request `expected`.
pub fn verify_sequence(expected: u64, payload: &Payload) -> Result<(), ProtocolError> {
    match payload.sequence_id() {
        Some(received) if received == expected => Ok(()),
        Some(received) => Err(ProtocolError::SequenceMismatch { expected, received }),
        None => Err(ProtocolError::MissingSequenceId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_frame(value: Value) -> Frame {
        Frame::new(FieldType::Metadata, serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn action_frame_is_json() {
        let frame = encode_action(&Action::new("RotateRight").with_sequence_id(1)).unwrap();
        assert_eq!(frame.field_type, FieldType::Action);
        let body: Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(body, json!({ "action": "RotateRight", "sequenceId": 1 }));
    }

    #[test]
    fn groups_image_frames_by_field() {
        let payload = decode_message(vec![
            Frame::new(FieldType::RgbImage, vec![1u8]),
            metadata_frame(json!({ "sequenceId": 2 })),
            Frame::new(FieldType::RgbImage, vec![2u8]),
            Frame::new(FieldType::ThirdPartyImage, vec![3u8]),
        ])
        .unwrap();

        assert_eq!(payload.sequence_id(), Some(2));
        assert_eq!(payload.buffers(ImageField::Rgb).len(), 2);
        assert_eq!(payload.buffers(ImageField::Rgb)[1].as_ref(), &[2]);
        assert_eq!(payload.buffers(ImageField::ThirdPartyRgb).len(), 1);
    }

    #[test]
    fn metadata_exactly_once() {
        let missing = decode_message(vec![Frame::new(FieldType::RgbImage, vec![1u8])]);
        assert!(matches!(
            missing,
            Err(WireError::Protocol(ProtocolError::MissingMetadata))
        ));

        let twice = decode_message(vec![
            metadata_frame(json!({})),
            metadata_frame(json!({})),
        ]);
        assert!(matches!(
            twice,
            Err(WireError::Protocol(ProtocolError::DuplicateMetadata))
        ));
    }

    #[test]
    fn rejects_request_frames_in_a_response() {
        let result = decode_message(vec![
            metadata_frame(json!({})),
            Frame::new(FieldType::Action, b"{}".to_vec()),
        ]);
        assert!(matches!(
            result,
            Err(WireError::Protocol(ProtocolError::UnexpectedField(FieldType::Action)))
        ));
    }

    #[test]
    fn malformed_metadata_is_a_decode_error() {
        let result = decode_message(vec![Frame::new(FieldType::Metadata, b"{not json".to_vec())]);
        assert!(matches!(result, Err(WireError::Decode(DecodeError::Json(_)))));

        let result = decode_message(vec![metadata_frame(json!([1, 2]))]);
        assert!(matches!(
            result,
            Err(WireError::Decode(DecodeError::NotAnObject("metadata")))
        ));
    }

    #[test]
    fn sequence_check() {
        let payload = Payload::new(json!({ "sequenceId": 3 }).as_object().cloned().unwrap());
        assert!(verify_sequence(3, &payload).is_ok());
        assert!(matches!(
            verify_sequence(4, &payload),
            Err(ProtocolError::SequenceMismatch {
                expected: 4,
                received: 3
            })
        ));
        assert!(matches!(
            verify_sequence(0, &Payload::default()),
            Err(ProtocolError::MissingSequenceId)
        ));
    }
}
