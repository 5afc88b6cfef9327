//! Multipart form-data codec for the request-per-call transport.
//!
//! In this mode the simulator posts each step as `multipart/form-data`: a
//! `metadata` text part plus one binary part per image plane, named after
//! [`ImageField`]. The reply body is the next action as JSON. The same
//! sequence-id contract applies as on the framed channel.

use bytes::Bytes;
use serde_json::{Map, Value};
use simwire_event::{ImageField, Payload};
use tracing::debug;

use crate::action::Action;
use crate::error::{ProtocolError, WireError};
use crate::wire::parse_metadata;

/// Name of the part carrying the metadata JSON.
pub const METADATA_PART: &str = "metadata";

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

fn malformed(reason: impl Into<String>) -> WireError {
    ProtocolError::Multipart(reason.into()).into()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|index| index + from)
}

/// The `boundary` parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
            .filter(|boundary| !boundary.is_empty())
    })
}

fn part_name(headers: &str) -> Option<&str> {
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for param in value.split(';') {
            if let Some(name) = param.trim().strip_prefix("name=") {
                return Some(name.trim_matches('"'));
            }
        }
    }
    None
}

/// Decode one posted step into a payload.
pub fn decode_multipart(body: &[u8], boundary: &str) -> Result<Payload, WireError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let part_end = [CRLF, delimiter.as_slice()].concat();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| malformed("missing opening boundary"))?
        + delimiter.len();
    let mut metadata = None;
    let mut payload = Payload::default();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(CRLF) {
            return Err(malformed("boundary not followed by a line break"));
        }
        pos += CRLF.len();

        let header_end =
            find(body, HEADER_END, pos).ok_or_else(|| malformed("unterminated part headers"))?;
        let headers = std::str::from_utf8(&body[pos..header_end])
            .map_err(|_| malformed("part headers are not UTF-8"))?;
        let name = part_name(headers).ok_or_else(|| malformed("part without a name"))?;

        let content_start = header_end + HEADER_END.len();
        let content_end = find(body, &part_end, content_start)
            .ok_or_else(|| malformed(format!("part '{name}' has no closing boundary")))?;
        let content = &body[content_start..content_end];

        if name == METADATA_PART {
            if metadata.is_some() {
                return Err(ProtocolError::DuplicateMetadata.into());
            }
            metadata = Some(parse_metadata(content)?);
        } else {
            let field = ImageField::from_name(name)
                .ok_or_else(|| ProtocolError::UnknownPart(name.to_owned()))?;
            payload.push(field, Bytes::copy_from_slice(content));
        }

        pos = content_end + part_end.len();
    }

    payload.metadata = metadata.ok_or(ProtocolError::MissingMetadata)?;
    debug!(sequence_id = ?payload.sequence_id(), "decoded multipart step");
    Ok(payload)
}

/// Encode a step the way the simulator posts it.
pub fn encode_multipart(
    metadata: &Map<String, Value>,
    parts: &[(ImageField, &[u8])],
    boundary: &str,
) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    let mut part = |name: &str, content_type: &str, content: &[u8]| {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(CRLF);
    };

    part(
        METADATA_PART,
        "application/json",
        &serde_json::to_vec(metadata)?,
    );
    for (field, content) in parts {
        part(field.name(), "application/octet-stream", content);
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body)
}

/// Reply body carrying the next action.
pub fn encode_action_response(action: &Action) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(action)?)
}
