#![allow(dead_code)]

use std::path::PathBuf;
use std::thread;

use serde_json::{json, Value};
use simwire::frame::{FieldType, Frame, FrameReader, FrameWriter};
use simwire::transport::IpcStream;
use simwire::{Controller, ControllerConfig};
use simwire::controller::FramedTransport;

pub type LoopbackController = Controller<FramedTransport<IpcStream, IpcStream>>;

pub fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/simwire-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

pub fn metadata_frame(metadata: &Value) -> Frame {
    Frame::new(
        FieldType::Metadata,
        serde_json::to_vec(metadata).expect("metadata should serialize"),
    )
}

/// Echo the request's sequence id back with a successful result.
pub fn success(action: &Value) -> Vec<Frame> {
    vec![metadata_frame(&json!({
        "sequenceId": action["sequenceId"],
        "lastAction": action["action"],
        "lastActionSuccess": true,
    }))]
}

/// Serve requests on `stream` until the host hangs up or `respond` returns `None`.
///
/// Returns every action the host sent.
pub fn spawn_simulator<F>(
    stream: IpcStream,
    ready: bool,
    mut respond: F,
) -> thread::JoinHandle<Vec<Value>>
where
    F: FnMut(&Value) -> Option<Vec<Frame>> + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = FrameReader::new(stream.try_clone().expect("stream should clone"));
        let mut writer = FrameWriter::new(stream);
        let mut seen = Vec::new();

        if ready {
            writer
                .send_message(&[metadata_frame(&json!({ "sequenceId": 0 }))])
                .expect("ready message should send");
        }
        while let Ok(frames) = reader.read_message() {
            assert_eq!(frames.len(), 1, "a request is one ACTION frame");
            assert_eq!(frames[0].field_type, FieldType::Action);
            let action: Value =
                serde_json::from_slice(&frames[0].payload).expect("action should be JSON");
            seen.push(action.clone());

            let Some(response) = respond(&action) else {
                break;
            };
            if writer.send_message(&response).is_err() {
                break;
            }
        }
        seen
    })
}

pub fn loopback(config: ControllerConfig) -> (LoopbackController, IpcStream) {
    let (host, peer) = IpcStream::pair().expect("socket pair should open");
    let controller = Controller::from_stream(host, config).expect("controller should attach");
    (controller, peer)
}
