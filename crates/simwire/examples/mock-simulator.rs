//! A stand-in simulator that answers actions over a Unix socket.
//!
//! Renders a 4x4 scene with two objects and tracks a single agent on the
//! navigation grid. Pair it with the `rotate` demo:
//!
//! ```text
//! cargo run -p simwire --features logging --example mock-simulator -- /tmp/simwire.sock
//! cargo run -p simwire --features logging --example rotate -- /tmp/simwire.sock
//! ```

use serde_json::{json, Value};
use simwire::frame::{FieldType, Frame, FrameReader, FrameWriter};
use simwire::logging::init_from_env;
use simwire::transport::{IpcStream, UnixDomainSocket};
use tracing::{info, warn};

const WIDTH: usize = 4;
const HEIGHT: usize = 4;
const APPLE: [u8; 3] = [200, 30, 30];
const TABLE: [u8; 3] = [90, 60, 20];
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 20.0;

#[derive(Debug, Default)]
struct Agent {
    x: f64,
    z: f64,
    yaw: f64,
    horizon: f64,
}

impl Agent {
    /// Apply one action. Returns the error message when it fails.
    fn apply(&mut self, action: &Value) -> Result<(), (Option<&'static str>, String)> {
        let name = action["action"].as_str().unwrap_or_default();
        let degrees = action["degrees"].as_f64().unwrap_or(90.0);
        match name {
            "Initialize" | "Pass" => {}
            "RotateRight" => self.yaw = (self.yaw + degrees).rem_euclid(360.0),
            "RotateLeft" => self.yaw = (self.yaw - degrees).rem_euclid(360.0),
            "LookUp" => self.horizon -= 30.0,
            "LookDown" => self.horizon += 30.0,
            "MoveAhead" => {
                let (dx, dz) = match self.yaw as i64 {
                    0 => (0.0, 0.25),
                    90 => (0.25, 0.0),
                    180 => (0.0, -0.25),
                    _ => (-0.25, 0.0),
                };
                if (self.x + dx).abs() > 1.0 || (self.z + dz).abs() > 1.0 {
                    return Err((None, "blocked by the wall".to_owned()));
                }
                self.x += dx;
                self.z += dz;
            }
            other => return Err((Some("InvalidAction"), format!("unknown action '{other}'"))),
        }
        Ok(())
    }
}

fn metadata(
    sequence_id: u64,
    agent: &Agent,
    action: &str,
    error: Option<(Option<&str>, String)>,
) -> Value {
    let (error_code, error_message) = match &error {
        Some((code, message)) => (code.unwrap_or_default(), message.as_str()),
        None => ("", ""),
    };
    json!({
        "sequenceId": sequence_id,
        "lastAction": action,
        "lastActionSuccess": error.is_none(),
        "errorCode": error_code,
        "errorMessage": error_message,
        "screenWidth": WIDTH,
        "screenHeight": HEIGHT,
        "cameraNearPlane": NEAR_PLANE,
        "cameraFarPlane": FAR_PLANE,
        "agent": {
            "position": { "x": agent.x, "y": 0.9, "z": agent.z },
            "rotation": { "x": 0.0, "y": agent.yaw, "z": 0.0 },
            "cameraHorizon": agent.horizon,
        },
        "objects": [
            { "objectId": "Apple|1", "objectType": "Apple", "visible": true },
            { "objectId": "Table|1", "objectType": "Table", "visible": true },
        ],
        "colors": [
            { "name": "Apple|1", "color": APPLE },
            { "name": "Table|1", "color": TABLE },
        ],
    })
}

/// Top two rows are the apple, the bottom row is the table.
fn render() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut rgb = Vec::with_capacity(WIDTH * HEIGHT * 3);
    let mut ids = Vec::with_capacity(WIDTH * HEIGHT * 3);
    let mut depth = Vec::with_capacity(WIDTH * HEIGHT * 4);
    for row in 0..HEIGHT {
        for col in 0..WIDTH {
            let (color, meters) = match row {
                0 | 1 if col < 2 => (APPLE, 1.5f32),
                3 => (TABLE, 2.0),
                _ => ([0, 0, 0], 5.0),
            };
            rgb.extend_from_slice(&color);
            ids.extend_from_slice(&color);
            let normalized = meters / (FAR_PLANE - NEAR_PLANE);
            depth.extend_from_slice(&normalized.to_le_bytes());
        }
    }
    (rgb, ids, depth)
}

fn respond(writer: &mut FrameWriter<IpcStream>, metadata: &Value) -> simwire::frame::Result<()> {
    let (rgb, ids, depth) = render();
    let body = serde_json::to_vec(metadata).map_err(std::io::Error::other)?;
    writer.send_message(&[
        Frame::new(FieldType::Metadata, body),
        Frame::new(FieldType::RgbImage, rgb),
        Frame::new(FieldType::DepthImage, depth),
        Frame::new(FieldType::IdsImage, ids),
    ])
}

fn serve(stream: IpcStream) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = FrameReader::new(stream.try_clone()?);
    let mut writer = FrameWriter::new(stream);
    let mut agent = Agent::default();

    respond(&mut writer, &metadata(0, &agent, "", None))?;
    loop {
        let frames = match reader.read_message() {
            Ok(frames) => frames,
            Err(simwire::frame::FrameError::ConnectionClosed) => {
                info!("host disconnected");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let Some(frame) = frames.first() else {
            warn!("empty request");
            continue;
        };
        let action: Value = serde_json::from_slice(&frame.payload)?;
        let name = action["action"].as_str().unwrap_or_default().to_owned();
        let sequence_id = action["sequenceId"].as_u64().unwrap_or_default();

        let error = agent.apply(&action).err();
        info!(action = %name, sequence_id, success = error.is_none(), "handled action");
        respond(&mut writer, &metadata(sequence_id, &agent, &name, error))?;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_from_env();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/simwire.sock".to_owned());
    let listener = UnixDomainSocket::bind(&path)?;
    info!(path = %path, "mock simulator listening");

    let stream = listener.accept()?;
    serve(stream)
}
