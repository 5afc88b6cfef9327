//! Turn the agent a full circle and report what it sees at each heading.
//!
//! Connects to a simulator on a Unix socket (see the `mock-simulator` demo).

use simwire::logging::init_from_env;
use simwire::{Action, Controller, ControllerConfig, SimulatorSettings};
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_from_env();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/simwire.sock".to_owned());
    let config = ControllerConfig::from_settings(SimulatorSettings::from_env()?);

    let mut controller = Controller::connect_unix(&path, config)?;
    controller.start()?;
    controller.step(&Action::new("Initialize").arg("gridSize", 0.25))?;

    for _ in 0..4 {
        let event = controller.step(&Action::new("RotateRight").arg("degrees", 90))?;
        let Some(pose) = event.pose_discrete() else {
            warn!("simulator reported no agent pose");
            continue;
        };

        let visible = event
            .instance_detections_2d()
            .map(|detections| detections.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .unwrap_or_default();
        let nearest = event
            .depth_frame()
            .and_then(|depth| depth.values().iter().copied().reduce(f32::min));

        info!(
            rotation = pose.rotation * 90,
            horizon = pose.horizon,
            ?visible,
            ?nearest,
            "heading"
        );
    }

    match controller.step(&Action::new("Fly")) {
        Err(err) => info!(kind = %err.kind(), error = %err, "simulator rejected bad action"),
        Ok(_) => warn!("simulator accepted an unknown action"),
    }

    controller.stop();
    Ok(())
}
