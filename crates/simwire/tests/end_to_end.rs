#![cfg(unix)]

mod common;

use std::f64::consts::PI;

use serde_json::{json, Value};
use simwire::event::{DepthCalibration, DepthFormat};
use simwire::frame::{FieldType, Frame};
use simwire::{Action, ControllerConfig};

use common::{loopback, metadata_frame, spawn_simulator, success};

#[test]
fn rotate_right_over_loopback_yields_event() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let sim = spawn_simulator(peer, false, |action| {
        Some(vec![metadata_frame(&json!({
            "sequenceId": action["sequenceId"],
            "agents": [{
                "screenWidth": 300,
                "screenHeight": 300,
                "lastActionSuccess": true,
                "position": { "x": 1.0, "y": 0.9, "z": -0.5 },
                "rotation": { "x": 0.0, "y": 90.0, "z": 0.0 },
            }],
        }))])
    });

    let event = controller
        .step(&Action::new("RotateRight"))
        .expect("step should succeed");

    assert_eq!(event.metadata().get("lastActionSuccess"), Some(&json!(true)));
    assert_eq!(event.metadata().get("sequenceId"), Some(&json!(1)));
    assert_eq!(event.screen_width(), Some(300));

    let pose = event.pose().expect("agent pose");
    assert_eq!((pose.x, pose.z, pose.rotation), (1000, -500, 90_000));

    drop(controller);
    let seen = sim.join().expect("simulator thread");
    assert_eq!(seen[0]["action"], "RotateRight");
}

#[test]
fn numeric_arguments_arrive_as_plain_json_numbers() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let sim = spawn_simulator(peer, false, |action| Some(success(action)));

    let action = Action::new("Teleport")
        .arg("rotation", json!({ "y": 24.0f32 }))
        .arg("moveMagnitude", 55.5f32)
        .arg("horizon", PI as f32);
    controller.step(&action).expect("teleport should succeed");
    drop(controller);

    let seen = sim.join().expect("simulator thread");
    let sent = &seen[0];
    assert_eq!(sent["action"], "Teleport");
    assert_eq!(sent["sequenceId"], 1);

    let close = |value: &Value, expected: f64| {
        let actual = value.as_f64().expect("a JSON number");
        (actual - expected).abs() < 1e-5
    };
    assert!(close(&sent["rotation"]["y"], 24.0));
    assert!(close(&sent["moveMagnitude"], 55.5));
    assert!(close(&sent["horizon"], PI));
}

/// A 4x4 instance buffer: "Apple|1" at (0,0) and (1,1), "Apple|2" at
/// (3,3), everything else an unlisted color.
fn segmentation_response(action: &Value) -> Vec<Frame> {
    const APPLE_1: [u8; 3] = [10, 20, 30];
    const APPLE_2: [u8; 3] = [40, 50, 60];
    const OTHER: [u8; 3] = [1, 1, 1];

    let mut ids = Vec::new();
    for row in 0..4 {
        for col in 0..4 {
            let color = match (row, col) {
                (0, 0) | (1, 1) => APPLE_1,
                (3, 3) => APPLE_2,
                _ => OTHER,
            };
            ids.extend_from_slice(&color);
        }
    }

    vec![
        metadata_frame(&json!({
            "sequenceId": action["sequenceId"],
            "lastActionSuccess": true,
            "screenWidth": 4,
            "screenHeight": 4,
            "colors": [
                { "name": "Apple|1", "color": APPLE_1 },
                { "name": "Apple|2", "color": APPLE_2 },
            ],
        })),
        Frame::new(FieldType::IdsImage, ids),
    ]
}

#[test]
fn segmentation_masks_and_boxes() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |action| Some(segmentation_response(action)));

    let event = controller
        .step(&Action::new("Pass"))
        .expect("step should succeed");

    let instances = event.instance_masks().expect("instance buffer was sent");
    let apple = instances.get("Apple|1").expect("Apple|1 is visible");
    assert_eq!(apple.count(), 2);
    assert!(apple.get(0, 0) && apple.get(1, 1));
    assert!(!apple.get(0, 1));
    assert!(instances.get("Chair|1").is_none());

    let boxes = event.instance_detections_2d().expect("instance buffer was sent");
    let bbox = boxes.get("Apple|1").expect("Apple|1 has a box");
    assert_eq!(bbox.as_tuple(), (0, 0, 1, 1));

    let classes = event.class_masks().expect("instance buffer was sent");
    let apples = classes.get("Apple").expect("Apple class");
    assert_eq!(apples.count(), 3);
    let background = classes.get("background").expect("background mask");
    assert_eq!(background.count(), 13);
    assert!(!background.get(0, 0));

    let class_boxes = event.class_detections_2d().expect("instance buffer was sent");
    assert_eq!(class_boxes.get("Apple").map(|boxes| boxes.len()), Some(2));

    assert_eq!(event.object_id_to_color("Apple|2"), Some([40, 50, 60]));
    assert_eq!(event.color_to_object_id([10, 20, 30]), Some("Apple|1"));
}

#[test]
fn repeated_mask_lookups_scan_once() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |action| Some(segmentation_response(action)));

    let event = controller
        .step(&Action::new("Pass"))
        .expect("step should succeed");
    let segmentation = event.segmentation().expect("instance buffer was sent");

    let first = segmentation.instance_masks().get("Apple|1");
    let scans = segmentation.scan_count();
    let second = segmentation.instance_masks().get("Apple|1");

    assert_eq!(first, second);
    assert_eq!(segmentation.scan_count(), scans);
}

#[test]
fn depth_frames_use_configured_units() {
    let depth = DepthCalibration::default().with_format(DepthFormat::Millimeters);
    let (mut controller, peer) = loopback(ControllerConfig::default().with_depth(depth));
    let _sim = spawn_simulator(peer, false, |action| {
        let plane: Vec<u8> = [0.1f32, 0.25, 0.5, 0.75]
            .iter()
            .flat_map(|normalized| normalized.to_le_bytes())
            .collect();
        Some(vec![
            metadata_frame(&json!({
                "sequenceId": action["sequenceId"],
                "lastActionSuccess": true,
                "screenWidth": 2,
                "screenHeight": 2,
            })),
            Frame::new(FieldType::DepthImage, plane),
        ])
    });

    let event = controller
        .step(&Action::new("Pass"))
        .expect("step should succeed");
    let frame = event.depth_frame().expect("depth buffer was sent");

    assert_eq!(frame.format(), DepthFormat::Millimeters);
    let mm = frame.get(1, 0).expect("pixel in range");
    // 0.5 of a 0.1..20 m clip range.
    assert!((mm - 9950.0).abs() < 0.5, "got {mm}");
}

#[test]
fn multi_agent_event_defaults_to_active_agent() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |action| {
        Some(vec![
            metadata_frame(&json!({
                "sequenceId": action["sequenceId"],
                "activeAgentId": 1,
                "screenWidth": 1,
                "screenHeight": 1,
                "agents": [
                    { "lastActionSuccess": true, "agentId": 0 },
                    { "lastActionSuccess": false, "agentId": 1, "errorMessage": "blocked" },
                ],
            })),
            Frame::new(FieldType::RgbImage, vec![255u8, 0, 0]),
            Frame::new(FieldType::RgbImage, vec![0u8, 0, 255]),
        ])
    });

    let event = controller
        .step(&Action::new("MoveAhead"))
        .expect("soft failure does not raise");

    assert_eq!(event.len(), 2);
    assert_eq!(event.active_agent_id(), 1);
    assert!(!event.last_action_success());
    assert_eq!(event.sequence_id(), Some(1));

    let active = event.frame().expect("active agent frame");
    assert_eq!(active.rgb(0, 0), Some([0, 0, 255]));

    let first = event.agent(0).expect("first agent");
    assert!(first.last_action_success());
    assert_eq!(
        first.frame().and_then(|frame| frame.rgb(0, 0)),
        Some([255, 0, 0])
    );
}

#[test]
fn ready_message_is_the_first_event() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, true, |action| Some(success(action)));

    let ready = controller.start().expect("ready message");
    assert_eq!(ready.sequence_id(), Some(0));
    assert_eq!(
        controller.last_event().and_then(|event| event.sequence_id()),
        Some(0)
    );
}
