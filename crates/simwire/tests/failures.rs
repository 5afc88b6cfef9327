#![cfg(unix)]

mod common;

use std::time::Duration;

use serde_json::json;
use simwire::controller::ProtocolError;
use simwire::frame::{FieldType, Frame};
use simwire::{Action, ControllerConfig, ControllerError, DriverState, ErrorKind, StepOptions};

use common::{loopback, metadata_frame, spawn_simulator, success};

#[test]
fn sequence_ids_follow_call_order() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let sim = spawn_simulator(peer, true, |action| Some(success(action)));

    controller.start().expect("ready message");
    for call in 1..=5u64 {
        let event = controller
            .step(&Action::new("Pass"))
            .expect("step should succeed");
        assert_eq!(event.sequence_id(), Some(call));
    }

    drop(controller);
    let seen = sim.join().expect("simulator thread");
    let sent: Vec<_> = seen
        .iter()
        .filter_map(|action| action["sequenceId"].as_u64())
        .collect();
    assert_eq!(sent, vec![1, 2, 3, 4, 5]);
}

#[test]
fn mismatched_sequence_fails_closed() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |_| {
        Some(vec![metadata_frame(&json!({
            "sequenceId": 99,
            "lastActionSuccess": true,
        }))])
    });

    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("stale response must not produce an event");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(matches!(
        err,
        ControllerError::Protocol {
            source: ProtocolError::SequenceMismatch {
                expected: 1,
                received: 99
            },
            ..
        }
    ));
    assert_eq!(controller.state(), DriverState::Dead);
    assert!(controller.last_event().is_none());
}

#[test]
fn caller_mistake_raises_with_exact_message() {
    for options in [StepOptions::default(), StepOptions::strict()] {
        let (mut controller, peer) = loopback(ControllerConfig::default());
        let _sim = spawn_simulator(peer, false, |action| {
            Some(vec![metadata_frame(&json!({
                "sequenceId": action["sequenceId"],
                "lastActionSuccess": false,
                "errorCode": "InvalidAction",
                "errorMessage": "Invalid method: foo",
            }))])
        });

        let err = controller
            .step_with(&Action::new("foo"), options)
            .expect_err("caller mistakes always raise");
        assert_eq!(err.kind(), ErrorKind::CallerMistake);
        assert_eq!(err.simulator_message(), Some("Invalid method: foo"));
        assert_eq!(err.action(), Some("foo"));
        assert_eq!(controller.state(), DriverState::Idle);
    }
}

#[test]
fn strict_mode_raises_soft_failures() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |action| {
        Some(vec![metadata_frame(&json!({
            "sequenceId": action["sequenceId"],
            "lastActionSuccess": false,
            "errorMessage": "Object not found",
        }))])
    });

    let lenient = controller
        .step(&Action::new("PickupObject").arg("objectId", "Apple|1"))
        .expect("soft failures return the event");
    assert!(!lenient.last_action_success());

    let err = controller
        .step_with(
            &Action::new("PickupObject").arg("objectId", "Apple|1"),
            StepOptions::strict(),
        )
        .expect_err("strict mode raises");
    assert_eq!(err.kind(), ErrorKind::SoftActionFailure);
    assert_eq!(err.simulator_message(), Some("Object not found"));
    assert!(!err.is_fatal());
}

#[test]
fn unresponsive_simulator_times_out_and_blocks_further_steps() {
    let config = ControllerConfig::default().with_timeout(Some(Duration::from_millis(100)));
    let (mut controller, _peer) = loopback(config);

    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("nobody answers");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(controller.state(), DriverState::Dead);

    // The first request is still outstanding; no second one may go out.
    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("driver is not idle");
    assert!(matches!(
        err,
        ControllerError::NotIdle {
            state: DriverState::Dead,
            ..
        }
    ));
}

#[test]
fn simulator_exit_is_reported_as_crash() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let sim = spawn_simulator(peer, false, |_| None);

    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("simulator hung up");
    sim.join().expect("simulator thread");

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(matches!(err, ControllerError::Crashed { .. }));
    assert_eq!(controller.state(), DriverState::Dead);
}

#[test]
fn action_frame_in_response_is_a_protocol_error() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let _sim = spawn_simulator(peer, false, |action| {
        let mut frames = success(action);
        frames.push(Frame::new(FieldType::Action, b"{}".to_vec()));
        Some(frames)
    });

    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("hosts never receive actions");
    assert!(matches!(
        err,
        ControllerError::Protocol {
            source: ProtocolError::UnexpectedField(FieldType::Action),
            ..
        }
    ));
}

#[test]
fn undecodable_image_leaves_channel_usable() {
    let (mut controller, peer) = loopback(ControllerConfig::default());
    let mut calls = 0;
    let _sim = spawn_simulator(peer, false, move |action| {
        calls += 1;
        let mut frames = vec![metadata_frame(&json!({
            "sequenceId": action["sequenceId"],
            "lastActionSuccess": true,
            "screenWidth": 2,
            "screenHeight": 2,
        }))];
        if calls == 1 {
            // Five bytes cannot be a 2x2 image.
            frames.push(Frame::new(FieldType::RgbImage, vec![0u8; 5]));
        }
        Some(frames)
    });

    let err = controller
        .step(&Action::new("Pass"))
        .expect_err("image does not fit the screen");
    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(controller.state(), DriverState::Idle);

    let event = controller
        .step(&Action::new("Pass"))
        .expect("next step decodes");
    assert_eq!(event.sequence_id(), Some(2));
}
