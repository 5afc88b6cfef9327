//! The request/response driver.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use simwire_event::{DepthCalibration, DepthDecoder, MultiAgentEvent, Payload};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::compat::normalize_scalar_rotation;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result, WireError};
use crate::transport::Transport;
use crate::wire::verify_sequence;

const INVALID_ARGUMENT: &str = "InvalidArgument";

/// Error codes that mean the request itself was wrong. These always raise.
pub const CALLER_MISTAKE_CODES: &[&str] = &[
    "InvalidAction",
    "MissingArguments",
    "AmbiguousAction",
    INVALID_ARGUMENT,
];

const INITIALIZE: &str = "Initialize";
const READY: &str = "<ready>";

/// Where the driver is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Ready for the next request.
    Idle,
    /// A request is out and its response has not been read.
    AwaitingResponse,
    /// The channel is unusable; reconnect to continue.
    Dead,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::AwaitingResponse => "awaiting-response",
            DriverState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Per-call options for [`Controller::step_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOptions {
    /// Raise [`ControllerError::ActionFailed`] when the action fails.
    pub raise_for_failure: bool,
}

impl StepOptions {
    /// Options that raise on any action failure.
    pub fn strict() -> Self {
        Self {
            raise_for_failure: true,
        }
    }
}

/// Clip planes reported by an `Initialize` response.
fn clip_planes(metadata: &Map<String, Value>) -> Option<(f64, f64)> {
    let planes = |map: &Map<String, Value>| {
        let near = map.get("cameraNearPlane")?.as_f64()?;
        let far = map.get("cameraFarPlane")?.as_f64()?;
        Some((near, far))
    };
    planes(metadata).or_else(|| {
        metadata
            .get("agents")?
            .as_array()?
            .first()?
            .as_object()
            .and_then(planes)
    })
}

/// Drives one simulator over one transport, one action at a time.
///
/// Owns the channel, the sequence counter, the depth calibration and the
/// most recent event. `step` takes `&mut self`, so a second request cannot
/// start while one is outstanding.
pub struct Controller<T> {
    transport: Option<T>,
    config: ControllerConfig,
    sequence_id: u64,
    depth: DepthDecoder,
    last_event: Option<Arc<MultiAgentEvent>>,
    state: DriverState,
}

impl<T: Transport> Controller<T> {
    pub fn new(transport: T, config: ControllerConfig) -> Self {
        let depth = DepthDecoder::new(config.depth, config.add_depth_noise);
        Self {
            transport: Some(transport),
            config,
            sequence_id: 0,
            depth,
            last_event: None,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Sequence id of the most recent request.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Calibration applied to the next depth frame.
    pub fn depth_calibration(&self) -> &DepthCalibration {
        self.depth.calibration()
    }

    pub fn last_event(&self) -> Option<&Arc<MultiAgentEvent>> {
        self.last_event.as_ref()
    }

    /// The channel, until [`stop`](Self::stop) closes it.
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Read the simulator's unsolicited ready message (sequence id 0).
    pub fn start(&mut self) -> Result<Arc<MultiAgentEvent>> {
        self.require_idle(READY)?;
        info!(
            transport = self.transport.as_ref().map_or("closed", |t| t.name()),
            "waiting for simulator"
        );
        let received = self.channel(READY)?.recv_payload();
        let payload = received.map_err(|err| self.fail(READY, err))?;
        let event = self.complete(READY, 0, payload)?;
        info!("simulator ready");
        Ok(event)
    }

    /// Send `action` and wait for its event.
    pub fn step(&mut self, action: &Action) -> Result<Arc<MultiAgentEvent>> {
        self.step_with(action, StepOptions::default())
    }

    /// [`step`](Self::step) with per-call options.
    ///
    /// Caller-mistake error codes always raise. Other failures only raise
    /// when `options.raise_for_failure` is set; otherwise the event comes
    /// back with `lastActionSuccess == false`.
    pub fn step_with(
        &mut self,
        action: &Action,
        options: StepOptions,
    ) -> Result<Arc<MultiAgentEvent>> {
        let name = action.name().to_owned();
        self.require_idle(&name)?;

        let mut request = action.clone();
        if self.config.legacy_scalar_rotation {
            normalize_scalar_rotation(&mut request);
        }

        let supplied = request.try_sequence_id().map_err(|value| {
            ControllerError::CallerMistake {
                action: name.clone(),
                error_code: INVALID_ARGUMENT.to_owned(),
                message: format!("sequenceId must be a non-negative integer, got {value}"),
            }
        })?;
        let sequence_id = match supplied {
            Some(supplied) => supplied,
            None => {
                let next = self.sequence_id + 1;
                request.set_sequence_id(next);
                next
            }
        };
        self.sequence_id = sequence_id;

        let sent = self.channel(&name)?.send_action(&request);
        sent.map_err(|err| self.fail(&name, err))?;
        let received = self.channel(&name)?.recv_payload();
        let payload = received.map_err(|err| self.fail(&name, err))?;

        let event = self.complete(&name, sequence_id, payload)?;
        self.check_failure(&name, &event, options)?;
        Ok(event)
    }

    /// Close the channel. The simulator sees end of stream and nothing
    /// further is sent.
    pub fn stop(&mut self) {
        if let Some(transport) = self.transport.take() {
            info!(
                transport = transport.name(),
                sequence_id = self.sequence_id,
                "controller stopped"
            );
        }
        self.state = DriverState::Dead;
    }

    /// Give back the channel; `None` once stopped.
    pub fn into_transport(self) -> Option<T> {
        self.transport
    }

    /// Mark the driver busy and hand out the channel.
    fn channel(&mut self, action: &str) -> Result<&mut T> {
        match self.transport.as_mut() {
            Some(transport) => {
                self.state = DriverState::AwaitingResponse;
                Ok(transport)
            }
            None => Err(ControllerError::NotIdle {
                action: action.to_owned(),
                state: DriverState::Dead,
            }),
        }
    }

    fn require_idle(&self, action: &str) -> Result<()> {
        if self.state == DriverState::Idle {
            return Ok(());
        }
        Err(ControllerError::NotIdle {
            action: action.to_owned(),
            state: self.state,
        })
    }

    fn fail(&mut self, action: &str, err: WireError) -> ControllerError {
        let err = ControllerError::from_wire(action, self.config.timeout, err);
        self.state = if err.is_fatal() {
            DriverState::Dead
        } else {
            DriverState::Idle
        };
        warn!(action, kind = %err.kind(), state = %self.state, error = %err, "step failed");
        err
    }

    /// Verify and decode a response, then record it as the last event.
    fn complete(
        &mut self,
        action: &str,
        expected: u64,
        payload: Payload,
    ) -> Result<Arc<MultiAgentEvent>> {
        if let Err(source) = verify_sequence(expected, &payload) {
            self.state = DriverState::Dead;
            warn!(action, error = %source, "response out of sequence; channel is dead");
            return Err(ControllerError::Protocol {
                action: action.to_owned(),
                source,
            });
        }

        if action == INITIALIZE {
            if let Some((near, far)) = clip_planes(&payload.metadata) {
                self.depth
                    .set_planes(near as f32, far as f32)
                    .map_err(|err| self.fail(action, err.into()))?;
            }
        }

        let event = MultiAgentEvent::from_payload(payload, &mut self.depth)
            .map_err(|err| self.fail(action, err.into()))?;
        let event = Arc::new(event);

        self.state = DriverState::Idle;
        self.last_event = Some(Arc::clone(&event));
        debug!(
            action,
            sequence_id = expected,
            success = event.last_action_success(),
            agents = event.len(),
            "event received"
        );
        Ok(event)
    }

    fn check_failure(
        &self,
        action: &str,
        event: &Arc<MultiAgentEvent>,
        options: StepOptions,
    ) -> Result<()> {
        let metadata = event.metadata();
        if metadata.last_action_success() {
            return Ok(());
        }

        let message = metadata.error_message().unwrap_or_default().to_owned();
        let error_code = metadata.error_code().map(str::to_owned);

        if let Some(code) = error_code
            .as_deref()
            .filter(|code| CALLER_MISTAKE_CODES.contains(code))
        {
            return Err(ControllerError::CallerMistake {
                action: action.to_owned(),
                error_code: code.to_owned(),
                message,
            });
        }

        if options.raise_for_failure {
            return Err(ControllerError::ActionFailed {
                action: action.to_owned(),
                error_code,
                message,
                event: Arc::clone(event),
            });
        }

        debug!(action, error_code = ?error_code, error_message = %message, "action failed");
        Ok(())
    }
}

#[cfg(unix)]
mod ipc {
    use std::path::Path;

    use simwire_transport::{IpcStream, NamedPipePair, UnixDomainSocket};
    use tracing::info;

    use super::Controller;
    use crate::config::ControllerConfig;
    use crate::error::Result;
    use crate::transport::FramedTransport;

    impl Controller<FramedTransport<IpcStream, IpcStream>> {
        /// Drive a simulator over an already-open duplex stream.
        pub fn from_stream(stream: IpcStream, config: ControllerConfig) -> Result<Self> {
            let transport = FramedTransport::from_stream(stream, config.frame_config())?;
            Ok(Self::new(transport, config))
        }

        /// Connect to a simulator listening on a Unix domain socket.
        pub fn connect_unix(path: impl AsRef<Path>, config: ControllerConfig) -> Result<Self> {
            let path = path.as_ref();
            info!(path = %path.display(), "connecting to simulator socket");
            let stream = UnixDomainSocket::connect(path)?;
            Self::from_stream(stream, config)
        }

        /// Open the host end of a named pipe pair.
        ///
        /// Blocks until the simulator opens its end.
        pub fn open_named_pipes(pipes: &NamedPipePair, config: ControllerConfig) -> Result<Self> {
            let stream = pipes.open()?;
            Self::from_stream(stream, config)
        }
    }
}
