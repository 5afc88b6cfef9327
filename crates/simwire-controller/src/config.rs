use std::time::Duration;

use serde::{Deserialize, Serialize};
use simwire_event::{DepthCalibration, DepthFormat};
use simwire_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

use crate::error::{ControllerError, Result};

/// Default time to wait for a response to one action.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

const ENV_WIDTH: &str = "SIMWIRE_WIDTH";
const ENV_HEIGHT: &str = "SIMWIRE_HEIGHT";
const ENV_HEADLESS: &str = "SIMWIRE_HEADLESS";
const ENV_DEPTH_FORMAT: &str = "SIMWIRE_DEPTH_FORMAT";
const ENV_ADD_DEPTH_NOISE: &str = "SIMWIRE_ADD_DEPTH_NOISE";
const ENV_CONNECTION_TIMEOUT: &str = "SIMWIRE_CONNECTION_TIMEOUT";
const ENV_STARTUP_TIMEOUT: &str = "SIMWIRE_STARTUP_TIMEOUT";

/// Settings for whatever launches the simulator process.
///
/// The driver does not interpret most of these; it carries them so a
/// launcher can be configured from the same place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Render width in pixels.
    pub width: u32,
    /// Render height in pixels.
    pub height: u32,
    /// Run without a display.
    pub headless: bool,
    /// Unit depth frames are delivered in.
    pub depth_format: DepthFormat,
    /// Apply corner dropout noise to depth frames.
    pub add_depth_noise: bool,
    /// Seconds to wait for each response.
    pub connection_timeout_secs: f64,
    /// Seconds to wait for the simulator to come up.
    pub startup_timeout_secs: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            headless: false,
            depth_format: DepthFormat::Meters,
            add_depth_noise: false,
            connection_timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            startup_timeout_secs: 300.0,
        }
    }
}

impl SimulatorSettings {
    /// Defaults overridden by `SIMWIRE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(value) = lookup(ENV_WIDTH) {
            settings.width = parse_number(ENV_WIDTH, &value)?;
        }
        if let Some(value) = lookup(ENV_HEIGHT) {
            settings.height = parse_number(ENV_HEIGHT, &value)?;
        }
        if let Some(value) = lookup(ENV_HEADLESS) {
            settings.headless = parse_bool(ENV_HEADLESS, &value)?;
        }
        if let Some(value) = lookup(ENV_DEPTH_FORMAT) {
            settings.depth_format =
                value
                    .trim()
                    .parse()
                    .map_err(|reason| ControllerError::Config {
                        key: ENV_DEPTH_FORMAT,
                        value: value.clone(),
                        reason,
                    })?;
        }
        if let Some(value) = lookup(ENV_ADD_DEPTH_NOISE) {
            settings.add_depth_noise = parse_bool(ENV_ADD_DEPTH_NOISE, &value)?;
        }
        if let Some(value) = lookup(ENV_CONNECTION_TIMEOUT) {
            settings.connection_timeout_secs = parse_seconds(ENV_CONNECTION_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_STARTUP_TIMEOUT) {
            settings.startup_timeout_secs = parse_seconds(ENV_STARTUP_TIMEOUT, &value)?;
        }

        Ok(settings)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.startup_timeout_secs)
    }
}

fn config_error(key: &'static str, value: &str, reason: impl ToString) -> ControllerError {
    ControllerError::Config {
        key,
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| config_error(key, value, err))
}

/// "1", "true", "yes", "on" and "0", "false", "no", "off", any case.
fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(config_error(key, value, "expected a boolean")),
    }
}

fn parse_seconds(key: &'static str, value: &str) -> Result<f64> {
    let secs: f64 = parse_number(key, value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(config_error(key, value, "expected a positive number of seconds"));
    }
    Ok(secs)
}

/// Configuration for a [`Controller`](crate::Controller).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long to block on one response. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Largest frame body accepted or sent.
    pub max_payload_size: usize,
    /// Clip planes and output unit for depth frames.
    pub depth: DepthCalibration,
    /// Apply corner dropout noise to depth frames.
    pub add_depth_noise: bool,
    /// Rewrite `rotation: <number>` to `rotation: {"y": <number>}` before sending.
    pub legacy_scalar_rotation: bool,
    /// Launcher settings, carried unchanged.
    pub simulator: SimulatorSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            depth: DepthCalibration::default(),
            add_depth_noise: false,
            legacy_scalar_rotation: true,
            simulator: SimulatorSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Driver configuration matching launcher settings.
    pub fn from_settings(settings: SimulatorSettings) -> Self {
        Self {
            timeout: Some(settings.connection_timeout()),
            depth: DepthCalibration::default().with_format(settings.depth_format),
            add_depth_noise: settings.add_depth_noise,
            simulator: settings,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub fn with_depth(mut self, depth: DepthCalibration) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_depth_noise(mut self, add_depth_noise: bool) -> Self {
        self.add_depth_noise = add_depth_noise;
        self
    }

    pub fn with_legacy_scalar_rotation(mut self, enabled: bool) -> Self {
        self.legacy_scalar_rotation = enabled;
        self
    }

    /// Frame reader/writer settings for this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: self.timeout,
            write_timeout: self.timeout,
        }
    }
}
