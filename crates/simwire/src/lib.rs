//! Drive an external 3D simulator over local IPC and decode what it renders.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte channels (Unix sockets, named pipes, shared memory)
//! - [`frame`]: the typed 5-byte-header frame protocol
//! - [`event`]: decoded metadata, images, depth and segmentation
//! - [`controller`]: the request/response driver
//!
//! ```no_run
//! use simwire::{Action, Controller, ControllerConfig};
//!
//! # fn main() -> simwire::Result<()> {
//! let mut controller = Controller::connect_unix("/tmp/sim.sock", ControllerConfig::default())?;
//! controller.start()?;
//! let event = controller.step(&Action::new("RotateRight").arg("degrees", 90))?;
//! println!("success: {}", event.last_action_success());
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use simwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use simwire_frame::*;
}

/// Re-export event types.
pub mod event {
    pub use simwire_event::*;
}

/// Re-export controller types.
pub mod controller {
    pub use simwire_controller::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use simwire_controller::{
    Action, Controller, ControllerConfig, ControllerError, DriverState, ErrorKind, Result,
    SimulatorSettings, StepOptions, Transport,
};
pub use simwire_event::{DepthFormat, Event, MultiAgentEvent};
