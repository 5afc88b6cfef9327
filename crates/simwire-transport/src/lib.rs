//! Byte channels between the host process and a simulator.
//!
//! Provides a unified duplex stream over the local transports a simulator
//! can be attached through:
//! - Unix domain sockets
//! - A pair of named pipes (FIFOs), one per direction
//!
//! plus an optional shared memory segment that large image payloads can be
//! placed in instead of being copied through the stream. This is the lowest
//! layer of simwire; framing builds on the [`IpcStream`] type provided here.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod shm;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{IpcStream, SharedSegment};

#[cfg(unix)]
pub use fifo::NamedPipePair;
#[cfg(unix)]
pub use shm::SharedMemory;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
