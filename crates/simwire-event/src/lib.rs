//! Per-step simulator events.
//!
//! A response becomes a [`Payload`] (metadata plus raw image planes) and then
//! a [`MultiAgentEvent`]: one [`Event`] per agent with decoded colour, depth
//! and segmentation planes. Masks and detections over the instance id buffer
//! are only computed when first asked for.

pub mod depth;
pub mod error;
pub mod event;
pub mod field;
pub mod image;
pub mod metadata;
pub mod noise;
pub mod payload;
pub mod segmentation;

pub use depth::{
    convert, decode_depth, DepthCalibration, DepthDecoder, DepthFormat, DepthFrame,
    DEFAULT_FAR_PLANE, DEFAULT_NEAR_PLANE,
};
pub use error::{DecodeError, Result};
pub use event::{DiscretePose, Event, FrameBuffers, MultiAgentEvent, Pose};
pub use field::ImageField;
pub use image::{ImageFrame, PixelFormat};
pub use metadata::{Metadata, LEGACY_KEY_ALIASES};
pub use noise::DepthNoise;
pub use payload::Payload;
pub use segmentation::{
    BoundingBox, ClassDetections, ClassMasks, IdFrame, InstanceDetections, InstanceMasks,
    Legend, LegendEntry, Mask, Segmentation, BACKGROUND,
};
