//! The per-step snapshot handed back to callers.

use std::collections::BTreeMap;
use std::ops::Deref;

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::depth::{DepthDecoder, DepthFrame};
use crate::error::{DecodeError, Result};
use crate::field::ImageField;
use crate::image::ImageFrame;
use crate::metadata::Metadata;
use crate::payload::Payload;
use crate::segmentation::{
    ClassDetections, ClassMasks, IdFrame, InstanceDetections, InstanceMasks, Legend,
    Segmentation,
};

const GRID_SIZE: f64 = 0.25;
const ROTATION_STEP: f64 = 90.0;

/// Agent pose in thousandths: position x/z, yaw and camera horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pose {
    pub x: i64,
    pub z: i64,
    pub rotation: i64,
    pub horizon: i64,
}

/// Agent pose snapped to the navigation grid, for deduplicating states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscretePose {
    pub x: i64,
    pub z: i64,
    pub rotation: i64,
    pub horizon: i64,
}

/// Raw buffers addressed to one agent's event.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffers {
    primary: BTreeMap<ImageField, Bytes>,
    third_party: BTreeMap<ImageField, Vec<Bytes>>,
}

impl FrameBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer. Third-party buffers accumulate by camera position; a
    /// second per-agent buffer for the same field replaces the first.
    pub fn insert(&mut self, field: ImageField, buffer: Bytes) {
        if field.is_third_party() {
            self.third_party.entry(field).or_default().push(buffer);
        } else {
            self.primary.insert(field, buffer);
        }
    }

    /// Buffers for agent `agent`: the agent's positional share of each
    /// per-agent field plus every third-party buffer.
    pub fn for_agent(fields: &BTreeMap<ImageField, Vec<Bytes>>, agent: usize) -> Self {
        let mut buffers = Self::default();
        for (field, list) in fields {
            if field.is_third_party() {
                buffers.third_party.insert(*field, list.clone());
            } else if let Some(buffer) = list.get(agent) {
                buffers.primary.insert(*field, buffer.clone());
            }
        }
        buffers
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.third_party.is_empty()
    }

    fn third_party(&self, field: ImageField) -> &[Bytes] {
        self.third_party.get(&field).map_or(&[], Vec::as_slice)
    }
}

fn screen_dims(metadata: &Map<String, Value>, field: ImageField) -> Result<(usize, usize)> {
    let dim = |key: &'static str| {
        metadata
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(DecodeError::MissingField(key))
    };
    let dims = (dim("screenWidth")?, dim("screenHeight")?);
    debug!(%field, width = dims.0, height = dims.1, "decoding image plane");
    Ok(dims)
}

fn decode_images(
    field: ImageField,
    buffers: &[Bytes],
    dims: &[(usize, usize)],
) -> Result<Vec<Option<ImageFrame>>> {
    let mut frames = vec![None; dims.len()];
    for ((slot, raw), (width, height)) in frames.iter_mut().zip(buffers).zip(dims) {
        *slot = Some(ImageFrame::decode(field, raw.clone(), *width, *height)?);
    }
    Ok(frames)
}

/// Decoded result of one request for one agent.
///
/// Immutable from the caller's side. The lazily built segmentation caches
/// are the only state that changes after construction.
#[derive(Debug)]
pub struct Event {
    metadata: Metadata,
    legend: Legend,
    frame: Option<ImageFrame>,
    depth_frame: Option<DepthFrame>,
    instance_segmentation_frame: Option<ImageFrame>,
    semantic_segmentation_frame: Option<ImageFrame>,
    normals_frame: Option<ImageFrame>,
    flow_frame: Option<ImageFrame>,
    segmentation: Option<Segmentation>,
    third_party_camera_frames: Vec<Option<ImageFrame>>,
    third_party_depth_frames: Vec<Option<DepthFrame>>,
    third_party_instance_segmentation_frames: Vec<Option<ImageFrame>>,
    third_party_semantic_segmentation_frames: Vec<Option<ImageFrame>>,
    third_party_normals_frames: Vec<Option<ImageFrame>>,
    third_party_flow_frames: Vec<Option<ImageFrame>>,
}

impl Event {
    /// Decode one agent's buffers against its metadata.
    pub fn from_parts(
        metadata: Metadata,
        buffers: FrameBuffers,
        depth: &mut DepthDecoder,
    ) -> Result<Self> {
        let raw = metadata.raw();
        let legend = Legend::from_colors(metadata.colors())?;

        let image = |field: ImageField| -> Result<Option<ImageFrame>> {
            buffers
                .primary
                .get(&field)
                .map(|buffer| {
                    let (width, height) = screen_dims(raw, field)?;
                    ImageFrame::decode(field, buffer.clone(), width, height)
                })
                .transpose()
        };

        let frame = image(ImageField::Rgb)?;
        let semantic_segmentation_frame = image(ImageField::Classes)?;
        let normals_frame = image(ImageField::Normals)?;
        let flow_frame = image(ImageField::Flow)?;
        let instance_segmentation_frame = image(ImageField::Ids)?;

        let depth_frame = match buffers.primary.get(&ImageField::Depth) {
            Some(buffer) => {
                let (width, height) = screen_dims(raw, ImageField::Depth)?;
                Some(depth.decode(buffer, width, height)?)
            }
            None => None,
        };

        let segmentation = match buffers.primary.get(&ImageField::Ids) {
            Some(buffer) => {
                let (width, height) = screen_dims(raw, ImageField::Ids)?;
                let ids = IdFrame::decode(buffer, width, height)?;
                Some(Segmentation::new(ids, legend.clone()))
            }
            None => None,
        };

        // One slot per declared camera, sized from the camera entry when it
        // carries its own resolution and from the screen otherwise.
        let cameras = metadata.third_party_cameras();
        let camera_dims = if buffers.third_party.is_empty() {
            Vec::new()
        } else {
            cameras
                .iter()
                .map(|camera| -> Result<(usize, usize)> {
                    let dim = |key: &str| {
                        camera
                            .get(key)
                            .and_then(Value::as_u64)
                            .and_then(|v| usize::try_from(v).ok())
                    };
                    match (dim("screenWidth"), dim("screenHeight")) {
                        (Some(width), Some(height)) => Ok((width, height)),
                        (width, height) => {
                            let (screen_width, screen_height) =
                                screen_dims(raw, ImageField::ThirdPartyRgb)?;
                            Ok((width.unwrap_or(screen_width), height.unwrap_or(screen_height)))
                        }
                    }
                })
                .collect::<Result<Vec<_>>>()?
        };

        for (field, list) in &buffers.third_party {
            if list.len() > cameras.len() {
                return Err(DecodeError::InvalidField {
                    field: "thirdPartyCameras",
                    reason: format!(
                        "{} {field} buffers for {} declared camera(s)",
                        list.len(),
                        cameras.len()
                    ),
                });
            }
        }

        let third_party = |field| decode_images(field, buffers.third_party(field), &camera_dims);
        let third_party_camera_frames = third_party(ImageField::ThirdPartyRgb)?;
        let third_party_instance_segmentation_frames = third_party(ImageField::ThirdPartyIds)?;
        let third_party_semantic_segmentation_frames = third_party(ImageField::ThirdPartyClasses)?;
        let third_party_normals_frames = third_party(ImageField::ThirdPartyNormals)?;
        let third_party_flow_frames = third_party(ImageField::ThirdPartyFlow)?;

        let mut third_party_depth_frames = vec![None; camera_dims.len()];
        for ((slot, buffer), (width, height)) in third_party_depth_frames
            .iter_mut()
            .zip(buffers.third_party(ImageField::ThirdPartyDepth))
            .zip(&camera_dims)
        {
            *slot = Some(depth.decode(buffer, *width, *height)?);
        }

        Ok(Self {
            metadata,
            legend,
            frame,
            depth_frame,
            instance_segmentation_frame,
            semantic_segmentation_frame,
            normals_frame,
            flow_frame,
            segmentation,
            third_party_camera_frames,
            third_party_depth_frames,
            third_party_instance_segmentation_frames,
            third_party_semantic_segmentation_frames,
            third_party_normals_frames,
            third_party_flow_frames,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn frame(&self) -> Option<&ImageFrame> {
        self.frame.as_ref()
    }

    pub fn depth_frame(&self) -> Option<&DepthFrame> {
        self.depth_frame.as_ref()
    }

    pub fn instance_segmentation_frame(&self) -> Option<&ImageFrame> {
        self.instance_segmentation_frame.as_ref()
    }

    pub fn semantic_segmentation_frame(&self) -> Option<&ImageFrame> {
        self.semantic_segmentation_frame.as_ref()
    }

    pub fn normals_frame(&self) -> Option<&ImageFrame> {
        self.normals_frame.as_ref()
    }

    pub fn flow_frame(&self) -> Option<&ImageFrame> {
        self.flow_frame.as_ref()
    }

    pub fn third_party_camera_frames(&self) -> &[Option<ImageFrame>] {
        &self.third_party_camera_frames
    }

    pub fn third_party_depth_frames(&self) -> &[Option<DepthFrame>] {
        &self.third_party_depth_frames
    }

    pub fn third_party_instance_segmentation_frames(&self) -> &[Option<ImageFrame>] {
        &self.third_party_instance_segmentation_frames
    }

    pub fn third_party_semantic_segmentation_frames(&self) -> &[Option<ImageFrame>] {
        &self.third_party_semantic_segmentation_frames
    }

    pub fn third_party_normals_frames(&self) -> &[Option<ImageFrame>] {
        &self.third_party_normals_frames
    }

    pub fn third_party_flow_frames(&self) -> &[Option<ImageFrame>] {
        &self.third_party_flow_frames
    }

    /// Segmentation over the instance id buffer, when one was rendered.
    pub fn segmentation(&self) -> Option<&Segmentation> {
        self.segmentation.as_ref()
    }

    pub fn instance_masks(&self) -> Option<InstanceMasks<'_>> {
        self.segmentation.as_ref().map(Segmentation::instance_masks)
    }

    pub fn class_masks(&self) -> Option<ClassMasks<'_>> {
        self.segmentation.as_ref().map(Segmentation::class_masks)
    }

    pub fn instance_detections_2d(&self) -> Option<InstanceDetections<'_>> {
        self.segmentation
            .as_ref()
            .map(Segmentation::instance_detections_2d)
    }

    pub fn class_detections_2d(&self) -> Option<ClassDetections<'_>> {
        self.segmentation
            .as_ref()
            .map(Segmentation::class_detections_2d)
    }

    pub fn screen_width(&self) -> Option<usize> {
        self.metadata.screen_width()
    }

    pub fn screen_height(&self) -> Option<usize> {
        self.metadata.screen_height()
    }

    pub fn last_action_success(&self) -> bool {
        self.metadata.last_action_success()
    }

    pub fn sequence_id(&self) -> Option<u64> {
        self.metadata.sequence_id()
    }

    /// Agent block: `agent` when present, otherwise the metadata itself.
    fn agent(&self) -> &Map<String, Value> {
        self.metadata.agent().unwrap_or(self.metadata.raw())
    }

    fn raw_pose(&self) -> Option<(f64, f64, f64, f64)> {
        let agent = self.agent();
        let position = agent.get("position")?;
        let x = position.get("x")?.as_f64()?;
        let z = position.get("z")?.as_f64()?;
        let rotation = match agent.get("rotation")? {
            Value::Number(yaw) => yaw.as_f64()?,
            other => other.get("y")?.as_f64()?,
        };
        let horizon = agent
            .get("cameraHorizon")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Some((x, z, rotation, horizon))
    }

    /// Pose scaled by 1000 and rounded.
    pub fn pose(&self) -> Option<Pose> {
        let (x, z, rotation, horizon) = self.raw_pose()?;
        let milli = |v: f64| (v * 1000.0).round() as i64;
        Some(Pose {
            x: milli(x),
            z: milli(z),
            rotation: milli(rotation),
            horizon: milli(horizon),
        })
    }

    /// Pose on a 0.25 grid, yaw rounded to 90 degree steps, horizon in whole
    /// degrees.
    pub fn pose_discrete(&self) -> Option<DiscretePose> {
        let (x, z, rotation, horizon) = self.raw_pose()?;
        Some(DiscretePose {
            x: (x / GRID_SIZE) as i64,
            z: (z / GRID_SIZE) as i64,
            rotation: (rotation / ROTATION_STEP).round() as i64,
            horizon: horizon.round() as i64,
        })
    }

    /// Object whose `objectId` matches, if any.
    pub fn get_object(&self, object_id: &str) -> Option<&Value> {
        self.metadata
            .objects()
            .iter()
            .find(|object| object.get("objectId").and_then(Value::as_str) == Some(object_id))
    }

    pub fn objects_by_type(&self, object_type: &str) -> Vec<&Value> {
        self.metadata
            .objects()
            .iter()
            .filter(|object| object.get("objectType").and_then(Value::as_str) == Some(object_type))
            .collect()
    }

    pub fn object_id_to_color(&self, object_id: &str) -> Option<[u8; 3]> {
        self.legend.get(object_id).map(|entry| entry.color)
    }

    pub fn color_to_object_id(&self, color: [u8; 3]) -> Option<&str> {
        self.legend.name_for_color(color)
    }
}

/// Every agent's event for one step, defaulting to the active agent.
///
/// Derefs to the active agent's [`Event`]; the others stay addressable
/// through [`events`](Self::events) and [`agent`](Self::agent).
#[derive(Debug)]
pub struct MultiAgentEvent {
    active_agent_id: usize,
    events: Vec<Event>,
}

impl MultiAgentEvent {
    /// Split a payload into one event per `agents[]` entry.
    ///
    /// Top-level keys an agent entry lacks are copied into it. Metadata
    /// without `agents` is a single agent.
    pub fn from_payload(payload: Payload, depth: &mut DepthDecoder) -> Result<Self> {
        let Payload { metadata, fields } = payload;

        let (agents, shared) = match metadata.get("agents") {
            None => (vec![metadata.clone()], false),
            Some(Value::Array(list)) => {
                let agents = list
                    .iter()
                    .map(|agent| {
                        agent
                            .as_object()
                            .cloned()
                            .ok_or(DecodeError::NotAnObject("agents[]"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                (agents, true)
            }
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: "agents",
                    reason: "expected an array".into(),
                })
            }
        };

        if agents.is_empty() {
            return Err(DecodeError::InvalidField {
                field: "agents",
                reason: "no agents".into(),
            });
        }

        let active = match metadata.get("activeAgentId") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_u64().ok_or_else(|| DecodeError::InvalidField {
                field: "activeAgentId",
                reason: format!("expected an integer, got {value}"),
            })?,
        };
        let active_agent_id = usize::try_from(active)
            .ok()
            .filter(|id| *id < agents.len())
            .ok_or(DecodeError::ActiveAgent {
                active,
                agents: agents.len(),
            })?;

        for (field, list) in &fields {
            if !field.is_third_party() && list.len() > agents.len() {
                warn!(
                    %field,
                    buffers = list.len(),
                    agents = agents.len(),
                    "ignoring per-agent buffers beyond the agent count"
                );
            }
        }

        let events = agents
            .into_iter()
            .enumerate()
            .map(|(index, mut agent)| {
                if shared {
                    for (key, value) in &metadata {
                        if key != "agents" && !agent.contains_key(key) {
                            agent.insert(key.clone(), value.clone());
                        }
                    }
                }
                let buffers = FrameBuffers::for_agent(&fields, index);
                Event::from_parts(Metadata::new(agent), buffers, depth)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            active_agent_id,
            events,
        })
    }

    pub fn active_agent_id(&self) -> usize {
        self.active_agent_id
    }

    pub fn active(&self) -> &Event {
        &self.events[self.active_agent_id]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn agent(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Number of agents; always at least one.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl Deref for MultiAgentEvent {
    type Target = Event;

    fn deref(&self) -> &Event {
        self.active()
    }
}
