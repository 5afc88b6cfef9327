//! Field-type tags carried in every frame header.
//!
//! The set is closed and versioned with the simulator: a tag outside this
//! enum is a malformed header, never something to skip over.

/// What a frame body holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldType {
    /// Per-step metadata JSON.
    Metadata = 1,
    /// Action JSON sent by the host.
    Action = 2,
    /// Action result JSON.
    ActionResult = 3,
    /// Primary camera RGB(A) image.
    RgbImage = 4,
    /// Primary camera depth buffer.
    DepthImage = 5,
    /// Surface normals image.
    NormalsImage = 6,
    /// Optical flow image.
    FlowsImage = 7,
    /// Semantic (class) segmentation image.
    ClassesImage = 8,
    /// Instance id buffer.
    IdsImage = 9,
    /// RGB image from a third-party camera.
    ThirdPartyImage = 10,
    /// Offset of the real frame inside a shared memory segment.
    SharedMemory = 200,
    /// Terminates a composite message.
    EndOfMessage = 255,
}

impl FieldType {
    /// Every tag, in wire order.
    pub const ALL: [FieldType; 12] = [
        FieldType::Metadata,
        FieldType::Action,
        FieldType::ActionResult,
        FieldType::RgbImage,
        FieldType::DepthImage,
        FieldType::NormalsImage,
        FieldType::FlowsImage,
        FieldType::ClassesImage,
        FieldType::IdsImage,
        FieldType::ThirdPartyImage,
        FieldType::SharedMemory,
        FieldType::EndOfMessage,
    ];

    /// The on-wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a tag, or `None` if it is not part of the protocol.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.tag() == tag)
    }

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Metadata => "METADATA",
            FieldType::Action => "ACTION",
            FieldType::ActionResult => "ACTION_RESULT",
            FieldType::RgbImage => "RGB_IMAGE",
            FieldType::DepthImage => "DEPTH_IMAGE",
            FieldType::NormalsImage => "NORMALS_IMAGE",
            FieldType::FlowsImage => "FLOWS_IMAGE",
            FieldType::ClassesImage => "CLASSES_IMAGE",
            FieldType::IdsImage => "IDS_IMAGE",
            FieldType::ThirdPartyImage => "THIRD_PARTY_IMAGE",
            FieldType::SharedMemory => "SHARED_MEMORY_FIELD",
            FieldType::EndOfMessage => "END_OF_MESSAGE",
        }
    }

    /// True for tags whose body is an image plane.
    pub fn is_image(self) -> bool {
        matches!(
            self,
            FieldType::RgbImage
                | FieldType::DepthImage
                | FieldType::NormalsImage
                | FieldType::FlowsImage
                | FieldType::ClassesImage
                | FieldType::IdsImage
                | FieldType::ThirdPartyImage
        )
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
