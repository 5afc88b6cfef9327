//! Logical names of the image planes a response can carry.
//!
//! Both transports agree on these: the framed channel maps its field-type
//! tags onto them and the multipart transport uses them as part names.

/// One kind of image plane in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageField {
    /// Primary camera colour image.
    Rgb,
    /// Primary camera depth.
    Depth,
    /// Primary camera surface normals.
    Normals,
    /// Primary camera optical flow.
    Flow,
    /// Primary camera semantic segmentation.
    Classes,
    /// Primary camera instance id buffer.
    Ids,
    /// Third-party camera colour image.
    ThirdPartyRgb,
    /// Third-party camera depth.
    ThirdPartyDepth,
    /// Third-party camera surface normals.
    ThirdPartyNormals,
    /// Third-party camera optical flow.
    ThirdPartyFlow,
    /// Third-party camera semantic segmentation.
    ThirdPartyClasses,
    /// Third-party camera instance id buffer.
    ThirdPartyIds,
}

impl ImageField {
    /// Every field.
    pub const ALL: [ImageField; 12] = [
        ImageField::Rgb,
        ImageField::Depth,
        ImageField::Normals,
        ImageField::Flow,
        ImageField::Classes,
        ImageField::Ids,
        ImageField::ThirdPartyRgb,
        ImageField::ThirdPartyDepth,
        ImageField::ThirdPartyNormals,
        ImageField::ThirdPartyFlow,
        ImageField::ThirdPartyClasses,
        ImageField::ThirdPartyIds,
    ];

    /// Name used for this plane on the wire (multipart part name).
    pub fn name(self) -> &'static str {
        match self {
            ImageField::Rgb => "image",
            ImageField::Depth => "image_depth",
            ImageField::Normals => "image_normals",
            ImageField::Flow => "image_flow",
            ImageField::Classes => "image_classes",
            ImageField::Ids => "image_ids",
            ImageField::ThirdPartyRgb => "image_thirdParty_camera",
            ImageField::ThirdPartyDepth => "image_thirdParty_depth",
            ImageField::ThirdPartyNormals => "image_thirdParty_normals",
            ImageField::ThirdPartyFlow => "image_thirdParty_flow",
            ImageField::ThirdPartyClasses => "image_thirdParty_classes",
            ImageField::ThirdPartyIds => "image_thirdParty_image_ids",
        }
    }

    /// Look a field up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    /// True for planes rendered by a third-party camera. These are indexed
    /// by camera position; the others by agent position.
    pub fn is_third_party(self) -> bool {
        matches!(
            self,
            ImageField::ThirdPartyRgb
                | ImageField::ThirdPartyDepth
                | ImageField::ThirdPartyNormals
                | ImageField::ThirdPartyFlow
                | ImageField::ThirdPartyClasses
                | ImageField::ThirdPartyIds
        )
    }
}

impl std::fmt::Display for ImageField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
