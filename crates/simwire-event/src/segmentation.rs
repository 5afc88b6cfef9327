//! Instance and class masks derived lazily from an instance id buffer.
//!
//! Every object in the scene is rendered into the id buffer with a unique
//! colour; the metadata `colors` legend maps colours back to object names.
//! Masks and boxes are computed on first access and cached for the lifetime
//! of the owning event.
//!
//! The caches are the one piece of interior mutability in an otherwise
//! immutable event. They sit behind a [`Mutex`] so events stay `Send + Sync`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::trace;

use crate::error::{DecodeError, Result};
use crate::field::ImageField;
use crate::image::bytes_per_pixel;

/// Reserved class name for pixels whose colour is not in the legend.
pub const BACKGROUND: &str = "background";

/// Alpha of legend colours, which are always opaque.
pub const ALPHA: u8 = 255;

/// Pack an opaque RGB colour into the `u32` used to compare id pixels.
pub fn pack_color([r, g, b]: [u8; 3]) -> u32 {
    u32::from_le_bytes([r, g, b, ALPHA])
}

/// Class of an object name: the text before the first `|`, or the whole name.
pub fn class_of(name: &str) -> &str {
    name.split_once('|').map_or(name, |(class, _)| class)
}

/// Instance id buffer with one packed colour per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFrame {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
}

impl IdFrame {
    /// Pack a raw buffer of 4 (RGBA) or 3 (legacy RGB) bytes per pixel.
    ///
    /// RGBA pixels keep their alpha, so a legend colour only matches an
    /// opaque pixel. Legacy RGB pixels are treated as opaque.
    pub fn decode(raw: &[u8], width: usize, height: usize) -> Result<Self> {
        let pixels = match bytes_per_pixel(raw.len(), width, height) {
            Some(4) => raw
                .chunks_exact(4)
                .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
                .collect(),
            Some(3) => raw
                .chunks_exact(3)
                .map(|px| pack_color([px[0], px[1], px[2]]))
                .collect(),
            _ => {
                return Err(DecodeError::PixelWidth {
                    field: ImageField::Ids,
                    len: raw.len(),
                    width,
                    height,
                })
            }
        };

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.pixels.get(row * self.width + col).copied()
    }
}

/// One `colors[]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    pub name: String,
    pub color: [u8; 3],
}

impl LegendEntry {
    pub fn packed(&self) -> u32 {
        pack_color(self.color)
    }

    pub fn class(&self) -> &str {
        class_of(&self.name)
    }
}

/// Colour legend in metadata order. The first entry for a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Legend {
    entries: Vec<LegendEntry>,
    by_name: HashMap<String, usize>,
}

impl Legend {
    pub fn from_entries(entries: impl IntoIterator<Item = LegendEntry>) -> Self {
        let mut legend = Self::default();
        for entry in entries {
            if legend.by_name.contains_key(&entry.name) {
                continue;
            }
            legend
                .by_name
                .insert(entry.name.clone(), legend.entries.len());
            legend.entries.push(entry);
        }
        legend
    }

    /// Parse metadata `colors`: `[{"name": ..., "color": [r, g, b]}, ...]`.
    pub fn from_colors(colors: &[Value]) -> Result<Self> {
        let invalid = |reason: String| DecodeError::InvalidField {
            field: "colors",
            reason,
        };

        let mut entries = Vec::with_capacity(colors.len());
        for (index, item) in colors.iter().enumerate() {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(format!("entry {index} has no name")))?;
            let channels = item
                .get("color")
                .and_then(Value::as_array)
                .filter(|c| c.len() == 3 || c.len() == 4)
                .ok_or_else(|| invalid(format!("entry {index} ({name}) has no [r, g, b] color")))?;

            let mut color = [0u8; 3];
            for (slot, channel) in color.iter_mut().zip(channels) {
                *slot = channel
                    .as_u64()
                    .and_then(|c| u8::try_from(c).ok())
                    .ok_or_else(|| {
                        invalid(format!("entry {index} ({name}) has a channel outside 0-255"))
                    })?;
            }

            entries.push(LegendEntry {
                name: name.to_owned(),
                color,
            });
        }

        Ok(Self::from_entries(entries))
    }

    pub fn get(&self, name: &str) -> Option<&LegendEntry> {
        self.by_name.get(name).map(|index| &self.entries[*index])
    }

    pub fn entries(&self) -> &[LegendEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the first entry with this colour.
    pub fn name_for_color(&self, color: [u8; 3]) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.color == color)
            .map(|entry| entry.name.as_str())
    }

    /// Distinct classes in first-appearance order.
    pub fn classes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(LegendEntry::class)
            .filter(|class| seen.insert(*class))
            .collect()
    }

    fn members<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a LegendEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.class() == class)
    }
}

/// Boolean mask over a frame, row-major with the top row first.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Mask {
    fn from_indices(width: usize, height: usize, indices: &[usize]) -> Self {
        let mut bits = vec![false; width * height];
        for index in indices {
            bits[*index] = true;
        }
        Self {
            width,
            height,
            bits,
        }
    }

    fn union_with(&mut self, other: &Mask) {
        for (bit, set) in self.bits.iter_mut().zip(&other.bits) {
            *bit |= *set;
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.height && col < self.width && self.bits[row * self.width + col]
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.contains(&true)
    }

    /// Tight box around the set pixels, `None` for an empty mask.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut bounds: Option<BoundingBox> = None;
        for (index, _) in self.bits.iter().enumerate().filter(|(_, bit)| **bit) {
            let (row, col) = (index / self.width, index % self.width);
            bounds = Some(match bounds {
                None => BoundingBox {
                    xmin: col,
                    ymin: row,
                    xmax: col,
                    ymax: row,
                },
                Some(b) => BoundingBox {
                    xmin: b.xmin.min(col),
                    ymin: b.ymin.min(row),
                    xmax: b.xmax.max(col),
                    ymax: b.ymax.max(row),
                },
            });
        }
        bounds
    }
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("count", &self.count())
            .finish()
    }
}

/// Inclusive pixel box; x is the column, y the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub xmin: usize,
    pub ymin: usize,
    pub xmax: usize,
    pub ymax: usize,
}

impl BoundingBox {
    /// `(xmin, ymin, xmax, ymax)`.
    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

// `None` entries cache negative results.
#[derive(Default)]
struct Caches {
    instance_masks: HashMap<String, Option<Arc<Mask>>>,
    instances_complete: bool,
    class_masks: HashMap<String, Option<Arc<Mask>>>,
    classes_complete: bool,
    instance_boxes: HashMap<String, Option<BoundingBox>>,
    class_boxes: HashMap<String, Option<Vec<BoundingBox>>>,
}

/// Id frame, legend and the lazily populated caches built from them.
pub struct Segmentation {
    frame: IdFrame,
    legend: Legend,
    caches: Mutex<Caches>,
    scans: AtomicUsize,
}

impl Segmentation {
    pub fn new(frame: IdFrame, legend: Legend) -> Self {
        Self {
            frame,
            legend,
            caches: Mutex::new(Caches::default()),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn frame(&self) -> &IdFrame {
        &self.frame
    }

    pub fn legend(&self) -> &Legend {
        &self.legend
    }

    /// Full-frame passes performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn instance_masks(&self) -> InstanceMasks<'_> {
        InstanceMasks { seg: self }
    }

    pub fn class_masks(&self) -> ClassMasks<'_> {
        ClassMasks { seg: self }
    }

    pub fn instance_detections_2d(&self) -> InstanceDetections<'_> {
        InstanceDetections { seg: self }
    }

    pub fn class_detections_2d(&self) -> ClassDetections<'_> {
        ClassDetections { seg: self }
    }

    fn lock(&self) -> MutexGuard<'_, Caches> {
        // Caches are only ever filled in, so a poisoned guard is still consistent.
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_scan(&self, pass: &'static str) {
        let scans = self.scans.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(pass, scans, pixels = self.frame.pixels.len(), "segmentation frame scan");
    }

    fn instance_mask(&self, caches: &mut Caches, name: &str) -> Option<Arc<Mask>> {
        if let Some(hit) = caches.instance_masks.get(name) {
            return hit.clone();
        }
        if caches.instances_complete {
            return None;
        }
        let packed = self.legend.get(name)?.packed();

        self.record_scan("instance");
        let bits: Vec<bool> = self.frame.pixels.iter().map(|px| *px == packed).collect();
        let mask = Mask {
            width: self.frame.width,
            height: self.frame.height,
            bits,
        };
        let result = (!mask.is_empty()).then(|| Arc::new(mask));
        caches
            .instance_masks
            .insert(name.to_owned(), result.clone());
        result
    }

    /// One bucketed pass filling every instance mask plus the background.
    fn load_instances(&self, caches: &mut Caches) {
        if caches.instances_complete {
            return;
        }

        let mut buckets: HashMap<u32, Vec<usize>> = self
            .legend
            .entries
            .iter()
            .map(|entry| (entry.packed(), Vec::new()))
            .collect();
        let mut background = Vec::new();

        self.record_scan("all-instances");
        for (index, px) in self.frame.pixels.iter().enumerate() {
            match buckets.get_mut(px) {
                Some(bucket) => bucket.push(index),
                None => background.push(index),
            }
        }

        let (width, height) = (self.frame.width, self.frame.height);
        for entry in &self.legend.entries {
            if caches.instance_masks.contains_key(&entry.name) {
                continue;
            }
            let mask = buckets
                .get(&entry.packed())
                .filter(|indices| !indices.is_empty())
                .map(|indices| Arc::new(Mask::from_indices(width, height, indices)));
            caches.instance_masks.insert(entry.name.clone(), mask);
        }

        caches
            .class_masks
            .entry(BACKGROUND.to_owned())
            .or_insert_with(|| {
                (!background.is_empty())
                    .then(|| Arc::new(Mask::from_indices(width, height, &background)))
            });

        caches.instances_complete = true;
    }

    /// Single class lookups touching several uncached instances take the
    /// bucketed pass instead of one scan per instance.
    fn prepare_class(&self, caches: &mut Caches, class: &str) {
        let uncached = self
            .legend
            .members(class)
            .filter(|entry| !caches.instance_masks.contains_key(&entry.name))
            .count();
        if uncached > 1 {
            self.load_instances(caches);
        }
    }

    fn background_mask(&self) -> Option<Arc<Mask>> {
        let known: HashSet<u32> = self.legend.entries.iter().map(LegendEntry::packed).collect();

        self.record_scan("background");
        let bits: Vec<bool> = self
            .frame
            .pixels
            .iter()
            .map(|px| !known.contains(px))
            .collect();
        let mask = Mask {
            width: self.frame.width,
            height: self.frame.height,
            bits,
        };
        (!mask.is_empty()).then(|| Arc::new(mask))
    }

    fn class_mask(&self, caches: &mut Caches, class: &str) -> Option<Arc<Mask>> {
        if let Some(hit) = caches.class_masks.get(class) {
            return hit.clone();
        }
        if caches.classes_complete {
            return None;
        }

        let result = if class == BACKGROUND {
            self.background_mask()
        } else {
            self.prepare_class(caches, class);
            let mut union: Option<Mask> = None;
            for entry in self.legend.members(class) {
                if let Some(mask) = self.instance_mask(caches, &entry.name) {
                    match union.as_mut() {
                        Some(acc) => acc.union_with(&mask),
                        None => union = Some(Mask::clone(&mask)),
                    }
                }
            }
            union.map(Arc::new)
        };

        caches
            .class_masks
            .insert(class.to_owned(), result.clone());
        result
    }

    fn load_classes(&self, caches: &mut Caches) {
        if caches.classes_complete {
            return;
        }
        self.load_instances(caches);
        for class in self.legend.classes() {
            self.class_mask(caches, class);
        }
        caches.classes_complete = true;
    }

    fn instance_box(&self, caches: &mut Caches, name: &str) -> Option<BoundingBox> {
        if let Some(hit) = caches.instance_boxes.get(name) {
            return *hit;
        }
        self.legend.get(name)?;
        let result = self
            .instance_mask(caches, name)
            .and_then(|mask| mask.bounding_box());
        caches.instance_boxes.insert(name.to_owned(), result);
        result
    }

    fn class_boxes(&self, caches: &mut Caches, class: &str) -> Option<Vec<BoundingBox>> {
        if let Some(hit) = caches.class_boxes.get(class) {
            return hit.clone();
        }
        if class == BACKGROUND || self.legend.members(class).next().is_none() {
            return None;
        }

        self.prepare_class(caches, class);
        let boxes: Vec<BoundingBox> = self
            .legend
            .members(class)
            .filter_map(|entry| self.instance_box(caches, &entry.name))
            .collect();
        let result = (!boxes.is_empty()).then_some(boxes);
        caches
            .class_boxes
            .insert(class.to_owned(), result.clone());
        result
    }

    fn present_classes(&self, caches: &mut Caches) -> Vec<String> {
        self.load_classes(caches);
        let mut classes: Vec<String> = self
            .legend
            .classes()
            .into_iter()
            .map(str::to_owned)
            .collect();
        classes.push(BACKGROUND.to_owned());
        classes.retain(|class| matches!(caches.class_masks.get(class), Some(Some(_))));
        classes
    }
}

impl std::fmt::Debug for Segmentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmentation")
            .field("width", &self.frame.width)
            .field("height", &self.frame.height)
            .field("legend", &self.legend.len())
            .field("scans", &self.scan_count())
            .finish()
    }
}

/// Instance name → mask.
#[derive(Debug, Clone, Copy)]
pub struct InstanceMasks<'a> {
    seg: &'a Segmentation,
}

impl InstanceMasks<'_> {
    /// Mask for `name`; `None` when unknown or not visible.
    pub fn get(&self, name: &str) -> Option<Arc<Mask>> {
        let mut caches = self.seg.lock();
        self.seg.instance_mask(&mut caches, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every visible instance, in legend order.
    pub fn iter(&self) -> std::vec::IntoIter<(String, Arc<Mask>)> {
        let mut caches = self.seg.lock();
        self.seg.load_instances(&mut caches);
        self.seg
            .legend
            .entries
            .iter()
            .filter_map(|entry| {
                caches
                    .instance_masks
                    .get(&entry.name)
                    .cloned()
                    .flatten()
                    .map(|mask| (entry.name.clone(), mask))
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Class name → union of its instance masks, plus [`BACKGROUND`].
#[derive(Debug, Clone, Copy)]
pub struct ClassMasks<'a> {
    seg: &'a Segmentation,
}

impl ClassMasks<'_> {
    pub fn get(&self, class: &str) -> Option<Arc<Mask>> {
        let mut caches = self.seg.lock();
        self.seg.class_mask(&mut caches, class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.get(class).is_some()
    }

    /// Every visible class in legend order, background last.
    pub fn iter(&self) -> std::vec::IntoIter<(String, Arc<Mask>)> {
        let mut caches = self.seg.lock();
        let classes = self.seg.present_classes(&mut caches);
        classes
            .into_iter()
            .filter_map(|class| {
                let mask = caches.class_masks.get(&class).cloned().flatten()?;
                Some((class, mask))
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut caches = self.seg.lock();
        self.seg.present_classes(&mut caches)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Instance name → tight bounding box.
#[derive(Debug, Clone, Copy)]
pub struct InstanceDetections<'a> {
    seg: &'a Segmentation,
}

impl InstanceDetections<'_> {
    pub fn get(&self, name: &str) -> Option<BoundingBox> {
        let mut caches = self.seg.lock();
        self.seg.instance_box(&mut caches, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> std::vec::IntoIter<(String, BoundingBox)> {
        let mut caches = self.seg.lock();
        self.seg.load_instances(&mut caches);
        self.seg
            .legend
            .entries
            .iter()
            .filter_map(|entry| {
                self.seg
                    .instance_box(&mut caches, &entry.name)
                    .map(|bbox| (entry.name.clone(), bbox))
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Class name → one box per visible instance, in legend order.
#[derive(Debug, Clone, Copy)]
pub struct ClassDetections<'a> {
    seg: &'a Segmentation,
}

impl ClassDetections<'_> {
    pub fn get(&self, class: &str) -> Option<Vec<BoundingBox>> {
        let mut caches = self.seg.lock();
        self.seg.class_boxes(&mut caches, class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.get(class).is_some()
    }

    pub fn iter(&self) -> std::vec::IntoIter<(String, Vec<BoundingBox>)> {
        let mut caches = self.seg.lock();
        self.seg.load_instances(&mut caches);
        self.seg
            .legend
            .classes()
            .into_iter()
            .filter_map(|class| {
                self.seg
                    .class_boxes(&mut caches, class)
                    .map(|boxes| (class.to_owned(), boxes))
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(class, _)| class).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
