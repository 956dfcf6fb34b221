//! Typed detector output: bounding boxes, object classes and overlap measures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in pixel coordinates, origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates `[x1, y1, x2, y2]`
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if x2 < x1 || y2 < y1 {
            return None;
        }
        Some(Self::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Finite coordinates and a strictly positive area
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        (inter / union).clamp(0.0, 1.0)
    }

    /// Intersection over the smaller box's area. A phone fully inside a person box scores 1.0.
    pub fn containment(&self, other: &BoundingBox) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return 0.0;
        }
        (self.intersection_area(other) / smaller).clamp(0.0, 1.0)
    }
}

/// How co-location of the person and phone boxes is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapMethod {
    /// Intersection over the smaller box's area
    #[default]
    Containment,
    /// Intersection over union
    Iou,
}

impl OverlapMethod {
    pub fn ratio(&self, a: &BoundingBox, b: &BoundingBox) -> f32 {
        match self {
            OverlapMethod::Containment => a.containment(b),
            OverlapMethod::Iou => a.iou(b),
        }
    }
}

/// Object classes the pipeline cares about. Everything else is carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Phone,
    Other(String),
}

impl ObjectClass {
    /// COCO class id of a person
    pub const COCO_PERSON: u32 = 0;
    /// COCO class id of a cell phone
    pub const COCO_CELL_PHONE: u32 = 67;

    /// Normalise a detector label ("Cell Phone", "cell_phone", "mobile-phone", ...)
    pub fn from_label(label: &str) -> Self {
        let normalised: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();

        match normalised.as_str() {
            "person" | "people" | "human" => ObjectClass::Person,
            "phone" | "cell phone" | "cellphone" | "mobile phone" | "smartphone" => {
                ObjectClass::Phone
            }
            _ => ObjectClass::Other(normalised),
        }
    }

    pub fn from_coco_id(id: u32) -> Self {
        match id {
            Self::COCO_PERSON => ObjectClass::Person,
            Self::COCO_CELL_PHONE => ObjectClass::Phone,
            other => ObjectClass::Other(format!("coco:{}", other)),
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::Person => write!(f, "person"),
            ObjectClass::Phone => write!(f, "phone"),
            ObjectClass::Other(label) => write!(f, "{}", label),
        }
    }
}

/// One labelled box from the object detector. Confidence is validated to lie in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
        }
    }
}

/// Highest-confidence detection of the given class
pub fn best_of<'a>(detections: &'a [Detection], class: &ObjectClass) -> Option<&'a Detection> {
    detections
        .iter()
        .filter(|d| &d.class == class)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
