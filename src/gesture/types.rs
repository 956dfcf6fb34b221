use serde::{Deserialize, Serialize};

/// Gesture labels understood by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GestureKind {
    OpenPalm,
    ClosedFist,
    /// No hand or no recognised gesture in the frame
    None,
    Other(String),
}

impl GestureKind {
    /// Accepts "open-palm", "Open_Palm", "open palm", "closed-fist", "None", ...
    pub fn from_label(label: &str) -> Self {
        let normalised: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        match normalised.as_str() {
            "open-palm" => GestureKind::OpenPalm,
            "closed-fist" => GestureKind::ClosedFist,
            "" | "none" => GestureKind::None,
            _ => GestureKind::Other(normalised),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "left" => Handedness::Left,
            "right" => Handedness::Right,
            _ => Handedness::Unknown,
        }
    }
}

/// One classified gesture frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureObservation {
    pub kind: GestureKind,
    pub confidence: f32,
    pub handedness: Handedness,
}

impl GestureObservation {
    pub fn new(kind: GestureKind, confidence: f32, handedness: Handedness) -> Self {
        Self {
            kind,
            confidence,
            handedness,
        }
    }

    pub fn none() -> Self {
        Self::new(GestureKind::None, 0.0, Handedness::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gesture_label_normalisation() {
        assert_eq!(GestureKind::from_label("Open_Palm"), GestureKind::OpenPalm);
        assert_eq!(GestureKind::from_label("open-palm"), GestureKind::OpenPalm);
        assert_eq!(
            GestureKind::from_label("Closed Fist"),
            GestureKind::ClosedFist
        );
        assert_eq!(GestureKind::from_label("None"), GestureKind::None);
        assert_eq!(
            GestureKind::from_label("Thumb_Up"),
            GestureKind::Other("thumb-up".to_string())
        );
    }

    #[test]
    fn test_handedness_parsing() {
        assert_eq!(Handedness::from_label("Right"), Handedness::Right);
        assert_eq!(Handedness::from_label("left"), Handedness::Left);
        assert_eq!(Handedness::from_label("both"), Handedness::Unknown);
    }
}
