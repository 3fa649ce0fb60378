use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// True when the box lies entirely inside a `width` × `height` grid.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.w > 0
            && self.h > 0
            && u64::from(self.x) + u64::from(self.w) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.h) <= u64::from(height)
    }
}

/// The closed set of expressions the classifier was trained on.
///
/// Variant order is the positional order of the model's output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Label for a model output index, or `None` past the last label.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
            EmotionLabel::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified face. Built per request and dropped once serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: EmotionLabel,
    /// Raw model probability for `label`, in [0, 1].
    pub confidence: f32,
    #[serde(rename = "box")]
    pub face_box: FaceBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_index_roundtrip() {
        for (i, label) in EmotionLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(EmotionLabel::from_index(i), Some(*label));
        }
        assert_eq!(EmotionLabel::from_index(7), None);
    }

    #[test]
    fn test_label_order_matches_model_output() {
        assert_eq!(EmotionLabel::from_index(0), Some(EmotionLabel::Angry));
        assert_eq!(EmotionLabel::from_index(3), Some(EmotionLabel::Happy));
        assert_eq!(EmotionLabel::from_index(6), Some(EmotionLabel::Neutral));
    }

    #[test]
    fn test_face_box_fits_within() {
        assert!(FaceBox::new(0, 0, 30, 30).fits_within(30, 30));
        assert!(FaceBox::new(10, 5, 20, 25).fits_within(30, 30));
        assert!(!FaceBox::new(10, 0, 21, 30).fits_within(30, 30));
        assert!(!FaceBox::new(0, 0, 0, 10).fits_within(30, 30));
        assert!(!FaceBox::new(u32::MAX, 0, 1, 1).fits_within(30, 30));
    }

    #[test]
    fn test_prediction_serializes_box_field() {
        let result = PredictionResult {
            label: EmotionLabel::Happy,
            confidence: 0.5,
            face_box: FaceBox::new(1, 2, 30, 40),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["label"], "Happy");
        assert_eq!(json["confidence"], 0.5);
        assert_eq!(json["box"]["x"], 1);
        assert_eq!(json["box"]["y"], 2);
        assert_eq!(json["box"]["w"], 30);
        assert_eq!(json["box"]["h"], 40);
    }
}
