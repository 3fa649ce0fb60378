//! moodlens-core: face detection and emotion classification engine.
//!
//! Uses an OpenCV Haar cascade for face detection and a small CNN for
//! expression classification, the latter running via ONNX Runtime on CPU.

pub mod classifier;
pub mod decoder;
pub mod locator;
pub mod pipeline;
pub mod preprocess;
pub mod resize;
pub mod types;

use std::path::PathBuf;

pub use classifier::{EmotionClassifier, InferenceError, OnnxEmotionClassifier};
pub use decoder::{DecodeError, DecodedImage};
pub use locator::{CascadeError, DetectionError, FaceLocator, HaarFaceLocator, LocatorConfig};
pub use pipeline::{PipelineError, PredictionPipeline};
pub use preprocess::{FaceTensor, PreprocessError};
pub use types::{EmotionLabel, FaceBox, PredictionResult};

/// File name of the face cascade inside the model directory.
pub const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
/// File name of the emotion classifier inside the model directory.
pub const CLASSIFIER_FILE: &str = "emotion_model.onnx";

/// Default model directory: `$XDG_DATA_HOME/moodlens/models`, falling back to
/// `~/.local/share/moodlens/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodlens")
        .join("models")
}
