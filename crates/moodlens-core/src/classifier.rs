//! Facial expression classifier via ONNX Runtime.
//!
//! Runs a 7-way CNN on a normalized 64×64 grayscale face crop (NHWC input,
//! softmax output) and reports the most probable [`EmotionLabel`].

use crate::preprocess::{FaceTensor, FACE_TENSOR_SHAPE};
use crate::types::EmotionLabel;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

const EMOTION_CLASS_COUNT: usize = EmotionLabel::ALL.len();

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0} — export the emotion CNN to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("input shape {got:?} does not match the model input {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        got: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a face tensor to its most likely emotion and that emotion's probability.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, tensor: &FaceTensor) -> Result<(EmotionLabel, f32), InferenceError>;
}

/// ONNX-backed [`EmotionClassifier`].
///
/// The session is loaded once and never modified. Running it needs exclusive
/// access, so concurrent callers queue on the mutex.
pub struct OnnxEmotionClassifier {
    session: Mutex<Session>,
}

impl OnnxEmotionClassifier {
    /// Load the emotion model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, InferenceError> {
        if !Path::new(model_path).exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, tensor: &FaceTensor) -> Result<(EmotionLabel, f32), InferenceError> {
        if tensor.shape() != FACE_TENSOR_SHAPE {
            return Err(InferenceError::ShapeMismatch {
                expected: FACE_TENSOR_SHAPE,
                got: tensor.shape().to_vec(),
            });
        }

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, probabilities) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(format!("probability extraction: {e}")))?;

        select_label(probabilities)
    }
}

/// Pick the label with the highest probability.
pub fn select_label(probabilities: &[f32]) -> Result<(EmotionLabel, f32), InferenceError> {
    if probabilities.len() != EMOTION_CLASS_COUNT {
        return Err(InferenceError::InferenceFailed(format!(
            "expected {EMOTION_CLASS_COUNT} class probabilities, got {}",
            probabilities.len()
        )));
    }
    if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
        return Err(InferenceError::InferenceFailed(format!(
            "model produced a non-finite probability ({bad})"
        )));
    }

    let index = argmax(probabilities)
        .ok_or_else(|| InferenceError::InferenceFailed("empty probability vector".into()))?;
    let label = EmotionLabel::from_index(index)
        .ok_or_else(|| InferenceError::InferenceFailed(format!("no label for index {index}")))?;

    Ok((label, probabilities[index]))
}

/// Index of the maximum value. Ties go to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, best_v)) if v <= best_v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_basic() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_argmax_tie_prefers_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        let uniform = [1.0 / 7.0; 7];
        assert_eq!(argmax(&uniform), Some(0));
    }

    #[test]
    fn test_select_label_reports_raw_probability() {
        let probs = [0.05, 0.05, 0.1, 0.6, 0.1, 0.05, 0.05];
        let (label, confidence) = select_label(&probs).unwrap();
        assert_eq!(label, EmotionLabel::Happy);
        assert_eq!(confidence, 0.6);
    }

    #[test]
    fn test_select_label_last_class() {
        let probs = [0.0, 0.0, 0.0, 0.0, 0.0, 0.1, 0.9];
        assert_eq!(select_label(&probs).unwrap().0, EmotionLabel::Neutral);
    }

    #[test]
    fn test_select_label_rejects_wrong_length() {
        assert!(matches!(
            select_label(&[0.5, 0.5]),
            Err(InferenceError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_select_label_rejects_nan() {
        let probs = [0.1, f32::NAN, 0.1, 0.1, 0.1, 0.1, 0.5];
        assert!(matches!(
            select_label(&probs),
            Err(InferenceError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_missing_model_file() {
        assert!(matches!(
            OnnxEmotionClassifier::load("/nonexistent/emotion_model.onnx", 1),
            Err(InferenceError::ModelNotFound(_))
        ));
    }
}
