//! Decode → locate → (prepare → classify) per face.

use crate::classifier::{EmotionClassifier, InferenceError};
use crate::decoder::{self, DecodeError, DecodedImage};
use crate::locator::{DetectionError, FaceLocator};
use crate::preprocess::{self, PreprocessError};
use crate::types::PredictionResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),
    #[error("preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
}

/// Stateless prediction pipeline over an injected detector and classifier.
///
/// Both collaborators are loaded once at startup and only read afterwards, so
/// one pipeline is shared by every request.
pub struct PredictionPipeline {
    locator: Box<dyn FaceLocator>,
    classifier: Box<dyn EmotionClassifier>,
}

impl PredictionPipeline {
    pub fn new(
        locator: impl FaceLocator + 'static,
        classifier: impl EmotionClassifier + 'static,
    ) -> Self {
        Self {
            locator: Box::new(locator),
            classifier: Box::new(classifier),
        }
    }

    /// Classify every face in a `data:<mime>;base64,...` image.
    ///
    /// Any failure aborts the whole call; there are no partial results.
    pub fn run(&self, encoded: &str) -> Result<Vec<PredictionResult>, PipelineError> {
        let image = decoder::decode(encoded)?;
        self.run_decoded(&image)
    }

    /// [`run`](Self::run) over raw encoded image bytes.
    pub fn run_bytes(&self, bytes: &[u8]) -> Result<Vec<PredictionResult>, PipelineError> {
        let image = decoder::decode_bytes(bytes)?;
        self.run_decoded(&image)
    }

    fn run_decoded(&self, image: &DecodedImage) -> Result<Vec<PredictionResult>, PipelineError> {
        let faces = self.locator.locate(&image.gray)?;
        tracing::info!(
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "faces detected"
        );

        let mut results = Vec::with_capacity(faces.len());
        for face_box in faces {
            let tensor = preprocess::prepare(&image.gray, &face_box)?;
            let (label, confidence) = self.classifier.classify(&tensor)?;
            tracing::debug!(%label, confidence, ?face_box, "face classified");
            results.push(PredictionResult {
                label,
                confidence,
                face_box,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::FaceTensor;
    use crate::types::{EmotionLabel, FaceBox};
    use base64::Engine;
    use image::{GrayImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedLocator(Vec<FaceBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, _gray: &GrayImage) -> Result<Vec<FaceBox>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    /// Classifies by mean intensity and counts calls.
    struct MeanClassifier {
        calls: Arc<AtomicUsize>,
    }

    impl EmotionClassifier for MeanClassifier {
        fn classify(&self, tensor: &FaceTensor) -> Result<(EmotionLabel, f32), InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mean = tensor.view().mean().unwrap_or(0.0);
            let label = if mean > 0.5 {
                EmotionLabel::Happy
            } else {
                EmotionLabel::Sad
            };
            Ok((label, mean))
        }
    }

    struct FailingClassifier;

    impl EmotionClassifier for FailingClassifier {
        fn classify(&self, _tensor: &FaceTensor) -> Result<(EmotionLabel, f32), InferenceError> {
            Err(InferenceError::InferenceFailed("boom".into()))
        }
    }

    fn data_url(img: &RgbImage) -> String {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf)
        )
    }

    /// 100x100 black frame, white left half.
    fn frame() -> RgbImage {
        RgbImage::from_fn(100, 100, |x, _| {
            if x < 50 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_results_follow_locator_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PredictionPipeline::new(
            FixedLocator(vec![FaceBox::new(0, 0, 40, 40), FaceBox::new(55, 10, 40, 40)]),
            MeanClassifier {
                calls: calls.clone(),
            },
        );

        let results = pipeline.run(&data_url(&frame())).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label, EmotionLabel::Happy);
        assert_eq!(results[0].face_box, FaceBox::new(0, 0, 40, 40));
        assert_eq!(results[1].label, EmotionLabel::Sad);
        assert_eq!(results[1].face_box, FaceBox::new(55, 10, 40, 40));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_faces_yields_empty_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PredictionPipeline::new(
            FixedLocator(vec![]),
            MeanClassifier {
                calls: calls.clone(),
            },
        );
        assert!(pipeline.run(&data_url(&frame())).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_failure_aborts_request() {
        let pipeline = PredictionPipeline::new(
            FixedLocator(vec![FaceBox::new(0, 0, 40, 40)]),
            FailingClassifier,
        );
        assert!(matches!(
            pipeline.run(&data_url(&frame())),
            Err(PipelineError::Inference(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_box_aborts_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PredictionPipeline::new(
            FixedLocator(vec![FaceBox::new(0, 0, 40, 40), FaceBox::new(80, 80, 40, 40)]),
            MeanClassifier {
                calls: calls.clone(),
            },
        );
        assert!(matches!(
            pipeline.run(&data_url(&frame())),
            Err(PipelineError::Preprocess(_))
        ));
    }

    #[test]
    fn test_decode_failure_surfaces() {
        let pipeline = PredictionPipeline::new(
            FixedLocator(vec![]),
            MeanClassifier {
                calls: Arc::new(AtomicUsize::new(0)),
            },
        );
        assert!(matches!(
            pipeline.run("data:image/png;base64,!!!"),
            Err(PipelineError::Decode(_))
        ));
    }
}
