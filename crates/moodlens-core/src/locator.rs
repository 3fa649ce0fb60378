//! Multi-scale face localisation with an OpenCV Haar cascade.
//!
//! Wraps `CascadeClassifier::detect_multi_scale`: the image pyramid scan and
//! the neighbour grouping both happen inside OpenCV. Reported boxes are
//! clipped to the image and filtered by the configured minimum size.

use crate::types::FaceBox;
use image::GrayImage;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

// --- Named constants (OpenCV detectMultiScale defaults) ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: usize = 5;
const DEFAULT_MIN_SIZE: u32 = 30;
/// No upper bound on the scanned window.
const UNBOUNDED_SIZE: Size = Size {
    width: 0,
    height: 0,
};

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0} — copy haarcascade_frontalface_default.xml from OpenCV's data/haarcascades")]
    NotFound(String),
    #[error("cascade file could not be loaded: {0}")]
    Empty(String),
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("cannot run detection on a {width}x{height} grid")]
    EmptyGrid { width: u32, height: u32 },
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Finds face rectangles in a grayscale image.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectionError>;
}

/// `detectMultiScale` tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorConfig {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Overlapping hits a group needs to be reported. 0 disables grouping.
    pub min_neighbors: usize,
    /// Smallest reported face edge, in source pixels.
    pub min_size: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

impl LocatorConfig {
    fn validate(&self) -> Result<(), CascadeError> {
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(CascadeError::InvalidConfig(format!(
                "scale factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        if i32::try_from(self.min_neighbors).is_err() || i32::try_from(self.min_size).is_err() {
            return Err(CascadeError::InvalidConfig(format!(
                "min neighbours {} / min size {} out of range",
                self.min_neighbors, self.min_size
            )));
        }
        Ok(())
    }
}

/// Cascade-backed [`FaceLocator`].
///
/// The classifier is loaded once and never reconfigured. OpenCV needs `&mut`
/// to run a detection, so concurrent callers queue on the mutex.
pub struct HaarFaceLocator {
    classifier: Mutex<CascadeClassifier>,
    config: LocatorConfig,
}

impl HaarFaceLocator {
    /// Load the cascade XML at `cascade_path`.
    pub fn load(cascade_path: &str, config: LocatorConfig) -> Result<Self, CascadeError> {
        config.validate()?;
        if !Path::new(cascade_path).exists() {
            return Err(CascadeError::NotFound(cascade_path.to_string()));
        }

        let classifier = CascadeClassifier::new(cascade_path)?;
        if classifier.empty()? {
            return Err(CascadeError::Empty(cascade_path.to_string()));
        }

        tracing::info!(
            path = cascade_path,
            scale_factor = config.scale_factor,
            min_neighbors = config.min_neighbors,
            min_size = config.min_size,
            "loaded face cascade"
        );

        Ok(Self {
            classifier: Mutex::new(classifier),
            config,
        })
    }
}

impl FaceLocator for HaarFaceLocator {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectionError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::EmptyGrid { width, height });
        }

        // Single-channel 8-bit, row-major: the same layout as GrayImage.
        let mat: Mat =
            Mat::new_rows_cols_with_data(height as i32, width as i32, gray.as_raw())?
                .clone_pointee();

        let min_size = self.config.min_size as i32;
        let mut detections = Vector::<Rect>::new();
        self.classifier.lock().detect_multi_scale(
            &mat,
            &mut detections,
            self.config.scale_factor,
            self.config.min_neighbors as i32,
            0,
            Size::new(min_size, min_size),
            UNBOUNDED_SIZE,
        )?;

        let faces: Vec<FaceBox> = detections
            .iter()
            .filter_map(|r| clip_to_image(r, width, height, self.config.min_size))
            .collect();

        tracing::debug!(
            width,
            height,
            candidates = detections.len(),
            faces = faces.len(),
            "cascade scan complete"
        );

        Ok(faces)
    }
}

/// Clip `rect` to a `width` × `height` image; `None` when the remainder is under `min_size`.
fn clip_to_image(rect: Rect, width: u32, height: u32, min_size: u32) -> Option<FaceBox> {
    let (width, height) = (i64::from(width), i64::from(height));
    let x0 = i64::from(rect.x).clamp(0, width);
    let y0 = i64::from(rect.y).clamp(0, height);
    let x1 = (i64::from(rect.x) + i64::from(rect.width)).clamp(0, width);
    let y1 = (i64::from(rect.y) + i64::from(rect.height)).clamp(0, height);
    let (w, h) = (x1 - x0, y1 - y0);
    if w <= 0 || h <= 0 || w < i64::from(min_size) || h < i64::from(min_size) {
        return None;
    }
    Some(FaceBox::new(x0 as u32, y0 as u32, w as u32, h as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Write;

    /// Single-stump 24×24 cascade that fires when the lower half of the
    /// window is brighter than the upper half.
    const BRIGHT_BELOW_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.5</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 24 12 -1.</_>
        <_>
          0 12 24 12 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    /// Write `xml` to a temporary `.xml` file kept alive by the returned handle.
    fn cascade_file(xml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("moodlens-cascade-")
            .suffix(".xml")
            .tempfile()
            .unwrap();
        file.write_all(xml.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn locator(config: LocatorConfig) -> (tempfile::NamedTempFile, HaarFaceLocator) {
        let file = cascade_file(BRIGHT_BELOW_CASCADE);
        let locator = HaarFaceLocator::load(file.path().to_str().unwrap(), config).unwrap();
        (file, locator)
    }

    /// Dark frame with a bright block in the lower middle.
    fn synthetic_frame() -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            if (24..72).contains(&x) && (48..72).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_clip_to_image() {
        let b = clip_to_image(Rect::new(-3, 90, 40, 40), 100, 100, 30);
        assert_eq!(b, None, "only 10 rows remain inside the image");

        let b = clip_to_image(Rect::new(70, 65, 40, 40), 100, 100, 30).unwrap();
        assert_eq!(b, FaceBox::new(70, 65, 30, 35));
        assert!(b.fits_within(100, 100));

        let b = clip_to_image(Rect::new(10, 10, 40, 40), 100, 100, 30).unwrap();
        assert_eq!(b, FaceBox::new(10, 10, 40, 40));
    }

    #[test]
    fn test_locate_uniform_image_finds_nothing() {
        let (_file, locator) = locator(LocatorConfig::default());
        let gray = GrayImage::from_pixel(120, 80, Luma([128]));
        assert!(locator.locate(&gray).unwrap().is_empty());
    }

    #[test]
    fn test_locate_image_smaller_than_window() {
        let (_file, locator) = locator(LocatorConfig::default());
        let gray = GrayImage::from_pixel(20, 20, Luma([0]));
        assert!(locator.locate(&gray).unwrap().is_empty());
    }

    #[test]
    fn test_locate_empty_grid_is_error() {
        let (_file, locator) = locator(LocatorConfig::default());
        assert!(matches!(
            locator.locate(&GrayImage::new(0, 0)),
            Err(DetectionError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn test_locate_boxes_respect_bounds_and_min_size() {
        let (_file, locator) = locator(LocatorConfig::default());
        let faces = locator.locate(&synthetic_frame()).unwrap();
        assert!(!faces.is_empty());
        for face in &faces {
            assert!(face.fits_within(96, 96), "{face:?} leaves the image");
            assert!(face.w >= 30 && face.h >= 30, "{face:?} below min size");
        }
    }

    #[test]
    fn test_grouping_reduces_raw_hits() {
        let gray = synthetic_frame();
        let (_raw_file, raw_locator) = locator(LocatorConfig {
            min_neighbors: 0,
            ..LocatorConfig::default()
        });
        let (_file, grouped_locator) = locator(LocatorConfig::default());
        let raw = raw_locator.locate(&gray).unwrap();
        let grouped = grouped_locator.locate(&gray).unwrap();
        assert!(raw.len() > grouped.len());
    }

    #[test]
    fn test_min_size_above_image_finds_nothing() {
        let (_file, locator) = locator(LocatorConfig {
            min_size: 200,
            ..LocatorConfig::default()
        });
        assert!(locator.locate(&synthetic_frame()).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_locate_is_identical() {
        let (_file, locator) = locator(LocatorConfig::default());
        let gray = synthetic_frame();
        assert_eq!(locator.locate(&gray).unwrap(), locator.locate(&gray).unwrap());
    }

    #[test]
    fn test_rejects_non_increasing_scale_factor() {
        let file = cascade_file(BRIGHT_BELOW_CASCADE);
        let config = LocatorConfig {
            scale_factor: 1.0,
            ..LocatorConfig::default()
        };
        assert!(matches!(
            HaarFaceLocator::load(file.path().to_str().unwrap(), config),
            Err(CascadeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_cascade_file() {
        assert!(matches!(
            HaarFaceLocator::load("/nonexistent/cascade.xml", LocatorConfig::default()),
            Err(CascadeError::NotFound(_))
        ));
    }

    #[test]
    fn test_unloadable_cascade_is_rejected() {
        let file = cascade_file("<?xml version=\"1.0\"?>\n<opencv_storage>\n</opencv_storage>\n");
        assert!(HaarFaceLocator::load(file.path().to_str().unwrap(), LocatorConfig::default())
            .is_err());
    }
}
