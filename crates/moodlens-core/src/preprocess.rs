//! Face crop → classifier input tensor.

use crate::resize;
use crate::types::FaceBox;
use image::GrayImage;
use ndarray::Array4;
use thiserror::Error;

/// Edge length of the square classifier input.
pub const FACE_INPUT_SIZE: usize = 64;
/// Exact tensor shape the classifier consumes: NHWC, batch of one, single channel.
pub const FACE_TENSOR_SHAPE: [usize; 4] = [1, FACE_INPUT_SIZE, FACE_INPUT_SIZE, 1];
const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("face box {face_box:?} lies outside the {width}x{height} image")]
    OutOfBounds {
        face_box: FaceBox,
        width: u32,
        height: u32,
    },
}

/// Normalized `(1, 64, 64, 1)` face crop with values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTensor(Array4<f32>);

impl FaceTensor {
    /// Wrap an array, returning it back if the shape is not [`FACE_TENSOR_SHAPE`].
    pub fn from_array(array: Array4<f32>) -> Result<Self, Array4<f32>> {
        if array.shape() == FACE_TENSOR_SHAPE {
            Ok(Self(array))
        } else {
            Err(array)
        }
    }

    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }
}

/// Crop `face_box` out of `gray`, resize to 64×64 and scale intensities to [0, 1].
///
/// The resize always runs, even for crops that are already 64×64.
pub fn prepare(gray: &GrayImage, face_box: &FaceBox) -> Result<FaceTensor, PreprocessError> {
    let (width, height) = gray.dimensions();
    if !face_box.fits_within(width, height) {
        return Err(PreprocessError::OutOfBounds {
            face_box: *face_box,
            width,
            height,
        });
    }

    let crop = image::imageops::crop_imm(gray, face_box.x, face_box.y, face_box.w, face_box.h)
        .to_image();
    let resized = resize::resize_gray(&crop, FACE_INPUT_SIZE as u32, FACE_INPUT_SIZE as u32);

    let mut tensor = Array4::<f32>::zeros(FACE_TENSOR_SHAPE);
    for y in 0..FACE_INPUT_SIZE {
        for x in 0..FACE_INPUT_SIZE {
            tensor[[0, y, x, 0]] = resized.get_pixel(x as u32, y as u32)[0] as f32 / PIXEL_SCALE;
        }
    }

    Ok(FaceTensor(tensor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_prepare_output_shape() {
        for (w, h) in [(30, 30), (64, 64), (200, 120)] {
            let gray = GrayImage::from_pixel(w, h, Luma([100]));
            let tensor = prepare(&gray, &FaceBox::new(0, 0, w, h)).unwrap();
            assert_eq!(tensor.shape(), &FACE_TENSOR_SHAPE);
        }
    }

    #[test]
    fn test_prepare_normalization() {
        let gray = GrayImage::from_pixel(80, 80, Luma([255]));
        let tensor = prepare(&gray, &FaceBox::new(10, 10, 40, 40)).unwrap();
        assert!(tensor.view().iter().all(|&v| (v - 1.0).abs() < 1e-6));

        let gray = GrayImage::from_pixel(80, 80, Luma([51]));
        let tensor = prepare(&gray, &FaceBox::new(10, 10, 40, 40)).unwrap();
        assert!(tensor.view().iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_prepare_values_in_unit_range() {
        let gray = GrayImage::from_fn(90, 70, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let tensor = prepare(&gray, &FaceBox::new(5, 3, 60, 50)).unwrap();
        assert!(tensor.view().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_prepare_uses_only_the_crop() {
        // Left half black, right half white; cropping the right half must be all ones.
        let gray = GrayImage::from_fn(100, 50, |x, _| Luma([if x < 50 { 0 } else { 255 }]));
        let tensor = prepare(&gray, &FaceBox::new(50, 0, 50, 50)).unwrap();
        assert!(tensor.view().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_prepare_out_of_bounds() {
        let gray = GrayImage::from_pixel(50, 50, Luma([0]));
        let err = prepare(&gray, &FaceBox::new(30, 30, 30, 30)).unwrap_err();
        assert!(matches!(err, PreprocessError::OutOfBounds { width: 50, height: 50, .. }));
    }

    #[test]
    fn test_face_tensor_rejects_wrong_shape() {
        assert!(FaceTensor::from_array(Array4::zeros((1, 64, 64, 3))).is_err());
        assert!(FaceTensor::from_array(Array4::zeros((1, 64, 64, 1))).is_ok());
    }
}
