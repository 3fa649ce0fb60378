//! Bilinear resampling for 8-bit grayscale buffers.
//!
//! Pixel centres sit at half-integer coordinates and edge samples are clamped,
//! which matches OpenCV's `INTER_LINEAR` for both up- and down-scaling.

use image::GrayImage;

/// Resize a row-major `width` × `height` grayscale buffer to `new_width` × `new_height`.
///
/// Both source and destination dimensions must be non-zero.
fn bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Vec<u8> {
    debug_assert_eq!(src.len(), width * height);

    let inv_scale_x = width as f32 / new_width as f32;
    let inv_scale_y = height as f32 / new_height as f32;

    let mut resized = vec![0u8; new_width * new_height];
    for y in 0..new_height {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        // Above the first row centre the sample is the edge row itself.
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_width {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_width + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    resized
}

/// [`bilinear`] over an [`image::GrayImage`].
pub fn resize_gray(src: &GrayImage, new_width: u32, new_height: u32) -> GrayImage {
    let data = bilinear(
        src.as_raw(),
        src.width() as usize,
        src.height() as usize,
        new_width as usize,
        new_height as usize,
    );
    // Length is new_width * new_height by construction.
    GrayImage::from_raw(new_width, new_height, data)
        .unwrap_or_else(|| GrayImage::new(new_width, new_height))
}
