//! Data-URL image decoding.
//!
//! Turns a `data:<mime>;base64,<payload>` string into an RGB grid plus the
//! grayscale grid the detector and preprocessor work on.

use base64::Engine;
use image::{GrayImage, Luma, RgbImage};
use thiserror::Error;

const DATA_URL_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64";

// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is not a base64 data URL (expected `data:<mime>;base64,<payload>`)")]
    NotDataUrl,
    #[error("image payload is empty")]
    Empty,
    #[error("malformed base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unrecognized image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero size ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },
}

/// A decoded request image: the colour grid and its grayscale derivative.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub color: RgbImage,
    pub gray: GrayImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

/// Borrowed view of a parsed data URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedImage<'a> {
    pub mime: &'a str,
    pub payload: &'a str,
}

impl<'a> EncodedImage<'a> {
    /// Split a `data:<mime>;base64,<payload>` string into its MIME type and payload.
    pub fn parse(encoded: &'a str) -> Result<Self, DecodeError> {
        let rest = encoded
            .trim_start()
            .strip_prefix(DATA_URL_SCHEME)
            .ok_or(DecodeError::NotDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(DecodeError::NotDataUrl)?;
        let mime = header
            .strip_suffix(BASE64_MARKER)
            .ok_or(DecodeError::NotDataUrl)?;
        Ok(Self { mime, payload })
    }

    /// Base64-decode the payload, ignoring ASCII whitespace.
    pub fn bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let compact: String = self
            .payload
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
    }
}

/// Decode a data-URL image into colour and grayscale grids.
pub fn decode(encoded: &str) -> Result<DecodedImage, DecodeError> {
    let parsed = EncodedImage::parse(encoded)?;
    let bytes = parsed.bytes()?;
    tracing::debug!(mime = parsed.mime, bytes = bytes.len(), "decoding image payload");
    decode_bytes(&bytes)
}

/// Decode raw encoded image bytes (PNG, JPEG, ...) into colour and grayscale grids.
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let color = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = color.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized { width, height });
    }

    let gray = to_gray(&color);
    Ok(DecodedImage { color, gray })
}

/// RGB → single-channel luma with BT.601 weights.
pub fn to_gray(color: &RgbImage) -> GrayImage {
    GrayImage::from_fn(color.width(), color.height(), |x, y| {
        let [r, g, b] = color.get_pixel(x, y).0;
        let luma = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}
