//! Image rotation for acquired photos.
//!
//! Contributors often hold the phone sideways, so each acquisition source keeps
//! an accumulated clockwise rotation which is applied right before preview or
//! upload. Rotated images are always re-encoded as JPEG; an unrotated image is
//! passed through untouched.

use crate::error::{CollectorError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Content type of every re-encoded image
pub const ROTATED_CONTENT_TYPE: &str = "image/jpeg";

/// A rotation request coming from the form controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationRequest {
    /// 90° counter-clockwise
    Left,
    /// 90° clockwise
    Right,
    /// 180°
    Flip,
    /// Back to the original orientation
    Reset,
}

impl RotationRequest {
    /// Signed delta in degrees, `None` for reset
    pub fn delta(self) -> Option<i32> {
        match self {
            RotationRequest::Left => Some(-90),
            RotationRequest::Right => Some(90),
            RotationRequest::Flip => Some(180),
            RotationRequest::Reset => None,
        }
    }
}

/// Accumulated clockwise rotation, always one of 0, 90, 180 or 270 degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Rotation(u16);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    /// Build a rotation from any multiple of 90 degrees, normalized modulo 360
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        Some(Rotation(degrees.rem_euclid(360) as u16))
    }

    pub fn degrees(self) -> u16 {
        self.0
    }

    pub fn is_identity(self) -> bool {
        self.0 == 0
    }

    /// Width and height trade places for quarter turns
    pub fn swaps_dimensions(self) -> bool {
        self.0 == 90 || self.0 == 270
    }

    /// Apply a request and return the new accumulated rotation
    pub fn apply(self, request: RotationRequest) -> Self {
        match request.delta() {
            Some(delta) => Rotation((self.0 as i32 + delta).rem_euclid(360) as u16),
            None => Rotation::NONE,
        }
    }
}

/// Image formats contributors may upload
pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Ok(format),
        Ok(other) => Err(CollectorError::UnsupportedFormat(format!("{:?}", other))),
        Err(_) => Err(CollectorError::UnsupportedFormat("unknown".to_string())),
    }
}

/// Get content type for an accepted image format
pub fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        _ => "application/octet-stream",
    }
}

/// Rotate encoded image bytes clockwise and re-encode them as JPEG.
///
/// The canvas grows to fit the rotated content. A zero rotation returns the
/// input bytes unchanged without decoding them.
#[instrument(skip(bytes), fields(size_bytes = bytes.len(), degrees = rotation.degrees()))]
pub fn rotate_image(bytes: &[u8], rotation: Rotation, jpeg_quality: u8) -> Result<Vec<u8>> {
    if rotation.is_identity() {
        return Ok(bytes.to_vec());
    }

    let original =
        image::load_from_memory(bytes).map_err(|e| CollectorError::ImageDecode(e.to_string()))?;

    let rotated = match rotation.degrees() {
        90 => original.rotate90(),
        180 => original.rotate180(),
        270 => original.rotate270(),
        _ => original,
    };

    let encoded = encode_jpeg(&rotated, jpeg_quality)?;

    debug!(
        width = rotated.width(),
        height = rotated.height(),
        encoded_bytes = encoded.len(),
        "Image rotated"
    );

    Ok(encoded)
}

// JPEG has no alpha channel
fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| CollectorError::ImageEncode(e.to_string()))?;
    Ok(out)
}
