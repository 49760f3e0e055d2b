use crate::error::{CollectorError, Result};
use crate::rotation::{self, Rotation, RotationRequest, ROTATED_CONTENT_TYPE};
use image::ImageFormat;
use serde::{Deserialize, Serialize};

/// Where an image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Live capture from the device camera
    Camera,
    /// File picked from device storage
    #[serde(rename = "file")]
    FilePicker,
}

/// One acquisition path: the latest image plus its own rotation state
#[derive(Debug, Clone, Default)]
pub struct AcquisitionSlot {
    image: Option<AcquiredImage>,
    rotation: Rotation,
}

/// Raw bytes as received, with the sniffed format
#[derive(Debug, Clone)]
pub struct AcquiredImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

/// Owned copy of a slot, safe to hand to a blocking task
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub source: ImageSource,
    pub image: AcquiredImage,
    pub rotation: Rotation,
}

/// Image bytes ready for preview or upload
#[derive(Debug, Clone)]
pub struct FinalImage {
    pub source: ImageSource,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub rotation: Rotation,
}

impl AcquisitionSlot {
    /// Replace the held image. Rotation state is kept.
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Err(CollectorError::NoImage);
        }
        let format = rotation::sniff_format(&bytes)?;
        self.image = Some(AcquiredImage { bytes, format });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.image = None;
    }

    pub fn rotate(&mut self, request: RotationRequest) -> Rotation {
        self.rotation = self.rotation.apply(request);
        self.rotation
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn size_bytes(&self) -> Option<usize> {
        self.image.as_ref().map(|image| image.bytes.len())
    }
}

impl SlotSnapshot {
    /// Apply the slot's rotation. CPU-bound; run off the async executor.
    pub fn render(self, jpeg_quality: u8) -> Result<FinalImage> {
        if self.rotation.is_identity() {
            return Ok(FinalImage {
                source: self.source,
                content_type: rotation::content_type(self.image.format),
                bytes: self.image.bytes,
                rotation: self.rotation,
            });
        }

        let bytes = rotation::rotate_image(&self.image.bytes, self.rotation, jpeg_quality)?;
        Ok(FinalImage {
            source: self.source,
            bytes,
            content_type: ROTATED_CONTENT_TYPE,
            rotation: self.rotation,
        })
    }
}

/// Per-session form state: one slot per acquisition path
#[derive(Debug, Clone, Default)]
pub struct CollectionSession {
    camera: AcquisitionSlot,
    file_picker: AcquisitionSlot,
}

impl CollectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, source: ImageSource) -> &AcquisitionSlot {
        match source {
            ImageSource::Camera => &self.camera,
            ImageSource::FilePicker => &self.file_picker,
        }
    }

    pub fn slot_mut(&mut self, source: ImageSource) -> &mut AcquisitionSlot {
        match source {
            ImageSource::Camera => &mut self.camera,
            ImageSource::FilePicker => &mut self.file_picker,
        }
    }

    /// The source whose image would be submitted. A picked file wins over a capture.
    pub fn active_source(&self) -> Option<ImageSource> {
        if self.file_picker.has_image() {
            Some(ImageSource::FilePicker)
        } else if self.camera.has_image() {
            Some(ImageSource::Camera)
        } else {
            None
        }
    }

    pub fn snapshot(&self, source: ImageSource) -> Result<SlotSnapshot> {
        let slot = self.slot(source);
        let image = slot.image.clone().ok_or(CollectorError::NoImage)?;
        Ok(SlotSnapshot {
            source,
            image,
            rotation: slot.rotation,
        })
    }

    /// Snapshot of the active source, used for submission
    pub fn active_snapshot(&self) -> Result<SlotSnapshot> {
        let source = self.active_source().ok_or(CollectorError::NoImage)?;
        self.snapshot(source)
    }
}
