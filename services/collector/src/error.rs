use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to contributors while collecting and submitting images.
///
/// Every message is bilingual (English / Hindi) because it is shown to the
/// contributor verbatim.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Please enter apple variety / कृपया सेब की किस्म भरें")]
    EmptyVariety,

    #[error("Please take or upload an apple photo first / कृपया पहले सेब की तस्वीर लें या अपलोड करें")]
    NoImage,

    #[error("Only JPG, JPEG or PNG images are accepted / केवल JPG, JPEG या PNG तस्वीरें स्वीकार हैं: {0}")]
    UnsupportedFormat(String),

    #[error("Could not read the image / तस्वीर पढ़ी नहीं जा सकी: {0}")]
    ImageDecode(String),

    #[error("Could not process the image / तस्वीर संसाधित नहीं हो सकी: {0}")]
    ImageEncode(String),

    #[error("Error uploading image / तस्वीर अपलोड करते समय त्रुटि: {0}")]
    Upload(String),

    #[error("Error saving image details / तस्वीर की जानकारी सहेजते समय त्रुटि: {0}")]
    MetadataWrite(String),

    #[error("Could not load dataset statistics / डेटासेट आंकड़े लोड नहीं हो सके: {0}")]
    Statistics(String),

    #[error("Session not found / सत्र नहीं मिला: {0}")]
    SessionNotFound(Uuid),

    #[error("Internal error / आंतरिक त्रुटि: {0}")]
    Internal(String),
}

impl CollectorError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CollectorError::EmptyVariety => "EMPTY_VARIETY",
            CollectorError::NoImage => "NO_IMAGE",
            CollectorError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            CollectorError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            CollectorError::ImageEncode(_) => "IMAGE_ENCODE_ERROR",
            CollectorError::Upload(_) => "UPLOAD_ERROR",
            CollectorError::MetadataWrite(_) => "METADATA_WRITE_ERROR",
            CollectorError::Statistics(_) => "STATISTICS_ERROR",
            CollectorError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CollectorError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors caused by contributor input rather than a backend
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CollectorError::EmptyVariety
                | CollectorError::NoImage
                | CollectorError::UnsupportedFormat(_)
                | CollectorError::ImageDecode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
