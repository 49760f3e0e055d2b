use crate::acquisition::FinalImage;
use crate::blob_store::{generate_object_key, BlobStore};
use crate::error::{CollectorError, Result};
use crate::metadata_store::{
    DocumentStore, NewSubmission, SubmissionRecord, LOCATION_NOT_SPECIFIED,
    SUBMISSIONS_COLLECTION,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Form fields accompanying an image
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionRequest {
    /// Apple variety, required
    #[serde(default)]
    pub variety: String,
    /// City / state, optional
    #[serde(default)]
    pub location: Option<String>,
}

/// Labels after trimming and defaulting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLabels {
    pub variety: String,
    pub location: String,
}

impl SubmissionRequest {
    /// Trim the labels and default the location. Rejections are counted
    /// here so every caller reports them.
    pub fn validate(&self) -> Result<ValidatedLabels> {
        let variety = self.variety.trim();
        if variety.is_empty() {
            metrics::counter!("collector.submissions.rejected").increment(1);
            return Err(CollectorError::EmptyVariety);
        }

        let location = self
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(LOCATION_NOT_SPECIFIED);

        Ok(ValidatedLabels {
            variety: variety.to_string(),
            location: location.to_string(),
        })
    }
}

/// Uploads images and records their metadata
pub struct SubmissionHandler {
    blob_store: Arc<dyn BlobStore>,
    document_store: Arc<dyn DocumentStore>,
    key_prefix: String,
}

impl SubmissionHandler {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        document_store: Arc<dyn DocumentStore>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            blob_store,
            document_store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Upload the image and write exactly one metadata record.
    ///
    /// The label is validated before any backend call. If the metadata write
    /// fails the uploaded object is left in place.
    #[instrument(skip(self, image, request), fields(source = ?image.source, size_bytes = image.bytes.len()))]
    pub async fn submit(
        &self,
        image: FinalImage,
        request: &SubmissionRequest,
    ) -> Result<SubmissionRecord> {
        let labels = request.validate()?;

        if image.bytes.is_empty() {
            return Err(CollectorError::NoImage);
        }

        let key = generate_object_key(&self.key_prefix);
        let size_bytes = image.bytes.len();
        let started = Instant::now();

        self.blob_store
            .put_object(&key, image.bytes, image.content_type)
            .await?;
        self.blob_store.make_public(&key).await?;
        let image_url = self.blob_store.public_url(&key);

        metrics::histogram!("collector.upload.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("collector.bytes.uploaded").increment(size_bytes as u64);

        let submission = NewSubmission {
            variety: labels.variety,
            location: labels.location,
            timestamp: Utc::now(),
            image_url,
            file_name: key.clone(),
        };

        let record = self
            .document_store
            .add_submission(submission)
            .await
            .map_err(|e| {
                warn!(
                    error = %e,
                    orphaned_key = %key,
                    blob_backend = self.blob_store.backend_tag(),
                    "Metadata write failed after upload; object left orphaned"
                );
                metrics::counter!("collector.submissions.failed").increment(1);
                e
            })?;

        metrics::counter!("collector.submissions.stored").increment(1);

        info!(
            id = %record.id,
            collection = SUBMISSIONS_COLLECTION,
            file_name = %record.file_name,
            variety = %record.variety,
            size_bytes = size_bytes,
            "Submission stored"
        );

        Ok(record)
    }

    /// Total stored submissions, `None` if the query failed.
    ///
    /// Display only: a failure is logged and never reaches the contributor.
    pub async fn total_submissions(&self) -> Option<i64> {
        match self.document_store.count_submissions().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(
                    error = %e,
                    backend = self.document_store.backend_tag(),
                    "Failed to count submissions"
                );
                None
            }
        }
    }

    pub async fn ready(&self) -> Result<()> {
        self.document_store.ping().await
    }
}
