use crate::config::DatabaseConfig;
use crate::error::{CollectorError, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Collection (table) holding one document per submission
pub const SUBMISSIONS_COLLECTION: &str = "apple_images";

/// Stored in place of an empty location
pub const LOCATION_NOT_SPECIFIED: &str = "Not specified";

/// Metadata for a submitted apple image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Document ID
    pub id: Uuid,
    /// Apple variety (cultivar) label
    pub variety: String,
    /// Free-text location or "Not specified"
    pub location: String,
    /// When the submission was made
    pub timestamp: DateTime<Utc>,
    /// Public URL of the uploaded image
    pub image_url: String,
    /// Blob store object key
    pub file_name: String,
}

/// Fields of a submission before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub variety: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub image_url: String,
    pub file_name: String,
}

impl NewSubmission {
    pub fn into_record(self, id: Uuid) -> SubmissionRecord {
        SubmissionRecord {
            id,
            variety: self.variety,
            location: self.location,
            timestamp: self.timestamp,
            image_url: self.image_url,
            file_name: self.file_name,
        }
    }
}

/// Structured record store, one document per submission
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Append a submission document
    async fn add_submission(&self, submission: NewSubmission) -> Result<SubmissionRecord>;

    /// Number of stored submissions
    async fn count_submissions(&self) -> Result<i64>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

fn insert_submission_sql() -> String {
    format!(
        r#"
        INSERT INTO {} (
            id, variety, location, timestamp, image_url, file_name
        ) VALUES (
            $1, $2, $3, $4, $5, $6
        )
        "#,
        SUBMISSIONS_COLLECTION
    )
}

fn count_submissions_sql() -> String {
    format!("SELECT COUNT(*) FROM {}", SUBMISSIONS_COLLECTION)
}

/// Metadata store for submissions in PostgreSQL
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, submission), fields(file_name = %submission.file_name))]
    async fn add_submission(&self, submission: NewSubmission) -> Result<SubmissionRecord> {
        let id = Uuid::new_v4();

        sqlx::query(&insert_submission_sql())
            .bind(id)
            .bind(&submission.variety)
            .bind(&submission.location)
            .bind(submission.timestamp)
            .bind(&submission.image_url)
            .bind(&submission.file_name)
            .execute(&self.pool)
            .await
            .map_err(|e| CollectorError::MetadataWrite(e.to_string()))?;

        debug!(id = %id, "Submission indexed");

        Ok(submission.into_record(id))
    }

    async fn count_submissions(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(&count_submissions_sql())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CollectorError::Statistics(e.to_string()))?;

        Ok(count.0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CollectorError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_queries_target_migrated_table() {
        let migration = include_str!("../migrations/20240901000000_create_apple_images.sql");
        assert!(migration.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", SUBMISSIONS_COLLECTION)));

        assert!(insert_submission_sql().contains(&format!("INSERT INTO {} (", SUBMISSIONS_COLLECTION)));
        assert_eq!(count_submissions_sql(), "SELECT COUNT(*) FROM apple_images");
    }

    #[test]
    fn test_into_record_keeps_fields() {
        let submission = NewSubmission {
            variety: "Kashmiri".to_string(),
            location: LOCATION_NOT_SPECIFIED.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 9, 1, 6, 30, 0).unwrap(),
            image_url: "https://cdn.example.org/apples/a.jpg".to_string(),
            file_name: "apples/a.jpg".to_string(),
        };
        let id = Uuid::new_v4();

        let record = submission.clone().into_record(id);
        assert_eq!(record.id, id);
        assert_eq!(record.variety, submission.variety);
        assert_eq!(record.file_name, submission.file_name);
        assert_eq!(record.timestamp, submission.timestamp);
    }

    #[test]
    fn test_record_serialization() {
        let record = NewSubmission {
            variety: "Fuji".to_string(),
            location: "Shimla, HP".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 9, 1, 6, 30, 0).unwrap(),
            image_url: "https://cdn.example.org/apples/b.jpg".to_string(),
            file_name: "apples/b.jpg".to_string(),
        }
        .into_record(Uuid::nil());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["variety"], "Fuji");
        assert_eq!(json["location"], "Shimla, HP");
        assert_eq!(json["file_name"], "apples/b.jpg");
        assert_eq!(json["timestamp"], "2024-09-01T06:30:00Z");
    }
}
