//! Apple Collector
//!
//! Data-collection service for an apple variety image dataset. A contributor
//! takes or picks a photo of an apple, optionally rotates it, labels it with a
//! variety and location, and submits it. The image is uploaded to object
//! storage, made public, and a metadata record is written to PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//!  Form client              Collector                     S3 Bucket
//! ┌────────────┐     ┌──────────────────────┐       ┌──────────────┐
//! │ camera     │────▶│ Session registry     │       │ apples/      │
//! │ file       │     │  camera slot  (rot)  │       │   {uuid}.jpg │
//! │ rotate     │     │  file slot    (rot)  │       └──────────────┘
//! │ submit     │     └──────────────────────┘              ▲
//! └────────────┘                │                          │
//!                               ▼                          │
//!                        ┌──────────────┐           ┌──────────────┐
//!                        │ Rotation     │──────────▶│ Submission   │
//!                        │ Transformer  │           │ Handler      │
//!                        └──────────────┘           └──────────────┘
//!                                                          │
//!                                                          ▼
//!                                                   ┌──────────────┐
//!                                                   │ PostgreSQL   │
//!                                                   │ apple_images │
//!                                                   └──────────────┘
//! ```

pub mod acquisition;
pub mod api;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod metadata_store;
pub mod rotation;
pub mod session;
pub mod submission;

pub use acquisition::{CollectionSession, FinalImage, ImageSource};
pub use api::{create_router, start_api_server, AppState};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::{BackendKind, Config, ConfigError};
pub use error::CollectorError;
pub use memory_store::{InMemoryBlobStore, InMemoryDocumentStore};
pub use metadata_store::{DocumentStore, PgDocumentStore, SubmissionRecord};
pub use rotation::{rotate_image, Rotation, RotationRequest};
pub use session::SessionRegistry;
pub use submission::{SubmissionHandler, SubmissionRequest};
