use crate::acquisition::{CollectionSession, FinalImage, ImageSource, SlotSnapshot};
use crate::config::ApiConfig;
use crate::error::{CollectorError, Result};
use crate::metadata_store::SubmissionRecord;
use crate::rotation::{Rotation, RotationRequest};
use crate::session::SessionRegistry;
use crate::submission::{SubmissionHandler, SubmissionRequest};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub const SUBMIT_SUCCESS_MESSAGE: &str =
    "Image uploaded successfully! Thank you for your contribution! / तस्वीर सफलतापूर्वक अपलोड हो गई! आपके योगदान के लिए धन्यवाद!";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub submissions: Arc<SubmissionHandler>,
    pub jpeg_quality: u8,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl CollectorError {
    fn status(&self) -> StatusCode {
        match self {
            CollectorError::EmptyVariety | CollectorError::ImageDecode(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CollectorError::NoImage => StatusCode::CONFLICT,
            CollectorError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            CollectorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            CollectorError::Upload(_) | CollectorError::MetadataWrite(_) => StatusCode::BAD_GATEWAY,
            CollectorError::Statistics(_) => StatusCode::SERVICE_UNAVAILABLE,
            CollectorError::ImageEncode(_) | CollectorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        if self.is_validation() {
            debug!(error = %self, code = self.code(), "Request rejected");
        } else {
            error!(error = %self, code = self.code(), "Request failed");
        }

        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// New session response
#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

/// State of one acquisition source
#[derive(Debug, Serialize)]
pub struct SlotView {
    pub source: ImageSource,
    pub has_image: bool,
    pub size_bytes: Option<usize>,
    pub rotation: Rotation,
}

/// State of the whole form
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub active_source: Option<ImageSource>,
    pub camera: SlotView,
    pub file: SlotView,
}

/// Rotation control request
#[derive(Debug, Deserialize)]
pub struct RotateBody {
    pub action: RotationRequest,
}

/// Successful submission response
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub message: String,
    pub record: SubmissionRecord,
}

/// Dataset statistics
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// `None` when the count could not be fetched
    pub total_images: Option<i64>,
}

fn slot_view(session: &CollectionSession, source: ImageSource) -> SlotView {
    let slot = session.slot(source);
    SlotView {
        source,
        has_image: slot.has_image(),
        size_bytes: slot.size_bytes(),
        rotation: slot.rotation(),
    }
}

fn session_view(session_id: Uuid, session: &CollectionSession) -> SessionView {
    SessionView {
        session_id,
        active_source: session.active_source(),
        camera: slot_view(session, ImageSource::Camera),
        file: slot_view(session, ImageSource::FilePicker),
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/sessions", post(create_session))
        .route(
            "/api/v1/sessions/:session_id",
            get(get_session).delete(delete_session),
        )
        .route(
            "/api/v1/sessions/:session_id/sources/:source/image",
            put(upload_image).delete(clear_image),
        )
        .route(
            "/api/v1/sessions/:session_id/sources/:source/rotate",
            post(rotate_image),
        )
        .route(
            "/api/v1/sessions/:session_id/sources/:source/preview",
            get(preview_image),
        )
        .route("/api/v1/sessions/:session_id/submit", post(submit))
        .route("/api/v1/stats", get(stats))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "apple-collector"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.submissions.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create();
    info!(session_id = %session_id, "Collection session opened");
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let view = state
        .sessions
        .with_session(session_id, |session| session_view(session_id, session))?;
    Ok(Json(view))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sessions.remove(session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept raw image bytes from the camera or file picker
#[instrument(skip(state, body), fields(size_bytes = body.len()))]
async fn upload_image(
    State(state): State<AppState>,
    Path((session_id, source)): Path<(Uuid, ImageSource)>,
    body: Bytes,
) -> Result<Json<SlotView>> {
    let view = state.sessions.with_session(session_id, |session| {
        session.slot_mut(source).load(body.to_vec())?;
        Ok::<_, CollectorError>(slot_view(session, source))
    })??;

    metrics::counter!("collector.images.acquired").increment(1);
    Ok(Json(view))
}

async fn clear_image(
    State(state): State<AppState>,
    Path((session_id, source)): Path<(Uuid, ImageSource)>,
) -> Result<Json<SlotView>> {
    let view = state.sessions.with_session(session_id, |session| {
        session.slot_mut(source).clear();
        slot_view(session, source)
    })?;
    Ok(Json(view))
}

#[instrument(skip(state))]
async fn rotate_image(
    State(state): State<AppState>,
    Path((session_id, source)): Path<(Uuid, ImageSource)>,
    Json(body): Json<RotateBody>,
) -> Result<Json<SlotView>> {
    let view = state.sessions.with_session(session_id, |session| {
        session.slot_mut(source).rotate(body.action);
        slot_view(session, source)
    })?;

    debug!(degrees = view.rotation.degrees(), "Rotation updated");
    Ok(Json(view))
}

/// Current image of a source with its rotation applied
async fn preview_image(
    State(state): State<AppState>,
    Path((session_id, source)): Path<(Uuid, ImageSource)>,
) -> Result<Response> {
    let snapshot = state
        .sessions
        .with_session(session_id, |session| session.snapshot(source))??;
    let image = render(state.jpeg_quality, snapshot).await?;

    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes).into_response())
}

/// Validate, upload and index the active image
#[instrument(skip(state, request))]
async fn submit(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>)> {
    // Reject a missing label before touching the image or any backend
    request.validate()?;

    let snapshot = state
        .sessions
        .with_session(session_id, |session| session.active_snapshot())??;
    let image = render(state.jpeg_quality, snapshot).await?;
    let record = state.submissions.submit(image, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            message: SUBMIT_SUCCESS_MESSAGE.to_string(),
            record,
        }),
    ))
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        total_images: state.submissions.total_submissions().await,
    })
}

/// Decode/rotate/encode on the blocking pool
async fn render(jpeg_quality: u8, snapshot: SlotSnapshot) -> Result<FinalImage> {
    tokio::task::spawn_blocking(move || snapshot.render(jpeg_quality))
        .await
        .map_err(|e| CollectorError::Internal(e.to_string()))?
}

/// Start the collection API server, returning when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting collection API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{InMemoryBlobStore, InMemoryDocumentStore};
    use crate::rotation::tests::make_test_png;
    use image::GenericImageView;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        state: AppState,
        blobs: Arc<InMemoryBlobStore>,
        docs: Arc<InMemoryDocumentStore>,
    }

    fn harness() -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let docs = Arc::new(InMemoryDocumentStore::new());
        let state = AppState {
            sessions: Arc::new(SessionRegistry::new(Duration::from_secs(60))),
            submissions: Arc::new(SubmissionHandler::new(
                blobs.clone(),
                docs.clone(),
                "apples",
            )),
            jpeg_quality: 90,
        };
        Harness { state, blobs, docs }
    }

    async fn open_session(h: &Harness) -> Uuid {
        let (status, Json(created)) = create_session(State(h.state.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        created.session_id
    }

    async fn upload(h: &Harness, id: Uuid, source: ImageSource, bytes: Vec<u8>) -> Result<SlotView> {
        upload_image(
            State(h.state.clone()),
            Path((id, source)),
            Bytes::from(bytes),
        )
        .await
        .map(|Json(view)| view)
    }

    async fn rotate(h: &Harness, id: Uuid, source: ImageSource, action: RotationRequest) -> SlotView {
        let Json(view) = rotate_image(
            State(h.state.clone()),
            Path((id, source)),
            Json(RotateBody { action }),
        )
        .await
        .unwrap();
        view
    }

    fn submission(variety: &str) -> Json<SubmissionRequest> {
        Json(SubmissionRequest {
            variety: variety.to_string(),
            location: None,
        })
    }

    #[tokio::test]
    async fn test_full_collection_flow() {
        let h = harness();
        let id = open_session(&h).await;

        let view = upload(&h, id, ImageSource::Camera, make_test_png()).await.unwrap();
        assert!(view.has_image);

        for _ in 0..3 {
            rotate(&h, id, ImageSource::Camera, RotationRequest::Left).await;
        }

        let (status, Json(response)) = submit(State(h.state.clone()), Path(id), submission("Fuji"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.message, SUBMIT_SUCCESS_MESSAGE);

        let object = h.blobs.resolve_url(&response.record.image_url).unwrap();
        assert_eq!(object.content_type, "image/jpeg");
        let uploaded = image::load_from_memory(&object.bytes).unwrap();
        assert_eq!(uploaded.dimensions(), (20, 40));
        assert_eq!(h.docs.records().len(), 1);

        let Json(stats) = stats(State(h.state.clone())).await;
        assert_eq!(stats.total_images, Some(1));
    }

    #[tokio::test]
    async fn test_submit_without_image() {
        let h = harness();
        let id = open_session(&h).await;

        let err = submit(State(h.state.clone()), Path(id), submission("Gala"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::NoImage));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_submit_blank_label_rejected_before_upload() {
        let h = harness();
        let id = open_session(&h).await;
        upload(&h, id, ImageSource::FilePicker, make_test_png()).await.unwrap();

        let err = submit(State(h.state.clone()), Path(id), submission("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::EmptyVariety));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(h.blobs.is_empty());
        assert!(h.docs.records().is_empty());
    }

    #[tokio::test]
    async fn test_file_picker_image_is_submitted() {
        let h = harness();
        let id = open_session(&h).await;

        let camera_png = make_test_png();
        let file_png = {
            let img = image::RgbImage::from_pixel(6, 6, image::Rgb([0, 255, 0]));
            let mut out = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut out, image::ImageFormat::Png)
                .unwrap();
            out.into_inner()
        };

        upload(&h, id, ImageSource::Camera, camera_png).await.unwrap();
        upload(&h, id, ImageSource::FilePicker, file_png.clone()).await.unwrap();

        let Json(view) = get_session(State(h.state.clone()), Path(id)).await.unwrap();
        assert_eq!(view.active_source, Some(ImageSource::FilePicker));

        let (_, Json(response)) = submit(State(h.state.clone()), Path(id), submission("Shimla"))
            .await
            .unwrap();
        let object = h.blobs.resolve_url(&response.record.image_url).unwrap();
        assert_eq!(object.bytes, file_png);
    }

    #[tokio::test]
    async fn test_unsupported_upload() {
        let h = harness();
        let id = open_session(&h).await;

        let err = upload(&h, id, ImageSource::FilePicker, b"GIF89a....".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_preview_reflects_rotation() {
        let h = harness();
        let id = open_session(&h).await;
        let png = make_test_png();
        upload(&h, id, ImageSource::Camera, png.clone()).await.unwrap();

        let response = preview_image(State(h.state.clone()), Path((id, ImageSource::Camera)))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let view = rotate(&h, id, ImageSource::Camera, RotationRequest::Flip).await;
        assert_eq!(view.rotation.degrees(), 180);
        let response = preview_image(State(h.state.clone()), Path((id, ImageSource::Camera)))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let view = rotate(&h, id, ImageSource::Camera, RotationRequest::Reset).await;
        assert_eq!(view.rotation, Rotation::NONE);
    }

    #[tokio::test]
    async fn test_clear_and_delete_session() {
        let h = harness();
        let id = open_session(&h).await;
        upload(&h, id, ImageSource::Camera, make_test_png()).await.unwrap();

        let Json(view) = clear_image(State(h.state.clone()), Path((id, ImageSource::Camera)))
            .await
            .unwrap();
        assert!(!view.has_image);

        let status = delete_session(State(h.state.clone()), Path(id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = get_session(State(h.state.clone()), Path(id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    fn rejected_submissions(snapshotter: &Snapshotter) -> u64 {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) if key.key().name() == "collector.submissions.rejected" => {
                    Some(n)
                }
                _ => None,
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_blank_label_counted_as_rejected() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let h = harness();

        let err = metrics::with_local_recorder(&recorder, || {
            tokio_test::block_on(async {
                let id = open_session(&h).await;
                upload(&h, id, ImageSource::Camera, make_test_png()).await.unwrap();
                submit(State(h.state.clone()), Path(id), submission("   "))
                    .await
                    .unwrap_err()
            })
        });

        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rejected_submissions(&snapshotter), 1);
        assert!(h.blobs.is_empty());
    }

    fn upload_request(id: Uuid, bytes: Vec<u8>) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/sessions/{}/sources/file/image", id))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(axum::body::Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn test_router_rejects_oversized_upload() {
        let h = harness();
        let id = open_session(&h).await;
        let png = make_test_png();
        let config = ApiConfig {
            max_upload_bytes: png.len(),
            ..ApiConfig::default()
        };

        let mut oversized = png.clone();
        oversized.extend_from_slice(&[0u8; 64]);
        let response = create_router(h.state.clone(), &config)
            .oneshot(upload_request(id, oversized))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let Json(view) = get_session(State(h.state.clone()), Path(id)).await.unwrap();
        assert!(!view.file.has_image);

        // A body at the limit goes through
        let response = create_router(h.state.clone(), &config)
            .oneshot(upload_request(id, png))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let Json(view) = get_session(State(h.state.clone()), Path(id)).await.unwrap();
        assert!(view.file.has_image);
    }

    #[test]
    fn test_backend_errors_map_to_bad_gateway() {
        assert_eq!(
            CollectorError::Upload("x".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            CollectorError::MetadataWrite("x".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
