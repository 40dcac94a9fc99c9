use crate::config::ApiConfig;
use crate::gallery::{column_count, render_page, Gallery, DEFAULT_COLUMNS};
use crate::identity::{IdentityError, IdentityProvider, LoginScreen, SessionAdapter, SessionUser};
use crate::image_store::ImageStore;
use crate::metadata_store::{PhotoRecord, PhotoStore};
use crate::upload_pipeline::{UploadError, UploadPipeline, UploadRequest};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::{MemoryStore, Session, SessionManagerLayer};
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub photo_store: Arc<dyn PhotoStore>,
    pub image_store: Arc<dyn ImageStore>,
    pub sessions: SessionAdapter,
    /// Never held across an `.await`
    pub gallery: Arc<RwLock<Gallery>>,
}

impl AppState {
    pub fn new(
        pipeline: UploadPipeline,
        photo_store: Arc<dyn PhotoStore>,
        image_store: Arc<dyn ImageStore>,
        identity: Arc<dyn IdentityProvider>,
        gallery: Gallery,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            photo_store,
            image_store,
            sessions: SessionAdapter::new(identity),
            gallery: Arc::new(RwLock::new(gallery)),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Query parameters for the photo list
#[derive(Debug, Deserialize)]
pub struct PhotoListQuery {
    /// Only photos uploaded by this user
    pub owner_id: Option<String>,
}

/// Photo list response
#[derive(Debug, Serialize, Deserialize)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoRecord>,
    pub total_count: usize,
}

/// Query parameters for the masonry layout
#[derive(Debug, Deserialize)]
pub struct GalleryLayoutQuery {
    /// Viewport width in CSS pixels
    pub width: Option<u32>,
}

/// Photos arranged into masonry columns
#[derive(Debug, Serialize, Deserialize)]
pub struct GalleryLayoutResponse {
    pub column_count: usize,
    pub columns: Vec<Vec<PhotoRecord>>,
}

/// Identity provider redirect back to us
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, secure_cookies: bool) -> Router {
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

    // Lax so the session cookie survives the provider's top-level redirect back
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(secure_cookies)
        .with_same_site(SameSite::Lax);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/", get(gallery_page))
        .route("/login", get(login))
        .route("/signup", get(signup))
        .route("/callback", get(login_callback))
        .route("/logout", get(logout))
        .route("/api/v1/me", get(me))
        .route("/api/v1/photos", get(list_photos).post(upload_photo))
        .route("/api/v1/photos/:photo_id", get(get_photo))
        .route("/api/v1/gallery", get(gallery_layout))
        .route("/images/:photo_id", get(image_redirect))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gallery-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.photo_store.ping().await {
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

fn identity_error(e: IdentityError) -> ApiError {
    match e {
        IdentityError::StateMismatch => {
            warn!("Login callback with missing or mismatched state");
            api_error(
                StatusCode::BAD_REQUEST,
                "Login expired or was not started here. Please sign in again.",
                "INVALID_LOGIN_STATE",
            )
        }
        IdentityError::Transport(_) | IdentityError::Provider(..) | IdentityError::Decode(_) => {
            error!(error = %e, "Identity provider request failed");
            api_error(
                StatusCode::BAD_GATEWAY,
                "Sign-in failed. Please try again.",
                "IDENTITY_PROVIDER_ERROR",
            )
        }
        IdentityError::InvalidUrl(_) | IdentityError::Session(_) => {
            error!(error = %e, "Session error");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session error",
                "SESSION_ERROR",
            )
        }
    }
}

async fn current_user(state: &AppState, session: &Session) -> Result<Option<SessionUser>, ApiError> {
    state
        .sessions
        .current_user(session)
        .await
        .map_err(identity_error)
}

async fn require_user(state: &AppState, session: &Session) -> Result<SessionUser, ApiError> {
    current_user(state, session).await?.ok_or_else(|| {
        api_error(
            StatusCode::UNAUTHORIZED,
            "Please sign in to upload photos.",
            "UNAUTHENTICATED",
        )
    })
}

/// Gallery page for the current visitor
async fn gallery_page(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, ApiError> {
    let user = current_user(&state, &session).await?;
    let page = render_page(&state.gallery.read(), user.as_ref());
    Ok(Html(page))
}

async fn login(State(state): State<AppState>, session: Session) -> Result<Redirect, ApiError> {
    start_login(&state, &session, LoginScreen::Login).await
}

async fn signup(State(state): State<AppState>, session: Session) -> Result<Redirect, ApiError> {
    start_login(&state, &session, LoginScreen::Signup).await
}

async fn start_login(
    state: &AppState,
    session: &Session,
    screen: LoginScreen,
) -> Result<Redirect, ApiError> {
    let url = state
        .sessions
        .begin_login(session, screen)
        .await
        .map_err(identity_error)?;
    Ok(Redirect::to(&url))
}

/// Finish login and return to the gallery
#[instrument(skip_all)]
async fn login_callback(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    if let Some(error) = params.error {
        // user cancelled or the provider refused
        warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or_default(),
            "Identity provider returned an error"
        );
        return Ok(Redirect::to("/"));
    }

    let (Some(code), Some(login_state)) = (params.code, params.state) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Missing code or state",
            "INVALID_CALLBACK",
        ));
    };

    state
        .sessions
        .complete_login(&session, &code, &login_state)
        .await
        .map_err(identity_error)?;

    Ok(Redirect::to("/"))
}

async fn logout(State(state): State<AppState>, session: Session) -> Result<Redirect, ApiError> {
    let url = state.sessions.logout(&session).await.map_err(identity_error)?;
    Ok(Redirect::to(&url))
}

/// The signed-in user
async fn me(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<SessionUser>, ApiError> {
    let user = current_user(&state, &session).await?.ok_or_else(|| {
        api_error(StatusCode::UNAUTHORIZED, "Not signed in", "UNAUTHENTICATED")
    })?;
    Ok(Json(user))
}

/// List gallery photos, most recent first
async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<PhotoListQuery>,
) -> Json<PhotoListResponse> {
    let photos = {
        let gallery = state.gallery.read();
        match params.owner_id {
            Some(ref owner_id) => gallery.by_owner(owner_id),
            None => gallery.photos().to_vec(),
        }
    };

    Json(PhotoListResponse {
        total_count: photos.len(),
        photos,
    })
}

/// Get single photo metadata
#[instrument(skip(state))]
async fn get_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
) -> Result<Json<PhotoRecord>, ApiError> {
    find_photo(&state, photo_id).await.map(Json)
}

async fn find_photo(state: &AppState, photo_id: i64) -> Result<PhotoRecord, ApiError> {
    let photo = state.photo_store.get(photo_id).await.map_err(|e| {
        error!(error = %e, photo_id, "Failed to get photo");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to get photo",
            "QUERY_ERROR",
        )
    })?;

    photo.ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Photo not found", "NOT_FOUND"))
}

/// Masonry columns for a viewport width
async fn gallery_layout(
    State(state): State<AppState>,
    Query(params): Query<GalleryLayoutQuery>,
) -> Json<GalleryLayoutResponse> {
    let column_count = params.width.map(column_count).unwrap_or(DEFAULT_COLUMNS);

    let columns = state
        .gallery
        .read()
        .layout(column_count)
        .into_iter()
        .map(|column| column.into_iter().cloned().collect())
        .collect();

    Json(GalleryLayoutResponse {
        column_count,
        columns,
    })
}

/// Redirect to a short-lived object storage URL for the image
#[instrument(skip(state))]
async fn image_redirect(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
) -> Result<Redirect, ApiError> {
    let photo = find_photo(&state, photo_id).await?;

    let url = state
        .image_store
        .image_url(&photo.storage_key)
        .await
        .map_err(|e| {
            error!(error = %e, storage_key = %photo.storage_key, "Failed to generate presigned URL");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate image URL",
                "PRESIGN_ERROR",
            )
        })?;

    Ok(Redirect::temporary(&url))
}

fn upload_error(e: UploadError) -> ApiError {
    let status = match e {
        UploadError::InvalidFileType { .. } | UploadError::MissingField(_) => {
            StatusCode::BAD_REQUEST
        }
        UploadError::NotARealPhoto => StatusCode::UNPROCESSABLE_ENTITY,
        UploadError::ClassificationFailed(_) => StatusCode::BAD_GATEWAY,
        UploadError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.user_message(), e.code())
}

fn multipart_error(e: MultipartError) -> ApiError {
    warn!(error = %e, "Malformed upload");
    api_error(e.status(), e.body_text(), "INVALID_MULTIPART")
}

/// Accept a photo upload from the signed-in user
#[instrument(skip_all)]
async fn upload_photo(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PhotoRecord>), ApiError> {
    let user = require_user(&state, &session).await?;

    let mut file = None;
    let mut title = String::new();
    let mut description = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((bytes.to_vec(), content_type, file_name));
            }
            Some("title") => title = field.text().await.map_err(multipart_error)?,
            Some("description") => {
                description = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    let (bytes, content_type, original_filename) =
        file.ok_or_else(|| upload_error(UploadError::MissingField("file")))?;

    let request = UploadRequest {
        bytes,
        content_type,
        original_filename,
        title,
        description,
        owner_id: user.id,
    };

    let record = state.pipeline.run(&request).await.map_err(upload_error)?;

    state.gallery.write().prepend(record.clone());

    Ok((StatusCode::CREATED, Json(record)))
}

/// Start the API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    secure_cookies: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config, secure_cookies);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

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
    use crate::classifier::{ClassifierError, MockImageClassifier, NaturalPhotoClassifier, Prediction};
    use crate::identity::MockIdentityProvider;
    use crate::image_store::MockImageStore;
    use crate::metadata_store::{MockPhotoStore, NewPhoto, StorageError};
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
    use axum::http::{Request, Response};
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    const BOUNDARY: &str = "realist-test-boundary";

    #[derive(Default)]
    struct Mocks {
        classifier: MockImageClassifier,
        image_store: MockImageStore,
        photo_store: MockPhotoStore,
    }

    fn alice() -> SessionUser {
        SessionUser {
            id: "auth0|alice".to_string(),
            name: "Alice".to_string(),
            email: Some("alice@example.com".to_string()),
            picture: None,
        }
    }

    fn photo(id: i64, owner_id: &str) -> PhotoRecord {
        PhotoRecord {
            id,
            storage_key: format!("{owner_id}_1705314645000_Ab3dEf9h_{id}.jpg"),
            owner_id: owner_id.to_string(),
            title: format!("Photo {id}"),
            description: None,
            original_filename: format!("{id}.jpg"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap(),
        }
    }

    fn identity() -> MockIdentityProvider {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_authorize_url()
            .returning(|state, _, screen| {
                let hint = if screen == LoginScreen::Signup { "&screen_hint=signup" } else { "" };
                format!("https://idp.test/authorize?state={state}{hint}")
            });
        identity
            .expect_exchange_code()
            .returning(|_, _| Ok(alice()));
        identity
            .expect_logout_url()
            .returning(|| "https://idp.test/v2/logout".to_string());
        identity
    }

    fn app_with(mocks: Mocks, gallery: Gallery) -> (Router, Arc<RwLock<Gallery>>) {
        let photo_store: Arc<dyn PhotoStore> = Arc::new(mocks.photo_store);
        let image_store: Arc<dyn ImageStore> = Arc::new(mocks.image_store);
        let pipeline = UploadPipeline::new(
            NaturalPhotoClassifier::new(Arc::new(mocks.classifier)),
            image_store.clone(),
            photo_store.clone(),
        );

        let state = AppState::new(pipeline, photo_store, image_store, Arc::new(identity()), gallery);
        let gallery = state.gallery.clone();
        (create_router(state, &ApiConfig::default(), false), gallery)
    }

    fn app(mocks: Mocks) -> Router {
        app_with(mocks, Gallery::default()).0
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn session_cookie(response: &Response<Body>) -> String {
        let header = response.headers()[SET_COOKIE].to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    fn location(response: &Response<Body>) -> String {
        response.headers()[LOCATION].to_str().unwrap().to_string()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Walk the login redirect and callback, returning the signed-in cookie
    async fn sign_in(app: &Router) -> String {
        let response = app.clone().oneshot(get("/login", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = session_cookie(&response);
        let state = location(&response).split("state=").nth(1).unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/callback?code=code-1&state={state}"), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        session_cookie(&response)
    }

    fn upload(cookie: Option<&str>, content_type: &str, title: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"lake.jpg\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             jpeg-bytes\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             {title}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"description\"\r\n\r\n\
             Morning fog\r\n\
             --{BOUNDARY}--\r\n"
        );

        let mut builder = Request::post("/api/v1/photos")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn classifier_returning(label: &'static str, score: f32) -> MockImageClassifier {
        let mut classifier = MockImageClassifier::new();
        classifier.expect_classify().times(1).returning(move |_| {
            Ok(vec![Prediction {
                label: label.to_string(),
                score,
            }])
        });
        classifier
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app(Mocks::default()).oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_reports_store_outage() {
        let mut mocks = Mocks::default();
        mocks
            .photo_store
            .expect_ping()
            .returning(|| Err(StorageError::Database(sqlx::Error::PoolTimedOut)));

        let response = app(mocks).oneshot(get("/ready", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_signup_redirects_to_hosted_signup() {
        let response = app(Mocks::default()).oneshot(get("/signup", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).ends_with("&screen_hint=signup"));
    }

    #[tokio::test]
    async fn test_login_flow_establishes_session() {
        let app = app(Mocks::default());

        let response = app.clone().oneshot(get("/api/v1/me", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let cookie = sign_in(&app).await;
        let response = app.clone().oneshot(get("/api/v1/me", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json::<SessionUser>(response).await, alice());
    }

    #[tokio::test]
    async fn test_callback_with_forged_state() {
        let app = app(Mocks::default());
        let response = app.clone().oneshot(get("/login", None)).await.unwrap();
        let cookie = session_cookie(&response);

        let response = app
            .oneshot(get("/callback?code=code-1&state=forged", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = json(response).await;
        assert_eq!(body.code, "INVALID_LOGIN_STATE");
    }

    #[tokio::test]
    async fn test_logout_redirects_to_provider() {
        let app = app(Mocks::default());
        let cookie = sign_in(&app).await;

        let response = app.clone().oneshot(get("/logout", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "https://idp.test/v2/logout");

        let response = app.oneshot(get("/api/v1/me", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_requires_session() {
        let mut mocks = Mocks::default();
        mocks.classifier.expect_classify().times(0);

        let response = app(mocks)
            .oneshot(upload(None, "image/jpeg", "Lake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_success_prepends_to_gallery() {
        let mut mocks = Mocks {
            classifier: classifier_returning("landscape", 0.93),
            ..Mocks::default()
        };
        mocks
            .image_store
            .expect_put_image()
            .withf(|key, bytes, content_type| {
                key.starts_with("auth0|alice_")
                    && key.ends_with("_lake.jpg")
                    && bytes[..] == b"jpeg-bytes"[..]
                    && content_type == "image/jpeg"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks
            .photo_store
            .expect_create()
            .times(1)
            .returning(|new: NewPhoto| {
                Ok(PhotoRecord {
                    id: 3,
                    storage_key: new.storage_key,
                    owner_id: new.owner_id,
                    title: new.title,
                    description: new.description,
                    original_filename: new.original_filename,
                    created_at: Utc::now(),
                })
            });

        let (app, gallery) = app_with(mocks, Gallery::from_records(vec![photo(1, "bob")]));
        let cookie = sign_in(&app).await;

        let response = app
            .clone()
            .oneshot(upload(Some(&cookie), "image/jpeg", "Lake"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let record: PhotoRecord = json(response).await;
        assert_eq!(record.id, 3);
        assert_eq!(record.owner_id, "auth0|alice");
        assert_eq!(record.title, "Lake");
        assert_eq!(record.description.as_deref(), Some("Morning fog"));
        assert_eq!(record.original_filename, "lake.jpg");

        let ids: Vec<i64> = gallery.read().photos().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 1]);

        let response = app.oneshot(get("/", Some(&cookie))).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("src=\"/images/3\""));
        assert!(page.contains("Alice"));
    }

    #[tokio::test]
    async fn test_upload_error_status_mapping() {
        // non-image: rejected before classification
        let mut mocks = Mocks::default();
        mocks.classifier.expect_classify().times(0);
        let router = app(mocks);
        let cookie = sign_in(&router).await;
        let response = router
            .oneshot(upload(Some(&cookie), "application/pdf", "Lake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = json(response).await;
        assert_eq!(body.code, "INVALID_FILE_TYPE");
        assert_eq!(body.error, "Please select an image file.");

        // rejected by the classifier
        let mut mocks = Mocks {
            classifier: classifier_returning("comic book", 0.97),
            ..Mocks::default()
        };
        mocks.photo_store.expect_create().times(0);
        let router = app(mocks);
        let cookie = sign_in(&router).await;
        let response = router
            .oneshot(upload(Some(&cookie), "image/png", "Lake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // classifier unavailable
        let mut mocks = Mocks::default();
        mocks
            .classifier
            .expect_classify()
            .times(1)
            .returning(|_| Err(ClassifierError::Api(503, "loading".to_string())));
        let router = app(mocks);
        let cookie = sign_in(&router).await;
        let response = router
            .oneshot(upload(Some(&cookie), "image/png", "Lake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: ErrorResponse = json(response).await;
        assert_eq!(body.code, "CLASSIFICATION_FAILED");
    }

    #[tokio::test]
    async fn test_upload_without_title() {
        let mut mocks = Mocks::default();
        mocks.classifier.expect_classify().times(0);
        let app = app(mocks);
        let cookie = sign_in(&app).await;

        let response = app
            .oneshot(upload(Some(&cookie), "image/jpeg", "  "))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = json(response).await;
        assert_eq!(body.code, "MISSING_FIELD");
    }

    #[tokio::test]
    async fn test_list_photos_by_owner() {
        let gallery = Gallery::from_records(vec![photo(3, "alice"), photo(2, "bob"), photo(1, "alice")]);
        let (app, _) = app_with(Mocks::default(), gallery);

        let all: PhotoListResponse = json(app.clone().oneshot(get("/api/v1/photos", None)).await.unwrap()).await;
        assert_eq!(all.total_count, 3);

        let response = app.oneshot(get("/api/v1/photos?owner_id=alice", None)).await.unwrap();
        let alice: PhotoListResponse = json(response).await;
        let ids: Vec<i64> = alice.photos.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_gallery_layout_for_width() {
        let gallery = Gallery::from_records((1..=5).rev().map(|id| photo(id, "alice")).collect());
        let (app, _) = app_with(Mocks::default(), gallery);

        let response = app.oneshot(get("/api/v1/gallery?width=700", None)).await.unwrap();
        let layout: GalleryLayoutResponse = json(response).await;

        assert_eq!(layout.column_count, 2);
        let ids: Vec<Vec<i64>> = layout
            .columns
            .iter()
            .map(|column| column.iter().map(|p| p.id).collect())
            .collect();
        assert_eq!(ids, vec![vec![5, 3, 1], vec![4, 2]]);
    }

    #[tokio::test]
    async fn test_get_photo_not_found() {
        let mut mocks = Mocks::default();
        mocks.photo_store.expect_get().returning(|_| Ok(None));

        let response = app(mocks).oneshot(get("/api/v1/photos/42", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_image_redirects_to_presigned_url() {
        let mut mocks = Mocks::default();
        mocks
            .photo_store
            .expect_get()
            .withf(|id| *id == 1)
            .returning(|id| Ok(Some(photo(id, "alice"))));
        mocks
            .image_store
            .expect_image_url()
            .withf(|key| key == "alice_1705314645000_Ab3dEf9h_1.jpg")
            .returning(|key| Ok(format!("https://bucket.s3.test/photos/{key}?X-Amz-Signature=abc")));

        let response = app(mocks).oneshot(get("/images/1", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert!(location(&response).starts_with("https://bucket.s3.test/photos/alice_"));
    }
}
