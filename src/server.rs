//! JSON HTTP server for the public site and the admin panel.
//!
//! Public routes serve the catalog, the blog and the guestbook. Everything
//! under `/api/admin` sits behind the [`AdminGate`]: requests must carry
//! `Authorization: Bearer <token>` for a live session obtained from
//! `POST /api/auth/login`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/auth/login` | Exchange email and password for a session |
//! | `POST` | `/api/auth/logout` | End the presented session |
//! | `GET`  | `/api/auth/session` | The presented session, or 401 |
//! | `GET`  | `/api/manuscripts?page&q` | Catalog page, optionally searched |
//! | `GET`  | `/api/manuscripts/{id}` | One manuscript |
//! | `GET`  | `/api/blog?page` | Posts with approved comments |
//! | `GET`  | `/api/blog/{id}` | One post with approved comments |
//! | `POST` | `/api/blog/{id}/comments` | Submit a comment for moderation |
//! | `GET`  | `/api/guestbook?page` | Approved guestbook entries |
//! | `POST` | `/api/guestbook` | Sign the guestbook (pending until approved) |
//! | `GET`  | `/api/admin/stats` | Dashboard counts |
//! | `POST` | `/api/admin/manuscripts` | Create a manuscript |
//! | `PUT`/`DELETE` | `/api/admin/manuscripts/{id}` | Replace or delete a manuscript |
//! | `POST` | `/api/admin/manuscripts/import` | Bulk import from a raw xlsx body (`Content-Type` xlsx, octet-stream or none) |
//! | `GET`/`POST` | `/api/admin/blog` | Posts with comment counts / create a post |
//! | `GET`/`PUT`/`DELETE` | `/api/admin/blog/{id}` | Post with all comments / replace / delete |
//! | `GET`  | `/api/admin/blog/{id}/comments?status` | A post's comments by moderation state |
//! | `POST` | `/api/admin/comments/{id}/approve` | Approve a comment |
//! | `DELETE` | `/api/admin/comments/{id}` | Delete a comment |
//! | `GET`  | `/api/admin/guestbook?page&status` | Guestbook entries by moderation state |
//! | `POST` | `/api/admin/guestbook/{id}/approve` | Approve an entry |
//! | `DELETE` | `/api/admin/guestbook/{id}` | Reject (delete) an entry |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid judul: must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401, with `login_url`),
//! `not_found` (404), `unsupported_media_type` (415), `backend_error` (502),
//! `internal` (500). Malformed bodies, query strings and path segments are
//! all `bad_request`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front end
//! can be served from anywhere.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, Query, Request, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use scriptorium_core::blog::{CascadeReport, PostSummary};
use scriptorium_core::import::{import_sheet, ImportError, RowOutcome};
use scriptorium_core::models::{
    BlogPost, BlogPostFields, Comment, GuestBookEntry, Manuscript, ManuscriptFields, NewComment,
    NewGuestBookEntry,
};
use scriptorium_core::moderation::ModerationFilter;
use scriptorium_core::pagination::Page;
use scriptorium_core::session::{
    AdminGate, AuthEvent, GateDecision, Session, SessionContext, Subscription,
};
use scriptorium_core::{DashboardStats, Library};

use crate::auth::{AuthError, AuthService};
use crate::backend::open_backend;
use crate::config::Config;
use crate::xlsx::{self, XlsxError, MIME_XLSX};

/// Where the admin front end shows its login form.
pub const LOGIN_PATH: &str = "/login";

/// Largest accepted xlsx upload.
const MAX_IMPORT_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    library: Library,
    auth: AuthService,
    gate: AdminGate,
    /// Audit listener on the session context, alive as long as the server.
    _audit: Arc<Subscription>,
}

impl AppState {
    pub fn new(library: Library, auth: AuthService) -> Self {
        let audit = auth.sessions().subscribe(|event| match event {
            AuthEvent::SignedIn { email } => info!(target: "audit", %email, "admin signed in"),
            AuthEvent::SignedOut { email, reason } => {
                info!(target: "audit", %email, ?reason, "admin signed out")
            }
        });
        let gate = AdminGate::new(auth.sessions().clone(), LOGIN_PATH);
        Self {
            library,
            auth,
            gate,
            _audit: Arc::new(audit),
        }
    }

    /// Builds the backend, session context and authenticator named in `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend = open_backend(config).await?;
        let library = Library::new(backend, config.pagination.page_sizes());
        let sessions = SessionContext::new(chrono::Duration::hours(config.auth.session_ttl_hours));
        let auth = AuthService::from_config(config, sessions)?;
        Ok(Self::new(library, auth))
    }
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind` and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Scriptorium listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

/// All routes over `state`, with the admin gate and CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/stats", get(handle_stats))
        .route("/manuscripts", post(handle_create_manuscript))
        .route(
            "/manuscripts/import",
            post(handle_import).layer(DefaultBodyLimit::max(MAX_IMPORT_BYTES)),
        )
        .route(
            "/manuscripts/{id}",
            axum::routing::put(handle_update_manuscript).delete(handle_delete_manuscript),
        )
        .route("/blog", get(handle_admin_posts).post(handle_create_post))
        .route(
            "/blog/{id}",
            get(handle_admin_post)
                .put(handle_update_post)
                .delete(handle_delete_post),
        )
        .route("/blog/{id}/comments", get(handle_post_comments))
        .route("/comments/{id}/approve", post(handle_approve_comment))
        .route("/comments/{id}", axum::routing::delete(handle_delete_comment))
        .route("/guestbook", get(handle_admin_guestbook))
        .route("/guestbook/{id}/approve", post(handle_approve_entry))
        .route("/guestbook/{id}", axum::routing::delete(handle_reject_entry))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/logout", post(handle_logout))
        .route("/api/auth/session", get(handle_session))
        .route("/api/manuscripts", get(handle_list_manuscripts))
        .route("/api/manuscripts/{id}", get(handle_get_manuscript))
        .route("/api/blog", get(handle_list_posts))
        .route("/api/blog/{id}", get(handle_get_post))
        .route("/api/blog/{id}/comments", post(handle_add_comment))
        .route("/api/guestbook", get(handle_list_guestbook).post(handle_sign_guestbook))
        .nest("/api/admin", admin)
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_url: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    login_url: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            login_url: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                login_url: self.login_url,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>, login_url: &str) -> AppError {
    AppError {
        login_url: Some(login_url.to_string()),
        ..AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<scriptorium_core::Error> for AppError {
    fn from(err: scriptorium_core::Error) -> Self {
        use scriptorium_core::Error;
        match &err {
            Error::NotFound { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            Error::Validation { .. } => bad_request(err.to_string()),
            Error::Backend(_) => {
                warn!(error = %err, "backend request failed");
                AppError::new(StatusCode::BAD_GATEWAY, "backend_error", err.to_string())
            }
            Error::Decode { .. } | Error::Draft(_) => {
                error!(error = %err, "internal error");
                internal(err.to_string())
            }
        }
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        bad_request(err.to_string())
    }
}

impl From<XlsxError> for AppError {
    fn from(err: XlsxError) -> Self {
        bad_request(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => unauthorized(err.to_string(), LOGIN_PATH),
            AuthError::Provider(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "backend_error", err.to_string())
            }
            AuthError::Hash(_) => internal(err.to_string()),
        }
    }
}

/// Unwraps a JSON body, reporting malformed payloads in the error contract.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ============ Admin gate ============

/// Lets a request through only with a live admin session, which handlers
/// can then read as `Extension<Session>`.
async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match state.gate.check(bearer_token(request.headers())) {
        GateDecision::Allow(session) => {
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        GateDecision::RedirectToLogin { login_path } => {
            Err(unauthorized("admin session required", &login_path))
        }
    }
}

// ============ Extractors ============

/// `?page=&q=&status=` with malformed values reported in the error contract.
struct Params(ListParams);

impl<S: Send + Sync> FromRequestParts<S> for Params {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<ListParams>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        Ok(Self(params))
    }
}

/// The `{id}` path segment, with rejections in the error contract.
struct Id(String);

impl<S: Send + Sync> FromRequestParts<S> for Id {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        Ok(Self(id))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    page: Option<u32>,
    q: Option<String>,
    status: Option<String>,
}

impl ListParams {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    fn filter(&self) -> Result<ModerationFilter, AppError> {
        ModerationFilter::from_str(self.status.as_deref().unwrap_or("")).map_err(bad_request)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Auth ============

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn handle_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Session>, AppError> {
    let login = body(payload)?;
    if login.email.trim().is_empty() || login.password.is_empty() {
        return Err(bad_request("email and password are required"));
    }
    Ok(Json(state.auth.sign_in(&login.email, &login.password).await?))
}

async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.auth.sign_out(token).await;
    }
    StatusCode::NO_CONTENT
}

async fn handle_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Session>, AppError> {
    match state.gate.check(bearer_token(&headers)) {
        GateDecision::Allow(session) => Ok(Json(session)),
        GateDecision::RedirectToLogin { login_path } => {
            Err(unauthorized("not signed in", &login_path))
        }
    }
}

// ============ Public catalog ============

async fn handle_list_manuscripts(
    State(state): State<AppState>,
    Params(params): Params,
) -> Result<Json<Page<Manuscript>>, AppError> {
    let page = state
        .library
        .catalog
        .list(params.page(), params.q.as_deref())
        .await?;
    Ok(Json(page))
}

async fn handle_get_manuscript(
    State(state): State<AppState>,
    Id(id): Id,
) -> Result<Json<Manuscript>, AppError> {
    Ok(Json(state.library.catalog.get(&id).await?))
}

// ============ Public blog ============

async fn handle_list_posts(
    State(state): State<AppState>,
    Params(params): Params,
) -> Result<Json<Page<BlogPost>>, AppError> {
    Ok(Json(state.library.blog.list_posts(params.page()).await?))
}

async fn handle_get_post(
    State(state): State<AppState>,
    Id(id): Id,
) -> Result<Json<BlogPost>, AppError> {
    Ok(Json(state.library.blog.get_post(&id).await?))
}

async fn handle_add_comment(
    State(state): State<AppState>,
    Id(post_id): Id,
    payload: Result<Json<NewComment>, JsonRejection>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let comment = body(payload)?;
    let saved = state.library.blog.add_comment(&post_id, &comment).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

// ============ Public guestbook ============

async fn handle_list_guestbook(
    State(state): State<AppState>,
    Params(params): Params,
) -> Result<Json<Page<GuestBookEntry>>, AppError> {
    Ok(Json(state.library.guestbook.list_public(params.page()).await?))
}

async fn handle_sign_guestbook(
    State(state): State<AppState>,
    payload: Result<Json<NewGuestBookEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<GuestBookEntry>), AppError> {
    let entry = body(payload)?;
    let saved = state.library.guestbook.sign(&entry).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

// ============ Admin: dashboard and manuscripts ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(state.library.dashboard().await?))
}

async fn handle_create_manuscript(
    State(state): State<AppState>,
    payload: Result<Json<ManuscriptFields>, JsonRejection>,
) -> Result<(StatusCode, Json<Manuscript>), AppError> {
    let fields = body(payload)?;
    let saved = state.library.catalog.create(&fields).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn handle_update_manuscript(
    State(state): State<AppState>,
    Id(id): Id,
    payload: Result<Json<ManuscriptFields>, JsonRejection>,
) -> Result<Json<Manuscript>, AppError> {
    let fields = body(payload)?;
    Ok(Json(state.library.catalog.update(&id, &fields).await?))
}

async fn handle_delete_manuscript(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    state.library.catalog.delete(&id).await?;
    info!(target: "audit", admin = %session.email, %id, "manuscript deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ImportResponse {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    rows: Vec<RowOutcome>,
}

async fn handle_import(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<ImportResponse>, AppError> {
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let mime = content_type.to_str().unwrap_or_default();
        let mime = mime.split(';').next().unwrap_or_default().trim();
        if mime != MIME_XLSX && mime != "application/octet-stream" {
            return Err(AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                format!("expected {MIME_XLSX}, got {mime}"),
            ));
        }
    }
    if bytes.is_empty() {
        return Err(bad_request("request body must be an xlsx workbook"));
    }
    let sheet = tokio::task::spawn_blocking(move || xlsx::read_sheet(&bytes))
        .await
        .map_err(|e| internal(e.to_string()))??;
    let report = import_sheet(&state.library.catalog, &sheet).await?;
    info!(
        target: "audit",
        admin = %session.email,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "bulk import"
    );
    Ok(Json(ImportResponse {
        succeeded: report.succeeded(),
        failed: report.failed(),
        skipped: report.skipped(),
        rows: report.rows,
    }))
}

// ============ Admin: blog ============

async fn handle_admin_posts(
    State(state): State<AppState>,
    Params(params): Params,
) -> Result<Json<Page<PostSummary>>, AppError> {
    Ok(Json(
        state.library.blog.list_posts_with_counts(params.page()).await?,
    ))
}

async fn handle_create_post(
    State(state): State<AppState>,
    payload: Result<Json<BlogPostFields>, JsonRejection>,
) -> Result<(StatusCode, Json<BlogPost>), AppError> {
    let fields = body(payload)?;
    let saved = state.library.blog.create_post(&fields).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn handle_admin_post(
    State(state): State<AppState>,
    Id(id): Id,
) -> Result<Json<BlogPost>, AppError> {
    Ok(Json(state.library.blog.get_post_for_admin(&id).await?))
}

async fn handle_update_post(
    State(state): State<AppState>,
    Id(id): Id,
    payload: Result<Json<BlogPostFields>, JsonRejection>,
) -> Result<Json<BlogPost>, AppError> {
    let fields = body(payload)?;
    Ok(Json(state.library.blog.update_post(&id, &fields).await?))
}

async fn handle_delete_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<Json<CascadeReport>, AppError> {
    let report = state.library.blog.delete_post(&id).await?;
    info!(
        target: "audit",
        admin = %session.email,
        %id,
        comments = report.comments_deleted,
        complete = report.is_complete(),
        "blog post deleted"
    );
    Ok(Json(report))
}

async fn handle_post_comments(
    State(state): State<AppState>,
    Id(id): Id,
    Params(params): Params,
) -> Result<Json<Vec<Comment>>, AppError> {
    let filter = params.filter()?;
    Ok(Json(state.library.blog.comments_for_post(&id, filter).await?))
}

async fn handle_approve_comment(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<Json<Comment>, AppError> {
    let comment = state.library.blog.approve_comment(&id).await?;
    info!(target: "audit", admin = %session.email, %id, "comment approved");
    Ok(Json(comment))
}

async fn handle_delete_comment(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    state.library.blog.delete_comment(&id).await?;
    info!(target: "audit", admin = %session.email, %id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============ Admin: guestbook ============

async fn handle_admin_guestbook(
    State(state): State<AppState>,
    Params(params): Params,
) -> Result<Json<Page<GuestBookEntry>>, AppError> {
    let filter = params.filter()?;
    Ok(Json(state.library.guestbook.list(params.page(), filter).await?))
}

async fn handle_approve_entry(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<Json<GuestBookEntry>, AppError> {
    let entry = state.library.guestbook.approve(&id).await?;
    info!(target: "audit", admin = %session.email, %id, "guestbook entry approved");
    Ok(Json(entry))
}

async fn handle_reject_entry(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    state.library.guestbook.reject(&id).await?;
    info!(target: "audit", admin = %session.email, %id, "guestbook entry rejected");
    Ok(StatusCode::NO_CONTENT)
}
