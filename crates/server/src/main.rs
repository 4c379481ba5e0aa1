use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{AckResponse, ConvertResponse, DetectColumnsResponse, VerifyPaymentResponse},
};
use storage::{FileStore, SessionRegistry};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

mod config;

use config::load_settings;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: SessionId,
}

#[derive(Debug, Deserialize)]
struct OptionalSessionQuery {
    #[serde(default)]
    session: Option<SessionId>,
}

#[derive(Debug, Deserialize)]
struct PaymentQuery {
    #[serde(default)]
    payment_success: Option<String>,
    #[serde(default)]
    session: Option<SessionId>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let store = FileStore::new(&settings.upload_dir, &settings.download_dir)?;

    let report = store
        .sweep_stale(Duration::from_secs(settings.file_max_age_secs))
        .await?;
    if report.deleted > 0 {
        info!(
            deleted = report.deleted,
            bytes = report.bytes,
            "removed stale files left over from a previous run"
        );
    }

    let api = ApiContext {
        store,
        sessions: SessionRegistry::new(),
    };
    let state = AppState { api };
    let app = build_router(Arc::new(state), settings.max_upload_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/detect_columns", post(http_detect_columns))
        .route("/upload", post(http_upload))
        .route("/download/:artifact", get(http_download))
        .route("/download_zip", get(http_download_zip))
        .route("/reset_session", get(http_reset_session))
        .route("/mark_payment_complete", get(http_mark_payment_complete))
        .route("/verify_payment", get(http_verify_payment))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

struct UploadParts {
    file: Option<(String, Vec<u8>)>,
    mapping_json: Option<String>,
}

async fn read_upload_parts(mut multipart: Multipart) -> Result<UploadParts, ApiError> {
    let mut parts = UploadParts {
        file: None,
        mapping_json: None,
    };
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::validation(format!("Invalid upload request: {err}")))?;
        let Some(field) = field else { break };
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::validation(format!("Invalid upload request: {err}")))?;
                parts.file = Some((filename, bytes.to_vec()));
            }
            Some("column_mapping") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::validation(format!("Invalid upload request: {err}")))?;
                parts.mapping_json = Some(text);
            }
            _ => {}
        }
    }
    Ok(parts)
}

async fn http_detect_columns(multipart: Multipart) -> Json<DetectColumnsResponse> {
    let parts = match read_upload_parts(multipart).await {
        Ok(parts) => parts,
        Err(err) => return Json(DetectColumnsResponse::failure(err.message)),
    };
    let (filename, bytes) = match &parts.file {
        Some((filename, bytes)) => (Some(filename.as_str()), bytes.as_slice()),
        None => (None, &[][..]),
    };
    match server_api::detect_columns(filename, bytes) {
        Ok(columns) => Json(DetectColumnsResponse::ok(columns)),
        Err(err) => Json(DetectColumnsResponse::failure(err.message)),
    }
}

async fn http_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Json<ConvertResponse> {
    let parts = match read_upload_parts(multipart).await {
        Ok(parts) => parts,
        Err(err) => return Json(ConvertResponse::failure(err.message, err.details)),
    };
    let (filename, bytes) = match &parts.file {
        Some((filename, bytes)) => (Some(filename.as_str()), bytes.as_slice()),
        None => (None, &[][..]),
    };

    match server_api::convert_upload(&state.api, filename, bytes, parts.mapping_json.as_deref())
        .await
    {
        Ok(outcome) => Json(ConvertResponse {
            success: true,
            session_id: Some(outcome.session_id),
            logs: outcome.logs,
            preview: outcome.preview,
            preview_note: outcome.preview_note,
            total_rows: Some(outcome.total_rows),
            files: outcome.files,
            error: None,
            details: None,
        }),
        Err(err) => {
            warn!(message = %err.message, "conversion rejected");
            Json(ConvertResponse::failure(err.message, err.details))
        }
    }
}

async fn http_download(
    State(state): State<Arc<AppState>>,
    Path(artifact): Path<String>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let download = server_api::load_artifact(&state.api, q.session, &artifact)
        .await
        .map_err(error_response)?;
    Ok(attachment_response(download))
}

async fn http_download_zip(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let download = server_api::zip_session(&state.api, q.session)
        .await
        .map_err(error_response)?;
    Ok(attachment_response(download))
}

async fn http_reset_session(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OptionalSessionQuery>,
) -> Result<Json<AckResponse>, (StatusCode, Json<ApiError>)> {
    if let Some(session) = q.session {
        server_api::reset_session(&state.api, session)
            .await
            .map_err(error_response)?;
    }
    Ok(Json(AckResponse::ok()))
}

async fn http_mark_payment_complete(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PaymentQuery>,
) -> Result<Json<AckResponse>, (StatusCode, Json<ApiError>)> {
    let session = q.session.ok_or_else(|| {
        error_response(ApiError::validation("Missing session parameter"))
    })?;
    server_api::mark_payment_complete(&state.api, session, q.payment_success.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(AckResponse::ok()))
}

async fn http_verify_payment(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OptionalSessionQuery>,
) -> Json<VerifyPaymentResponse> {
    Json(server_api::verify_payment(&state.api, q.session).await)
}

fn attachment_response(download: server_api::ArtifactDownload) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(download.content_type),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (StatusCode::OK, headers, download.bytes)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}
