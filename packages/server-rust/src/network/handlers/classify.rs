//! Classification endpoints.
//!
//! - `POST /api/v1/classify` waits for the worker's reply.
//! - `POST /api/v1/classify/async` returns 202 with the correlation token.
//! - `GET /api/v1/classify/{token}` waits on a call started elsewhere.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sitelens_core::site::{site_root, subject_kind, trim_trailing_slash};
use sitelens_core::{ClassificationResponse, SubjectKind};
use tokio::time::Instant;
use tracing::debug;

use super::{ApiError, AppState};
use crate::rpc::RpcError;

/// Body of both classify endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyBody {
    /// Row id of the website or page being classified.
    pub id: u64,
    pub url: String,
    /// Inferred from the URL when omitted: a bare origin is a website,
    /// anything with a path is a page.
    #[serde(default)]
    pub kind: Option<SubjectKind>,
}

/// 202 body of the async endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accepted {
    pub token: String,
    pub kind: SubjectKind,
    pub id: u64,
    /// Time left before the call fails with a timeout.
    pub expires_in_ms: u64,
}

/// Resolves the subject kind and normalizes the URL for it.
///
/// Websites are classified by their site root; pages keep their path minus
/// a trailing slash.
fn prepare(body: ClassifyBody) -> Result<(SubjectKind, u64, String), ApiError> {
    let kind = match body.kind {
        Some(kind) => kind,
        None => subject_kind(&body.url)
            .map_err(|e| ApiError::bad_request(format!("invalid url {:?}: {e}", body.url)))?,
    };
    let url = match kind {
        SubjectKind::Website => site_root(&body.url)
            .map_err(|e| ApiError::bad_request(format!("invalid url {:?}: {e}", body.url)))?,
        SubjectKind::Page => trim_trailing_slash(&body.url).to_string(),
    };
    Ok((kind, body.id, url))
}

fn ensure_accepting(state: &AppState) -> Result<(), ApiError> {
    if state.shutdown.is_accepting() {
        Ok(())
    } else {
        Err(RpcError::Shutdown.into())
    }
}

/// Classifies and waits for the result.
///
/// # Errors
///
/// 400 for an unparseable URL, otherwise the mapped [`RpcError`] status.
pub async fn classify_handler(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> Result<Json<ClassificationResponse>, ApiError> {
    ensure_accepting(&state)?;
    let _guard = state.shutdown.in_flight_guard();

    let (kind, id, url) = prepare(body)?;
    debug!(%kind, id, %url, "classify request");
    let response = state
        .service
        .request_classification(kind, id, url)
        .await?;
    Ok(Json(ClassificationResponse::clone(&response)))
}

/// Starts a classification and returns its token immediately.
///
/// # Errors
///
/// Same as [`classify_handler`] minus timeouts.
pub async fn classify_async_handler(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    ensure_accepting(&state)?;

    let (kind, id, url) = prepare(body)?;
    let pending = state
        .service
        .request_classification_detached(kind, id, url)
        .await?;
    let expires_in = pending.deadline.saturating_duration_since(Instant::now());
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            token: pending.token.to_string(),
            kind,
            id,
            expires_in_ms: u64::try_from(expires_in.as_millis()).unwrap_or(u64::MAX),
        }),
    ))
}

/// Waits for the outcome of an in-flight call by token.
///
/// # Errors
///
/// 404 if the token is unknown or already settled, otherwise the mapped
/// [`RpcError`] status.
pub async fn observe_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let handle = state
        .service
        .observe(&token)
        .ok_or_else(|| ApiError::not_found(format!("no call in flight for token {token}")))?;

    let _guard = state.shutdown.in_flight_guard();
    let response = handle.wait().await?;
    Ok(Json(ClassificationResponse::clone(&response)))
}
