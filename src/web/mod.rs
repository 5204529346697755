//! HTTP controller surface over the ledger and the job store.
//!
//! Authentication happens upstream; the authenticated user id arrives in the
//! `X-User-Id` header. Every response uses the `{success, message, data}`
//! envelope.

pub mod handlers;

use crate::core::{LedgerError, UserId};
use crate::ledger::QuotaLedger;
use crate::task::TaskStore;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::StatusCode;
use http::request::Parts;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<QuotaLedger>,
    pub tasks: Arc<dyn TaskStore>,
}

impl AppState {
    pub fn new(ledger: Arc<QuotaLedger>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { ledger, tasks }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/plan", get(handlers::list_plans))
        .route("/api/plan/self/orders", get(handlers::list_self_orders))
        .route(
            "/api/plan/purchase",
            post(handlers::purchase_plan).get(handlers::purchase_hint),
        )
        .route(
            "/api/plan/admin",
            get(handlers::admin_list_plans)
                .post(handlers::admin_create_plan)
                .put(handlers::admin_update_plan),
        )
        .route("/api/plan/admin/:id", delete(handlers::admin_delete_plan))
        .route("/api/task", get(handlers::list_tasks))
        .route("/api/task/self", get(handlers::list_self_tasks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Some(data),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum WebError {
    Ledger(LedgerError),
    Unauthorized(String),
    MethodNotAllowed(String),
}

impl From<LedgerError> for WebError {
    fn from(err: LedgerError) -> Self {
        WebError::Ledger(err)
    }
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Ledger(LedgerError::Validation(_)) => StatusCode::BAD_REQUEST,
            WebError::Ledger(LedgerError::NotFound(_)) => StatusCode::NOT_FOUND,
            WebError::Ledger(LedgerError::State(_)) => StatusCode::CONFLICT,
            WebError::Ledger(LedgerError::InsufficientBalance(_)) => StatusCode::PAYMENT_REQUIRED,
            WebError::Ledger(LedgerError::Transport(_) | LedgerError::Decode(_)) => {
                StatusCode::BAD_GATEWAY
            }
            WebError::Ledger(LedgerError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            WebError::Ledger(err) => err.to_string(),
            WebError::Unauthorized(msg) | WebError::MethodNotAllowed(msg) => msg,
        };
        let body = Json(ApiResponse::<()> {
            success: false,
            message,
            data: None,
        });
        (status, body).into_response()
    }
}

pub type WebResult<T> = std::result::Result<Json<ApiResponse<T>>, WebError>;

// ============================================================================
// Current user
// ============================================================================

/// User id set by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| WebError::Unauthorized("missing X-User-Id header".to_string()))?;
        raw.trim()
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .map(CurrentUser)
            .ok_or_else(|| WebError::Unauthorized(format!("invalid user id: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_status_codes() {
        let cases = [
            (LedgerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LedgerError::State("x".into()), StatusCode::CONFLICT),
            (
                LedgerError::InsufficientBalance("x".into()),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (LedgerError::Decode("x".into()), StatusCode::BAD_GATEWAY),
            (
                LedgerError::Persistence("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(WebError::from(err).status(), status);
        }
    }
}
