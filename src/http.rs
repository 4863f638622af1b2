//! HTTP surface for the sign-in flow.
//!
//! - `GET /auth/nonce` returns `{"nonce": "<hex>"}`.
//! - `POST /auth/verify` takes `{"address", "message", "signature"}` and
//!   returns `{"ok": true, "address": "0x…", "scheme": "…"}` on success, or
//!   `{"error": "<code>", "message": "…"}` with status 400, 401 or 500.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::siwe::{AuthError, AuthProtocol, VerificationRequest, VerificationResult};

#[derive(Debug, Serialize)]
struct NonceResponse {
    nonce: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router for the two sign-in endpoints.
pub fn router(protocol: Arc<AuthProtocol>) -> Router {
    Router::new()
        .route("/auth/nonce", get(issue_nonce))
        .route("/auth/verify", post(verify))
        .with_state(protocol)
}

async fn issue_nonce(
    State(protocol): State<Arc<AuthProtocol>>,
) -> Result<Json<NonceResponse>, AuthError> {
    let nonce = protocol.issue_nonce().await?;
    Ok(Json(NonceResponse { nonce: nonce.value }))
}

async fn verify(
    State(protocol): State<Arc<AuthProtocol>>,
    payload: Result<Json<VerificationRequest>, JsonRejection>,
) -> Result<Json<VerificationResult>, AuthError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "unreadable verification request");
        AuthError::MalformedMessage(rejection.body_text())
    })?;

    protocol.verify(&request).await.map(Json)
}
