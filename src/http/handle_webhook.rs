use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::errors::IngressError;
use crate::http::WebContext;
use crate::ingress::verify;

/// Query parameters of the subscription verification handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

/// Handler for the subscription verification handshake.
///
/// GET /webhooks/instagram
///
/// Echoes `hub.challenge` as plain text iff the mode is `subscribe` and the
/// token matches the configured secret; anything else is a 401.
pub async fn handle_webhook_verify(
    State(context): State<WebContext>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    match verify(
        params.mode.as_deref(),
        params.verify_token.as_deref(),
        params.challenge.as_deref(),
        &context.config.webhook_verify_token,
    ) {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => {
            warn!(mode = ?params.mode, "Webhook verification rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Verification failed" })),
            )
                .into_response()
        }
    }
}

/// Handler for webhook deliveries.
///
/// POST /webhooks/instagram
///
/// Always answers 200 once the ingestor has seen the payload; only a storage
/// failure becomes a 500 so the platform retries the delivery.
pub async fn handle_webhook_post(
    State(context): State<WebContext>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    match context.ingestor.receive(payload).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "report": report })),
        )
            .into_response(),
        Err(IngressError::MalformedPayload { details }) => {
            warn!(details = %details, "Ignoring malformed webhook payload");
            (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": "malformed payload" })),
            )
                .into_response()
        }
        Err(e @ IngressError::PersistenceFailed { .. }) => {
            error!(error = %e, "Webhook ingest failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Ingest failed" })),
            )
                .into_response()
        }
    }
}

/// Handler for the health endpoint.
///
/// GET /health
pub async fn handle_health(State(context): State<WebContext>) -> impl IntoResponse {
    match context.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "version": context.config.version })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}
