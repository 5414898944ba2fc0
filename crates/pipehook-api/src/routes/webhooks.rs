//! Webhook endpoints for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use pipehook_core::{DeliveryId, Event};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::services::router::Outcome;

const EVENT_HEADER: &str = "X-GitHub-Event";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle a GitHub webhook delivery.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event = match parse_delivery(&state, &headers, &body) {
        Ok(event) => event,
        Err(e) => {
            state.metrics.count_invalid_hook();
            return Err(e);
        }
    };
    state.metrics.count_hook(event.kind());

    info!(
        delivery_id = %event.delivery_id(),
        kind = %event.kind(),
        repo = ?event.repository().map(|r| r.full_name.as_str()),
        "Received GitHub webhook"
    );

    match state.router.handle(&event).await {
        Ok(Outcome::Submitted(created)) => {
            state.metrics.count_run_created();
            Ok(Json(created).into_response())
        }
        Ok(Outcome::NoDefinition | Outcome::Ignored) => Ok(StatusCode::OK.into_response()),
        Err(e) => {
            state.metrics.count_failed_request();
            error!(delivery_id = %event.delivery_id(), error = %e, "Failed to handle webhook");
            Err(e.into())
        }
    }
}

fn parse_delivery(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Event, ApiError> {
    let event_type = header(headers, EVENT_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", EVENT_HEADER)))?;

    let delivery_id = header(headers, DELIVERY_HEADER)
        .and_then(|id| DeliveryId::new(id).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", DELIVERY_HEADER)))?;

    if let Some(secret) = &state.webhook_secret {
        if !verify_github_signature(secret, body, header(headers, SIGNATURE_HEADER)) {
            warn!(delivery_id = %delivery_id, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    Ok(Event::from_github(event_type, delivery_id, &payload)?)
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
