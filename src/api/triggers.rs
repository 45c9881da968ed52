//! Trigger endpoints used by the rest of the application to feed the
//! transports: progress changes go to the push stream through the bridge,
//! administrative messages go to UDP subscribers.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::bridge::SubmitOutcome;
use crate::error::{AppError, Result};
use crate::models::ProgressUpdate;
use crate::server::AppState;

const MAX_ID_LEN: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub user_id: String,
    pub manga_id: String,
    pub chapter: i64,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub queued: bool,
    pub outcome: SubmitOutcome,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub ok: bool,
    pub delivered: usize,
    pub failed: usize,
}

/// Identifier check: 1-50 chars of `[A-Za-z0-9_-]`
fn validate_id(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(AppError::Validation(format!("{} is too long", field)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::Validation(format!("invalid {} format", field)));
    }
    Ok(value.to_string())
}

/// POST /api/v1/progress - queue a progress update for push-stream clients
#[tracing::instrument(
    name = "http.progress",
    skip(state, request),
    fields(manga_id = %request.manga_id, chapter = request.chapter)
)]
pub async fn submit_progress(
    State(state): State<AppState>,
    Json(request): Json<ProgressRequest>,
) -> Result<Json<ProgressResponse>> {
    let user_id = validate_id("user_id", &request.user_id)?;
    let manga_id = validate_id("manga_id", &request.manga_id)?;
    if request.chapter < 0 {
        return Err(AppError::Validation(
            "chapter number cannot be negative".to_string(),
        ));
    }

    let event = ProgressUpdate::new(user_id, manga_id, request.chapter);
    let timestamp = event.timestamp;
    let outcome = state.bridge.submit(event);

    Ok(Json(ProgressResponse {
        queued: outcome.is_queued(),
        outcome,
        timestamp,
    }))
}

/// POST /api/v1/notify - send an administrative notification over UDP
#[tracing::instrument(name = "http.notify", skip(state, request))]
pub async fn notify_subscribers(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message required".to_string()));
    }

    let report = state.notify.broadcast(&request.message).await;

    Ok(Json(NotifyResponse {
        ok: true,
        delivered: report.delivered,
        failed: report.failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id("manga_id", " one-piece ").unwrap(), "one-piece");
        assert_eq!(validate_id("manga_id", "naruto_2").unwrap(), "naruto_2");
        assert!(validate_id("manga_id", "").is_err());
        assert!(validate_id("manga_id", "drop table;").is_err());
        assert!(validate_id("manga_id", &"a".repeat(51)).is_err());
    }
}
