//! # Event Ingestion Handler
//!
//! Accepts SDK envelopes, authenticates them against the project's ingestion
//! keys and hands the event to the aggregator.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::ingestion_key;
use crate::error::{ApiError, forbidden};
use crate::ingestion::SdkEvent;
use crate::server::AppState;

/// Number of envelope header lines preceding the event item
const ENVELOPE_HEADER_LINES: usize = 2;

/// Acknowledgement returned for an accepted event
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    /// Event id as sent by the SDK
    #[schema(example = "fc6d8c0c43fc4630ad850ee518f1b9d0")]
    pub id: String,
}

/// Ingest one SDK event envelope
#[utoipa::path(
    post,
    path = "/api/{public_id}/envelope",
    params(
        ("public_id" = String, Path, description = "Project public id")
    ),
    request_body(content = String, content_type = "application/x-sentry-envelope"),
    responses(
        (status = 200, description = "Event accepted", body = IngestResponse),
        (status = 400, description = "Undecodable event or unknown project", body = ApiError),
        (status = 401, description = "Missing or malformed X-Sentry-Auth header", body = ApiError),
        (status = 403, description = "Ingestion key does not grant access", body = ApiError),
        (status = 500, description = "Event could not be published", body = ApiError)
    ),
    tag = "ingestion"
)]
pub async fn ingest_envelope(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let event = decode_envelope(&body).map_err(|err| {
        tracing::warn!(public_id = %public_id, error = %err, "Rejected undecodable envelope");
        counter!("periscope_ingestion_rejected_total", "reason" => "decode").increment(1);
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid event payload: {}", err),
        )
    })?;

    let project = state.projects.get(&public_id).await?.ok_or_else(|| {
        tracing::warn!(public_id = %public_id, "Envelope for unknown project");
        counter!("periscope_ingestion_rejected_total", "reason" => "unknown_project").increment(1);
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Invalid project id",
        )
    })?;

    let key = ingestion_key(&headers)?;
    if !project.has_access(&key, Utc::now()) {
        counter!("periscope_ingestion_rejected_total", "reason" => "forbidden").increment(1);
        return Err(forbidden(Some("Ingestion key does not grant access")));
    }

    let event_id = event.event_id.clone();
    state
        .aggregator
        .publish(project.project.id, event)
        .await
        .map_err(|err| {
            tracing::error!(project_id = project.project.id, error = %err, "Failed to publish event");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to publish event",
            )
        })?;

    tracing::debug!(project_id = project.project.id, event_id = %event_id, "Event accepted");
    counter!("periscope_ingestion_accepted_total").increment(1);

    Ok(Json(IngestResponse { id: event_id }))
}

/// Skips the envelope and item headers and decodes the event that follows.
fn decode_envelope(body: &[u8]) -> Result<SdkEvent, serde_json::Error> {
    let mut rest = body;
    for _ in 0..ENVELOPE_HEADER_LINES {
        rest = match rest.iter().position(|byte| *byte == b'\n') {
            Some(end) => &rest[end + 1..],
            None => &[],
        };
    }

    let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<SdkEvent>();
    match stream.next() {
        Some(event) => event,
        None => serde_json::from_slice::<SdkEvent>(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_after_two_header_lines() {
        let body = concat!(
            "{\"event_id\":\"abc\",\"sent_at\":\"2024-01-01T00:00:00Z\"}\n",
            "{\"type\":\"event\"}\n",
            "{\"event_id\":\"abc\",\"fingerprint\":[\"a\"],\"exception\":{\"values\":[]}}\n",
            "{\"type\":\"attachment\"}\n"
        );

        let event = decode_envelope(body.as_bytes()).expect("decodes");
        assert_eq!(event.event_id, "abc");
        assert_eq!(event.fingerprint, vec!["a".to_string()]);
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        assert!(decode_envelope(b"{}\n").is_err());
        assert!(decode_envelope(b"{}\n{}\nnot json").is_err());
    }
}
