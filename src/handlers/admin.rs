//! # Admin API Handlers
//!
//! Operator endpoints for projects, alerts and alert notification
//! destinations. All routes require an operator bearer token.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found, validation_error};
use crate::models::alert;
use crate::models::alert_destination_type::{
    KEY_GENERIC_WEBHOOK, KEY_INTERNAL_LOGGER, KEY_SLACK_WEBHOOK,
};
use crate::models::project_alert_destination::WebhookConfiguration;
use crate::repositories::{
    AlertRepository, DestinationRepository, DestinationWithType, ProjectRepository,
    ProjectWithKeys,
};
use crate::server::AppState;

const MAX_PROJECT_NAME_LENGTH: usize = 255;

/// Request payload for creating a project
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// Unique project name
    #[schema(example = "checkout-service")]
    pub name: String,
}

/// Project with its ingestion API keys
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectDto {
    pub id: i32,
    pub name: String,
    /// Identifier used in the ingestion URL
    #[schema(example = "qhzkvbne")]
    pub public_id: String,
    pub ingestion_api_keys: Vec<String>,
    #[schema(example = "2024-01-15T10:30:00+00:00")]
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectResponse {
    pub project: ProjectDto,
}

impl From<ProjectWithKeys> for ProjectDto {
    fn from(value: ProjectWithKeys) -> Self {
        Self {
            id: value.project.id,
            name: value.project.name,
            public_id: value.project.public_id,
            ingestion_api_keys: value.keys.into_iter().map(|key| key.key).collect(),
            created_at: value.project.created_at.to_rfc3339(),
            updated_at: value.project.updated_at.to_rfc3339(),
        }
    }
}

/// Alert raised for a new error group
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertDto {
    pub id: i32,
    pub project_id: i32,
    pub event_group_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub triggered_at: String,
    pub notified_at: Option<String>,
    pub escalated_at: Option<String>,
    pub acknowledged_at: Option<String>,
}

impl From<alert::Model> for AlertDto {
    fn from(value: alert::Model) -> Self {
        Self {
            id: value.id,
            project_id: value.project_id,
            event_group_id: value.event_group_id,
            title: value.title,
            description: value.description,
            triggered_at: value.triggered_at.to_rfc3339(),
            notified_at: value.notified_at.map(|at| at.to_rfc3339()),
            escalated_at: value.escalated_at.map(|at| at.to_rfc3339()),
            acknowledged_at: value.acknowledged_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertListResponse {
    /// Alerts, newest first
    pub alerts: Vec<AlertDto>,
}

/// Request payload for adding an alert notification destination
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateDestinationRequest {
    /// One of `generic_webhook`, `slack_webhook`, `internal_logger`
    #[serde(rename = "type")]
    #[schema(example = "generic_webhook")]
    pub destination_type: String,
    /// Required for webhook types
    #[schema(example = "https://hooks.example.com/periscope")]
    pub webhook_url: Option<String>,
    /// Extra headers sent with generic webhook requests
    pub webhook_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DestinationDto {
    pub id: i32,
    pub project_id: i32,
    /// Destination type key, e.g. `webhook.generic`
    #[serde(rename = "type")]
    pub destination_type: String,
    pub configuration: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<DestinationWithType> for DestinationDto {
    fn from(value: DestinationWithType) -> Self {
        Self {
            id: value.destination.id,
            project_id: value.destination.project_id,
            destination_type: value.destination_type.key,
            configuration: value.destination.configuration,
            created_at: value.destination.created_at.to_rfc3339(),
        }
    }
}

/// Create a project with one ingestion API key
#[utoipa::path(
    post,
    path = "/api/admin/projects",
    security(("bearer_auth" = [])),
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "A project with this name exists", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn create_project(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let Json(request) = payload?;
    let name = request.name.trim();

    if name.is_empty() {
        return Err(validation_error(
            "Project name is required",
            json!({ "field": "name", "message": "Project name cannot be empty" }),
        ));
    }
    if name.len() > MAX_PROJECT_NAME_LENGTH {
        return Err(validation_error(
            "Project name exceeds maximum length",
            json!({
                "field": "name",
                "max_length": MAX_PROJECT_NAME_LENGTH,
                "actual_length": name.len()
            }),
        ));
    }

    let project = ProjectRepository::new(state.db.clone()).create(name).await?;

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            project: project.into(),
        }),
    ))
}

/// Get a project by id
#[utoipa::path(
    get,
    path = "/api/admin/projects/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Project found", body = ProjectResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn get_project(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<i32>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = ProjectRepository::new(state.db.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found(&format!("Project {} not found", id)))?;

    Ok(Json(ProjectResponse {
        project: project.into(),
    }))
}

/// List a project's alerts, newest first
#[utoipa::path(
    get,
    path = "/api/admin/projects/{project_id}/alerts",
    security(("bearer_auth" = [])),
    params(
        ("project_id" = i32, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Alerts for the project", body = AlertListResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(project_id): Path<i32>,
) -> Result<Json<AlertListResponse>, ApiError> {
    ensure_project_exists(&state, project_id).await?;

    let alerts = AlertRepository::new(state.db.clone())
        .list_for_project(project_id)
        .await?;

    Ok(Json(AlertListResponse {
        alerts: alerts.into_iter().map(AlertDto::from).collect(),
    }))
}

/// Add an alert notification destination to a project
#[utoipa::path(
    post,
    path = "/api/admin/projects/{project_id}/alert_notification_destinations",
    security(("bearer_auth" = [])),
    params(
        ("project_id" = i32, Path, description = "Project id")
    ),
    request_body = CreateDestinationRequest,
    responses(
        (status = 201, description = "Destination created", body = DestinationDto),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn create_destination(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(project_id): Path<i32>,
    payload: Result<Json<CreateDestinationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DestinationDto>), ApiError> {
    let Json(request) = payload?;

    let type_key = destination_type_key(&request.destination_type).ok_or_else(|| {
        validation_error(
            "Unknown destination type",
            json!({
                "field": "type",
                "allowed": ["generic_webhook", "slack_webhook", "internal_logger"]
            }),
        )
    })?;
    let configuration = webhook_configuration(type_key, request)?;

    ensure_project_exists(&state, project_id).await?;

    let destination = DestinationRepository::new(state.db.clone())
        .create(project_id, type_key, configuration)
        .await?;

    Ok((StatusCode::CREATED, Json(destination.into())))
}

/// Maps the public type alias to the stored destination type key.
fn destination_type_key(alias: &str) -> Option<&'static str> {
    match alias {
        "generic_webhook" => Some(KEY_GENERIC_WEBHOOK),
        "slack_webhook" => Some(KEY_SLACK_WEBHOOK),
        "internal_logger" => Some(KEY_INTERNAL_LOGGER),
        _ => None,
    }
}

fn webhook_configuration(
    type_key: &str,
    request: CreateDestinationRequest,
) -> Result<Option<WebhookConfiguration>, ApiError> {
    let Some(raw_url) = request.webhook_url else {
        if type_key == KEY_INTERNAL_LOGGER {
            return Ok(None);
        }
        return Err(validation_error(
            "webhook_url is required for webhook destinations",
            json!({ "field": "webhook_url" }),
        ));
    };

    let url = Url::parse(&raw_url)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .ok_or_else(|| {
            validation_error(
                "webhook_url must be an absolute http(s) URL",
                json!({ "field": "webhook_url", "value": raw_url }),
            )
        })?;

    Ok(Some(WebhookConfiguration {
        url: url.to_string(),
        headers: request.webhook_headers.unwrap_or_default(),
    }))
}

async fn ensure_project_exists(state: &AppState, project_id: i32) -> Result<(), ApiError> {
    ProjectRepository::new(state.db.clone())
        .find_project(project_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| not_found(&format!("Project {} not found", project_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(destination_type: &str, url: Option<&str>) -> CreateDestinationRequest {
        CreateDestinationRequest {
            destination_type: destination_type.to_string(),
            webhook_url: url.map(str::to_string),
            webhook_headers: None,
        }
    }

    #[test]
    fn maps_type_aliases() {
        assert_eq!(destination_type_key("generic_webhook"), Some(KEY_GENERIC_WEBHOOK));
        assert_eq!(destination_type_key("slack_webhook"), Some(KEY_SLACK_WEBHOOK));
        assert_eq!(destination_type_key("internal_logger"), Some(KEY_INTERNAL_LOGGER));
        assert_eq!(destination_type_key("webhook.generic"), None);
    }

    #[test]
    fn webhook_types_require_http_url() {
        let missing = webhook_configuration(KEY_SLACK_WEBHOOK, request("slack_webhook", None));
        assert_eq!(missing.unwrap_err().status, StatusCode::BAD_REQUEST);

        let wrong_scheme = webhook_configuration(
            KEY_GENERIC_WEBHOOK,
            request("generic_webhook", Some("ftp://example.com/hook")),
        );
        assert_eq!(wrong_scheme.unwrap_err().status, StatusCode::BAD_REQUEST);

        let relative =
            webhook_configuration(KEY_GENERIC_WEBHOOK, request("generic_webhook", Some("/hook")));
        assert!(relative.is_err());

        let valid = webhook_configuration(
            KEY_GENERIC_WEBHOOK,
            request("generic_webhook", Some("https://example.com/hook")),
        )
        .unwrap()
        .unwrap();
        assert_eq!(valid.url, "https://example.com/hook");
    }

    #[test]
    fn logger_needs_no_configuration() {
        let configuration =
            webhook_configuration(KEY_INTERNAL_LOGGER, request("internal_logger", None)).unwrap();
        assert!(configuration.is_none());
    }
}
