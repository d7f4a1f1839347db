//! Settings HTTP API.
//!
//! Routes:
//! - `PUT /api/tenants/:tenant_id/credentials/:provider`: store a credential
//! - `DELETE /api/tenants/:tenant_id/credentials/:provider`: remove a credential
//! - `GET /api/tenants/:tenant_id/integrations`: which providers are configured
//! - `POST /api/tenants/:tenant_id/field-mappings/refresh`: rediscover CRM fields
//! - `POST /api/admin/credentials/invalidate`: drop every cached credential
//! - `POST /api/tenants/:tenant_id/crm/:entity`: create a CRM record
//! - `GET /api/tenants/:tenant_id/crm/:entity/:id`: fetch a CRM record

use crate::credentials::CredentialError;
use crate::integration::{IntegrationError, IntegrationService};
use crate::mapping::{EntityType, MappingSource};
use crate::provider::Provider;
use crate::transform::Record;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for the settings API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<IntegrationService>,
}

/// Request body for `PUT /api/tenants/:tenant_id/credentials/:provider`.
///
/// No `Debug`: the body carries the plaintext secret.
#[derive(Deserialize)]
pub struct SaveCredentialRequest {
    pub secret: String,
}

/// Connection state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Configured,
    NotConfigured,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntegrationStatus {
    pub provider: Provider,
    pub status: ConnectionStatus,
}

/// Response for `GET /api/tenants/:tenant_id/integrations`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntegrationsResponse {
    pub tenant_id: String,
    pub integrations: Vec<IntegrationStatus>,
}

/// Response for `POST /api/tenants/:tenant_id/field-mappings/refresh`.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub source: MappingSource,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn put_credential(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, provider)): Path<(String, String)>,
    Json(req): Json<SaveCredentialRequest>,
) -> Result<StatusCode, AppError> {
    let provider = parse_provider(&provider)?;
    if req.secret.is_empty() {
        return Err(AppError::BadRequest("secret must not be empty".to_string()));
    }

    state
        .service
        .save_credential(&tenant_id, provider, &req.secret)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_credential(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, provider)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let provider = parse_provider(&provider)?;

    if state.service.remove_credential(&tenant_id, provider).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "No {} credential stored for tenant '{}'",
            provider, tenant_id
        )))
    }
}

async fn list_integrations(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<IntegrationsResponse>, AppError> {
    let configured = state
        .service
        .credentials()
        .configured_providers(&tenant_id)
        .await?;

    let integrations = Provider::ALL
        .into_iter()
        .map(|provider| IntegrationStatus {
            provider,
            status: if configured.contains(&provider) {
                ConnectionStatus::Configured
            } else {
                ConnectionStatus::NotConfigured
            },
        })
        .collect();

    Ok(Json(IntegrationsResponse {
        tenant_id,
        integrations,
    }))
}

async fn refresh_field_mappings(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<RefreshResponse>, AppError> {
    let source = state.service.refresh_mappings(&tenant_id).await?;
    Ok(Json(RefreshResponse { source }))
}

async fn invalidate_credentials(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.service.credentials().invalidate_all();
    info!("Credential cache invalidated via admin API");
    StatusCode::NO_CONTENT
}

async fn create_record(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, entity)): Path<(String, String)>,
    Json(record): Json<Record>,
) -> Result<(StatusCode, Json<Record>), AppError> {
    let entity = parse_entity(&entity)?;
    let created = state.service.create(&tenant_id, entity, &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_record(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, entity, id)): Path<(String, String, String)>,
) -> Result<Json<Record>, AppError> {
    let entity = parse_entity(&entity)?;
    let id = parse_record_id(&id)?;
    let record = state.service.fetch(&tenant_id, entity, id).await?;
    Ok(Json(record))
}

fn parse_provider(raw: &str) -> Result<Provider, AppError> {
    raw.parse::<Provider>()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

fn parse_entity(raw: &str) -> Result<EntityType, AppError> {
    raw.parse::<EntityType>()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// CRM record ids are numeric. The path segment arrives percent-decoded, so
/// anything else could rewrite the outbound request.
fn parse_record_id(raw: &str) -> Result<&str, AppError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::BadRequest(format!("Invalid record id: {:?}", raw)));
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

enum AppError {
    BadRequest(String),
    NotFound(String),
    PreconditionFailed(String),
    ServiceUnavailable(String),
    BadGateway(String),
    Internal(String),
}

impl From<IntegrationError> for AppError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::NotConfigured { .. } => AppError::PreconditionFailed(e.to_string()),
            IntegrationError::TemporarilyUnavailable { .. } => {
                AppError::ServiceUnavailable(e.to_string())
            }
            IntegrationError::Provider(_) => AppError::BadGateway(e.to_string()),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Timeout => AppError::ServiceUnavailable(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PreconditionFailed(msg) => (StatusCode::PRECONDITION_FAILED, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                error!(error = %msg, "Settings API internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/tenants/:tenant_id/credentials/:provider",
            put(put_credential).delete(delete_credential),
        )
        .route("/api/tenants/:tenant_id/integrations", get(list_integrations))
        .route(
            "/api/tenants/:tenant_id/field-mappings/refresh",
            post(refresh_field_mappings),
        )
        .route("/api/admin/credentials/invalidate", post(invalidate_credentials))
        .route("/api/tenants/:tenant_id/crm/:entity", post(create_record))
        .route("/api/tenants/:tenant_id/crm/:entity/:id", get(get_record))
        .with_state(Arc::new(state))
}
