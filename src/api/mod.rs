use crate::core::error::{CompletionError, LoadError, RegistryError};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::error;
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;

pub mod chats;
pub mod models;

const X_USER_ID: &str = "X-User-ID";

/// All endpoints. Handlers expect an `Extension<Arc<InferenceService>>` layer
/// and a DI service provider.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/models", models::router())
        .nest("/chats", chats::router())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug)]
pub struct ExtractUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(user_id) = parts.headers.get(X_USER_ID) {
            let user_id = user_id
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            let user_id = Uuid::from_str(user_id)
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            Ok(ExtractUser(user_id))
        } else {
            Err((StatusCode::BAD_REQUEST, "`X-User-ID` header is missing"))
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

/// Error returned by handlers, rendered as `{error, detail}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!("{err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.kind,
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        let (status, kind) = match &err {
            CompletionError::UnknownModel(_) => (StatusCode::NOT_FOUND, "unknown_model"),
            CompletionError::NotReady { .. } => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            CompletionError::ModelMismatch { .. } => (StatusCode::CONFLICT, "model_mismatch"),
            CompletionError::InferenceFailure(_) => (StatusCode::BAD_GATEWAY, "inference_failure"),
            CompletionError::Status(_) => return ApiError::internal(err),
        };
        ApiError::new(status, kind, err.to_string())
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        let (status, kind) = match &err {
            LoadError::UnknownModel(_) => (StatusCode::NOT_FOUND, "unknown_model"),
            LoadError::Registry(RegistryError::Occupied { .. }) => {
                (StatusCode::CONFLICT, "model_mismatch")
            }
            LoadError::Registry(RegistryError::AlreadyRegistered(_)) => {
                (StatusCode::CONFLICT, "already_loaded")
            }
            LoadError::FileMissing(_)
            | LoadError::LoadFailure(_)
            | LoadError::SmokeTestFailure(_) => (StatusCode::UNPROCESSABLE_ENTITY, "load_failed"),
            LoadError::Status(_) => return ApiError::internal(err),
        };
        ApiError::new(status, kind, err.to_string())
    }
}
