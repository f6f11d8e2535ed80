//! Model catalog and lifecycle endpoints

use crate::api::{ApiError, ExtractUser};
use crate::core::inference::InferenceService;
use crate::core::status::StatusRecord;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_models))
        .route("/:id/status", get(model_status))
        .route("/:id/reload", post(reload_model))
}

async fn list_models(
    Extension(inference): Extension<Arc<InferenceService>>,
    ExtractUser(_current_user): ExtractUser,
) -> Result<Json<schemas::ModelList>, ApiError> {
    let mut models = Vec::new();

    for descriptor in inference.available_models() {
        let record = inference
            .model_status(&descriptor.id)
            .await
            .map_err(ApiError::internal)?;

        models.push(schemas::Model {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            model_type: descriptor.model_type.clone(),
            context_length: descriptor.context_length,
            status: record,
            loaded_at: inference
                .registry()
                .get(&descriptor.id)
                .map(|model| model.loaded_at()),
        });
    }

    Ok(Json(schemas::ModelList {
        environment: inference.environment(),
        models,
    }))
}

async fn model_status(
    Extension(inference): Extension<Arc<InferenceService>>,
    Path(model_id): Path<String>,
) -> Result<Json<StatusRecord>, ApiError> {
    if inference.descriptor(&model_id).is_none() {
        return Err(ApiError::not_found(format!("unknown model: {model_id}")));
    }

    let record = inference
        .model_status(&model_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(record))
}

async fn reload_model(
    Extension(inference): Extension<Arc<InferenceService>>,
    ExtractUser(_current_user): ExtractUser,
    Path(model_id): Path<String>,
) -> Result<Json<schemas::Reload>, ApiError> {
    let outcome = inference.reload(&model_id).await?;
    Ok(Json(schemas::Reload { outcome }))
}

pub mod schemas {
    use crate::config::DeploymentEnvironment;
    use crate::core::loader::LoadOutcome;
    use crate::core::status::StatusRecord;
    use chrono::{DateTime, Utc};
    use serde::Serialize;

    #[derive(Serialize, Debug)]
    pub struct Model {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub model_type: String,
        pub context_length: usize,
        pub status: StatusRecord,
        /// When this process loaded the model; `None` if it is not resident here.
        pub loaded_at: Option<DateTime<Utc>>,
    }

    #[derive(Serialize, Debug)]
    pub struct ModelList {
        pub environment: DeploymentEnvironment,
        pub models: Vec<Model>,
    }

    #[derive(Serialize, Debug)]
    pub struct Reload {
        pub outcome: LoadOutcome,
    }
}
