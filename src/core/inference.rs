//! Completion requests against resident models.
//!
//! `InferenceService` is constructed once per serving process and shared by
//! reference with request handlers. It owns the registry and the loader; the
//! status store may be shared with other processes.

use crate::config::{DeploymentEnvironment, GenerationParams, ModelCatalog, ModelDescriptor, Settings};
use crate::core::engine::{ModelBackend, truncate_at_stop};
use crate::core::error::{CompletionError, LoadError, StatusError};
use crate::core::loader::{LoadOutcome, LoadStrategy, ModelLoader};
use crate::core::registry::{ModelRegistry, ServingMode};
use crate::core::status::{ModelStatus, StatusRecord, StatusStore};
use crate::core::window::{ChatTurn, PromptBudget, build_prompt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::Instant;

/// Construction parameters of an [`InferenceService`].
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub environment: DeploymentEnvironment,
    pub catalog: ModelCatalog,
    pub load_strategy: LoadStrategy,
    pub serving_mode: ServingMode,
    pub budget: PromptBudget,
    pub generation: GenerationParams,
}

impl From<&Settings> for InferenceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            environment: settings.environment,
            catalog: settings.catalog.clone(),
            load_strategy: settings.load_strategy,
            serving_mode: settings.serving_mode,
            budget: settings.budget,
            generation: settings.generation.clone(),
        }
    }
}

pub struct InferenceService {
    environment: DeploymentEnvironment,
    catalog: ModelCatalog,
    status: Arc<dyn StatusStore>,
    registry: Arc<ModelRegistry>,
    loader: ModelLoader,
    budget: PromptBudget,
    generation: GenerationParams,
}

impl InferenceService {
    pub fn new(
        config: InferenceConfig,
        backend: Arc<dyn ModelBackend>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let registry = Arc::new(ModelRegistry::new(config.serving_mode));
        let loader = ModelLoader::new(
            config.load_strategy,
            backend,
            status.clone(),
            registry.clone(),
        );

        Self {
            environment: config.environment,
            catalog: config.catalog,
            status,
            registry,
            loader,
            budget: config.budget,
            generation: config.generation,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn environment(&self) -> DeploymentEnvironment {
        self.environment
    }

    /// Models advertised in this deployment environment.
    pub fn available_models(&self) -> Vec<&ModelDescriptor> {
        self.catalog.available(self.environment)
    }

    pub fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.catalog
            .get(model_id)
            .filter(|m| m.is_available_in(self.environment))
    }

    pub async fn model_status(&self, model_id: &str) -> Result<StatusRecord, StatusError> {
        self.status.get_status(model_id).await
    }

    /// Ready in the status store and resident in this process.
    pub async fn is_ready(&self, model_id: &str) -> Result<bool, StatusError> {
        let record = self.status.get_status(model_id).await?;
        Ok(record.status == ModelStatus::Ready && self.registry.is_loaded(model_id))
    }

    pub fn is_loading(&self, model_id: &str) -> bool {
        self.loader.is_loading(model_id)
    }

    /// Triggers a load of `model_id`; returns once the load is started
    /// (or finished, with the inline strategy).
    pub async fn load(&self, model_id: &str) -> Result<LoadOutcome, LoadError> {
        let descriptor = self
            .descriptor(model_id)
            .ok_or_else(|| LoadError::UnknownModel(model_id.to_owned()))?;
        self.loader.trigger(descriptor).await
    }

    /// Explicit recovery from the `Error` status. Never triggered automatically.
    pub async fn reload(&self, model_id: &str) -> Result<LoadOutcome, LoadError> {
        let record = self.status.get_status(model_id).await?;
        info!(
            "Reload of {model_id} requested (current status: {})",
            record.status
        );
        self.load(model_id).await
    }

    /// Rewrites `Ready` records that no resident model backs.
    ///
    /// Run at startup, before loads are triggered, so a crashed server does
    /// not leave its models advertised as ready.
    pub async fn reconcile(&self) -> Result<Vec<String>, StatusError> {
        let mut repaired = Vec::new();

        for descriptor in self.available_models() {
            let id = &descriptor.id;
            let record = self.status.get_status(id).await?;
            if record.status == ModelStatus::Ready
                && !self.registry.is_loaded(id)
                && !self.loader.is_loading(id)
            {
                warn!("Status of {id} says ready but the model is not resident; marking as error");
                self.status
                    .set_status(
                        id,
                        ModelStatus::Error,
                        Some("stale ready record: model is not resident".to_owned()),
                    )
                    .await?;
                repaired.push(id.clone());
            }
        }

        Ok(repaired)
    }

    /// Reconciles stale records, then triggers the startup loads: the default
    /// (or first advertised) model in single mode, every advertised model in
    /// multi mode. Load failures are recorded, never fatal.
    pub async fn start(
        &self,
        default_model: Option<&str>,
    ) -> Result<Vec<(String, Result<LoadOutcome, LoadError>)>, StatusError> {
        self.reconcile().await?;

        let targets: Vec<String> = match self.registry.mode() {
            ServingMode::Single => default_model
                .map(str::to_owned)
                .or_else(|| self.available_models().first().map(|m| m.id.clone()))
                .into_iter()
                .collect(),
            ServingMode::Multi => self
                .available_models()
                .into_iter()
                .map(|m| m.id.clone())
                .collect(),
        };

        info!(
            "Starting {} model load(s) with the {:?} strategy",
            targets.len(),
            self.loader.strategy()
        );

        let mut outcomes = Vec::with_capacity(targets.len());
        for model_id in targets {
            let outcome = self.load(&model_id).await;
            match &outcome {
                Ok(outcome) => info!("Startup load of {model_id}: {outcome:?}"),
                Err(e) => warn!("Startup load of {model_id} failed: {e}"),
            }
            outcomes.push((model_id, outcome));
        }

        Ok(outcomes)
    }

    /// Generates the assistant reply to `message` given the prior `history`
    /// (oldest turn first).
    ///
    /// Never retries: a failed generation is returned as `InferenceFailure`
    /// and the model stays ready.
    pub async fn request_completion(
        &self,
        model_id: &str,
        message: &str,
        history: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        if self.descriptor(model_id).is_none() {
            return Err(CompletionError::UnknownModel(model_id.to_owned()));
        }

        let record = self.status.get_status(model_id).await?;
        if record.status != ModelStatus::Ready {
            return Err(CompletionError::NotReady {
                model_id: model_id.to_owned(),
                status: record.status,
                detail: record.error,
            });
        }

        let Some(model) = self.registry.get(model_id) else {
            if let Some(active) = self.registry.active_model() {
                return Err(CompletionError::ModelMismatch {
                    requested: model_id.to_owned(),
                    active,
                });
            }
            return Err(CompletionError::NotReady {
                model_id: model_id.to_owned(),
                status: record.status,
                detail: Some("not resident in this process".to_owned()),
            });
        };

        let prompt = build_prompt(message, history, &self.budget);
        debug!(
            "Prompt for {model_id}: {} chars from {} history turns",
            prompt.chars().count(),
            history.len()
        );

        let start = Instant::now();
        let text = model
            .generate(&prompt, &self.generation)
            .await
            .map_err(CompletionError::InferenceFailure)?;
        debug!(
            "Generation on {model_id} took {:.2} seconds",
            start.elapsed().as_secs_f32()
        );

        let end = truncate_at_stop(&text, &self.generation.stop);
        Ok(text[..end].trim().to_owned())
    }
}
