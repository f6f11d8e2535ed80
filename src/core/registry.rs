//! In-memory registry of resident models.
//!
//! Models stay resident for the lifetime of the process: there is no eviction,
//! so the number of models one process can serve is bounded by its memory.

use crate::config::{GenerationParams, ModelDescriptor};
use crate::core::engine::Generator;
use crate::core::error::RegistryError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// How many models a serving process may keep resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingMode {
    /// One resident model; requests for any other id are a mismatch.
    Single,
    /// Any number of models, each id at most once.
    Multi,
}

impl FromStr for ServingMode {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(ServingMode::Single),
            "multi" => Ok(ServingMode::Multi),
            _ => Err(crate::config::ConfigError::InvalidValue {
                key: "SERVING_MODE",
                value: s.to_owned(),
            }),
        }
    }
}

/// A loaded model bound to its descriptor.
///
/// The generator sits behind a per-model gate: calls on the same model queue,
/// calls on different models run in parallel.
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    loaded_at: DateTime<Utc>,
    generator: Mutex<Box<dyn Generator>>,
}

impl LoadedModel {
    pub(crate) fn new(descriptor: ModelDescriptor, generator: Box<dyn Generator>) -> Self {
        Self {
            descriptor,
            loaded_at: Utc::now(),
            generator: Mutex::new(generator),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> anyhow::Result<String> {
        let mut generator = self.generator.lock().await;
        generator.generate(prompt, params).await
    }
}

pub struct ModelRegistry {
    mode: ServingMode,
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelRegistry {
    pub fn new(mode: ServingMode) -> Self {
        Self {
            mode,
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ServingMode {
        self.mode
    }

    /// Exclusive insert. Only the loader calls this.
    pub(crate) fn register(&self, model: LoadedModel) -> Result<(), RegistryError> {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        let model_id = model.descriptor.id.clone();
        Self::check_admission(self.mode, &models, &model_id)?;
        models.insert(model_id, Arc::new(model));
        Ok(())
    }

    /// Whether a load for `model_id` could be registered right now.
    pub fn admits(&self, model_id: &str) -> Result<(), RegistryError> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        Self::check_admission(self.mode, &models, model_id)
    }

    fn check_admission(
        mode: ServingMode,
        models: &HashMap<String, Arc<LoadedModel>>,
        model_id: &str,
    ) -> Result<(), RegistryError> {
        if models.contains_key(model_id) {
            return Err(RegistryError::AlreadyRegistered(model_id.to_owned()));
        }
        if mode == ServingMode::Single {
            if let Some(active) = models.keys().next() {
                return Err(RegistryError::Occupied {
                    active: active.clone(),
                    requested: model_id.to_owned(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, model_id: &str) -> Option<Arc<LoadedModel>> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model_id)
            .cloned()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(model_id)
    }

    /// The resident model of a single-model process.
    pub fn active_model(&self) -> Option<String> {
        if self.mode != ServingMode::Single {
            return None;
        }
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .next()
            .cloned()
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
