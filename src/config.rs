//! Process-start configuration: deployment settings and the static model catalog.
//!

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::core::window::PromptBudget;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read model catalog {path}: {source}")]
    CatalogIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed model catalog {path}: {source}")]
    CatalogFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnvironment {
    Development,
    Production,
}

impl FromStr for DeploymentEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentEnvironment::Development),
            "production" | "prod" => Ok(DeploymentEnvironment::Production),
            _ => Err(ConfigError::InvalidValue {
                key: "ENVIRONMENT",
                value: s.to_owned(),
            }),
        }
    }
}

/// Static description of a loadable model and its resource requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Filled in from the catalog key.
    #[serde(skip_deserializing, default)]
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub model_type: String,
    pub context_length: usize,
    #[serde(default)]
    pub gpu_layers: u32,
    pub environment: BTreeSet<DeploymentEnvironment>,
}

impl ModelDescriptor {
    pub fn is_available_in(&self, environment: DeploymentEnvironment) -> bool {
        self.environment.contains(&environment)
    }
}

/// Model id -> descriptor, immutable after process start.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Parses the JSON mapping `{ "<id>": { name, path, type, context_length, gpu_layers, environment } }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, ModelDescriptor> = serde_json::from_str(json)?;

        Ok(Self {
            models: raw
                .into_iter()
                .map(|(id, mut descriptor)| {
                    descriptor.id = id.clone();
                    (id, descriptor)
                })
                .collect(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.to_owned(),
            source,
        })?;

        Self::from_json(&json).map_err(|source| ConfigError::CatalogFormat {
            path: path.to_owned(),
            source,
        })
    }

    /// Catalog used when no `MODELS_CONFIG` file is given.
    pub fn builtin() -> Self {
        Self::new([ModelDescriptor {
            id: "mistral-7b".to_owned(),
            name: "Mistral 7B Instruct".to_owned(),
            path: PathBuf::from("models/mistral-7b-instruct-v0.1.Q4_K_M.gguf"),
            model_type: "mistral".to_owned(),
            context_length: 2048,
            gpu_layers: 0,
            environment: BTreeSet::from([
                DeploymentEnvironment::Development,
                DeploymentEnvironment::Production,
            ]),
        }])
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id)
    }

    /// Models advertised in the given deployment environment, ordered by id.
    pub fn available(&self, environment: DeploymentEnvironment) -> Vec<&ModelDescriptor> {
        self.models
            .values()
            .filter(|m| m.is_available_in(environment))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBackend {
    File,
    Sqlite,
}

impl FromStr for StatusBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StatusBackend::File),
            "sqlite" | "db" => Ok(StatusBackend::Sqlite),
            _ => Err(ConfigError::InvalidValue {
                key: "STATUS_BACKEND",
                value: s.to_owned(),
            }),
        }
    }
}

/// Knobs passed to the engine for every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
            stop: vec!["</s>".to_owned()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: DeploymentEnvironment,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub catalog: ModelCatalog,
    pub status_backend: StatusBackend,
    pub status_dir: PathBuf,
    pub load_strategy: crate::core::loader::LoadStrategy,
    pub serving_mode: crate::core::registry::ServingMode,
    pub default_model: Option<String>,
    pub budget: PromptBudget,
    pub generation: GenerationParams,
}

impl Settings {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let catalog = match env::var("MODELS_CONFIG") {
            Ok(path) => ModelCatalog::from_file(Path::new(&path))?,
            Err(_) => ModelCatalog::builtin(),
        };

        let defaults = GenerationParams::default();

        Ok(Settings {
            environment: parse_var("ENVIRONMENT")?
                .unwrap_or(DeploymentEnvironment::Development),
            host: env::var("HOST").unwrap_or("0.0.0.0".to_owned()),
            port: parse_var("PORT")?.unwrap_or(8000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or("sqlite://lemtosh.db?mode=rwc".to_owned()),
            catalog,
            status_backend: parse_var("STATUS_BACKEND")?.unwrap_or(StatusBackend::File),
            status_dir: env::var("STATUS_DIR")
                .map(PathBuf::from)
                .unwrap_or(PathBuf::from("model_status")),
            load_strategy: parse_var("LOAD_STRATEGY")?
                .unwrap_or(crate::core::loader::LoadStrategy::Thread),
            serving_mode: parse_var("SERVING_MODE")?
                .unwrap_or(crate::core::registry::ServingMode::Single),
            default_model: env::var("DEFAULT_MODEL").ok(),
            budget: PromptBudget {
                char_ceiling: parse_var("HISTORY_CHAR_LIMIT")?
                    .unwrap_or(PromptBudget::default().char_ceiling),
                turn_ceiling: parse_var("HISTORY_TURN_LIMIT")?
                    .unwrap_or(PromptBudget::default().turn_ceiling),
            },
            generation: GenerationParams {
                max_new_tokens: parse_var("MAX_NEW_TOKENS")?.unwrap_or(defaults.max_new_tokens),
                temperature: parse_var("TEMPERATURE")?.unwrap_or(defaults.temperature),
                ..defaults
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}
