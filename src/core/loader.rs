//! Model loading off the request path.
//!
//! A load walks `Loading -> (validate file, load, smoke test) -> Ready | Error`.
//! At most one load per model id is in flight in a process.

use crate::config::{ConfigError, GenerationParams, ModelDescriptor};
use crate::core::engine::{Generator, ModelBackend};
use crate::core::error::{LoadError, RegistryError};
use crate::core::registry::{LoadedModel, ModelRegistry, ServingMode};
use crate::core::status::{ModelStatus, StatusStore};
use futures_util::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

const SMOKE_TEST_PROMPT: &str = "[INST] Hello, how are you? [/INST]";
const SMOKE_TEST_MAX_TOKENS: usize = 8;

/// Where the load runs relative to the caller of [`ModelLoader::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// The trigger awaits the whole load.
    Inline,
    /// A task on the current tokio runtime.
    Task,
    /// A dedicated OS thread.
    Thread,
}

impl FromStr for LoadStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "sync" => Ok(LoadStrategy::Inline),
            "task" => Ok(LoadStrategy::Task),
            "thread" => Ok(LoadStrategy::Thread),
            _ => Err(ConfigError::InvalidValue {
                key: "LOAD_STRATEGY",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Background load started; watch the status store.
    Started,
    /// Inline load finished and the model is ready.
    Loaded,
    /// Nothing to do, the model is resident.
    AlreadyResident,
    /// Another load of this model is running.
    InFlight,
}

struct LoaderInner {
    backend: Arc<dyn ModelBackend>,
    status: Arc<dyn StatusStore>,
    registry: Arc<ModelRegistry>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the single-flight slot when the load ends, however it ends.
struct InFlightGuard {
    inner: Arc<LoaderInner>,
    model_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.model_id);
    }
}

pub struct ModelLoader {
    strategy: LoadStrategy,
    inner: Arc<LoaderInner>,
}

impl ModelLoader {
    pub fn new(
        strategy: LoadStrategy,
        backend: Arc<dyn ModelBackend>,
        status: Arc<dyn StatusStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            strategy,
            inner: Arc::new(LoaderInner {
                backend,
                status,
                registry,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    pub fn is_loading(&self, model_id: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(model_id)
    }

    /// Starts loading `descriptor` unless it is resident or already loading.
    ///
    /// With [`LoadStrategy::Inline`] the load error is returned as well as
    /// recorded; the background strategies only record it.
    pub async fn trigger(&self, descriptor: &ModelDescriptor) -> Result<LoadOutcome, LoadError> {
        let model_id = descriptor.id.clone();

        if self.inner.registry.is_loaded(&model_id) {
            self.inner.confirm_ready(&model_id).await?;
            return Ok(LoadOutcome::AlreadyResident);
        }

        let guard = {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.contains(&model_id) {
                return Ok(LoadOutcome::InFlight);
            }
            // A load in flight already claims the only slot of a single-model process.
            if self.inner.registry.mode() == ServingMode::Single {
                if let Some(active) = in_flight.iter().next() {
                    return Err(RegistryError::Occupied {
                        active: active.clone(),
                        requested: model_id,
                    }
                    .into());
                }
            }
            self.inner.registry.admits(&model_id)?;
            in_flight.insert(model_id.clone());
            InFlightGuard {
                inner: self.inner.clone(),
                model_id: model_id.clone(),
            }
        };

        let descriptor = descriptor.clone();
        let inner = self.inner.clone();

        match self.strategy {
            LoadStrategy::Inline => {
                inner.run(descriptor).await?;
                drop(guard);
                Ok(LoadOutcome::Loaded)
            }
            LoadStrategy::Task => {
                tokio::spawn(async move {
                    let _guard = guard;
                    inner.run(descriptor).await.ok();
                });
                Ok(LoadOutcome::Started)
            }
            LoadStrategy::Thread => {
                // The load is driven on its own thread; timers and I/O still use this runtime's drivers.
                let handle = tokio::runtime::Handle::current();

                let spawned = std::thread::Builder::new()
                    .name(format!("load-{model_id}"))
                    .spawn(move || {
                        let _guard = guard;
                        handle.block_on(inner.run(descriptor)).ok();
                    });

                if let Err(e) = spawned {
                    let err = LoadError::LoadFailure(format!("cannot spawn loader thread: {e}"));
                    self.inner.record_failure(&model_id, &err).await;
                    return Err(err);
                }
                Ok(LoadOutcome::Started)
            }
        }
    }
}

impl LoaderInner {
    async fn run(&self, descriptor: ModelDescriptor) -> Result<(), LoadError> {
        let model_id = descriptor.id.clone();

        if let Err(e) = self
            .status
            .set_status(&model_id, ModelStatus::Loading, None)
            .await
        {
            error!("cannot record loading status for {model_id}, aborting load: {e}");
            return Err(e.into());
        }

        info!("Loading model {model_id} from {}", descriptor.path.display());
        let start = Instant::now();

        let loaded = match AssertUnwindSafe(self.load_and_verify(&descriptor))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(LoadError::LoadFailure(format!(
                "loader panicked: {}",
                panic_message(&*panic)
            ))),
        };

        let result = loaded.and_then(|generator| {
            self.registry
                .register(LoadedModel::new(descriptor, generator))
                .map_err(LoadError::from)
        });

        match result {
            Ok(()) => {
                info!(
                    "Model {model_id} ready in {:.2} seconds.",
                    start.elapsed().as_secs_f32()
                );
                if let Err(e) = self
                    .status
                    .set_status(&model_id, ModelStatus::Ready, None)
                    .await
                {
                    error!("model {model_id} is resident but its ready status was not recorded: {e}");
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                warn!("Loading model {model_id} failed: {e}");
                self.record_failure(&model_id, &e).await;
                Err(e)
            }
        }
    }

    /// A resident model must read as `Ready`; rewrites the record if a
    /// previous `Ready` write was lost.
    async fn confirm_ready(&self, model_id: &str) -> Result<(), LoadError> {
        let record = self.status.get_status(model_id).await?;
        if record.status != ModelStatus::Ready {
            warn!(
                "Model {model_id} is resident but recorded as {}; recording ready",
                record.status
            );
            self.status
                .set_status(model_id, ModelStatus::Ready, None)
                .await?;
        }
        Ok(())
    }

    async fn record_failure(&self, model_id: &str, err: &LoadError) {
        if let Err(status_err) = self
            .status
            .set_status(model_id, ModelStatus::Error, Some(err.to_string()))
            .await
        {
            error!("cannot record load failure for {model_id}: {status_err}");
        }
    }

    async fn load_and_verify(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Box<dyn Generator>, LoadError> {
        match tokio::fs::metadata(&descriptor.path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(LoadError::FileMissing(descriptor.path.clone())),
        }

        let mut generator = self
            .backend
            .load(descriptor)
            .await
            .map_err(|e| LoadError::LoadFailure(format!("{e:#}")))?;

        let params = GenerationParams {
            max_new_tokens: SMOKE_TEST_MAX_TOKENS,
            ..GenerationParams::default()
        };
        match generator.generate(SMOKE_TEST_PROMPT, &params).await {
            Ok(text) if !text.trim().is_empty() => Ok(generator),
            Ok(_) => Err(LoadError::SmokeTestFailure("empty response".to_owned())),
            Err(e) => Err(LoadError::SmokeTestFailure(format!("{e:#}"))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
