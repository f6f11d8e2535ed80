//! Shared fixtures: a scriptable engine and service builders.

#![allow(dead_code)]

use async_trait::async_trait;
use lemtosh_llm_server::config::{
    DeploymentEnvironment, GenerationParams, ModelCatalog, ModelDescriptor,
};
use lemtosh_llm_server::core::engine::{Generator, ModelBackend};
use lemtosh_llm_server::core::error::StatusError;
use lemtosh_llm_server::core::inference::{InferenceConfig, InferenceService};
use lemtosh_llm_server::core::loader::LoadStrategy;
use lemtosh_llm_server::core::registry::ServingMode;
use lemtosh_llm_server::core::status::{ModelStatus, StatusRecord, StatusStore};
use lemtosh_llm_server::core::window::PromptBudget;
use lemtosh_llm_server::infrastructure::status_store::FileStatusStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Replies `reply:<prompt length>`.
    Echo,
    /// Replies with a fixed string.
    Fixed(&'static str),
    FailLoad,
    /// Fails only the first load attempt.
    FailFirstLoad,
    PanicOnLoad,
    EmptySmoke,
    /// Smoke test passes, every later generation fails.
    FailAfterSmoke,
    SlowLoad(Duration),
}

#[derive(Clone, Default)]
pub struct Counters {
    pub loads: Arc<AtomicUsize>,
    pub generations: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub last_prompt: Arc<Mutex<Option<String>>>,
    /// Every generated character, in the order generators wrote them.
    pub transcript: Arc<Mutex<String>>,
}

impl Counters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

pub struct MockBackend {
    pub behavior: Behavior,
    pub counters: Counters,
}

impl MockBackend {
    pub fn new(behavior: Behavior) -> (Arc<Self>, Counters) {
        let counters = Counters::default();
        (
            Arc::new(Self {
                behavior,
                counters: counters.clone(),
            }),
            counters,
        )
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn load(&self, _descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn Generator>> {
        let attempt = self.counters.loads.fetch_add(1, Ordering::SeqCst) + 1;

        match self.behavior {
            Behavior::FailLoad => anyhow::bail!("engine rejected the model"),
            Behavior::FailFirstLoad if attempt == 1 => anyhow::bail!("engine rejected the model"),
            Behavior::PanicOnLoad => panic!("weights are garbage"),
            Behavior::SlowLoad(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        Ok(Box::new(MockGenerator {
            behavior: self.behavior,
            counters: self.counters.clone(),
            smoke_tested: false,
        }))
    }
}

struct MockGenerator {
    behavior: Behavior,
    counters: Counters,
    smoke_tested: bool,
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&mut self, prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        let first_call = !self.smoke_tested;
        self.smoke_tested = true;

        let reply = match self.behavior {
            Behavior::EmptySmoke => String::new(),
            Behavior::FailAfterSmoke if !first_call => anyhow::bail!("CUDA out of memory"),
            Behavior::Fixed(text) => text.to_owned(),
            _ => format!("reply:{}", prompt.len()),
        };

        if first_call {
            return Ok(reply);
        }

        *self.counters.last_prompt.lock().unwrap() = Some(prompt.to_owned());

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);

        for c in reply.chars() {
            self.counters.transcript.lock().unwrap().push(c);
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        Ok(reply)
    }
}

/// A 10-byte stand-in for a model file.
pub fn dummy_model_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"GGUFdummy!").unwrap();
    path
}

pub fn descriptor(id: &str, path: PathBuf) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_owned(),
        name: format!("{id} model"),
        path,
        model_type: "test".to_owned(),
        context_length: 2048,
        gpu_layers: 0,
        environment: BTreeSet::from([
            DeploymentEnvironment::Development,
            DeploymentEnvironment::Production,
        ]),
    }
}

pub struct Fixture {
    pub service: Arc<InferenceService>,
    pub status: Arc<FileStatusStore>,
    pub dir: TempDir,
}

/// A service over models `ids`, each backed by a dummy file, with a file status store.
pub async fn fixture(
    backend: Arc<dyn ModelBackend>,
    strategy: LoadStrategy,
    mode: ServingMode,
    ids: &[&str],
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let models = ids
        .iter()
        .map(|id| descriptor(id, dummy_model_file(dir.path(), &format!("{id}.gguf"))))
        .collect::<Vec<_>>();
    fixture_with_models(dir, backend, strategy, mode, models).await
}

pub async fn fixture_with_models(
    dir: TempDir,
    backend: Arc<dyn ModelBackend>,
    strategy: LoadStrategy,
    mode: ServingMode,
    models: Vec<ModelDescriptor>,
) -> Fixture {
    let status = Arc::new(FileStatusStore::open(dir.path().join("status")).await.unwrap());
    let service = service_with_store(backend, strategy, mode, models, status.clone());

    Fixture {
        service,
        status,
        dir,
    }
}

pub fn service_with_store(
    backend: Arc<dyn ModelBackend>,
    strategy: LoadStrategy,
    mode: ServingMode,
    models: Vec<ModelDescriptor>,
    status: Arc<dyn StatusStore>,
) -> Arc<InferenceService> {
    Arc::new(InferenceService::new(
        InferenceConfig {
            environment: DeploymentEnvironment::Development,
            catalog: ModelCatalog::new(models),
            load_strategy: strategy,
            serving_mode: mode,
            budget: PromptBudget::default(),
            generation: GenerationParams::default(),
        },
        backend,
        status,
    ))
}

/// Delegates to `inner` but fails the first `Ready` write.
pub struct LosesFirstReady {
    pub inner: Arc<dyn StatusStore>,
    pub ready_writes: AtomicUsize,
}

#[async_trait]
impl StatusStore for LosesFirstReady {
    async fn set_status(
        &self,
        model_id: &str,
        status: ModelStatus,
        error: Option<String>,
    ) -> Result<(), StatusError> {
        if status == ModelStatus::Ready && self.ready_writes.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StatusError::Io(std::io::Error::other("disk full")));
        }
        self.inner.set_status(model_id, status, error).await
    }

    async fn get_status(&self, model_id: &str) -> Result<StatusRecord, StatusError> {
        self.inner.get_status(model_id).await
    }
}

/// Polls until `model_id` reaches `want` with no load in flight.
pub async fn wait_for_status(
    service: &InferenceService,
    model_id: &str,
    want: ModelStatus,
) -> StatusRecord {
    for _ in 0..500 {
        let record = service.model_status(model_id).await.unwrap();
        if record.status == want && !service.is_loading(model_id) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{model_id} never reached {want}");
}

pub async fn set_status(store: &dyn StatusStore, model_id: &str, status: ModelStatus) {
    store.set_status(model_id, status, None).await.unwrap();
}
