//! Boundary with the inference engine.
//!
//! The engine is a black box: a [`ModelBackend`] turns a descriptor into a
//! [`Generator`], and a generator turns a prompt into text.

use crate::config::{GenerationParams, ModelDescriptor};
use async_trait::async_trait;

/// A model resident in memory, ready to generate.
#[async_trait]
pub trait Generator: Send {
    async fn generate(&mut self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String>;
}

/// Loads model weights into a [`Generator`]. Slow and resource heavy.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn load(&self, descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn Generator>>;
}

/// Byte length of `text` up to the first occurrence of any stop sequence.
pub fn truncate_at_stop(text: &str, stop: &[String]) -> usize {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len())
}
