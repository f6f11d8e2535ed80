//! Local LLM chat server: model lifecycle, bounded prompts and completions - Library exports for testing
//!
//! (c) Softlandia 2025

pub mod api;
pub mod config;
pub mod core;
pub mod infrastructure;
