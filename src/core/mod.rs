//! Model lifecycle and inference serving.

pub mod engine;
pub mod error;
pub mod inference;
pub mod loader;
pub mod registry;
pub mod services;
pub mod status;
pub mod traits;
pub mod window;
