pub mod database;
pub mod entities;
pub mod repositories;
pub mod status_store;
pub mod traits;
pub mod wgml_backend;
