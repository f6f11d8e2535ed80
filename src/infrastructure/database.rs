//! Pooled SQLite connection

use di::inject;
use di::injectable;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://lemtosh.db?mode=rwc";

/// Pool handed out by the DI container instead of a fresh lazy pool.
///
/// The binary installs its migrated pool here; tests install in-memory pools.
static SHARED_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create() -> DatabaseConnection {
        if let Some(pool) = SHARED_POOL
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return DatabaseConnection { connection: pool };
        }

        dotenvy::dotenv().ok();
        let connection_string =
            env::var("DATABASE_URL").unwrap_or(DEFAULT_DATABASE_URL.to_owned());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy(&connection_string)
            .expect("Cannot connect to database");

        DatabaseConnection { connection: pool }
    }
}

impl DatabaseConnection {
    pub fn set_shared_pool(pool: SqlitePool) {
        *SHARED_POOL.lock().unwrap_or_else(|e| e.into_inner()) = Some(pool);
    }

    pub fn clear_shared_pool() {
        SHARED_POOL.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
