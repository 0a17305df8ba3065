//! SQLite persistence location.

use std::env;

#[derive(Debug, Clone)]
pub struct StorageEnvConfig {
    pub db_path: String,
}

impl StorageEnvConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/bot.db".to_string()),
        }
    }
}
