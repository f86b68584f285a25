use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use polydata_core::{PolyError, PolyResult};

const DEFAULT_CONFIG_NAME: &str = "polydata.json";
const DEFAULT_DB_NAME: &str = "polydata.db";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
}

impl StorageConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> PolyResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| PolyError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| PolyError::storage(format!("read config: {err}")))?;
            let config: StorageConfig =
                serde_json::from_str(&raw).map_err(|err| PolyError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = StorageConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| PolyError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| PolyError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> PolyResult<PathBuf> {
        let DatabaseConfig::Sqlite { path } = &self.database;
        let path = path.clone().unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            Ok(candidate)
        } else {
            Ok(base_dir.join(candidate))
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
        }
    }
}

pub(crate) fn default_db_name() -> &'static str {
    DEFAULT_DB_NAME
}
