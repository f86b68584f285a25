use std::path::{Path, PathBuf};

use crate::config::default_db_name;
use crate::{PolyResult, PolyStorage, StorageConfig};

pub fn load_or_init_config(base: &Path) -> PolyResult<StorageConfig> {
    let default_sqlite = base.join(default_db_name());
    StorageConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(base: &Path) -> PolyResult<PolyStorage> {
    let config = load_or_init_config(base)?;
    PolyStorage::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(default_db_name())
}
