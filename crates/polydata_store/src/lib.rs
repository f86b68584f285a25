pub mod config;
pub mod datastore;
mod db;
pub mod migration;
pub mod store;

pub use polydata_core::*;

pub use config::{DatabaseConfig, PoolConfig, StorageConfig};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use db::RowKind;
pub use store::{index_key, PolyStorage};
