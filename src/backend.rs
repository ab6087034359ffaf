//! Chooses the storage backend named by `[backend] kind`.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use scriptorium_core::store::memory::InMemoryStore;
use scriptorium_core::store::Backend;

use crate::config::{BackendKind, Config};
use crate::rest_store::RestStore;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Opens the configured backend. SQLite databases are migrated on open.
pub async fn open_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    match config.backend.kind {
        BackendKind::Sqlite => {
            let pool = db::connect(config).await?;
            migrate::migrate_pool(&pool).await?;
            info!(path = %config.db()?.path.display(), "using sqlite backend");
            Ok(Arc::new(SqliteStore::new(pool)))
        }
        BackendKind::Rest => {
            let rest = config.rest()?;
            info!(url = %rest.url, "using hosted rest backend");
            Ok(Arc::new(RestStore::new(rest)?))
        }
        BackendKind::Memory => {
            info!("using in-memory backend; nothing will be persisted");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}
