//! Composition root for units of work.

use crate::cache::{CacheHandle, DisabledCache, MemoryCache, ScopedCache};
use crate::config::EngineConfig;
use crate::db::{open_db, open_db_in_memory};
use crate::diagnostics::{DiagnosticsHandle, LogDiagnostics};
use crate::repo::RepoResult;
use crate::uow::UnitOfWork;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

/// Owns a migrated connection and lends it to one unit of work at a time.
pub struct UnitOfWorkProvider {
    conn: Connection,
    config: EngineConfig,
    /// Database identity used to scope shared caches.
    scope: String,
    cache: CacheHandle,
    diagnostics: DiagnosticsHandle,
}

impl UnitOfWorkProvider {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> RepoResult<Self> {
        config.validate()?;
        let path = path.as_ref();
        let conn = open_db(path, config.busy_timeout())?;
        let scope = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        Ok(Self::from_connection(conn, config, scope))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(config: EngineConfig) -> RepoResult<Self> {
        config.validate()?;
        let conn = open_db_in_memory(config.busy_timeout())?;
        Ok(Self::from_connection(conn, config, format!("memory:{}", Uuid::new_v4())))
    }

    /// Cache defaults to a provider-private `MemoryCache`, or `DisabledCache`
    /// when `cache_enabled` is false.
    fn from_connection(conn: Connection, config: EngineConfig, scope: String) -> Self {
        let cache = if config.cache_enabled {
            MemoryCache::handle()
        } else {
            DisabledCache::handle()
        };
        Self {
            conn,
            config,
            scope,
            cache,
            diagnostics: LogDiagnostics::handle(),
        }
    }

    pub fn with_cache(mut self, cache: CacheHandle) -> Self {
        self.cache = cache;
        self
    }

    /// Uses a cache other providers may share, confined to this database.
    pub fn with_shared_cache(self, cache: CacheHandle) -> Self {
        let scoped = ScopedCache::handle(self.scope.clone(), cache);
        self.with_cache(scoped)
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsHandle) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Canonical database path, or a unique label for in-memory databases.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> CacheHandle {
        self.cache.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsHandle {
        self.diagnostics.clone()
    }

    /// Starts a unit of work holding the connection until it is dropped.
    pub fn create_unit_of_work(&mut self) -> UnitOfWork<'_> {
        UnitOfWork::new(
            &mut self.conn,
            self.config.clone(),
            self.cache.clone(),
            self.diagnostics.clone(),
        )
    }
}
