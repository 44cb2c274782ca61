//! Persistence engine for CMS back-office data.
//!
//! Entities are staged on a [`UnitOfWork`] through per-type repositories and
//! committed atomically by `flush`. Reads go through the unit of work's staged
//! writes, then an injected cache, then SQLite.

pub mod cache;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;
pub mod uow;

pub use cache::{
    shared_runtime_cache, CacheHandle, CacheStats, DisabledCache, MemoryCache, RepositoryCache,
    ScopedCache,
};
pub use config::{ConfigError, DisposePolicy, EngineConfig};
pub use db::{DbError, DbResult};
pub use diagnostics::{Diagnostics, DiagnosticsHandle, LogDiagnostics, NoopDiagnostics};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityHandle, EntityId, IdentityError, ValidationError};
pub use model::user_type::UserType;
pub use query::{Predicate, Query, QueryValue};
pub use repo::user_type_repo::{UserTypeMapper, UserTypeRepository};
pub use repo::{EntityMapper, RepoError, RepoResult, Repository, SqliteRepository};
pub use service::user_type_service::UserTypeService;
pub use uow::{FlushReport, OperationKind, UnitOfWork, UnitOfWorkProvider, UnitOfWorkState};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
