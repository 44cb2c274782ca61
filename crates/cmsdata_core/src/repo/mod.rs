//! Repository contracts and the SQLite repository engine.
//!
//! # Responsibility
//! - Define the per-entity CRUD contract callers program against.
//! - Keep SQL inside mappers; keep staging, caching and chunking in the engine.
//!
//! # Invariants
//! - Writes are staged on a unit of work; storage is only written at flush.
//! - Absence is a normal result (`Ok(None)` / `Ok(false)`), never an error.
//! - Translation and validation failures surface at call time, storage write
//!   failures at flush time.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::entity::{Entity, EntityHandle, EntityId, ValidationError};
use crate::query::translate::PropertyMap;
use crate::query::Query;
use rusqlite::{Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod engine;
pub mod user_type_repo;

pub use engine::SqliteRepository;

/// Property name every mapper resolves to the identity column.
pub const IDENTITY_PROPERTY: &str = "id";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository and unit-of-work error.
#[derive(Debug)]
pub enum RepoError {
    /// Entity invariant broken; rejected before staging.
    Validation(ValidationError),
    /// Storage transport/transaction failure; retryable.
    Db(DbError),
    /// Update/delete target is missing. `id` is `None` for entities that were
    /// never persisted.
    NotFound {
        entity_type: &'static str,
        id: Option<EntityId>,
    },
    /// Identity reuse or a storage constraint violation.
    Conflict(String),
    /// Predicate shape the translator cannot express.
    UnsupportedQuery(String),
    /// The unit of work can no longer be used.
    Unrecoverable(String),
    /// Persisted row cannot be hydrated into a valid entity.
    InvalidData(String),
    Config(ConfigError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound {
                entity_type,
                id: Some(id),
            } => write!(f, "{entity_type} not found: {id}"),
            Self::NotFound {
                entity_type,
                id: None,
            } => write!(f, "{entity_type} not found: entity was never persisted"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::UnsupportedQuery(message) => write!(f, "unsupported query: {message}"),
            Self::Unrecoverable(message) => write!(f, "unrecoverable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::Conflict(_) => None,
            Self::UnsupportedQuery(_) => None,
            Self::Unrecoverable(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            if failure.code == ErrorCode::ConstraintViolation {
                return Self::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| failure.to_string()),
                );
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Per-entity-type CRUD contract.
pub trait Repository<E: Entity> {
    /// Stages an insert (no identity yet) or an update (identity present).
    fn add_or_update(&self, entity: &EntityHandle<E>) -> RepoResult<()>;
    fn get(&self, id: EntityId) -> RepoResult<Option<EntityHandle<E>>>;
    /// Empty `ids` returns every entity of the type.
    fn get_all(&self, ids: &[EntityId]) -> RepoResult<Vec<EntityHandle<E>>>;
    fn get_by_query(&self, query: &Query<E>) -> RepoResult<Vec<EntityHandle<E>>>;
    /// Reads storage directly; the cache is never consulted.
    fn exists(&self, id: EntityId) -> RepoResult<bool>;
    fn count(&self, query: &Query<E>) -> RepoResult<u64>;
    fn delete(&self, entity: &EntityHandle<E>) -> RepoResult<()>;
}

/// Storage mapping of one entity type.
///
/// Queryable columns must be qualified with `table()` so translated filters
/// stay unambiguous inside correlated subqueries.
pub trait EntityMapper: PropertyMap + 'static {
    type Entity: Entity;

    fn table(&self) -> &'static str;
    /// Qualified identity column, e.g. `user_types.id`.
    fn identity_column(&self) -> &'static str;
    /// `SELECT ... FROM <table>` without `WHERE`.
    fn select_sql(&self) -> &'static str;
    fn hydrate(&self, conn: &Connection, row: &Row<'_>) -> RepoResult<Self::Entity>;
    /// Writes a new row and returns the identity storage generated.
    fn insert(&self, conn: &Connection, entity: &Self::Entity) -> RepoResult<EntityId>;
    fn update(&self, conn: &Connection, entity: &Self::Entity) -> RepoResult<()>;
    fn delete(&self, conn: &Connection, id: EntityId) -> RepoResult<()>;
}
