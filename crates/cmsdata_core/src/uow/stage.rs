//! Staged operations recorded by repositories on a unit of work.

use crate::cache::{invalidate_entity, CacheHandle};
use crate::diagnostics::Diagnostics;
use crate::model::entity::{Entity, EntityHandle, EntityId};
use crate::repo::{EntityMapper, RepoError, RepoResult};
use rusqlite::Connection;
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Kind of write a staged operation performs at flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StageSlot {
    Persisted(EntityId),
    /// Address of a not-yet-inserted entity handle.
    Provisional(usize),
}

/// Identifies one entity within a unit of work's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StageKey {
    pub(crate) entity_type: &'static str,
    pub(crate) slot: StageSlot,
}

impl StageKey {
    pub(crate) fn for_handle<E: Entity>(handle: &EntityHandle<E>) -> Self {
        let slot = match handle.id() {
            Some(id) => StageSlot::Persisted(id),
            None => StageSlot::Provisional(handle.token()),
        };
        Self {
            entity_type: E::ENTITY_TYPE,
            slot,
        }
    }

    pub(crate) fn persisted(entity_type: &'static str, id: EntityId) -> Self {
        Self {
            entity_type,
            slot: StageSlot::Persisted(id),
        }
    }
}

/// Type-erased operation applied inside the flush transaction.
pub(crate) trait StagedOperation {
    fn kind(&self) -> OperationKind;
    fn key(&self) -> StageKey;
    /// Writes to storage; inserts return the identity storage assigned.
    fn apply(&self, conn: &Connection) -> RepoResult<Option<EntityId>>;
    /// Runs after commit: identity write-back, dirty reset, cache invalidation.
    fn committed(&self, assigned: Option<EntityId>, diagnostics: &dyn Diagnostics);
    /// The staged `EntityHandle<E>`, for the staged-entity index.
    fn entity_any(&self) -> &dyn Any;
}

/// Staged write of one entity through its mapper.
pub(crate) struct EntityOperation<M: EntityMapper> {
    kind: OperationKind,
    key: StageKey,
    handle: EntityHandle<M::Entity>,
    mapper: Rc<M>,
    cache: CacheHandle,
}

impl<M: EntityMapper> EntityOperation<M> {
    pub(crate) fn new(
        kind: OperationKind,
        handle: EntityHandle<M::Entity>,
        mapper: Rc<M>,
        cache: CacheHandle,
    ) -> Self {
        Self {
            kind,
            key: StageKey::for_handle(&handle),
            handle,
            mapper,
            cache,
        }
    }

    fn not_found(&self, id: Option<EntityId>) -> RepoError {
        RepoError::NotFound {
            entity_type: M::Entity::ENTITY_TYPE,
            id,
        }
    }
}

impl<M: EntityMapper> StagedOperation for EntityOperation<M> {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn key(&self) -> StageKey {
        self.key
    }

    fn apply(&self, conn: &Connection) -> RepoResult<Option<EntityId>> {
        let entity = self.handle.try_read().map_err(|_| {
            RepoError::Conflict(format!(
                "{} is mutably borrowed during flush",
                M::Entity::ENTITY_TYPE
            ))
        })?;
        match self.kind {
            OperationKind::Insert => {
                if let Some(id) = entity.id() {
                    return Err(RepoError::Conflict(format!(
                        "{} staged for insert already has identity {id}",
                        M::Entity::ENTITY_TYPE
                    )));
                }
                self.mapper.insert(conn, &entity).map(Some)
            }
            OperationKind::Update => {
                if entity.id().is_none() {
                    return Err(self.not_found(None));
                }
                self.mapper.update(conn, &entity)?;
                Ok(None)
            }
            OperationKind::Delete => {
                let id = entity.id().ok_or_else(|| self.not_found(None))?;
                self.mapper.delete(conn, id)?;
                Ok(None)
            }
        }
    }

    fn committed(&self, assigned: Option<EntityId>, diagnostics: &dyn Diagnostics) {
        let Ok(mut entity) = self.handle.try_write() else {
            // Storage is committed; only the in-memory write-back is skipped.
            let id = match self.key.slot {
                StageSlot::Persisted(id) => Some(id),
                StageSlot::Provisional(_) => assigned,
            };
            diagnostics.error(
                "identity_assign",
                "uow",
                &format!(
                    "status=error entity_type={} id={} error=entity borrowed during flush",
                    M::Entity::ENTITY_TYPE,
                    id.map_or_else(|| "none".to_string(), |id| id.to_string())
                ),
            );
            invalidate_entity(self.cache.as_ref(), M::Entity::ENTITY_TYPE, id);
            return;
        };
        if let Some(id) = assigned {
            if let Err(err) = entity.assign_identity(id) {
                diagnostics.error(
                    "identity_assign",
                    "uow",
                    &format!(
                        "status=error entity_type={} error={err}",
                        M::Entity::ENTITY_TYPE
                    ),
                );
            }
        }
        entity.mark_clean();
        invalidate_entity(self.cache.as_ref(), M::Entity::ENTITY_TYPE, entity.id());
    }

    fn entity_any(&self) -> &dyn Any {
        &self.handle
    }
}
