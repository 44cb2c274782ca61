//! Generic SQLite repository over an `EntityMapper`.
//!
//! # Responsibility
//! - Stage writes on the bound unit of work and invalidate affected cache keys.
//! - Serve reads from the staged-entity index, then the cache, then storage.
//!
//! # Invariants
//! - A staged-but-unflushed write is visible to `get` and `get_all` of the
//!   same unit of work; a staged delete hides the entity.
//! - `get_by_query` and `count` read committed storage only.
//! - Cache hits are returned as fresh handles over cloned entities.
//! - Identity lists are loaded in chunks of the unit of work's parameter budget.
//! - `exists` reads storage only.

use crate::cache::{entity_key, invalidate_entity, query_key, CacheHandle};
use crate::diagnostics::DiagnosticsHandle;
use crate::model::entity::{Entity, EntityHandle, EntityId};
use crate::query::translate::{translate, SqlFilter};
use crate::query::{Predicate, Query};
use crate::repo::{EntityMapper, RepoError, RepoResult, Repository, IDENTITY_PROPERTY};
use crate::uow::stage::EntityOperation;
use crate::uow::{OperationKind, StagedEntry, UnitOfWork};
use rusqlite::params_from_iter;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

const MODULE: &str = "repo";

/// Repository bound to one unit of work.
pub struct SqliteRepository<'uow, 'conn, M: EntityMapper> {
    uow: &'uow UnitOfWork<'conn>,
    mapper: Rc<M>,
    cache: CacheHandle,
    diagnostics: DiagnosticsHandle,
}

impl<'uow, 'conn, M: EntityMapper> SqliteRepository<'uow, 'conn, M> {
    pub fn with_mapper(
        uow: &'uow UnitOfWork<'conn>,
        mapper: M,
        cache: CacheHandle,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        Self {
            uow,
            mapper: Rc::new(mapper),
            cache,
            diagnostics,
        }
    }

    pub fn unit_of_work(&self) -> &'uow UnitOfWork<'conn> {
        self.uow
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Runs `filter` against storage and hydrates every row, ordered by identity.
    pub(crate) fn load(&self, filter: &SqlFilter) -> RepoResult<Vec<M::Entity>> {
        let conn = self.uow.connection()?;
        let sql = format!(
            "{} WHERE {} ORDER BY {} ASC",
            self.mapper.select_sql(),
            filter.clause,
            self.mapper.identity_column()
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.params.iter()))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            let mut entity = self.mapper.hydrate(conn, row)?;
            entity.mark_clean();
            entities.push(entity);
        }

        self.diagnostics.debug(
            "repo_load",
            MODULE,
            &format!(
                "status=ok entity_type={} rows={}",
                M::Entity::ENTITY_TYPE,
                entities.len()
            ),
        );
        Ok(entities)
    }

    pub(crate) fn filter_for(&self, predicate: Option<&Predicate>) -> RepoResult<SqlFilter> {
        translate(
            predicate,
            &*self.mapper,
            self.uow.parameter_budget(),
        )
    }

    fn cached_entity(&self, id: EntityId) -> Option<M::Entity> {
        let key = entity_key(M::Entity::ENTITY_TYPE, id);
        let value = self.cache.get(&key)?;
        match value.downcast_ref::<M::Entity>() {
            Some(entity) => Some(entity.clone()),
            None => {
                // Foreign value under our key; drop it and fall through to storage.
                self.cache.clear(&key);
                None
            }
        }
    }

    fn cached_query(&self, key: &str) -> Option<Vec<M::Entity>> {
        let value = self.cache.get(key)?;
        match value.downcast_ref::<Vec<M::Entity>>() {
            Some(entities) => Some(entities.clone()),
            None => {
                self.cache.clear(key);
                None
            }
        }
    }

    fn remember(&self, entity: &M::Entity) {
        if let Some(id) = entity.id() {
            self.cache.put(
                &entity_key(M::Entity::ENTITY_TYPE, id),
                Arc::new(entity.clone()),
            );
        }
    }

    fn stage(&self, kind: OperationKind, entity: &EntityHandle<M::Entity>) -> RepoResult<()> {
        let operation = EntityOperation::new(
            kind,
            entity.clone(),
            Rc::clone(&self.mapper),
            Arc::clone(&self.cache),
        );
        self.uow.stage(Box::new(operation))?;

        let id = entity.id();
        invalidate_entity(self.cache.as_ref(), M::Entity::ENTITY_TYPE, id);
        self.diagnostics.debug(
            "repo_stage",
            MODULE,
            &format!(
                "status=ok uow_id={} entity_type={} op={kind} id={}",
                self.uow.id(),
                M::Entity::ENTITY_TYPE,
                id.map_or_else(|| "new".to_string(), |id| id.to_string())
            ),
        );
        Ok(())
    }

    /// Reports failures to diagnostics without altering them.
    fn observe<T>(&self, operation: &str, result: RepoResult<T>) -> RepoResult<T> {
        if let Err(err) = &result {
            self.diagnostics.error(
                "repo_call",
                MODULE,
                &format!(
                    "status=error uow_id={} entity_type={} op={operation} error={err}",
                    self.uow.id(),
                    M::Entity::ENTITY_TYPE
                ),
            );
        }
        result
    }

    fn get_inner(&self, id: EntityId) -> RepoResult<Option<EntityHandle<M::Entity>>> {
        self.uow.ensure_usable()?;
        match self.uow.staged_entry::<M::Entity>(id) {
            Some(StagedEntry::Deleted) => return Ok(None),
            Some(StagedEntry::Pending(handle)) => return Ok(Some(handle)),
            None => {}
        }

        if let Some(entity) = self.cached_entity(id) {
            return Ok(Some(EntityHandle::new(entity)));
        }

        let filter = self.filter_for(Some(&Predicate::eq(IDENTITY_PROPERTY, id)))?;
        let entity = self.load(&filter)?.into_iter().next();
        Ok(entity.map(|entity| {
            self.remember(&entity);
            EntityHandle::new(entity)
        }))
    }

    fn get_all_inner(&self, ids: &[EntityId]) -> RepoResult<Vec<EntityHandle<M::Entity>>> {
        if ids.is_empty() {
            return self.all_with_staged();
        }
        self.uow.ensure_usable()?;

        let mut seen = HashSet::with_capacity(ids.len());
        let requested: Vec<EntityId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut found: HashMap<EntityId, EntityHandle<M::Entity>> = HashMap::new();
        let mut misses = Vec::new();
        for &id in &requested {
            match self.uow.staged_entry::<M::Entity>(id) {
                Some(StagedEntry::Deleted) => continue,
                Some(StagedEntry::Pending(handle)) => {
                    found.insert(id, handle);
                    continue;
                }
                None => {}
            }
            match self.cached_entity(id) {
                Some(entity) => {
                    found.insert(id, EntityHandle::new(entity));
                }
                None => misses.push(id),
            }
        }

        let chunk_size = self.uow.parameter_budget();
        for chunk in misses.chunks(chunk_size) {
            let predicate = Predicate::is_in(IDENTITY_PROPERTY, chunk.iter().copied());
            let filter = self.filter_for(Some(&predicate))?;
            for entity in self.load(&filter)? {
                self.remember(&entity);
                if let Some(id) = entity.id() {
                    found.insert(id, EntityHandle::new(entity));
                }
            }
        }

        Ok(requested
            .into_iter()
            .filter_map(|id| found.remove(&id))
            .collect())
    }

    /// Committed rows overlaid with this unit of work's staged writes.
    fn all_with_staged(&self) -> RepoResult<Vec<EntityHandle<M::Entity>>> {
        let stored = self.get_by_query_inner(&Query::all())?;
        let mut entities = Vec::with_capacity(stored.len());
        for handle in stored {
            match handle
                .id()
                .and_then(|id| self.uow.staged_entry::<M::Entity>(id))
            {
                Some(StagedEntry::Deleted) => {}
                Some(StagedEntry::Pending(staged)) => entities.push(staged),
                None => entities.push(handle),
            }
        }
        entities.extend(self.uow.staged_inserts::<M::Entity>());
        Ok(entities)
    }

    fn get_by_query_inner(
        &self,
        query: &Query<M::Entity>,
    ) -> RepoResult<Vec<EntityHandle<M::Entity>>> {
        self.uow.ensure_usable()?;
        let filter = self.filter_for(query.predicate())?;

        let key = query_key(M::Entity::ENTITY_TYPE, &query.fingerprint());
        if let Some(entities) = self.cached_query(&key) {
            return Ok(entities.into_iter().map(EntityHandle::new).collect());
        }

        let entities = self.load(&filter)?;
        for entity in &entities {
            self.remember(entity);
        }
        self.cache.put(&key, Arc::new(entities.clone()));
        Ok(entities.into_iter().map(EntityHandle::new).collect())
    }

    fn exists_inner(&self, id: EntityId) -> RepoResult<bool> {
        let conn = self.uow.connection()?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            self.mapper.table(),
            self.mapper.identity_column()
        );
        let exists: i64 = conn.query_row(&sql, [id], |row| row.get(0))?;
        Ok(exists != 0)
    }

    fn count_inner(&self, query: &Query<M::Entity>) -> RepoResult<u64> {
        let filter = self.filter_for(query.predicate())?;
        let conn = self.uow.connection()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.mapper.table(),
            filter.clause
        );
        let count: i64 =
            conn.query_row(&sql, params_from_iter(filter.params.iter()), |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }
}

impl<'uow, 'conn, M: EntityMapper + Default> SqliteRepository<'uow, 'conn, M> {
    /// Repository sharing the unit of work's cache and diagnostics.
    pub fn for_unit_of_work(uow: &'uow UnitOfWork<'conn>) -> Self {
        Self::with_mapper(uow, M::default(), uow.cache(), uow.diagnostics())
    }
}

impl<M: EntityMapper> Repository<M::Entity> for SqliteRepository<'_, '_, M> {
    fn add_or_update(&self, entity: &EntityHandle<M::Entity>) -> RepoResult<()> {
        let result = self.uow.ensure_usable().and_then(|()| {
            entity.read().validate()?;
            let kind = if entity.has_identity() {
                OperationKind::Update
            } else {
                OperationKind::Insert
            };
            self.stage(kind, entity)
        });
        self.observe("add_or_update", result)
    }

    fn get(&self, id: EntityId) -> RepoResult<Option<EntityHandle<M::Entity>>> {
        self.observe("get", self.get_inner(id))
    }

    fn get_all(&self, ids: &[EntityId]) -> RepoResult<Vec<EntityHandle<M::Entity>>> {
        self.observe("get_all", self.get_all_inner(ids))
    }

    fn get_by_query(
        &self,
        query: &Query<M::Entity>,
    ) -> RepoResult<Vec<EntityHandle<M::Entity>>> {
        self.observe("get_by_query", self.get_by_query_inner(query))
    }

    fn exists(&self, id: EntityId) -> RepoResult<bool> {
        self.observe("exists", self.exists_inner(id))
    }

    fn count(&self, query: &Query<M::Entity>) -> RepoResult<u64> {
        self.observe("count", self.count_inner(query))
    }

    fn delete(&self, entity: &EntityHandle<M::Entity>) -> RepoResult<()> {
        let result = self
            .uow
            .ensure_usable()
            .and_then(|()| self.stage(OperationKind::Delete, entity));
        self.observe("delete", result)
    }
}
