//! User type storage mapping and repository.
//!
//! # Responsibility
//! - Map `UserType` onto `user_types` and its ordered `user_type_permissions`.
//! - Expose the user type repository callers construct per unit of work.
//!
//! # Invariants
//! - Permission rows are rewritten as a whole on every update; `position`
//!   preserves caller order.
//! - Hydrated rows must pass `UserType::validate`; invalid persisted state is
//!   reported as `InvalidData` instead of being masked.

use crate::cache::CacheHandle;
use crate::diagnostics::DiagnosticsHandle;
use crate::model::entity::{Entity, EntityHandle, EntityId};
use crate::model::user_type::{
    UserType, PROPERTY_ALIAS, PROPERTY_ID, PROPERTY_NAME, PROPERTY_PERMISSION,
};
use crate::query::translate::{FilterTarget, PropertyMap};
use crate::query::{Predicate, Query};
use crate::repo::engine::SqliteRepository;
use crate::repo::{EntityMapper, RepoError, RepoResult, Repository};
use crate::uow::UnitOfWork;
use rusqlite::{params, Connection, Row};

const USER_TYPE_SELECT_SQL: &str = "SELECT
    user_types.id AS id,
    user_types.name AS name,
    user_types.alias AS alias
FROM user_types";

const PERMISSION_SUBQUERY: &str =
    "SELECT 1 FROM user_type_permissions p WHERE p.user_type_id = user_types.id";

/// Storage mapping of [`UserType`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UserTypeMapper;

impl PropertyMap for UserTypeMapper {
    fn filter_target(&self, property: &str) -> Option<FilterTarget> {
        match property {
            PROPERTY_ID => Some(FilterTarget::Column("user_types.id")),
            PROPERTY_NAME => Some(FilterTarget::Column("user_types.name")),
            PROPERTY_ALIAS => Some(FilterTarget::Column("user_types.alias")),
            PROPERTY_PERMISSION => Some(FilterTarget::Exists {
                subquery: PERMISSION_SUBQUERY,
                column: "p.code",
            }),
            _ => None,
        }
    }
}

impl EntityMapper for UserTypeMapper {
    type Entity = UserType;

    fn table(&self) -> &'static str {
        "user_types"
    }

    fn identity_column(&self) -> &'static str {
        "user_types.id"
    }

    fn select_sql(&self) -> &'static str {
        USER_TYPE_SELECT_SQL
    }

    fn hydrate(&self, conn: &Connection, row: &Row<'_>) -> RepoResult<UserType> {
        let id: EntityId = row.get("id")?;
        let name: String = row.get("name")?;
        let alias: String = row.get("alias")?;
        let permissions = load_permissions(conn, id)?;

        let user_type = UserType::hydrate(id, name, alias, permissions);
        user_type.validate().map_err(|err| {
            RepoError::InvalidData(format!("user_types row {id} is invalid: {err}"))
        })?;
        Ok(user_type)
    }

    fn insert(&self, conn: &Connection, entity: &UserType) -> RepoResult<EntityId> {
        conn.execute(
            "INSERT INTO user_types (name, alias) VALUES (?1, ?2);",
            params![entity.name(), entity.alias()],
        )?;
        let id = conn.last_insert_rowid();
        write_permissions(conn, id, entity.permissions())?;
        Ok(id)
    }

    fn update(&self, conn: &Connection, entity: &UserType) -> RepoResult<()> {
        let id = entity.id().ok_or(RepoError::NotFound {
            entity_type: UserType::ENTITY_TYPE,
            id: None,
        })?;
        let changed = conn.execute(
            "UPDATE user_types
             SET name = ?1,
                 alias = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?3;",
            params![entity.name(), entity.alias(), id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity_type: UserType::ENTITY_TYPE,
                id: Some(id),
            });
        }

        conn.execute(
            "DELETE FROM user_type_permissions WHERE user_type_id = ?1;",
            [id],
        )?;
        write_permissions(conn, id, entity.permissions())
    }

    fn delete(&self, conn: &Connection, id: EntityId) -> RepoResult<()> {
        let changed = conn.execute("DELETE FROM user_types WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity_type: UserType::ENTITY_TYPE,
                id: Some(id),
            });
        }
        Ok(())
    }
}

/// Repository of [`UserType`] bound to one unit of work.
pub type UserTypeRepository<'uow, 'conn> = SqliteRepository<'uow, 'conn, UserTypeMapper>;

impl<'uow, 'conn> SqliteRepository<'uow, 'conn, UserTypeMapper> {
    pub fn new(
        uow: &'uow UnitOfWork<'conn>,
        cache: CacheHandle,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        Self::with_mapper(uow, UserTypeMapper, cache, diagnostics)
    }

    /// Looks a user type up by alias, ignoring ASCII case.
    pub fn get_by_alias(&self, alias: &str) -> RepoResult<Option<EntityHandle<UserType>>> {
        let query = Query::<UserType>::all().filter(Predicate::eq(PROPERTY_ALIAS, alias));
        Ok(self.get_by_query(&query)?.into_iter().next())
    }
}

fn load_permissions(conn: &Connection, user_type_id: EntityId) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT code
         FROM user_type_permissions
         WHERE user_type_id = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([user_type_id])?;
    let mut codes = Vec::new();
    while let Some(row) = rows.next()? {
        codes.push(row.get(0)?);
    }
    Ok(codes)
}

fn write_permissions(conn: &Connection, user_type_id: EntityId, codes: &[String]) -> RepoResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO user_type_permissions (user_type_id, position, code)
         VALUES (?1, ?2, ?3);",
    )?;
    for (position, code) in codes.iter().enumerate() {
        stmt.execute(params![user_type_id, position as i64, code])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{UserTypeMapper, UserTypeRepository};
    use crate::cache::MemoryCache;
    use crate::config::EngineConfig;
    use crate::diagnostics::NoopDiagnostics;
    use crate::model::entity::EntityHandle;
    use crate::model::user_type::UserType;
    use crate::query::translate::{translate, FilterTarget, PropertyMap};
    use crate::query::Predicate;
    use crate::repo::Repository;
    use crate::uow::UnitOfWorkProvider;

    #[test]
    fn permission_property_maps_to_exists_subquery() {
        assert!(matches!(
            UserTypeMapper.filter_target("permission"),
            Some(FilterTarget::Exists { column: "p.code", .. })
        ));
        assert!(UserTypeMapper.filter_target("permissions").is_none());

        let filter = translate(Some(&Predicate::eq("permission", "A")), &UserTypeMapper, 10)
            .unwrap();
        assert!(filter.clause.starts_with("EXISTS (SELECT 1 FROM user_type_permissions p"));
    }

    #[test]
    fn permissions_round_trip_in_caller_order() {
        let mut provider = UnitOfWorkProvider::open_in_memory(EngineConfig::default()).unwrap();
        let uow = provider.create_unit_of_work();
        let repo = UserTypeRepository::new(&uow, MemoryCache::handle(), NoopDiagnostics::handle());

        let handle = EntityHandle::new(UserType::new("Writer", "writer", ["Z", "A", "M"]));
        repo.add_or_update(&handle).unwrap();
        uow.flush().unwrap();

        let id = handle.id().unwrap();
        let loaded = repo.get(id).unwrap().unwrap();
        assert_eq!(loaded.read().permissions(), ["Z", "A", "M"]);
    }

    #[test]
    fn get_by_alias_ignores_case() {
        let mut provider = UnitOfWorkProvider::open_in_memory(EngineConfig::default()).unwrap();
        let uow = provider.create_unit_of_work();
        let repo = UserTypeRepository::for_unit_of_work(&uow);

        repo.add_or_update(&EntityHandle::new(UserType::new("Editor", "editor", ["A"])))
            .unwrap();
        uow.flush().unwrap();

        let found = repo.get_by_alias("EDITOR").unwrap().unwrap();
        assert_eq!(found.read().name(), "Editor");
        assert!(repo.get_by_alias("missing").unwrap().is_none());
    }
}
