//! User type use-case service.
//!
//! # Responsibility
//! - Provide one-call CRUD entry points over user types.
//! - Scope every call to its own unit of work.
//!
//! # Invariants
//! - Successful calls complete their unit of work; failed calls discard it,
//!   whatever the configured dispose policy.
//! - Returned user types are detached copies, never staged handles.

use crate::model::entity::{EntityHandle, EntityId};
use crate::model::user_type::UserType;
use crate::repo::user_type_repo::UserTypeRepository;
use crate::repo::{RepoResult, Repository};
use crate::uow::{UnitOfWork, UnitOfWorkProvider};

/// Use-case service wrapper for user type persistence.
pub struct UserTypeService {
    provider: UnitOfWorkProvider,
}

impl UserTypeService {
    pub fn new(provider: UnitOfWorkProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &UnitOfWorkProvider {
        &self.provider
    }

    /// Inserts or updates `user_type` and returns it as persisted.
    ///
    /// # Contract
    /// - A user type without identity comes back with the identity storage
    ///   assigned.
    pub fn save(&mut self, user_type: UserType) -> RepoResult<UserType> {
        let uow = self.provider.create_unit_of_work();
        let handle = EntityHandle::new(user_type);
        let staged = UserTypeRepository::for_unit_of_work(&uow).add_or_update(&handle);
        finish(uow, staged)?;
        Ok(handle.snapshot())
    }

    pub fn get(&mut self, id: EntityId) -> RepoResult<Option<UserType>> {
        let uow = self.provider.create_unit_of_work();
        let found = UserTypeRepository::for_unit_of_work(&uow)
            .get(id)
            .map(|handle| handle.map(|handle| handle.snapshot()));
        finish(uow, found)
    }

    pub fn get_by_alias(&mut self, alias: &str) -> RepoResult<Option<UserType>> {
        let uow = self.provider.create_unit_of_work();
        let found = UserTypeRepository::for_unit_of_work(&uow)
            .get_by_alias(alias)
            .map(|handle| handle.map(|handle| handle.snapshot()));
        finish(uow, found)
    }

    /// Lists every user type, ordered by identity.
    pub fn list(&mut self) -> RepoResult<Vec<UserType>> {
        let uow = self.provider.create_unit_of_work();
        let listed = UserTypeRepository::for_unit_of_work(&uow)
            .get_all(&[])
            .map(|handles| handles.iter().map(EntityHandle::snapshot).collect());
        finish(uow, listed)
    }

    /// Deletes the user type with `id`.
    ///
    /// Returns `false` when no such user type exists.
    pub fn delete(&mut self, id: EntityId) -> RepoResult<bool> {
        let uow = self.provider.create_unit_of_work();
        let deleted = {
            let repo = UserTypeRepository::for_unit_of_work(&uow);
            repo.get(id).and_then(|found| match found {
                Some(handle) => repo.delete(&handle).map(|()| true),
                None => Ok(false),
            })
        };
        finish(uow, deleted)
    }
}

/// Completes `uow` when `result` is `Ok`, discards it otherwise.
fn finish<T>(uow: UnitOfWork<'_>, result: RepoResult<T>) -> RepoResult<T> {
    match result {
        Ok(value) => {
            uow.complete()?;
            Ok(value)
        }
        Err(err) => {
            uow.discard();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UserTypeService;
    use crate::config::EngineConfig;
    use crate::model::entity::Entity;
    use crate::model::user_type::UserType;
    use crate::repo::RepoError;
    use crate::uow::UnitOfWorkProvider;

    fn service() -> UserTypeService {
        let provider = UnitOfWorkProvider::open_in_memory(EngineConfig::default())
            .expect("in-memory provider should open");
        UserTypeService::new(provider)
    }

    #[test]
    fn save_assigns_identity_and_get_reloads() {
        let mut service = service();
        let saved = service
            .save(UserType::new("Editor", "editor", ["A", "D"]))
            .unwrap();
        let id = saved.id().expect("identity should be assigned");

        let loaded = service.get(id).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn save_updates_existing_user_type() {
        let mut service = service();
        let mut saved = service
            .save(UserType::new("Editor", "editor", ["A"]))
            .unwrap();
        saved.set_name("Chief Editor");
        service.save(saved.clone()).unwrap();

        let loaded = service.get_by_alias("editor").unwrap().unwrap();
        assert_eq!(loaded.name(), "Chief Editor");
        assert_eq!(service.list().unwrap().len(), 1);
    }

    #[test]
    fn delete_reports_absence_and_removes_rows() {
        let mut service = service();
        let saved = service
            .save(UserType::new("Writer", "writer", ["W"]))
            .unwrap();
        let id = saved.id().unwrap();

        assert!(service.delete(id).unwrap());
        assert!(!service.delete(id).unwrap());
        assert!(service.get(id).unwrap().is_none());
    }

    #[test]
    fn invalid_user_type_is_rejected_without_writes() {
        let mut service = service();
        let err = service
            .save(UserType::new("Broken", "9broken", ["A"]))
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert!(service.list().unwrap().is_empty());
    }
}
