use cmsdata_core::{
    DisabledCache, DisposePolicy, EngineConfig, EntityHandle, NoopDiagnostics, Predicate,
    Query, RepoError, Repository, UnitOfWork, UnitOfWorkProvider, UnitOfWorkState, UserType,
    UserTypeRepository,
};
use cmsdata_core::db::open_db_in_memory;
use rusqlite::limits::Limit;
use serde_json::json;
use std::time::Duration;

fn provider_with(config: EngineConfig) -> UnitOfWorkProvider {
    UnitOfWorkProvider::open_in_memory(config)
        .unwrap()
        .with_cache(DisabledCache::handle())
        .with_diagnostics(NoopDiagnostics::handle())
}

fn provider() -> UnitOfWorkProvider {
    provider_with(EngineConfig::default())
}

fn repo<'uow, 'conn>(uow: &'uow UnitOfWork<'conn>) -> UserTypeRepository<'uow, 'conn> {
    UserTypeRepository::for_unit_of_work(uow)
}

fn user_type(alias: &str) -> EntityHandle<UserType> {
    EntityHandle::new(UserType::new(format!("Type {alias}"), alias, ["A"]))
}

/// A user type carrying an identity storage has never issued.
fn phantom(id: i64) -> EntityHandle<UserType> {
    let user_type: UserType = serde_json::from_value(json!({
        "id": id,
        "name": "Ghost",
        "alias": "ghost",
        "permissions": ["A"],
    }))
    .unwrap();
    EntityHandle::new(user_type)
}

fn row_count(provider: &mut UnitOfWorkProvider) -> u64 {
    let uow = provider.create_unit_of_work();
    let count = repo(&uow).count(&Query::all()).unwrap();
    count
}

#[test]
fn failed_flush_rolls_back_everything_and_keeps_the_stage() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);

    let fresh = user_type("fresh");
    repo.add_or_update(&fresh).unwrap();
    repo.add_or_update(&phantom(999)).unwrap();

    let err = uow.flush().unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound {
            entity_type: "user_type",
            id: Some(999)
        }
    ));

    assert!(!fresh.has_identity(), "rolled back inserts must not leak identities");
    assert_eq!(repo.count(&Query::all()).unwrap(), 0);
    assert_eq!(uow.pending_operations(), 2);
    assert_eq!(uow.state(), UnitOfWorkState::Open);

    // Retrying replays the same stage and fails the same way.
    assert!(matches!(
        uow.flush().unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[test]
fn duplicate_alias_is_a_conflict() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);

    repo.add_or_update(&user_type("editor")).unwrap();
    repo.add_or_update(&user_type("EDITOR")).unwrap();

    assert!(matches!(uow.flush().unwrap_err(), RepoError::Conflict(_)));
    assert_eq!(repo.count(&Query::all()).unwrap(), 0);
}

#[test]
fn deleting_a_never_persisted_entity_fails_at_flush() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);

    repo.delete(&user_type("ghost")).unwrap();
    assert_eq!(uow.pending_operations(), 1);
    assert!(matches!(
        uow.flush().unwrap_err(),
        RepoError::NotFound { id: None, .. }
    ));
}

#[test]
fn deleting_a_staged_insert_unstages_it() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);

    let handle = user_type("draft");
    repo.add_or_update(&handle).unwrap();
    repo.delete(&handle).unwrap();

    assert_eq!(uow.pending_operations(), 0);
    assert!(uow.flush().unwrap().is_empty());
    assert!(!handle.has_identity());
}

#[test]
fn restaging_an_entity_keeps_one_operation() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);

    let handle = user_type("draft");
    repo.add_or_update(&handle).unwrap();
    handle.write().set_name("Draft v2");
    repo.add_or_update(&handle).unwrap();

    assert_eq!(uow.pending_operations(), 1);
    let report = uow.flush().unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.total(), 1);
}

#[test]
fn reads_see_own_staged_writes() {
    let mut provider = provider();
    let id = {
        let uow = provider.create_unit_of_work();
        let handle = user_type("editor");
        repo(&uow).add_or_update(&handle).unwrap();
        uow.complete().unwrap();
        handle.id().unwrap()
    };

    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);
    let loaded = repo.get(id).unwrap().unwrap();
    loaded.write().set_name("Chief Editor");
    repo.add_or_update(&loaded).unwrap();

    let staged = repo.get(id).unwrap().unwrap();
    assert!(staged.same_entity(&loaded));
    assert_eq!(staged.read().name(), "Chief Editor");

    let renamed = uow
        .query::<UserType>()
        .filter(Predicate::eq("name", "Chief Editor"));
    assert_eq!(repo.count(&renamed).unwrap(), 0, "storage holds committed state only");

    uow.flush().unwrap();
    assert_eq!(repo.count(&renamed).unwrap(), 1);
}

#[test]
fn staged_delete_hides_entity_until_flush_removes_it() {
    let mut provider = provider();
    let id = {
        let uow = provider.create_unit_of_work();
        let handle = user_type("editor");
        repo(&uow).add_or_update(&handle).unwrap();
        uow.complete().unwrap();
        handle.id().unwrap()
    };

    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);
    let loaded = repo.get(id).unwrap().unwrap();
    repo.delete(&loaded).unwrap();

    assert!(repo.get(id).unwrap().is_none());
    assert!(repo.get_all(&[id]).unwrap().is_empty());
    assert!(repo.exists(id).unwrap(), "exists reads storage");

    uow.flush().unwrap();
    assert!(!repo.exists(id).unwrap());
}

#[test]
fn dropping_with_discard_policy_has_no_storage_effect() {
    let mut provider = provider();
    {
        let uow = provider.create_unit_of_work();
        repo(&uow).add_or_update(&user_type("dropped")).unwrap();
    }
    assert_eq!(row_count(&mut provider), 0);

    {
        let uow = provider.create_unit_of_work();
        repo(&uow).add_or_update(&user_type("discarded")).unwrap();
        uow.discard();
    }
    assert_eq!(row_count(&mut provider), 0);
}

#[test]
fn dropping_with_flush_policy_persists_pending_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmsdata.db");
    let config = EngineConfig {
        dispose_policy: DisposePolicy::Flush,
        ..EngineConfig::default()
    };

    {
        let mut provider = UnitOfWorkProvider::open(&path, config.clone()).unwrap();
        let uow = provider.create_unit_of_work();
        repo(&uow).add_or_update(&user_type("kept")).unwrap();
    }

    let mut reopened = UnitOfWorkProvider::open(&path, config).unwrap();
    let uow = reopened.create_unit_of_work();
    let kept = repo(&uow).get_by_alias("kept").unwrap();
    assert!(kept.is_some());
}

#[test]
fn complete_reports_what_was_written() {
    let mut provider = provider();
    let uow = provider.create_unit_of_work();
    {
        let repo = repo(&uow);
        repo.add_or_update(&user_type("one")).unwrap();
        repo.add_or_update(&user_type("two")).unwrap();
    }

    let report = uow.complete().unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.updated + report.deleted, 0);
    assert_eq!(row_count(&mut provider), 2);
}

#[test]
fn units_of_work_have_distinct_ids() {
    let mut provider = provider();
    let first = provider.create_unit_of_work().id();
    let second = provider.create_unit_of_work().id();
    assert_ne!(first, second);
}

#[test]
fn config_is_validated_when_opening() {
    let config = EngineConfig {
        max_query_parameters: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        UnitOfWorkProvider::open_in_memory(config),
        Err(RepoError::Config(_))
    ));
}

#[test]
fn listing_everything_reflects_staged_writes() {
    let mut provider = provider();
    let editor_id = {
        let uow = provider.create_unit_of_work();
        let handle = user_type("editor");
        repo(&uow).add_or_update(&handle).unwrap();
        uow.complete().unwrap();
        handle.id().unwrap()
    };
    let reviewer_id = {
        let uow = provider.create_unit_of_work();
        let handle = user_type("reviewer");
        repo(&uow).add_or_update(&handle).unwrap();
        uow.complete().unwrap();
        handle.id().unwrap()
    };

    let uow = provider.create_unit_of_work();
    let repo = repo(&uow);
    let editor = repo.get(editor_id).unwrap().unwrap();
    repo.delete(&editor).unwrap();
    let reviewer = repo.get(reviewer_id).unwrap().unwrap();
    reviewer.write().set_name("Lead Reviewer");
    repo.add_or_update(&reviewer).unwrap();
    let writer = user_type("writer");
    repo.add_or_update(&writer).unwrap();

    let listed = repo.get_all(&[]).unwrap();
    let aliases: Vec<String> = listed
        .iter()
        .map(|handle| handle.read().alias().to_string())
        .collect();
    assert_eq!(aliases, ["reviewer", "writer"]);
    assert!(listed[0].same_entity(&reviewer));
    assert!(listed[1].same_entity(&writer));
    assert!(repo.get(editor_id).unwrap().is_none());
    assert!(repo.get_all(&[editor_id]).unwrap().is_empty());

    // Queries and counts stay on committed storage.
    assert_eq!(repo.get_by_query(&Query::all()).unwrap().len(), 2);
    assert_eq!(repo.count(&Query::all()).unwrap(), 2);

    uow.flush().unwrap();
    let after: Vec<String> = repo
        .get_all(&[])
        .unwrap()
        .iter()
        .map(|handle| handle.read().name().to_string())
        .collect();
    assert_eq!(after, ["Lead Reviewer", "Type writer"]);
}

#[test]
fn configured_limit_above_backend_cap_is_clamped() {
    let mut conn = open_db_in_memory(Duration::from_secs(1)).unwrap();
    conn.set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 8);
    let config = EngineConfig {
        max_query_parameters: 100_000,
        ..EngineConfig::default()
    };
    let uow = UnitOfWork::new(
        &mut conn,
        config,
        DisabledCache::handle(),
        NoopDiagnostics::handle(),
    );
    assert_eq!(uow.parameter_budget(), 8);

    let repo = repo(&uow);
    let handles: Vec<_> = (0..20)
        .map(|index| user_type(&format!("t{index}")))
        .collect();
    for handle in &handles {
        repo.add_or_update(handle).unwrap();
    }
    uow.flush().unwrap();

    let mut ids: Vec<_> = handles.iter().map(|handle| handle.id().unwrap()).collect();
    ids.extend(10_000..10_050);
    let loaded = repo.get_all(&ids).unwrap();
    assert_eq!(loaded.len(), 20);

    let too_wide = Query::all().filter(Predicate::is_in(
        "alias",
        (0..9).map(|index| format!("t{index}")),
    ));
    assert!(matches!(
        repo.count(&too_wide).unwrap_err(),
        RepoError::UnsupportedQuery(_)
    ));
}
