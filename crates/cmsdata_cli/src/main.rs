//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `cmsdata_core` linkage.
//! - Exercise one save/reload round trip against an in-memory database.

use cmsdata_core::{
    core_version, default_log_level, init_logging, shared_runtime_cache, EngineConfig, Entity,
    RepoResult, UnitOfWorkProvider, UserType, UserTypeService,
};
use std::process::ExitCode;

/// Absolute directory for rolling log files; logging stays off when unset.
const LOG_DIR_ENV: &str = "CMSDATA_LOG_DIR";

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("cmsdata_core logging=disabled error={err}");
        }
    }

    println!("cmsdata_core version={}", core_version());
    match round_trip() {
        Ok(summary) => {
            println!("cmsdata_core round_trip=ok {summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("cmsdata_core round_trip=error error={err}");
            ExitCode::FAILURE
        }
    }
}

fn round_trip() -> RepoResult<String> {
    let provider = UnitOfWorkProvider::open_in_memory(EngineConfig::default())?
        .with_shared_cache(shared_runtime_cache());
    let mut service = UserTypeService::new(provider);

    let saved = service.save(UserType::new("Editor", "editor", ["A", "D", "F"]))?;
    let id = saved.id().unwrap_or_default();
    let reloaded = service.get(id)?;

    Ok(format!(
        "id={id} matches={}",
        reloaded.is_some_and(|user_type| user_type == saved)
    ))
}
