//! Diagnostic event sink used by repositories and units of work.
//!
//! # Invariants
//! - Emitting an event never changes engine behavior; `NoopDiagnostics` is a
//!   valid substitute everywhere.
//! - Events are metadata-only key/value lines: entity payloads are not logged.

use log::{debug, error, info};
use std::fmt::Debug;
use std::sync::Arc;

/// Shared diagnostics handle passed into repositories.
pub type DiagnosticsHandle = Arc<dyn Diagnostics>;

/// Receives structured diagnostic and failure events.
pub trait Diagnostics: Send + Sync + Debug {
    fn debug(&self, event: &str, module: &str, detail: &str);
    fn info(&self, event: &str, module: &str, detail: &str);
    fn error(&self, event: &str, module: &str, detail: &str);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl LogDiagnostics {
    pub fn handle() -> DiagnosticsHandle {
        Arc::new(Self)
    }
}

impl Diagnostics for LogDiagnostics {
    fn debug(&self, event: &str, module: &str, detail: &str) {
        debug!("event={event} module={module} {detail}");
    }

    fn info(&self, event: &str, module: &str, detail: &str) {
        info!("event={event} module={module} {detail}");
    }

    fn error(&self, event: &str, module: &str, detail: &str) {
        error!("event={event} module={module} {detail}");
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl NoopDiagnostics {
    pub fn handle() -> DiagnosticsHandle {
        Arc::new(Self)
    }
}

impl Diagnostics for NoopDiagnostics {
    fn debug(&self, _event: &str, _module: &str, _detail: &str) {}

    fn info(&self, _event: &str, _module: &str, _detail: &str) {}

    fn error(&self, _event: &str, _module: &str, _detail: &str) {}
}
