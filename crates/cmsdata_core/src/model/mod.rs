//! Domain entities handled by the persistence engine.
//!
//! # Invariants
//! - Every persisted entity is identified by a storage-assigned `EntityId`.
//! - Entities loaded from storage start clean.

pub mod entity;
pub mod user_type;
