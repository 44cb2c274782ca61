//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate unit-of-work and repository calls into use-case level APIs.
//! - Keep binaries and embedders decoupled from staging and flush details.

pub mod user_type_service;
