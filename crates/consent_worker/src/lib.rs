//! AWS-oriented adapters and handlers for the consent-form worker.
//!
//! This crate owns runtime integration details (the Lambda entry point, the
//! request router, store adapters, and the offline export script) and builds
//! on `consent_core` for validation and key derivation.

pub mod adapters;
pub mod config;
pub mod export;
pub mod handlers;
pub mod logging;
