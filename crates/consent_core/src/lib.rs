//! Shared consent-form domain primitives.
//!
//! This crate owns the submission contract, the validation pipeline, signature
//! payload decoding, and key derivation for the key-value and blob namespaces.
//! It intentionally excludes AWS SDK and Lambda runtime concerns.

pub mod contract;
pub mod migration;
pub mod signature;
pub mod storage_keys;
