//! Storage gateway and its collaborators.
//!
//! - `storage_service`: the gateway façade and its error taxonomy
//! - `backend`: the raw S3 primitive seam (`S3Backend`, `BackendFactory`)
//! - `aws_backend` / `memory_backend`: seam implementations
//! - `keyspace`: folder semantics over a flat key space
//! - `upload`: single-shot vs multipart upload orchestration
//! - `mutation`: rename, copy and delete over keys and prefixes
//! - `credential_store` / `crypto`: persisted connection profiles

pub mod aws_backend;
pub mod backend;
pub mod credential_store;
pub mod crypto;
pub mod keyspace;
pub mod memory_backend;
pub mod mutation;
pub mod storage_service;
pub mod upload;

pub use storage_service::{StorageError, StorageResult, StorageService};
