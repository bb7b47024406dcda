//! S3-compatible bucket explorer backend.
//!
//! An axum service that proxies bucket and object operations to an
//! S3-compatible endpoint chosen from stored connection profiles: delimited
//! listings with synthesized folders, single-shot and multipart uploads,
//! and recursive rename/copy/delete over folder prefixes.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod validation;

pub use state::AppState;
