//! # strata-core
//!
//! Core library for Strata providing:
//! - The object model (installations, executions, deploy items, targets, data objects)
//! - Phase handling and combined-phase aggregation
//! - The per-object reconciler contract
//! - The object store contract and an in-memory implementation
//! - Configuration file loading (strata.yaml)
//! - Conflict-aware retry of whole reconciles

pub mod config;
pub mod error;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod types;
pub mod utils;

pub use config::StrataConfig;
pub use error::{Error, Result};
pub use reconcile::{ReconcileResult, Reconciler};
pub use store::{Collection, MemoryStore, ObjectStore};
