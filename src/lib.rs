//! ChainLedger - reorg-aware storage for a multi-tenant chain indexer
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Storage
//! - [`persistence`] - Store context (SQLite connection, schema, lifecycle)
//! - [`block`] - Canonical block headers
//! - [`transaction`] - Per-tenant transactions and their status paths
//! - [`partition`] - Tenant identifiers and partition routing
//!
//! ## Reconciliation
//! - [`reconcile`] - Reorg rollback, fallback marking and confirmation advancement
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Storage
// ============================================================================
pub mod block;
pub mod partition;
pub mod persistence;
pub mod transaction;

// ============================================================================
// Reconciliation
// ============================================================================
pub mod reconcile;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use block::{BlockHeader, BlockStorage};
pub use config::{load_config, Config};
pub use error::{LedgerError, Result};
pub use partition::{Partition, PartitionRouter, TenantId};
pub use persistence::Database;
pub use reconcile::{FallbackReport, Reconciler, ReorgReport};
pub use transaction::{TokenInfo, Transaction, TransactionStorage, TransactionType, TxStatus};
