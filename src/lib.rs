//! Vault Custody - transaction and signature orchestration for custodied
//! blockchain vaults.
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers, blockchain and signature type enums
//! - [`money`] - Amount parsing and base-unit conversion
//! - [`chain`] - Chain adapter capability, per-chain adapters, registry
//! - [`signer`] - Key custody capability (local Ed25519, remote, mock)
//! - [`store`] - Persistence gateway with compare-and-swap updates
//! - [`vault`] - Vault lifecycle, address assignment, balance cache
//! - [`transaction`] - Transaction state machine and orchestrator
//! - [`signature`] - Signature request state machine and orchestrator
//! - [`worker`] - Dispatch queue, worker pool, reconciliation poller
//! - [`events`] - Best-effort terminal state notifications
//! - [`service`] - Exposed operation surface
//! - [`runtime`] - Component wiring and background task lifecycle

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod error;
pub mod logging;
pub mod money;

// Collaborators
pub mod chain;
pub mod events;
pub mod signer;
pub mod store;

// Orchestration
pub mod signature;
pub mod transaction;
pub mod vault;
pub mod worker;

pub mod runtime;
pub mod service;

// Convenient re-exports at crate root
pub use core_types::{
    BlockchainType, OrganizationId, SignatureRequestId, SignatureType, TransactionId, VaultId,
};
pub use error::CustodyError;
pub use runtime::{CustodyRuntime, StartupError};
pub use service::CustodyService;
pub use signature::{SignatureRequest, SignatureStatus};
pub use transaction::{TransactionRecord, TransactionStatus};
pub use vault::{Vault, VaultStatus};
