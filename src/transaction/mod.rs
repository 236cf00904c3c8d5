//! Transaction Orchestrator
//!
//! Outbound transfers: state machine, retry policy and the orchestrator
//! that drives records through broadcast and reconciliation.

pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod types;

pub use orchestrator::TransactionOrchestrator;
pub use retry::RetryPolicy;
pub use state::TransactionStatus;
pub use types::{
    CreateTransactionRequest, TransactionFilter, TransactionRecord, UpdateTransactionStatusRequest,
};
