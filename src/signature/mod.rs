//! Signature Orchestrator
//!
//! Opaque-payload signing requests, independent of any chain broadcast.

pub mod orchestrator;
pub mod state;
pub mod types;

pub use orchestrator::SignatureOrchestrator;
pub use state::SignatureStatus;
pub use types::{RequestSignatureInput, SignatureFilter, SignatureRequest};
