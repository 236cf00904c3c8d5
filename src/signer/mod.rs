//! Key custody capability.
//!
//! The orchestrators treat a signer as an opaque, possibly slow and
//! possibly failing dependency. Signer failures are never retried
//! automatically.

pub mod local;
pub mod mock;
pub mod remote;

pub use local::Ed25519Signer;
pub use mock::MockSigner;
pub use remote::RemoteSigner;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SignerConfig;
use crate::core_types::SignatureType;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignerError {
    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Signing request timed out: {0}")]
    Timeout(String),

    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Unsupported signature scheme: {0}")]
    UnsupportedScheme(SignatureType),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed signer response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Signer: Send + Sync + Debug {
    /// Identifier of the key this signer signs with
    fn key_id(&self) -> &str;

    fn supports(&self, scheme: SignatureType) -> bool;

    /// Public half of the key, when the signer exposes it.
    /// Some chains embed it in the transaction body.
    fn public_key(&self) -> Option<Vec<u8>> {
        None
    }

    /// Sign an opaque payload
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Build the configured signer
pub fn from_config(config: &SignerConfig) -> Result<Arc<dyn Signer>, SignerError> {
    match config {
        SignerConfig::Local { seed_hex, key_id } => {
            let signer = match seed_hex {
                Some(seed) => Ed25519Signer::from_seed_hex(key_id, seed)?,
                None => Ed25519Signer::generate(key_id),
            };
            Ok(Arc::new(signer))
        }
        SignerConfig::Remote {
            url,
            key_id,
            api_key,
            timeout_ms,
            public_key_hex,
        } => {
            let mut signer = RemoteSigner::new(
                url,
                key_id,
                api_key.clone(),
                Duration::from_millis(*timeout_ms),
            )?;
            if let Some(public_key) = public_key_hex {
                signer = signer.with_public_key_hex(public_key)?;
            }
            Ok(Arc::new(signer))
        }
    }
}
