//! Chain Adapters
//!
//! Uniform capability surface over heterogeneous blockchain backends.
//! One adapter per chain family, selected by the vault's `BlockchainType`
//! through an injected [`ChainRegistry`].
//!
//! # Failure classification
//!
//! Every adapter error maps to one of three classes (see [`FailureClass`]):
//! transient, permanent, or unknown outcome. Unknown outcomes are resolved
//! before any retry, either by looking the payload up on chain
//! ([`OutcomeResolution::Lookup`]) or by resubmitting under a deterministic
//! request id that the external service deduplicates
//! ([`OutcomeResolution::IdempotentResubmit`]).

pub mod error;
pub mod ethereum;
pub mod mock;
pub mod registry;
pub mod rlp;
pub mod rpc;
pub mod utxo;
pub mod validation;
pub mod xrp;

pub use error::{ChainError, FailureClass};
pub use ethereum::EthereumAdapter;
pub use mock::{MockChainAdapter, MockSubmit};
pub use registry::ChainRegistry;
pub use utxo::UtxoCustodianAdapter;
pub use xrp::XrpAdapter;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use crate::core_types::{BlockchainType, SignatureType, TransactionId};

/// Value transfer handed to an adapter for encoding and fee estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub transaction_id: TransactionId,
    pub chain: BlockchainType,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
}

/// Signed, broadcast-ready blob.
///
/// Built once per transaction and persisted; every broadcast attempt sends
/// the identical bytes so the chain-level hash never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Deterministic request id (the transaction id)
    pub submission_id: String,
    pub raw: Vec<u8>,
}

impl SignedPayload {
    pub fn new(submission_id: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            submission_id: submission_id.into(),
            raw,
        }
    }

}

/// Transfer encoded for one chain, before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    /// Exact bytes handed to the signer
    pub signing_payload: Vec<u8>,
    /// Transaction body the signature is attached to
    pub body: Vec<u8>,
}

impl UnsignedTransfer {
    /// Body that is signed as-is
    pub fn plain(body: Vec<u8>) -> Self {
        Self {
            signing_payload: body.clone(),
            body,
        }
    }
}

/// What the chain currently says about a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Not known to the node (not yet propagated, or dropped / re-orged out)
    NotFound,
    /// Seen by the network; `confirmations == 0` means mempool only
    Included { confirmations: u64, finalized: bool },
    /// Included but execution failed; funds were not moved
    Reverted(String),
}

/// How an adapter resolves an ambiguous submit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeResolution {
    /// Query the chain for the payload's deterministic hash
    Lookup,
    /// Resubmit with the same request id; the service deduplicates
    IdempotentResubmit,
}

/// Capability surface implemented once per blockchain family
#[async_trait]
pub trait ChainAdapter: Send + Sync + Debug {
    /// Chain family served by this adapter
    fn chain(&self) -> BlockchainType;

    /// How unknown submit outcomes are resolved
    fn resolution(&self) -> OutcomeResolution;

    /// Validate an address format
    fn validate_address(&self, address: &str) -> bool {
        validation::is_valid_address(self.chain(), address)
    }

    /// Allocate a fresh custody address
    async fn generate_address(&self) -> Result<String, ChainError>;

    /// Live balance read (chain is the source of truth)
    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError>;

    /// Network fee for the given transfer
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<Decimal, ChainError>;

    /// Scheme the chain verifies transfer signatures with
    fn signature_scheme(&self) -> SignatureType {
        SignatureType::Ed25519
    }

    /// Unsigned encoding of `intent`.
    ///
    /// `public_key` is the signer's key when it exposes one. The default is
    /// the JSON intent, for custodian services that take a signed request
    /// rather than a raw chain transaction.
    async fn encode_transfer(
        &self,
        intent: &TransferIntent,
        _public_key: Option<&[u8]>,
    ) -> Result<UnsignedTransfer, ChainError> {
        serde_json::to_vec(intent)
            .map(UnsignedTransfer::plain)
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    /// Broadcast-ready bytes: the body with the signer's output attached
    fn attach_signature(
        &self,
        unsigned: &UnsignedTransfer,
        signature: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        let mut raw = Vec::with_capacity(unsigned.body.len() + signature.len());
        raw.extend_from_slice(&unsigned.body);
        raw.extend_from_slice(signature);
        Ok(raw)
    }

    /// Broadcast a signed payload, returning the chain transaction hash
    async fn submit(&self, payload: &SignedPayload) -> Result<String, ChainError>;

    /// Confirmation status of a broadcast transaction
    async fn get_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus, ChainError>;

    /// Find out whether the network has seen `payload`.
    ///
    /// `Ok(None)` means the network positively does not know it.
    async fn find_submission(&self, payload: &SignedPayload) -> Result<Option<String>, ChainError>;
}

/// Bound a chain call by `timeout`; an elapsed deadline is a `Timeout`
pub async fn with_deadline<T, F>(timeout: Duration, op: &str, call: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ChainError::Timeout(format!(
            "{} exceeded {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}
