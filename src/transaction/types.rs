use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::TransactionStatus;
use crate::core_types::{BlockchainType, TransactionId, VaultId};

/// Outbound value transfer. Never deleted; terminal records are the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub vault_id: VaultId,
    pub blockchain_type: BlockchainType,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    /// Filled from the adapter's estimate before signing
    pub fee: Option<Decimal>,
    pub status: TransactionStatus,
    /// Set at most once, immutable afterwards
    pub chain_tx_hash: Option<String>,
    /// Monotonically non-decreasing while tracked
    pub confirmations: u64,
    /// Number of `submit` calls made so far
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Reason given for an administrative status override
    pub status_reason: Option<String>,
    /// Signed blob, built once and re-broadcast unchanged
    #[serde(skip)]
    pub signed_payload: Option<Vec<u8>>,
    /// Earliest time the next dispatch may run
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new_pending(
        vault_id: VaultId,
        blockchain_type: BlockchainType,
        from_address: String,
        to_address: String,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            vault_id,
            blockchain_type,
            from_address,
            to_address,
            amount,
            fee: None,
            status: TransactionStatus::Pending,
            chain_tx_hash: None,
            confirmations: 0,
            attempt_count: 0,
            last_error: None,
            status_reason: None,
            signed_payload: None,
            next_attempt_at: None,
            submitted_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy to be written with the next version
    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next
    }

    /// Whether a `Pending` record may be dispatched at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub vault_id: VaultId,
    /// Must be the vault's own address
    pub from_address: String,
    pub to_address: String,
    /// Decimal string in the chain's native unit ("1.5")
    pub amount: String,
}

/// Administrative override into a terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTransactionStatusRequest {
    pub status: TransactionStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub vault_id: Option<VaultId>,
    pub status: Option<TransactionStatus>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &TransactionRecord) -> bool {
        self.vault_id.is_none_or(|v| v == tx.vault_id) && self.status.is_none_or(|s| s == tx.status)
    }
}
