//! Persistence Gateway
//!
//! Durable store for vaults, transactions and signature requests. Every
//! state-changing write is a compare-and-swap on `(status, version)`: the
//! caller passes the record it read and the next version, and the write
//! only lands if nobody else got there first. A lost CAS returns
//! `Ok(false)`; the caller re-reads and no-ops.

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core_types::{SignatureRequestId, TransactionId, VaultId};
use crate::error::CustodyError;
use crate::signature::{SignatureFilter, SignatureRequest, SignatureStatus};
use crate::transaction::{TransactionFilter, TransactionRecord, TransactionStatus};
use crate::vault::{Vault, VaultFilter};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 1-based page request, validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Result<Self, CustodyError> {
        if page == 0 {
            return Err(CustodyError::Validation("page must be >= 1".into()));
        }
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(CustodyError::Validation(format!(
                "size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, size })
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.size as u64
    }
}

/// One page of results, newest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

/// Keyset position for status scans. A scan resumes strictly after
/// `(at, id)` so rows that stay put between visits cannot hide the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor<Id> {
    pub at: DateTime<Utc>,
    pub id: Id,
}

impl ScanCursor<TransactionId> {
    pub fn after_transaction(tx: &TransactionRecord) -> Self {
        Self {
            at: tx.updated_at,
            id: tx.id,
        }
    }
}

impl ScanCursor<SignatureRequestId> {
    pub fn after_signature(req: &SignatureRequest) -> Self {
        Self {
            at: req.updated_at,
            id: req.id,
        }
    }

    /// Cursor for expiry scans, which are ordered by `expires_at`
    pub fn after_expiry(req: &SignatureRequest) -> Self {
        Self {
            at: req.expires_at,
            id: req.id,
        }
    }
}

/// Non-terminal work still attached to a vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenWork {
    pub transactions: u64,
    pub signature_requests: u64,
}

impl OpenWork {
    pub fn is_empty(&self) -> bool {
        self.transactions == 0 && self.signature_requests == 0
    }
}

#[async_trait]
pub trait CustodyStore: Send + Sync {
    // === Vaults ===

    async fn insert_vault(&self, vault: &Vault) -> Result<(), StoreError>;

    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError>;

    async fn list_vaults(
        &self,
        filter: &VaultFilter,
        page: PageRequest,
    ) -> Result<Page<Vault>, StoreError>;

    /// Write `next` if the stored version is still `expected_version`
    async fn update_vault(&self, next: &Vault, expected_version: i64) -> Result<bool, StoreError>;

    async fn delete_vault(&self, id: VaultId) -> Result<bool, StoreError>;

    async fn count_open_work(&self, vault_id: VaultId) -> Result<OpenWork, StoreError>;

    // === Transactions ===

    async fn insert_transaction(&self, tx: &TransactionRecord) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: TransactionId)
    -> Result<Option<TransactionRecord>, StoreError>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<TransactionRecord>, StoreError>;

    /// CAS: write `next` only if the stored record is still at
    /// `(expected_status, expected_version)`
    async fn cas_transaction(
        &self,
        next: &TransactionRecord,
        expected_status: TransactionStatus,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    /// Records in `status` last written before `updated_before`, ordered by
    /// `(updated_at, id)` and starting after `after`
    async fn find_transactions(
        &self,
        status: TransactionStatus,
        updated_before: DateTime<Utc>,
        after: Option<ScanCursor<TransactionId>>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    // === Signature requests ===

    async fn insert_signature(&self, req: &SignatureRequest) -> Result<(), StoreError>;

    async fn get_signature(
        &self,
        id: SignatureRequestId,
    ) -> Result<Option<SignatureRequest>, StoreError>;

    async fn list_signatures(
        &self,
        filter: &SignatureFilter,
        page: PageRequest,
    ) -> Result<Page<SignatureRequest>, StoreError>;

    async fn cas_signature(
        &self,
        next: &SignatureRequest,
        expected_status: SignatureStatus,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    async fn find_signatures(
        &self,
        status: SignatureStatus,
        updated_before: DateTime<Utc>,
        after: Option<ScanCursor<SignatureRequestId>>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError>;

    /// Non-terminal requests whose `expires_at` is before `now`, ordered by
    /// `(expires_at, id)`
    async fn find_expired_signatures(
        &self,
        now: DateTime<Utc>,
        after: Option<ScanCursor<SignatureRequestId>>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError>;
}
