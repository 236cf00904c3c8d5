//! Custody Service
//!
//! The operation surface consumed by an API layer. Authentication and
//! authorization happen before a call reaches this type.

use std::sync::Arc;

use crate::core_types::{SignatureRequestId, TransactionId, VaultId};
use crate::error::CustodyError;
use crate::signature::{
    RequestSignatureInput, SignatureFilter, SignatureOrchestrator, SignatureRequest,
};
use crate::store::Page;
use crate::transaction::{
    CreateTransactionRequest, TransactionFilter, TransactionOrchestrator, TransactionRecord,
    UpdateTransactionStatusRequest,
};
use crate::vault::{
    CreateVaultRequest, UpdateVaultRequest, Vault, VaultBalance, VaultFilter, VaultManager,
};

#[derive(Clone)]
pub struct CustodyService {
    vaults: Arc<VaultManager>,
    transactions: Arc<TransactionOrchestrator>,
    signatures: Arc<SignatureOrchestrator>,
}

impl CustodyService {
    pub fn new(
        vaults: Arc<VaultManager>,
        transactions: Arc<TransactionOrchestrator>,
        signatures: Arc<SignatureOrchestrator>,
    ) -> Self {
        Self {
            vaults,
            transactions,
            signatures,
        }
    }

    // === Vaults ===

    pub async fn create_vault(&self, req: CreateVaultRequest) -> Result<Vault, CustodyError> {
        self.vaults.create_vault(req).await
    }

    pub async fn get_vault(&self, id: VaultId) -> Result<Vault, CustodyError> {
        self.vaults.get_vault(id).await
    }

    pub async fn list_vaults(
        &self,
        filter: &VaultFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<Vault>, CustodyError> {
        self.vaults.list_vaults(filter, page, size).await
    }

    pub async fn update_vault(
        &self,
        id: VaultId,
        req: UpdateVaultRequest,
    ) -> Result<Vault, CustodyError> {
        self.vaults.update_vault(id, req).await
    }

    pub async fn delete_vault(&self, id: VaultId) -> Result<(), CustodyError> {
        self.vaults.delete_vault(id).await
    }

    /// Live chain read, bounded by the configured call timeout. Callers may
    /// drop the future to cancel earlier.
    pub async fn get_vault_balance(&self, id: VaultId) -> Result<VaultBalance, CustodyError> {
        self.vaults.get_balance(id).await
    }

    // === Transactions ===

    /// Returns the durable `Pending` record; the outcome arrives asynchronously
    pub async fn create_transaction(
        &self,
        req: CreateTransactionRequest,
    ) -> Result<TransactionRecord, CustodyError> {
        self.transactions.create_transaction(req).await
    }

    pub async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<TransactionRecord, CustodyError> {
        self.transactions.get_transaction(id).await
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<TransactionRecord>, CustodyError> {
        self.transactions.list_transactions(filter, page, size).await
    }

    pub async fn update_transaction_status(
        &self,
        id: TransactionId,
        req: UpdateTransactionStatusRequest,
    ) -> Result<TransactionRecord, CustodyError> {
        self.transactions.update_status(id, req).await
    }

    // === Signatures ===

    pub async fn request_signature(
        &self,
        input: RequestSignatureInput,
    ) -> Result<SignatureRequest, CustodyError> {
        self.signatures.request_signature(input).await
    }

    pub async fn get_signature_status(
        &self,
        id: SignatureRequestId,
    ) -> Result<SignatureRequest, CustodyError> {
        self.signatures.get_signature_status(id).await
    }

    pub async fn list_signature_requests(
        &self,
        filter: &SignatureFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<SignatureRequest>, CustodyError> {
        self.signatures
            .list_signature_requests(filter, page, size)
            .await
    }
}
