//! In-process store for development runs and tests.
//!
//! Same CAS semantics as the PostgreSQL store. Also keeps the sequence of
//! statuses each transaction was written with, for audit assertions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{CustodyStore, OpenWork, Page, PageRequest, ScanCursor, StoreError};
use crate::core_types::{SignatureRequestId, TransactionId, VaultId};
use crate::signature::{SignatureFilter, SignatureRequest, SignatureStatus};
use crate::transaction::{TransactionFilter, TransactionRecord, TransactionStatus};
use crate::vault::{Vault, VaultFilter};

#[derive(Debug, Default)]
struct Tables {
    vaults: HashMap<VaultId, Vault>,
    transactions: HashMap<TransactionId, TransactionRecord>,
    signatures: HashMap<SignatureRequestId, SignatureRequest>,
    tx_history: HashMap<TransactionId, Vec<TransactionStatus>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status a transaction has been written with, in order
    pub fn transaction_history(&self, id: TransactionId) -> Vec<TransactionStatus> {
        self.tables
            .read()
            .unwrap()
            .tx_history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn paginate<T: Clone>(
        mut rows: Vec<T>,
        page: PageRequest,
        newest_first: impl Fn(&T, &T) -> std::cmp::Ordering,
    ) -> Page<T> {
        rows.sort_by(newest_first);
        let total = rows.len() as u64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Page {
            items,
            total,
            page: page.page,
            size: page.size,
        }
    }
}

#[async_trait]
impl CustodyStore for MemoryStore {
    async fn insert_vault(&self, vault: &Vault) -> Result<(), StoreError> {
        let mut t = self.tables.write().unwrap();
        if t.vaults.contains_key(&vault.id) {
            return Err(StoreError::Duplicate(format!("vault {}", vault.id)));
        }
        t.vaults.insert(vault.id, vault.clone());
        Ok(())
    }

    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError> {
        Ok(self.tables.read().unwrap().vaults.get(&id).cloned())
    }

    async fn list_vaults(
        &self,
        filter: &VaultFilter,
        page: PageRequest,
    ) -> Result<Page<Vault>, StoreError> {
        let rows: Vec<Vault> = self
            .tables
            .read()
            .unwrap()
            .vaults
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        Ok(Self::paginate(rows, page, |a, b| {
            b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
        }))
    }

    async fn update_vault(&self, next: &Vault, expected_version: i64) -> Result<bool, StoreError> {
        let mut t = self.tables.write().unwrap();
        match t.vaults.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("vault {}", next.id))),
        }
    }

    async fn delete_vault(&self, id: VaultId) -> Result<bool, StoreError> {
        Ok(self.tables.write().unwrap().vaults.remove(&id).is_some())
    }

    async fn count_open_work(&self, vault_id: VaultId) -> Result<OpenWork, StoreError> {
        let t = self.tables.read().unwrap();
        let transactions = t
            .transactions
            .values()
            .filter(|tx| tx.vault_id == vault_id && !tx.status.is_terminal())
            .count() as u64;
        let signature_requests = t
            .signatures
            .values()
            .filter(|s| s.vault_id == vault_id && !s.status.is_terminal())
            .count() as u64;
        Ok(OpenWork {
            transactions,
            signature_requests,
        })
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().unwrap();
        if t.transactions.contains_key(&tx.id) {
            return Err(StoreError::Duplicate(format!("transaction {}", tx.id)));
        }
        t.transactions.insert(tx.id, tx.clone());
        t.tx_history.insert(tx.id, vec![tx.status]);
        Ok(())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.tables.read().unwrap().transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<TransactionRecord>, StoreError> {
        let rows: Vec<TransactionRecord> = self
            .tables
            .read()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        Ok(Self::paginate(rows, page, |a, b| {
            b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
        }))
    }

    async fn cas_transaction(
        &self,
        next: &TransactionRecord,
        expected_status: TransactionStatus,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().unwrap();
        let Some(current) = t.transactions.get_mut(&next.id) else {
            return Err(StoreError::NotFound(format!("transaction {}", next.id)));
        };
        if current.status != expected_status || current.version != expected_version {
            return Ok(false);
        }
        *current = next.clone();
        t.tx_history.entry(next.id).or_default().push(next.status);
        Ok(true)
    }

    async fn find_transactions(
        &self,
        status: TransactionStatus,
        updated_before: DateTime<Utc>,
        after: Option<ScanCursor<TransactionId>>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut rows: Vec<TransactionRecord> = self
            .tables
            .read()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| tx.status == status && tx.updated_at <= updated_before)
            .filter(|tx| after.is_none_or(|c| (tx.updated_at, tx.id) > (c.at, c.id)))
            .cloned()
            .collect();
        rows.sort_by_key(|tx| (tx.updated_at, tx.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_signature(&self, req: &SignatureRequest) -> Result<(), StoreError> {
        let mut t = self.tables.write().unwrap();
        if t.signatures.contains_key(&req.id) {
            return Err(StoreError::Duplicate(format!("signature request {}", req.id)));
        }
        t.signatures.insert(req.id, req.clone());
        Ok(())
    }

    async fn get_signature(
        &self,
        id: SignatureRequestId,
    ) -> Result<Option<SignatureRequest>, StoreError> {
        Ok(self.tables.read().unwrap().signatures.get(&id).cloned())
    }

    async fn list_signatures(
        &self,
        filter: &SignatureFilter,
        page: PageRequest,
    ) -> Result<Page<SignatureRequest>, StoreError> {
        let rows: Vec<SignatureRequest> = self
            .tables
            .read()
            .unwrap()
            .signatures
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        Ok(Self::paginate(rows, page, |a, b| {
            b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
        }))
    }

    async fn cas_signature(
        &self,
        next: &SignatureRequest,
        expected_status: SignatureStatus,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().unwrap();
        let Some(current) = t.signatures.get_mut(&next.id) else {
            return Err(StoreError::NotFound(format!("signature request {}", next.id)));
        };
        if current.status != expected_status || current.version != expected_version {
            return Ok(false);
        }
        *current = next.clone();
        Ok(true)
    }

    async fn find_signatures(
        &self,
        status: SignatureStatus,
        updated_before: DateTime<Utc>,
        after: Option<ScanCursor<SignatureRequestId>>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let mut rows: Vec<SignatureRequest> = self
            .tables
            .read()
            .unwrap()
            .signatures
            .values()
            .filter(|s| s.status == status && s.updated_at <= updated_before)
            .filter(|s| after.is_none_or(|c| (s.updated_at, s.id) > (c.at, c.id)))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.updated_at, s.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_expired_signatures(
        &self,
        now: DateTime<Utc>,
        after: Option<ScanCursor<SignatureRequestId>>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let mut rows: Vec<SignatureRequest> = self
            .tables
            .read()
            .unwrap()
            .signatures
            .values()
            .filter(|s| !s.status.is_terminal() && s.is_expired_at(now))
            .filter(|s| after.is_none_or(|c| (s.expires_at, s.id) > (c.at, c.id)))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.expires_at, s.id));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::BlockchainType;
    use rust_decimal::Decimal;

    fn pending_tx(vault_id: VaultId) -> TransactionRecord {
        TransactionRecord::new_pending(
            vault_id,
            BlockchainType::Ethereum,
            "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".into(),
            "0x0000000000000000000000000000000000000001".into(),
            Decimal::ONE,
        )
    }

    #[tokio::test]
    async fn test_cas_single_winner() {
        let store = MemoryStore::new();
        let tx = pending_tx(VaultId::new());
        store.insert_transaction(&tx).await.unwrap();

        let mut next = tx.next_version();
        next.status = TransactionStatus::Submitting;

        assert!(store
            .cas_transaction(&next, TransactionStatus::Pending, tx.version)
            .await
            .unwrap());
        // Second writer read the same version: loses
        assert!(!store
            .cas_transaction(&next, TransactionStatus::Pending, tx.version)
            .await
            .unwrap());

        assert_eq!(
            store.transaction_history(tx.id),
            vec![TransactionStatus::Pending, TransactionStatus::Submitting]
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert() {
        let store = MemoryStore::new();
        let tx = pending_tx(VaultId::new());
        store.insert_transaction(&tx).await.unwrap();
        assert!(matches!(
            store.insert_transaction(&tx).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_total() {
        let store = MemoryStore::new();
        let vault_id = VaultId::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut tx = pending_tx(vault_id);
            tx.created_at += chrono::Duration::seconds(i);
            ids.push(tx.id);
            store.insert_transaction(&tx).await.unwrap();
        }
        store.insert_transaction(&pending_tx(VaultId::new())).await.unwrap();

        let filter = TransactionFilter {
            vault_id: Some(vault_id),
            status: None,
        };
        let page = store
            .list_transactions(&filter, PageRequest::new(1, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[4]);
        assert_eq!(page.items[1].id, ids[3]);

        let last = store
            .list_transactions(&filter, PageRequest::new(3, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_find_transactions_resumes_after_cursor() {
        let store = MemoryStore::new();
        let vault_id = VaultId::new();
        let stamp = Utc::now() - chrono::Duration::seconds(10);
        // Same timestamp for all rows: the id breaks the tie
        for _ in 0..5 {
            let mut tx = pending_tx(vault_id);
            tx.updated_at = stamp;
            store.insert_transaction(&tx).await.unwrap();
        }

        let now = Utc::now();
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let batch = store
                .find_transactions(TransactionStatus::Pending, now, cursor, 2)
                .await
                .unwrap();
            let Some(last) = batch.last() else { break };
            cursor = Some(ScanCursor::after_transaction(last));
            seen.extend(batch.iter().map(|tx| tx.id));
        }

        assert_eq!(seen.len(), 5);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_open_work() {
        let store = MemoryStore::new();
        let vault_id = VaultId::new();
        let tx = pending_tx(vault_id);
        store.insert_transaction(&tx).await.unwrap();
        assert_eq!(store.count_open_work(vault_id).await.unwrap().transactions, 1);

        let mut failed = tx.next_version();
        failed.status = TransactionStatus::Failed;
        store
            .cas_transaction(&failed, TransactionStatus::Pending, tx.version)
            .await
            .unwrap();
        assert!(store.count_open_work(vault_id).await.unwrap().is_empty());
    }
}
