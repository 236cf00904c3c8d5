use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::locks::{VaultGuard, VaultLocks};
use super::types::{
    CreateVaultRequest, UpdateVaultRequest, Vault, VaultBalance, VaultFilter, VaultStatus,
};
use crate::chain::{ChainRegistry, with_deadline};
use crate::core_types::VaultId;
use crate::error::CustodyError;
use crate::store::{CustodyStore, Page, PageRequest};

const MAX_NAME_LEN: usize = 255;

pub struct VaultManager {
    store: Arc<dyn CustodyStore>,
    chains: Arc<ChainRegistry>,
    locks: Arc<VaultLocks>,
    call_timeout: Duration,
}

impl VaultManager {
    pub fn new(
        store: Arc<dyn CustodyStore>,
        chains: Arc<ChainRegistry>,
        locks: Arc<VaultLocks>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            chains,
            locks,
            call_timeout,
        }
    }

    /// Enter the vault's exclusive section
    pub async fn lock(&self, vault_id: VaultId) -> VaultGuard {
        self.locks.lock(vault_id).await
    }

    fn validate_name(name: &str) -> Result<String, CustodyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CustodyError::Validation("name must not be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(CustodyError::Validation(format!(
                "name longer than {} characters",
                MAX_NAME_LEN
            )));
        }
        Ok(name.to_string())
    }

    /// Validate, allocate an address from the chain and persist as `Active`.
    ///
    /// Address allocation failures are surfaced, not retried.
    pub async fn create_vault(&self, req: CreateVaultRequest) -> Result<Vault, CustodyError> {
        let name = Self::validate_name(&req.name)?;
        let adapter = self.chains.get(req.blockchain_type)?;

        let address = with_deadline(
            self.call_timeout,
            "generate_address",
            adapter.generate_address(),
        )
        .await
        .map_err(|e| CustodyError::AddressGeneration(e.to_string()))?;

        if !adapter.validate_address(&address) {
            return Err(CustodyError::AddressGeneration(format!(
                "adapter returned malformed {} address: {}",
                req.blockchain_type, address
            )));
        }

        let now = Utc::now();
        let vault = Vault {
            id: VaultId::new(),
            organization_id: req.organization_id,
            name,
            blockchain_type: req.blockchain_type,
            address,
            balance: Decimal::ZERO,
            balance_updated_at: None,
            status: VaultStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_vault(&vault).await?;

        info!(
            vault_id = %vault.id,
            organization_id = %vault.organization_id,
            chain = %vault.blockchain_type,
            address = %vault.address,
            "Vault created"
        );
        Ok(vault)
    }

    pub async fn get_vault(&self, id: VaultId) -> Result<Vault, CustodyError> {
        self.store
            .get_vault(id)
            .await?
            .ok_or_else(|| CustodyError::NotFound(format!("vault {}", id)))
    }

    pub async fn list_vaults(
        &self,
        filter: &VaultFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<Vault>, CustodyError> {
        let page = PageRequest::new(page, size)?;
        Ok(self.store.list_vaults(filter, page).await?)
    }

    /// Administrative update of name / status. A closed vault stays closed.
    pub async fn update_vault(
        &self,
        id: VaultId,
        req: UpdateVaultRequest,
    ) -> Result<Vault, CustodyError> {
        let _guard = self.lock(id).await;
        let current = self.get_vault(id).await?;

        let mut next = current.clone();
        if let Some(name) = &req.name {
            next.name = Self::validate_name(name)?;
        }
        if let Some(status) = req.status {
            if current.status == VaultStatus::Closed && status != VaultStatus::Closed {
                return Err(CustodyError::Conflict(format!("vault {} is closed", id)));
            }
            next.status = status;
        }
        if next == current {
            return Ok(current);
        }
        next.version = current.version + 1;
        next.updated_at = Utc::now();

        if !self.store.update_vault(&next, current.version).await? {
            return Err(CustodyError::Conflict(format!(
                "vault {} was modified concurrently",
                id
            )));
        }

        info!(vault_id = %id, status = %next.status, "Vault updated");
        Ok(next)
    }

    /// Remove a vault that has no in-flight work
    pub async fn delete_vault(&self, id: VaultId) -> Result<(), CustodyError> {
        let _guard = self.lock(id).await;
        self.get_vault(id).await?;

        let open = self.store.count_open_work(id).await?;
        if !open.is_empty() {
            return Err(CustodyError::Conflict(format!(
                "vault {} has {} open transactions and {} open signature requests",
                id, open.transactions, open.signature_requests
            )));
        }

        if !self.store.delete_vault(id).await? {
            return Err(CustodyError::NotFound(format!("vault {}", id)));
        }

        info!(vault_id = %id, "Vault deleted");
        Ok(())
    }

    /// Live read from the chain; does not touch the cache
    pub async fn get_balance(&self, id: VaultId) -> Result<VaultBalance, CustodyError> {
        let vault = self.get_vault(id).await?;
        let adapter = self.chains.get(vault.blockchain_type)?;

        let balance = with_deadline(
            self.call_timeout,
            "get_balance",
            adapter.get_balance(&vault.address),
        )
        .await?;

        Ok(VaultBalance {
            vault_id: id,
            address: vault.address,
            balance,
            as_of: Utc::now(),
        })
    }

    /// Re-read the balance from the chain and store it in the cache.
    ///
    /// The network read happens outside the vault lock; only the cache
    /// write is serialized.
    pub async fn refresh_balance(&self, id: VaultId) -> Result<Vault, CustodyError> {
        let live = self.get_balance(id).await?;

        let _guard = self.lock(id).await;
        let current = self.get_vault(id).await?;
        if current
            .balance_updated_at
            .is_some_and(|at| at > live.as_of)
        {
            // A newer read already landed
            return Ok(current);
        }

        let mut next = current.clone();
        next.balance = live.balance;
        next.balance_updated_at = Some(live.as_of);
        next.version = current.version + 1;
        next.updated_at = Utc::now();

        if !self.store.update_vault(&next, current.version).await? {
            warn!(vault_id = %id, "Balance refresh lost a concurrent update");
            return self.get_vault(id).await;
        }
        Ok(next)
    }
}
