use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{BlockchainType, OrganizationId, VaultId};

/// Administrative vault status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultStatus {
    Active,
    /// No new transactions or signature requests accepted
    Locked,
    Closed,
}

impl VaultStatus {
    pub fn id(&self) -> i16 {
        match self {
            VaultStatus::Active => 1,
            VaultStatus::Locked => 2,
            VaultStatus::Closed => 3,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(VaultStatus::Active),
            2 => Some(VaultStatus::Locked),
            3 => Some(VaultStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VaultStatus::Active => "ACTIVE",
            VaultStatus::Locked => "LOCKED",
            VaultStatus::Closed => "CLOSED",
        }
    }

    /// Whether new work may be created against the vault
    pub fn accepts_work(&self) -> bool {
        matches!(self, VaultStatus::Active)
    }
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VaultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(VaultStatus::Active),
            "LOCKED" => Ok(VaultStatus::Locked),
            "CLOSED" => Ok(VaultStatus::Closed),
            other => Err(format!("unknown vault status: {}", other)),
        }
    }
}

/// A custodied address and its cached balance.
///
/// `address` is assigned once at creation and never changes. `balance` is
/// a cache of the chain's view, refreshed only by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub blockchain_type: BlockchainType,
    pub address: String,
    pub balance: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub status: VaultStatus,
    /// Optimistic concurrency version, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVaultRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub blockchain_type: BlockchainType,
}

/// Administrative update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVaultRequest {
    pub name: Option<String>,
    pub status: Option<VaultStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultFilter {
    pub organization_id: Option<OrganizationId>,
    pub blockchain_type: Option<BlockchainType>,
    pub status: Option<VaultStatus>,
}

impl VaultFilter {
    pub fn matches(&self, vault: &Vault) -> bool {
        self.organization_id.is_none_or(|o| o == vault.organization_id)
            && self.blockchain_type.is_none_or(|c| c == vault.blockchain_type)
            && self.status.is_none_or(|s| s == vault.status)
    }
}

/// Live balance read result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultBalance {
    pub vault_id: VaultId,
    pub address: String,
    pub balance: Decimal,
    pub as_of: DateTime<Utc>,
}
