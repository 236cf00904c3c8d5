//! Core types used throughout the system
//!
//! Identifiers are ULID newtypes: sortable, coordination-free and safe to
//! expose to callers. `BlockchainType` selects the chain adapter strategy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Vault identifier
    VaultId
);

ulid_id!(
    /// Organization that owns vaults
    OrganizationId
);

ulid_id!(
    /// Outbound transaction identifier.
    ///
    /// Also used as the deterministic idempotency key handed to chain
    /// services that deduplicate resubmissions themselves.
    TransactionId
);

ulid_id!(
    /// Signature request identifier
    SignatureRequestId
);

/// Supported blockchain families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockchainType {
    /// Account-based ledger (EVM)
    Ethereum,
    /// Consensus ledger (XRP Ledger)
    Xrp,
    /// UTXO chain reached through a custodian service
    Utxo,
}

impl BlockchainType {
    pub const ALL: [BlockchainType; 3] = [
        BlockchainType::Ethereum,
        BlockchainType::Xrp,
        BlockchainType::Utxo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockchainType::Ethereum => "ethereum",
            BlockchainType::Xrp => "xrp",
            BlockchainType::Utxo => "utxo",
        }
    }

    /// Decimal places of the native unit (wei, drops, satoshi)
    pub fn decimals(&self) -> u32 {
        match self {
            BlockchainType::Ethereum => 18,
            BlockchainType::Xrp => 6,
            BlockchainType::Utxo => 8,
        }
    }

    /// Confirmation count treated as irreversible when config does not say otherwise
    pub fn default_finality(&self) -> u64 {
        match self {
            BlockchainType::Ethereum => 12,
            BlockchainType::Xrp => 1,
            BlockchainType::Utxo => 6,
        }
    }

    /// Numeric id for SMALLINT storage
    pub fn id(&self) -> i16 {
        match self {
            BlockchainType::Ethereum => 1,
            BlockchainType::Xrp => 2,
            BlockchainType::Utxo => 3,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BlockchainType::Ethereum),
            2 => Some(BlockchainType::Xrp),
            3 => Some(BlockchainType::Utxo),
            _ => None,
        }
    }
}

impl fmt::Display for BlockchainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockchainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(BlockchainType::Ethereum),
            "xrp" | "ripple" => Ok(BlockchainType::Xrp),
            "utxo" | "bitcoin" | "btc" => Ok(BlockchainType::Utxo),
            other => Err(format!("unsupported blockchain type: {}", other)),
        }
    }
}

/// Signature scheme requested from the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Ed25519,
    EcdsaSecp256k1,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Ed25519 => "ed25519",
            SignatureType::EcdsaSecp256k1 => "ecdsa_secp256k1",
        }
    }

    pub fn id(&self) -> i16 {
        match self {
            SignatureType::Ed25519 => 1,
            SignatureType::EcdsaSecp256k1 => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(SignatureType::Ed25519),
            2 => Some(SignatureType::EcdsaSecp256k1),
            _ => None,
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignatureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ed25519" => Ok(SignatureType::Ed25519),
            "ecdsa_secp256k1" | "secp256k1" | "ecdsa" => Ok(SignatureType::EcdsaSecp256k1),
            other => Err(format!("unsupported signature type: {}", other)),
        }
    }
}
