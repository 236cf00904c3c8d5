use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SignatureStatus;
use crate::core_types::{SignatureRequestId, SignatureType, VaultId};

/// Byte fields travel as lowercase hex
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(b) => s.serialize_some(&hex::encode(b)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub id: SignatureRequestId,
    pub vault_id: VaultId,
    #[serde(with = "hex_bytes")]
    pub data_to_sign: Vec<u8>,
    pub signature_type: SignatureType,
    /// Set once, on the transition into `Completed`
    #[serde(with = "hex_bytes::option")]
    pub signature: Option<Vec<u8>>,
    /// Key that produced `signature`
    pub key_id: Option<String>,
    pub status: SignatureStatus,
    pub error: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SignatureRequest {
    pub fn new_pending(
        vault_id: VaultId,
        data_to_sign: Vec<u8>,
        signature_type: SignatureType,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SignatureRequestId::new(),
            vault_id,
            data_to_sign,
            signature_type,
            signature: None,
            key_id: None,
            status: SignatureStatus::Pending,
            error: None,
            expires_at,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next
    }

    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSignatureInput {
    pub vault_id: VaultId,
    #[serde(with = "hex_bytes")]
    pub data_to_sign: Vec<u8>,
    pub signature_type: SignatureType,
    /// Lifetime in seconds; configured default when absent
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureFilter {
    pub vault_id: Option<VaultId>,
    pub status: Option<SignatureStatus>,
}

impl SignatureFilter {
    pub fn matches(&self, req: &SignatureRequest) -> bool {
        self.vault_id.is_none_or(|v| v == req.vault_id) && self.status.is_none_or(|s| s == req.status)
    }
}
