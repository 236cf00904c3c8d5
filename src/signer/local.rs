//! Software Ed25519 key held in process memory.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::{Signer, SignerError};
use crate::core_types::SignatureType;

#[derive(Debug)]
pub struct Ed25519Signer {
    key_id: String,
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(key_id: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Seed must be exactly 32 bytes of hex
    pub fn from_seed_hex(key_id: impl Into<String>, seed_hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(seed_hex.trim_start_matches("0x"))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(key_id, &seed))
    }

    /// Fresh random key (development only, lost on restart)
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    /// Check a signature produced by this key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig_bytes: [u8; 64] = match signature.try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        self.verifying_key()
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn supports(&self, scheme: SignatureType) -> bool {
        scheme == SignatureType::Ed25519
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        Some(self.verifying_key().to_bytes().to_vec())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(payload).to_bytes().to_vec())
    }
}
