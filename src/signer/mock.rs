//! Scriptable signer for tests and local runs.

use async_trait::async_trait;
use sha2::{Digest, Sha512};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Signer, SignerError};
use crate::core_types::SignatureType;

/// Produces a deterministic 64-byte digest of key id and payload
#[derive(Debug)]
pub struct MockSigner {
    key_id: String,
    failure: Mutex<Option<SignerError>>,
    latency: Mutex<Option<Duration>>,
    schemes: Mutex<Option<Vec<SignatureType>>>,
    sign_count: AtomicUsize,
}

impl MockSigner {
    pub fn new(key_id: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            failure: Mutex::new(None),
            latency: Mutex::new(None),
            schemes: Mutex::new(None),
            sign_count: AtomicUsize::new(0),
        }
    }

    /// Every subsequent `sign` fails with `error` (until cleared)
    pub fn set_failure(&self, error: Option<SignerError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Restrict supported schemes; `None` supports every scheme
    pub fn set_supported_schemes(&self, schemes: Option<Vec<SignatureType>>) {
        *self.schemes.lock().unwrap() = schemes;
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }

    pub fn expected_signature(&self, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(self.key_id.as_bytes());
        hasher.update(payload);
        hasher.finalize().to_vec()
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn supports(&self, scheme: SignatureType) -> bool {
        self.schemes
            .lock()
            .unwrap()
            .as_ref()
            .is_none_or(|schemes| schemes.contains(&scheme))
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        Some(Sha512::digest(self.key_id.as_bytes())[..32].to_vec())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.expected_signature(payload))
    }
}
