use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::core_types::BlockchainType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub workers: WorkerPoolConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub chains: ChainsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "vault_custody.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            use_json: false,
            rotation: default_rotation(),
            orchestrator: OrchestratorConfig::default(),
            workers: WorkerPoolConfig::default(),
            poller: PollerConfig::default(),
            signature: SignatureConfig::default(),
            storage: StorageConfig::default(),
            signer: SignerConfig::default(),
            chains: ChainsConfig::default(),
        }
    }
}

// ============================================================================
// Orchestration
// ============================================================================

/// Retry / timeout policy of the transaction orchestrator
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of `submit` calls per transaction
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: bool,
    /// Deadline for every chain adapter / signer call
    pub call_timeout_ms: u64,
    /// How long a submitted transaction may be unknown to the chain before it counts as dropped
    pub dropped_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            backoff_jitter: true,
            call_timeout_ms: 10_000,
            dropped_grace_secs: 300,
        }
    }
}

impl OrchestratorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// `Submitting` records older than this are treated as interrupted
    pub stale_submitting_secs: u64,
    /// `Pending` records older than this are re-enqueued
    pub stale_pending_secs: u64,
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            stale_submitting_secs: 60,
            stale_pending_secs: 30,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SignatureConfig {
    /// Lifetime of a signature request when the caller gives none
    pub default_ttl_secs: u64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600,
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// PostgreSQL URL; in-memory store when absent
    pub postgres_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SignerConfig {
    /// Software Ed25519 key; a random key is generated when `seed_hex` is absent
    Local {
        #[serde(default)]
        seed_hex: Option<String>,
        #[serde(default = "default_key_id")]
        key_id: String,
    },
    /// Remote key-custody service
    Remote {
        url: String,
        key_id: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Hex public key of `key_id`, needed by chains that embed it (XRP)
        #[serde(default)]
        public_key_hex: Option<String>,
    },
}

fn default_key_id() -> String {
    "local-dev".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig::Local {
            seed_hex: None,
            key_id: default_key_id(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChainsConfig {
    #[serde(default)]
    pub ethereum: Option<EthereumConfig>,
    #[serde(default)]
    pub xrp: Option<XrpConfig>,
    #[serde(default)]
    pub utxo: Option<UtxoConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EthereumConfig {
    pub rpc_url: String,
    /// Passphrase for node-managed accounts created by `personal_newAccount`
    pub keystore_passphrase: String,
    pub finality_threshold: u64,
    pub timeout_ms: u64,
    pub mock: bool,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            keystore_passphrase: String::new(),
            finality_threshold: BlockchainType::Ethereum.default_finality(),
            timeout_ms: default_timeout_ms(),
            mock: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct XrpConfig {
    pub rpc_url: String,
    pub finality_threshold: u64,
    pub timeout_ms: u64,
    pub mock: bool,
}

impl Default for XrpConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:5005".to_string(),
            finality_threshold: BlockchainType::Xrp.default_finality(),
            timeout_ms: default_timeout_ms(),
            mock: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UtxoConfig {
    /// Custodian REST base URL
    pub base_url: String,
    pub api_key: String,
    pub finality_threshold: u64,
    pub timeout_ms: u64,
    pub mock: bool,
}

impl Default for UtxoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key: String::new(),
            finality_threshold: BlockchainType::Utxo.default_finality(),
            timeout_ms: default_timeout_ms(),
            mock: false,
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_attempts must be at least 1".into(),
            ));
        }
        if self.orchestrator.backoff_base_ms > self.orchestrator.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "orchestrator.backoff_base_ms exceeds backoff_max_ms".into(),
            ));
        }
        if self.workers.worker_count == 0 || self.workers.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "workers.worker_count and workers.queue_capacity must be positive".into(),
            ));
        }
        if self.poller.batch_size == 0 {
            return Err(ConfigError::Invalid("poller.batch_size must be positive".into()));
        }
        // A SUBMITTING record must not look stale while its submit call can
        // still be running, or the poller races the live broadcast
        if self.poller.stale_submitting_secs.saturating_mul(1_000) <= self.orchestrator.call_timeout_ms
        {
            return Err(ConfigError::Invalid(format!(
                "poller.stale_submitting_secs ({}s) must exceed orchestrator.call_timeout_ms ({}ms)",
                self.poller.stale_submitting_secs, self.orchestrator.call_timeout_ms
            )));
        }
        Ok(())
    }
}
