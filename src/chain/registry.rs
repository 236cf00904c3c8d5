//! Explicitly owned adapter registry, built once at startup and injected.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::error::ChainError;
use super::{ChainAdapter, EthereumAdapter, MockChainAdapter, UtxoCustodianAdapter, XrpAdapter};
use crate::config::ChainsConfig;
use crate::core_types::BlockchainType;
use crate::error::CustodyError;

#[derive(Debug, Clone)]
struct Entry {
    adapter: Arc<dyn ChainAdapter>,
    finality_threshold: u64,
}

/// `BlockchainType -> adapter` plus the per-chain finality threshold
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    entries: HashMap<BlockchainType, Entry>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for its chain
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>, finality_threshold: u64) {
        let chain = adapter.chain();
        self.entries.insert(
            chain,
            Entry {
                adapter,
                finality_threshold: finality_threshold.max(1),
            },
        );
    }

    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>, finality_threshold: u64) -> Self {
        self.register(adapter, finality_threshold);
        self
    }

    /// Build adapters for every configured chain
    pub fn from_config(config: &ChainsConfig) -> Result<Self, ChainError> {
        let mut registry = Self::new();

        if let Some(eth) = &config.ethereum {
            let adapter: Arc<dyn ChainAdapter> = if eth.mock {
                Arc::new(MockChainAdapter::new(BlockchainType::Ethereum))
            } else {
                Arc::new(EthereumAdapter::new(eth)?)
            };
            registry.register(adapter, eth.finality_threshold);
        }

        if let Some(xrp) = &config.xrp {
            let adapter: Arc<dyn ChainAdapter> = if xrp.mock {
                Arc::new(MockChainAdapter::new(BlockchainType::Xrp))
            } else {
                Arc::new(XrpAdapter::new(xrp)?)
            };
            registry.register(adapter, xrp.finality_threshold);
        }

        if let Some(utxo) = &config.utxo {
            let adapter: Arc<dyn ChainAdapter> = if utxo.mock {
                Arc::new(MockChainAdapter::new(BlockchainType::Utxo))
            } else {
                Arc::new(UtxoCustodianAdapter::new(utxo)?)
            };
            registry.register(adapter, utxo.finality_threshold);
        }

        for (chain, entry) in &registry.entries {
            info!(
                chain = %chain,
                finality_threshold = entry.finality_threshold,
                "Chain adapter registered"
            );
        }

        Ok(registry)
    }

    pub fn get(&self, chain: BlockchainType) -> Result<Arc<dyn ChainAdapter>, CustodyError> {
        self.entries
            .get(&chain)
            .map(|e| e.adapter.clone())
            .ok_or_else(|| CustodyError::Validation(format!("unsupported blockchain: {}", chain)))
    }

    pub fn is_supported(&self, chain: BlockchainType) -> bool {
        self.entries.contains_key(&chain)
    }

    /// Confirmations required before a transaction counts as final
    pub fn finality_threshold(&self, chain: BlockchainType) -> u64 {
        self.entries
            .get(&chain)
            .map(|e| e.finality_threshold)
            .unwrap_or_else(|| chain.default_finality())
    }

    pub fn supported(&self) -> Vec<BlockchainType> {
        let mut chains: Vec<_> = self.entries.keys().copied().collect();
        chains.sort_by_key(|c| c.id());
        chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainsConfig, EthereumConfig};

    #[test]
    fn test_unsupported_chain_is_validation_error() {
        let registry = ChainRegistry::new()
            .with(Arc::new(MockChainAdapter::new(BlockchainType::Ethereum)), 3);

        assert!(registry.get(BlockchainType::Ethereum).is_ok());
        assert!(matches!(
            registry.get(BlockchainType::Xrp),
            Err(CustodyError::Validation(_))
        ));
        assert_eq!(registry.finality_threshold(BlockchainType::Ethereum), 3);
        assert_eq!(registry.finality_threshold(BlockchainType::Utxo), 6);
    }

    #[test]
    fn test_from_config_mock_mode() {
        let config = ChainsConfig {
            ethereum: Some(EthereumConfig {
                mock: true,
                ..EthereumConfig::default()
            }),
            xrp: None,
            utxo: None,
        };
        let registry = ChainRegistry::from_config(&config).unwrap();
        assert_eq!(registry.supported(), vec![BlockchainType::Ethereum]);
        assert_eq!(registry.finality_threshold(BlockchainType::Ethereum), 12);
    }
}
