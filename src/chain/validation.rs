//! Address format validation per chain family

use crate::core_types::BlockchainType;

const BITCOIN_BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const RIPPLE_BASE58: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";
pub const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

pub fn is_valid_address(chain: BlockchainType, address: &str) -> bool {
    match chain {
        BlockchainType::Ethereum => is_ethereum_address(address),
        BlockchainType::Xrp => is_xrp_address(address),
        BlockchainType::Utxo => is_utxo_address(address),
    }
}

/// `0x` followed by 40 hex digits
pub fn is_ethereum_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Classic XRP address: `r` + base58 (ripple alphabet), 25-35 chars
pub fn is_xrp_address(address: &str) -> bool {
    address.starts_with('r')
        && (25..=35).contains(&address.len())
        && address.chars().all(|c| RIPPLE_BASE58.contains(c))
}

/// Legacy / P2SH base58 or bech32 segwit address
pub fn is_utxo_address(address: &str) -> bool {
    if let Some(data) = ["bc1", "tb1", "bcrt1"]
        .iter()
        .find_map(|hrp| address.strip_prefix(hrp))
    {
        return (11..=71).contains(&data.len()) && data.chars().all(|c| BECH32_CHARSET.contains(c));
    }

    (address.starts_with('1') || address.starts_with('3') || address.starts_with('m'))
        && (26..=35).contains(&address.len())
        && address.chars().all(|c| BITCOIN_BASE58.contains(c))
}
