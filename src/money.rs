//! Money Conversion Module
//!
//! Conversion between client strings, `Decimal` amounts and chain base units
//! (wei, drops, satoshi). All amount parsing goes through this module.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: no silent truncation
//! 2. Chain decimals come from `BlockchainType::decimals()`
//!
//! ## Usage
//! ```rust
//! use vault_custody::money::{parse_amount, to_base_units};
//!
//! let amount = parse_amount("1.5", 18).unwrap();
//! assert_eq!(to_base_units(amount, 18).unwrap(), 1_500_000_000_000_000_000);
//! ```

use num_bigint::BigUint;
use rust_decimal::Decimal;
use thiserror::Error;

/// Money conversion errors
#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: Client → Decimal
// ============================================================================

/// Parse a client amount string into a strictly positive `Decimal`
///
/// # Errors
/// * `InvalidFormat` - empty, signed, ".5", "5." or non-numeric input
/// * `PrecisionOverflow` - more fractional digits than the chain supports
/// * `InvalidAmount` - zero
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') {
        return Err(MoneyError::InvalidAmount);
    }
    if amount_str.starts_with('+') {
        return Err(MoneyError::InvalidFormat("explicit sign not allowed".into()));
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Require both sides of the dot, ".5" and "5." are ambiguous
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let amount = Decimal::from_str_exact(amount_str).map_err(|_| MoneyError::Overflow)?;

    if amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount.normalize())
}

// ============================================================================
// Base units: Decimal ↔ integer smallest unit
// ============================================================================

/// Convert a decimal amount to integer base units (e.g. ether → wei)
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, MoneyError> {
    if amount.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }
    if amount.normalize().scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: amount.normalize().scale(),
            max: decimals,
        });
    }

    let mut digits = amount.normalize();
    digits.rescale(decimals);
    if digits.scale() != decimals {
        return Err(MoneyError::Overflow);
    }
    let mantissa = digits.mantissa();
    u128::try_from(mantissa).map_err(|_| MoneyError::Overflow)
}

/// Convert integer base units to a decimal amount (e.g. drops → XRP)
pub fn from_base_units(units: &BigUint, decimals: u32) -> Result<Decimal, MoneyError> {
    let raw = units.to_string();
    let text = if decimals == 0 {
        raw
    } else if raw.len() > decimals as usize {
        let split = raw.len() - decimals as usize;
        format!("{}.{}", &raw[..split], &raw[split..])
    } else {
        format!("0.{:0>width$}", raw, width = decimals as usize)
    };

    Decimal::from_str_exact(&text)
        .map(|d| d.normalize())
        .map_err(|_| MoneyError::Overflow)
}

/// Parse a JSON-RPC hex quantity ("0x1bc16d674ec80000")
pub fn parse_hex_quantity(value: &str) -> Result<BigUint, MoneyError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| MoneyError::InvalidFormat(format!("missing 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| MoneyError::InvalidFormat(format!("invalid hex quantity: {}", value)))
}

/// Parse a decimal integer string of base units ("25000000" drops)
pub fn parse_base_units(value: &str) -> Result<BigUint, MoneyError> {
    BigUint::parse_bytes(value.trim().as_bytes(), 10)
        .ok_or_else(|| MoneyError::InvalidFormat(format!("invalid integer: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_parse_amount_valid() {
        assert_eq!(parse_amount("1.5", 18).unwrap(), dec("1.5"));
        assert_eq!(parse_amount("100", 8).unwrap(), dec("100"));
        assert_eq!(parse_amount("0.000001", 6).unwrap(), dec("0.000001"));
    }

    #[test]
    fn test_parse_amount_rejects_bad_input() {
        assert_eq!(parse_amount("0", 8), Err(MoneyError::InvalidAmount));
        assert_eq!(parse_amount("-1", 8), Err(MoneyError::InvalidAmount));
        assert!(matches!(
            parse_amount(".5", 8),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("5.", 8),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("1e5", 8),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert_eq!(
            parse_amount("0.1234567", 6),
            Err(MoneyError::PrecisionOverflow {
                provided: 7,
                max: 6
            })
        );
    }

    #[test]
    fn test_base_units() {
        assert_eq!(to_base_units(dec("1.5"), 6).unwrap(), 1_500_000);
        assert_eq!(to_base_units(dec("0.00000001"), 8).unwrap(), 1);
        assert!(to_base_units(dec("0.1"), 0).is_err());

        let wei = parse_hex_quantity("0x1bc16d674ec80000").unwrap();
        assert_eq!(from_base_units(&wei, 18).unwrap(), dec("2"));

        let drops = parse_base_units("25").unwrap();
        assert_eq!(from_base_units(&drops, 6).unwrap(), dec("0.000025"));
    }

    #[test]
    fn test_hex_quantity_rejects_missing_prefix() {
        assert!(parse_hex_quantity("1bc").is_err());
        assert_eq!(parse_hex_quantity("0x").unwrap(), BigUint::default());
    }
}
