/// Core chain types for the wallet engine
///
/// This module defines addresses, fixed-point amounts, and the asset
/// descriptor used to select between native and token transfers.
use crate::errors::{WalletError, WalletResult};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places for the native asset (18, like ETH)
pub const NATIVE_DECIMALS: u8 = 18;

/// An EVM account address
///
/// Addresses follow the format: 0x{40_hex_chars}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// The raw address bytes (20 bytes)
    raw_bytes: [u8; 20],
}

impl Address {
    /// Create a new address from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != 20 {
            return Err(WalletError::InvalidAddress(format!(
                "Invalid address length: expected 20 bytes, got {}",
                bytes.len()
            )));
        }

        let mut raw_bytes = [0u8; 20];
        raw_bytes.copy_from_slice(bytes);
        Ok(Address { raw_bytes })
    }

    /// Parse a 0x-prefixed hex address
    pub fn from_string(address: &str) -> WalletResult<Self> {
        if !address.starts_with("0x") {
            return Err(WalletError::InvalidAddress(
                "Address must start with '0x'".to_string(),
            ));
        }

        if address.len() != 42 {
            // "0x" (2) + 40 hex chars = 42 total
            return Err(WalletError::InvalidAddress(format!(
                "Invalid address length: expected 42 characters, got {}",
                address.len()
            )));
        }

        let bytes = hex::decode(&address[2..])
            .map_err(|_| WalletError::InvalidAddress("Invalid hex in address".to_string()))?;

        Self::from_bytes(&bytes)
    }

    /// Get the raw address bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.raw_bytes
    }

    /// Get the lowercase hex representation
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.raw_bytes))
    }

    /// Get the EIP-55 mixed-case checksum representation
    pub fn to_checksum_string(&self) -> String {
        let lower = hex::encode(self.raw_bytes);
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0F;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_string(s)
    }
}

/// A fixed-point asset amount
///
/// Uses integer base units to avoid floating-point precision issues. The
/// decimal scale is carried alongside the value because token assets define
/// their own precision (USDT-style tokens commonly use 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// The amount in the asset's smallest indivisible unit
    base_units: u128,
    /// Number of decimal places the asset supports
    decimals: u8,
}

impl Amount {
    /// Create an amount from base units
    pub fn from_base_units(base_units: u128, decimals: u8) -> WalletResult<Self> {
        scale_for(decimals)?;
        Ok(Amount {
            base_units,
            decimals,
        })
    }

    /// Parse a decimal string into base units at the given scale
    ///
    /// Rejects inputs with more fractional digits than the asset supports;
    /// amounts are never rounded.
    pub fn from_decimal_str(amount_str: &str, decimals: u8) -> WalletResult<Self> {
        if amount_str.is_empty() {
            return Err(WalletError::InvalidAmount(
                "Amount cannot be empty".to_string(),
            ));
        }

        let scale = scale_for(decimals)?;

        let parts: Vec<&str> = amount_str.split('.').collect();
        if parts.len() > 2 {
            return Err(WalletError::InvalidAmount(
                "Invalid decimal format".to_string(),
            ));
        }

        let whole_part: u128 = parts[0]
            .parse()
            .map_err(|_| WalletError::InvalidAmount("Invalid number format".to_string()))?;

        let fractional_units = if parts.len() == 2 && !parts[1].is_empty() {
            let fractional_str = parts[1];
            if fractional_str.len() > decimals as usize {
                return Err(WalletError::InvalidAmount(
                    "Too many decimal places".to_string(),
                ));
            }

            // Pad with zeros to get full precision
            let padded = format!("{:0<width$}", fractional_str, width = decimals as usize);
            padded
                .parse::<u128>()
                .map_err(|_| WalletError::InvalidAmount("Invalid fractional part".to_string()))?
        } else {
            0
        };

        let base_units = whole_part
            .checked_mul(scale)
            .and_then(|w| w.checked_add(fractional_units))
            .ok_or_else(|| WalletError::InvalidAmount("Amount overflow".to_string()))?;

        Ok(Amount {
            base_units,
            decimals,
        })
    }

    /// Get base units
    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    /// Get the decimal scale this amount was parsed at
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Check if amount is zero
    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }

    /// Get amount as string with full precision
    pub fn as_string(&self) -> String {
        let scale = 10_u128.pow(self.decimals as u32);
        if self.decimals == 0 {
            return self.base_units.to_string();
        }

        let whole = self.base_units / scale;
        let fractional = self.base_units % scale;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:0width$}", fractional, width = self.decimals as usize)
                .trim_end_matches('0')
                .to_string();
            format!("{}.{}", whole, frac_str)
        }
    }

    /// Add two amounts of the same scale
    pub fn checked_add(&self, other: &Amount) -> WalletResult<Amount> {
        self.require_same_scale(other)?;
        let sum = self
            .base_units
            .checked_add(other.base_units)
            .ok_or_else(|| WalletError::InvalidAmount("Amount overflow in addition".to_string()))?;
        Amount::from_base_units(sum, self.decimals)
    }

    /// Subtract two amounts of the same scale
    pub fn checked_sub(&self, other: &Amount) -> WalletResult<Amount> {
        self.require_same_scale(other)?;
        if self.base_units < other.base_units {
            return Err(WalletError::InvalidAmount(
                "Insufficient amount for subtraction".to_string(),
            ));
        }

        Amount::from_base_units(self.base_units - other.base_units, self.decimals)
    }

    fn require_same_scale(&self, other: &Amount) -> WalletResult<()> {
        if self.decimals != other.decimals {
            return Err(WalletError::InvalidAmount(format!(
                "Mismatched decimal scales: {} vs {}",
                self.decimals, other.decimals
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

fn scale_for(decimals: u8) -> WalletResult<u128> {
    10_u128.checked_pow(decimals as u32).ok_or_else(|| {
        WalletError::InvalidAmount(format!("Unsupported decimal scale: {}", decimals))
    })
}

/// A transferable asset as presented by the balance layer
///
/// `contract_address = None` denotes the chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub symbol: String,
    /// Display balance as a decimal string
    pub balance: String,
    pub contract_address: Option<String>,
    pub decimals: u8,
}

impl Asset {
    /// The chain's native asset at 18 decimals
    pub fn native(symbol: &str) -> Self {
        Asset {
            symbol: symbol.to_string(),
            balance: "0".to_string(),
            contract_address: None,
            decimals: NATIVE_DECIMALS,
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract_address.is_none()
    }
}

/// A confirmed transfer as reported by the history endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Transfer value in base units, decimal string
    pub value: String,
    pub timestamp: u64,
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_creation() {
        let bytes = [
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
        ];
        let addr = Address::from_bytes(&bytes).unwrap();
        assert_eq!(addr.as_bytes(), &bytes);
        assert_eq!(addr.to_hex().len(), 42);
    }

    #[test]
    fn test_address_parsing() {
        let addr_str = "0x0102030405060708090a0b0c0d0e0f1011121314";
        let addr = Address::from_string(addr_str).unwrap();
        assert_eq!(addr.to_hex(), addr_str);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(Address::from_string("0x1234").is_err());
        assert!(Address::from_string("1102030405060708090a0b0c0d0e0f1011121314ab").is_err());
        assert!(Address::from_string("0xzz02030405060708090a0b0c0d0e0f1011121314").is_err());
    }

    #[test]
    fn test_eip55_checksum() {
        // Known vector from the EIP-55 reference list
        let addr = Address::from_string("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            addr.to_checksum_string(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_amount_native_parsing() {
        let amount = Amount::from_decimal_str("1.5", NATIVE_DECIMALS).unwrap();
        assert_eq!(amount.base_units(), 1_500_000_000_000_000_000);
        assert_eq!(amount.as_string(), "1.5");

        let one = Amount::from_decimal_str("1.0", NATIVE_DECIMALS).unwrap();
        assert_eq!(one.base_units(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn test_amount_token_scaling() {
        // USDT-style 6-decimal token
        let amount = Amount::from_decimal_str("50.0", 6).unwrap();
        assert_eq!(amount.base_units(), 50_000_000);
        assert_eq!(amount.as_string(), "50");
    }

    #[test]
    fn test_amount_rejects_excess_precision() {
        assert!(Amount::from_decimal_str("1.1234567", 6).is_err());
        assert!(Amount::from_decimal_str("0.0000000000000000001", 18).is_err());
    }

    #[test]
    fn test_amount_rejects_garbage() {
        assert!(Amount::from_decimal_str("", 18).is_err());
        assert!(Amount::from_decimal_str("-1", 18).is_err());
        assert!(Amount::from_decimal_str("1.2.3", 18).is_err());
        assert!(Amount::from_decimal_str("abc", 18).is_err());
    }

    #[test]
    fn test_amount_arithmetic() {
        let a1 = Amount::from_decimal_str("3", 18).unwrap();
        let a2 = Amount::from_decimal_str("2", 18).unwrap();

        let sum = a1.checked_add(&a2).unwrap();
        assert_eq!(sum.as_string(), "5");

        let diff = a1.checked_sub(&a2).unwrap();
        assert_eq!(diff.as_string(), "1");

        let mixed = Amount::from_decimal_str("1", 6).unwrap();
        assert!(a1.checked_add(&mixed).is_err());
    }

    #[test]
    fn test_asset_native_marker() {
        let native = Asset::native("ETH");
        assert!(native.is_native());
        assert_eq!(native.decimals, 18);

        let token = Asset {
            symbol: "USDT".to_string(),
            balance: "100".to_string(),
            contract_address: Some("0xdac17f958d2ee523a2206206994597c13d831ec7".to_string()),
            decimals: 6,
        };
        assert!(!token.is_native());
    }
}
