//! Token amounts in base units.
//!
//! All comparisons in this crate happen on [`U256`] base units (18 decimals for every
//! tracked token). Configuration files carry human readable decimal strings such as
//! `"40"` or `"0.005"`, which are normalized here.

use alloy_core::primitives::{
    U256,
    utils::{format_units, parse_units},
};
use anyhow::Result;

/// Decimals shared by every tracked token.
pub const TOKEN_DECIMALS: u8 = 18;

/// Parse a decimal token amount (e.g. `"1.5"`) into base units.
pub fn parse_amount(value: &str) -> Result<U256> {
    parse_units(value.trim(), TOKEN_DECIMALS)
        .map(|units| units.get_absolute())
        .map_err(|e| anyhow::anyhow!("Invalid token amount '{}': {}", value, e))
}

/// Format base units as a decimal token amount without trailing zeros.
pub fn format_amount(value: U256) -> String {
    let formatted = match format_units(value, TOKEN_DECIMALS) {
        Ok(formatted) => formatted,
        Err(_) => return value.to_string(),
    };

    if !formatted.contains('.') {
        return formatted;
    }

    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Serde adapter storing a [`U256`] base-unit amount as a decimal token string.
pub mod token_amount {
    use alloy_core::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_amount(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_amount(&raw).map_err(serde::de::Error::custom)
    }
}
