use std::{num::ParseIntError, str::FromStr};

use anyhow::{anyhow, Result};
use throughput_proto::{Phy, TestType};

pub mod console;
pub mod run;
#[cfg_attr(not(feature = "json-output"), allow(dead_code))]
pub mod stats;

/// Parse a byte count with an optional SI suffix, such as `10k` or `1M`, counted in powers of 1024
pub fn parse_byte_size(s: &str) -> Result<u32, ParseIntError> {
    let s = s.trim();

    let multiplier = match s.chars().last() {
        Some('G') => 1024 * 1024 * 1024,
        Some('M') => 1024 * 1024,
        Some('k' | 'K') => 1024,
        _ => 1,
    };

    let s = if multiplier != 1 {
        &s[..s.len() - 1]
    } else {
        s
    };

    let base = u32::from_str(s)?;

    Ok(base.saturating_mul(multiplier))
}

/// Parse a PHY by name (`1M`, `2M`, `125k`, `500k`) or by its stack value
pub fn parse_phy(s: &str) -> Result<Phy> {
    let phy = match s.trim() {
        "1M" | "1m" => Some(Phy::Le1M),
        "2M" | "2m" => Some(Phy::Le2M),
        "125k" | "125K" | "coded" => Some(Phy::Coded125k),
        "500k" | "500K" => Some(Phy::Coded500k),
        other => other.parse().ok().and_then(Phy::from_u8),
    };
    phy.ok_or_else(|| anyhow!("unknown PHY {s:?}"))
}

/// Parse a test type by name or by its client configuration value
pub fn parse_test_type(s: &str) -> Result<TestType> {
    let ty = match s.trim() {
        "notification" | "notifications" | "n" => Some(TestType::Notification),
        "indication" | "indications" | "i" => Some(TestType::Indication),
        other => other.parse().ok().and_then(TestType::from_u8),
    };
    ty.ok_or_else(|| anyhow!("unknown test type {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("1000"), Ok(1000));
        assert_eq!(parse_byte_size(" 10k"), Ok(10 * 1024));
        assert_eq!(parse_byte_size("1M"), Ok(1024 * 1024));
        assert_eq!(parse_byte_size("8G"), Ok(u32::MAX));
        assert!(parse_byte_size("M").is_err());
        assert!(parse_byte_size("ten").is_err());
    }

    #[test]
    fn phys() {
        assert_eq!(parse_phy("2M").unwrap(), Phy::Le2M);
        assert_eq!(parse_phy("4").unwrap(), Phy::Coded125k);
        assert!(parse_phy("3").is_err());
    }

    #[test]
    fn test_types() {
        assert_eq!(parse_test_type("indication").unwrap(), TestType::Indication);
        assert_eq!(parse_test_type("1").unwrap(), TestType::Notification);
        assert!(parse_test_type("0").is_err());
    }
}
