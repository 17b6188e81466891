//! Session configuration
//!
//! Defaults mirror the wire limits of the protocol. The binary fills a
//! [`KdConfig`] from its command line, then lets `KDLINK_*` environment
//! variables override the transport and trap registry settings.

use thiserror::Error;

use crate::kd::events::DEBUGGER_EVENT_TAG_START_SEED;
use crate::protocol::{packet::MIN_PACKET_SIZE, MAX_SERIAL_PACKET_SIZE};
use crate::transparency::MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS;

/// Version announced in the ping handshake (major.minor.patch, one byte each)
pub const PROTOCOL_VERSION: u32 = 0x0001_0000;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:50000";

pub const ENV_ADDRESS: &str = "KDLINK_ADDRESS";
pub const ENV_MAX_PACKET_SIZE: &str = "KDLINK_MAX_PACKET_SIZE";
pub const ENV_TRAP_CAPACITY: &str = "KDLINK_TRAP_CAPACITY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Trap registry capacity must be at least 1")]
    ZeroTrapCapacity,

    #[error("Maximum packet size {size:#x} is below the minimum of {min}")]
    PacketSizeTooSmall { size: usize, min: usize },

    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Which end of the link this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Debugger,
    Debuggee,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdConfig {
    pub address: String,
    pub role: Role,
    pub max_packet_size: usize,
    pub trap_capacity: usize,
    pub event_tag_seed: u64,
    pub show_disassembly: bool,
    pub protocol_version: u32,
}

impl KdConfig {
    pub fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            role: Role::Debugger,
            max_packet_size: MAX_SERIAL_PACKET_SIZE,
            trap_capacity: MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS,
            event_tag_seed: DEBUGGER_EVENT_TAG_START_SEED,
            show_disassembly: true,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trap_capacity == 0 {
            return Err(ConfigError::ZeroTrapCapacity);
        }
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(ConfigError::PacketSizeTooSmall {
                size: self.max_packet_size,
                min: MIN_PACKET_SIZE,
            });
        }
        Ok(())
    }

    /// Apply `KDLINK_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any key/value source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ENV_ADDRESS) {
            log::debug!("{} overrides address with {}", ENV_ADDRESS, address);
            self.address = address;
        }

        if let Some(value) = lookup(ENV_MAX_PACKET_SIZE) {
            self.max_packet_size =
                parse_number(&value).map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_MAX_PACKET_SIZE,
                    value: value.clone(),
                })? as usize;
        }

        if let Some(value) = lookup(ENV_TRAP_CAPACITY) {
            self.trap_capacity = parse_number(&value).map_err(|_| ConfigError::InvalidEnv {
                name: ENV_TRAP_CAPACITY,
                value: value.clone(),
            })? as usize;
        }

        Ok(())
    }
}

impl Default for KdConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a number (supports 0x prefix, a WinDbg style ` separator and decimal)
pub fn parse_number(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('`', ""), 16)
    } else {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = KdConfig::default();
        assert_eq!(config.max_packet_size, 0x20000);
        assert_eq!(config.trap_capacity, 200);
        assert_eq!(config.event_tag_seed, 0x1000000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = KdConfig {
            trap_capacity: 0,
            ..KdConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTrapCapacity));

        let config = KdConfig {
            max_packet_size: 2,
            ..KdConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PacketSizeTooSmall { size: 2, .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = KdConfig::default();
        config
            .apply_overrides(|name| match name {
                ENV_ADDRESS => Some("10.0.0.2:9000".to_string()),
                ENV_MAX_PACKET_SIZE => Some("0x1000".to_string()),
                ENV_TRAP_CAPACITY => Some("16".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.address, "10.0.0.2:9000");
        assert_eq!(config.max_packet_size, 0x1000);
        assert_eq!(config.trap_capacity, 16);
    }

    #[test]
    fn test_bad_override() {
        let mut config = KdConfig::default();
        let err = config
            .apply_overrides(|name| (name == ENV_MAX_PACKET_SIZE).then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                name: ENV_MAX_PACKET_SIZE,
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0xfffff800`00000000"), Ok(0xFFFF_F800_0000_0000));
        assert_eq!(parse_number("42"), Ok(42));
        assert!(parse_number("0xzz").is_err());
    }
}
