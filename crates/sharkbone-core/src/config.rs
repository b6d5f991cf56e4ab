//! Engine configuration.
//!
//! Everything here is applied once, when the registry is frozen, and is then
//! read-only for the lifetime of the engine. The CLI maps its flags onto an
//! [`EngineConfig`]; library users can build one directly or deserialize it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_DEPTH: usize = 64;
pub const DEFAULT_MAX_DISSECTED_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_PDU_LENGTH: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest allowed dissector nesting within one frame.
    pub max_depth: usize,
    /// Bytes all dissector calls of one frame may be handed in total.
    pub max_dissected_bytes: usize,
    pub reassembly: ReassemblyConfig,
    /// Filter names of protocols treated as absent.
    pub disabled_protocols: Vec<String>,
    /// Short names of heuristic dissectors to skip.
    pub disabled_heuristics: Vec<String>,
    pub decode_as: Vec<DecodeAs>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_dissected_bytes: DEFAULT_MAX_DISSECTED_BYTES,
            reassembly: ReassemblyConfig::default(),
            disabled_protocols: Vec::new(),
            disabled_heuristics: Vec::new(),
            decode_as: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// When false, every segment is dissected on its own.
    pub enabled: bool,
    /// Declared message lengths above this desynchronize the stream.
    pub max_pdu_length: usize,
    /// Ceiling on bytes buffered across all streams of a session.
    pub max_pending_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pdu_length: DEFAULT_MAX_PDU_LENGTH,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid decode-as rule {rule:?}: expected <table>==<key>,<dissector>")]
    InvalidDecodeAs { rule: String },
}

/// User override: decode `key` of `table` with `dissector`.
///
/// # Examples
/// ```
/// use sharkbone_core::config::DecodeAs;
///
/// let rule: DecodeAs = "tcp.port==9000,lmsg".parse()?;
/// assert_eq!(rule.table, "tcp.port");
/// assert_eq!(rule.key, "9000");
/// assert_eq!(rule.dissector, "lmsg");
/// # Ok::<(), sharkbone_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeAs {
    pub table: String,
    pub key: String,
    pub dissector: String,
}

impl FromStr for DecodeAs {
    type Err = ConfigError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDecodeAs {
            rule: rule.to_string(),
        };
        let (selector, dissector) = rule.split_once(',').ok_or_else(invalid)?;
        let (table, key) = selector.split_once("==").ok_or_else(invalid)?;
        let (table, key, dissector) = (table.trim(), key.trim(), dissector.trim());
        if table.is_empty() || key.is_empty() || dissector.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            table: table.to_string(),
            key: key.to_string(),
            dissector: dissector.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DecodeAs, EngineConfig};

    #[test]
    fn defaults_enable_reassembly_with_ceilings() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 64);
        assert!(config.reassembly.enabled);
        assert!(config.reassembly.max_pdu_length > 0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_depth": 8, "reassembly": {"enabled": false}}"#).unwrap();
        assert_eq!(config.max_depth, 8);
        assert!(!config.reassembly.enabled);
        assert_eq!(
            config.reassembly.max_pdu_length,
            super::DEFAULT_MAX_PDU_LENGTH
        );
    }

    #[test]
    fn decode_as_rejects_missing_parts() {
        assert!(matches!(
            "tcp.port=5445,lmsg".parse::<DecodeAs>(),
            Err(ConfigError::InvalidDecodeAs { .. })
        ));
        assert!(matches!(
            "tcp.port==5445,".parse::<DecodeAs>(),
            Err(ConfigError::InvalidDecodeAs { .. })
        ));
    }
}
