use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::DissectError;
use crate::tree::ProtoTree;

use super::context::PacketContext;
use super::error::RegistrationError;
use super::handle::{DissectorHandle, ProtocolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Uint,
    String,
}

/// What a second bind for an existing key does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindPolicy {
    /// The first bind stays; later ones are ignored.
    FirstWins,
    /// A later bind replaces the earlier one.
    LastWins,
    /// Binds pile up; the most recent enabled one is selected and earlier ones
    /// remain as fallbacks.
    Stack,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableKey {
    Uint(u32),
    String(String),
}

impl TableKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            TableKey::Uint(_) => KeyType::Uint,
            TableKey::String(_) => KeyType::String,
        }
    }

    /// Parse a textual key (decode-as rules, CLI flags) for a table of
    /// `key_type`. Unsigned keys accept decimal or `0x` hex.
    pub fn parse(text: &str, key_type: KeyType) -> Option<TableKey> {
        match key_type {
            KeyType::String => Some(TableKey::String(text.to_string())),
            KeyType::Uint => {
                let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                    None => text.parse().ok()?,
                };
                Some(TableKey::Uint(value))
            }
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Uint(value) => write!(f, "{value}"),
            TableKey::String(value) => write!(f, "{value}"),
        }
    }
}

impl From<u8> for TableKey {
    fn from(value: u8) -> Self {
        TableKey::Uint(u32::from(value))
    }
}

impl From<u16> for TableKey {
    fn from(value: u16) -> Self {
        TableKey::Uint(u32::from(value))
    }
}

impl From<u32> for TableKey {
    fn from(value: u32) -> Self {
        TableKey::Uint(value)
    }
}

impl From<&str> for TableKey {
    fn from(value: &str) -> Self {
        TableKey::String(value.to_string())
    }
}

impl From<String> for TableKey {
    fn from(value: String) -> Self {
        TableKey::String(value)
    }
}

/// Keyed selection of the next protocol layer.
///
/// Built during registration; read-only once the registry is frozen.
#[derive(Debug)]
pub struct DissectorTable {
    name: String,
    key_type: KeyType,
    policy: BindPolicy,
    entries: BTreeMap<TableKey, Vec<DissectorHandle>>,
    overrides: BTreeMap<TableKey, DissectorHandle>,
}

impl DissectorTable {
    pub(crate) fn new(name: &str, key_type: KeyType, policy: BindPolicy) -> Self {
        Self {
            name: name.to_string(),
            key_type,
            policy,
            entries: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn policy(&self) -> BindPolicy {
        self.policy
    }

    fn check_key(&self, key: &TableKey) -> Result<(), RegistrationError> {
        if key.key_type() == self.key_type {
            Ok(())
        } else {
            Err(RegistrationError::KeyType {
                table: self.name.clone(),
                expected: self.key_type,
                key: key.to_string(),
            })
        }
    }

    pub(crate) fn bind(
        &mut self,
        key: TableKey,
        handle: &DissectorHandle,
    ) -> Result<(), RegistrationError> {
        self.check_key(&key)?;
        let candidates = self.entries.entry(key).or_default();
        match self.policy {
            BindPolicy::FirstWins if !candidates.is_empty() => {
                tracing::debug!(
                    table = %self.name,
                    dissector = handle.name(),
                    kept = candidates[0].name(),
                    "bind ignored, key already taken"
                );
            }
            BindPolicy::LastWins => {
                candidates.clear();
                candidates.push(handle.clone());
            }
            _ => candidates.push(handle.clone()),
        }
        Ok(())
    }

    pub(crate) fn set_override(
        &mut self,
        key: TableKey,
        handle: &DissectorHandle,
    ) -> Result<(), RegistrationError> {
        self.check_key(&key)?;
        self.overrides.insert(key, handle.clone());
        Ok(())
    }

    /// Every handle bound to `key`, in bind order.
    pub fn candidates(&self, key: &TableKey) -> &[DissectorHandle] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    /// Bound keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &TableKey> {
        self.entries.keys()
    }

    /// The handle `key` currently selects, honouring decode-as overrides and
    /// the bind policy. Handles of disabled protocols are never selected.
    pub fn select(
        &self,
        key: &TableKey,
        enabled: impl Fn(ProtocolId) -> bool,
    ) -> Option<&DissectorHandle> {
        if let Some(handle) = self.overrides.get(key) {
            if enabled(handle.protocol()) {
                return Some(handle);
            }
        }
        let candidates = self.entries.get(key)?;
        match self.policy {
            BindPolicy::FirstWins | BindPolicy::LastWins => candidates
                .first()
                .filter(|handle| enabled(handle.protocol())),
            BindPolicy::Stack => candidates
                .iter()
                .rev()
                .find(|handle| enabled(handle.protocol())),
        }
    }

    /// Run the dissector selected by `key`.
    ///
    /// `Ok(None)` when nothing is bound (or the key has the wrong type) and
    /// when the selected dissector rejected the buffer.
    pub fn dispatch(
        &self,
        key: impl Into<TableKey>,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<Option<usize>, DissectError> {
        let key = key.into();
        let registry = cx.registry();
        let Some(handle) = self.select(&key, |protocol| registry.is_enabled(protocol)) else {
            return Ok(None);
        };
        tracing::trace!(table = %self.name, %key, dissector = handle.name(), "table dispatch");
        cx.call_dissector(handle, buffer, tree)
    }
}
