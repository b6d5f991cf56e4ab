use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::error::DissectError;
use crate::reassembly;
use crate::tree::{FieldDescriptor, ProtoTree, expert};

use super::context::PacketContext;
use super::data;
use super::error::RegistrationError;
use super::handle::{Dissector, DissectorHandle, FnDissector, ProtocolId};
use super::heuristic::HeuristicList;
use super::table::{BindPolicy, DissectorTable, KeyType, TableKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Protocol {
    pub id: ProtocolId,
    /// Long name, e.g. "User Datagram Protocol".
    pub name: String,
    /// Column name, e.g. "UDP".
    pub short_name: String,
    /// Lower-case filter name, e.g. "udp".
    pub filter_name: String,
    pub enabled: bool,
}

/// Startup-phase registry. Protocol modules register into it, then
/// [`RegistryBuilder::build`] freezes it into a [`Registry`].
///
/// The raw `data` dissector is always present.
///
/// # Examples
/// ```
/// use sharkbone_core::EngineConfig;
/// use sharkbone_core::dissect::{BindPolicy, KeyType, RegistryBuilder};
///
/// let mut builder = RegistryBuilder::new();
/// let proto = builder.register_protocol("Echo Protocol", "ECHO", "echo")?;
/// let echo = builder.register_fn("echo", proto, |buffer, _cx, _tree| Ok(buffer.reported_length()))?;
/// builder.register_table("udp.port", KeyType::Uint, BindPolicy::Stack)?;
/// builder.bind("udp.port", 7u16, &echo)?;
///
/// let registry = builder.build(EngineConfig::default())?;
/// assert!(registry.dissector("echo").is_some());
/// assert!(registry.dissector("data").is_some());
/// # Ok::<(), sharkbone_core::dissect::RegistrationError>(())
/// ```
pub struct RegistryBuilder {
    protocols: Vec<Protocol>,
    dissectors: Vec<DissectorHandle>,
    by_name: HashMap<String, usize>,
    tables: BTreeMap<String, DissectorTable>,
    heuristics: BTreeMap<String, HeuristicList>,
    fields: BTreeMap<&'static str, &'static FieldDescriptor>,
    data: DissectorHandle,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        let data_protocol = ProtocolId(0);
        let data = DissectorHandle::new(
            0,
            data::NAME,
            data_protocol,
            Box::new(FnDissector(data::dissect)),
        );
        let mut builder = Self {
            protocols: vec![Protocol {
                id: data_protocol,
                name: "Data".to_string(),
                short_name: "DATA".to_string(),
                filter_name: data::NAME.to_string(),
                enabled: true,
            }],
            dissectors: vec![data.clone()],
            by_name: HashMap::from([(data::NAME.to_string(), 0)]),
            tables: BTreeMap::new(),
            heuristics: BTreeMap::new(),
            fields: BTreeMap::new(),
            data,
        };
        for descriptor in data::FIELDS
            .iter()
            .chain(reassembly::FIELDS)
            .chain([&expert::MALFORMED, &expert::SHORT, &expert::EXPERT, &expert::TEXT].iter())
        {
            builder.fields.insert(descriptor.abbrev, *descriptor);
        }
        builder
    }

    pub fn register_protocol(
        &mut self,
        name: &str,
        short_name: &str,
        filter_name: &str,
    ) -> Result<ProtocolId, RegistrationError> {
        if self.protocols.iter().any(|p| p.filter_name == filter_name) {
            return Err(RegistrationError::DuplicateProtocol {
                filter_name: filter_name.to_string(),
            });
        }
        let id = ProtocolId(self.protocols.len() as u32);
        self.protocols.push(Protocol {
            id,
            name: name.to_string(),
            short_name: short_name.to_string(),
            filter_name: filter_name.to_string(),
            enabled: true,
        });
        tracing::trace!(protocol = filter_name, "protocol registered");
        Ok(id)
    }

    /// Register `dissector` under a unique `name`.
    pub fn register_dissector(
        &mut self,
        name: &str,
        protocol: ProtocolId,
        dissector: impl Dissector + 'static,
    ) -> Result<DissectorHandle, RegistrationError> {
        if self.by_name.contains_key(name) {
            return Err(RegistrationError::DuplicateDissector {
                name: name.to_string(),
            });
        }
        if protocol.index() >= self.protocols.len() {
            return Err(RegistrationError::UnknownProtocol {
                name: format!("#{}", protocol.0),
            });
        }
        let id = self.dissectors.len() as u32;
        let handle = DissectorHandle::new(id, name, protocol, Box::new(dissector));
        self.by_name.insert(name.to_string(), self.dissectors.len());
        self.dissectors.push(handle.clone());
        tracing::trace!(dissector = name, id, "dissector registered");
        Ok(handle)
    }

    /// Register a function or closure as a dissector.
    pub fn register_fn<F>(
        &mut self,
        name: &str,
        protocol: ProtocolId,
        dissect: F,
    ) -> Result<DissectorHandle, RegistrationError>
    where
        F: Fn(&Buffer, &mut PacketContext<'_>, &mut ProtoTree<'_>) -> Result<usize, DissectError>
            + Send
            + Sync
            + 'static,
    {
        self.register_dissector(name, protocol, FnDissector(dissect))
    }

    /// Add a field to the filterable index. Registering the same definition
    /// again is allowed.
    pub fn register_field(
        &mut self,
        descriptor: &'static FieldDescriptor,
    ) -> Result<(), RegistrationError> {
        match self.fields.get(descriptor.abbrev) {
            Some(existing) if *existing != descriptor => Err(RegistrationError::ConflictingField {
                abbrev: descriptor.abbrev.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.fields.insert(descriptor.abbrev, descriptor);
                Ok(())
            }
        }
    }

    pub fn register_fields(
        &mut self,
        descriptors: &[&'static FieldDescriptor],
    ) -> Result<(), RegistrationError> {
        descriptors
            .iter()
            .try_for_each(|descriptor| self.register_field(*descriptor))
    }

    pub fn register_table(
        &mut self,
        name: &str,
        key_type: KeyType,
        policy: BindPolicy,
    ) -> Result<(), RegistrationError> {
        if self.tables.contains_key(name) {
            return Err(RegistrationError::DuplicateTable {
                name: name.to_string(),
            });
        }
        self.tables
            .insert(name.to_string(), DissectorTable::new(name, key_type, policy));
        Ok(())
    }

    pub fn bind(
        &mut self,
        table: &str,
        key: impl Into<TableKey>,
        handle: &DissectorHandle,
    ) -> Result<(), RegistrationError> {
        self.table_mut(table)?.bind(key.into(), handle)
    }

    /// Select `dissector` for `key` regardless of the table's binds.
    pub fn decode_as(
        &mut self,
        table: &str,
        key: impl Into<TableKey>,
        dissector: &str,
    ) -> Result<(), RegistrationError> {
        let handle = self.handle(dissector)?;
        self.table_mut(table)?.set_override(key.into(), &handle)
    }

    /// Append a heuristic to `list`, creating the list on first use.
    pub fn register_heuristic<P>(
        &mut self,
        list: &str,
        short_name: &str,
        display_name: &str,
        probe: P,
        handle: &DissectorHandle,
    ) -> Result<(), RegistrationError>
    where
        P: Fn(&Buffer, &PacketContext<'_>) -> bool + Send + Sync + 'static,
    {
        let entries = self
            .heuristics
            .entry(list.to_string())
            .or_insert_with(|| HeuristicList::new(list));
        if entries.contains(short_name) {
            return Err(RegistrationError::DuplicateHeuristic {
                list: list.to_string(),
                short_name: short_name.to_string(),
            });
        }
        entries.push(short_name, display_name, Box::new(probe), handle);
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut DissectorTable, RegistrationError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| RegistrationError::UnknownTable {
                name: name.to_string(),
            })
    }

    fn handle(&self, name: &str) -> Result<DissectorHandle, RegistrationError> {
        self.by_name
            .get(name)
            .map(|&idx| self.dissectors[idx].clone())
            .ok_or_else(|| RegistrationError::UnknownDissector {
                name: name.to_string(),
            })
    }

    /// Apply `config` and freeze.
    ///
    /// # Errors
    /// Unknown protocol, heuristic, table or dissector names in `config`, and
    /// decode-as keys that do not parse as the table's key type.
    pub fn build(mut self, config: EngineConfig) -> Result<Registry, RegistrationError> {
        for name in &config.disabled_protocols {
            let protocol = self
                .protocols
                .iter_mut()
                .find(|p| p.filter_name == *name)
                .ok_or_else(|| RegistrationError::UnknownProtocol { name: name.clone() })?;
            protocol.enabled = false;
        }

        for name in &config.disabled_heuristics {
            let mut found = false;
            for list in self.heuristics.values_mut() {
                found |= list.set_enabled(name, false);
            }
            if !found {
                return Err(RegistrationError::UnknownHeuristic { name: name.clone() });
            }
        }

        for rule in &config.decode_as {
            let key_type = self.table_mut(&rule.table)?.key_type();
            let key = TableKey::parse(&rule.key, key_type).ok_or_else(|| RegistrationError::KeyType {
                table: rule.table.clone(),
                expected: key_type,
                key: rule.key.clone(),
            })?;
            self.decode_as(&rule.table, key, &rule.dissector)?;
        }

        tracing::debug!(
            protocols = self.protocols.len(),
            dissectors = self.dissectors.len(),
            tables = self.tables.len(),
            heuristic_lists = self.heuristics.len(),
            fields = self.fields.len(),
            "registry frozen"
        );

        Ok(Registry {
            protocols: self.protocols,
            dissectors: self.dissectors,
            by_name: self.by_name,
            tables: self.tables,
            heuristics: self.heuristics,
            fields: self.fields,
            data: self.data,
            config,
        })
    }
}

/// Frozen registry: every protocol, dissector, table and heuristic list,
/// plus the engine configuration. Read-only and shareable across threads.
pub struct Registry {
    protocols: Vec<Protocol>,
    dissectors: Vec<DissectorHandle>,
    by_name: HashMap<String, usize>,
    tables: BTreeMap<String, DissectorTable>,
    heuristics: BTreeMap<String, HeuristicList>,
    fields: BTreeMap<&'static str, &'static FieldDescriptor>,
    data: DissectorHandle,
    config: EngineConfig,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// # Panics
    /// Panics when `id` was issued by another registry.
    pub fn protocol(&self, id: ProtocolId) -> &Protocol {
        &self.protocols[id.index()]
    }

    pub fn protocol_by_filter(&self, filter_name: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.filter_name == filter_name)
    }

    pub fn is_enabled(&self, id: ProtocolId) -> bool {
        self.protocols.get(id.index()).is_some_and(|p| p.enabled)
    }

    pub fn dissector(&self, name: &str) -> Option<&DissectorHandle> {
        self.by_name.get(name).map(|&idx| &self.dissectors[idx])
    }

    /// Dissectors in registration order.
    pub fn dissectors(&self) -> &[DissectorHandle] {
        &self.dissectors
    }

    pub fn table(&self, name: &str) -> Option<&DissectorTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &DissectorTable> {
        self.tables.values()
    }

    pub fn heuristics(&self, list: &str) -> Option<&HeuristicList> {
        self.heuristics.get(list)
    }

    pub fn heuristic_lists(&self) -> impl Iterator<Item = &HeuristicList> {
        self.heuristics.values()
    }

    pub fn field(&self, abbrev: &str) -> Option<&'static FieldDescriptor> {
        self.fields.get(abbrev).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static FieldDescriptor> + '_ {
        self.fields.values().copied()
    }

    pub fn data_handle(&self) -> &DissectorHandle {
        &self.data
    }

    /// Standard next-layer selection: try `keys` in order against `table`,
    /// then the heuristics in `heuristics`, then the raw data dissector.
    /// Returns the bytes consumed.
    pub fn dispatch_or_fallback(
        &self,
        table: &str,
        keys: &[TableKey],
        heuristics: Option<&str>,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<usize, DissectError> {
        if buffer.reported_length() == 0 {
            return Ok(0);
        }
        if let Some(table) = self.table(table) {
            for key in keys {
                if let Some(consumed) = table.dispatch(key.clone(), buffer, cx, tree)? {
                    return Ok(consumed);
                }
            }
        }
        match heuristics.and_then(|list| self.heuristics(list)) {
            Some(list) => list.try_all(buffer, cx, tree),
            None => cx.call_data(buffer, tree),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RegistryBuilder;
    use crate::config::{DecodeAs, EngineConfig};
    use crate::dissect::{BindPolicy, KeyType, RegistrationError, TableKey};
    use crate::tree::{FieldDescriptor, FieldType};

    static A: FieldDescriptor = FieldDescriptor::new("A", "t.a", FieldType::UInt8);
    static A_AGAIN: FieldDescriptor = FieldDescriptor::new("A", "t.a", FieldType::UInt8);
    static A_OTHER: FieldDescriptor = FieldDescriptor::new("A", "t.a", FieldType::UInt16);

    fn accept_all() -> impl Fn(
        &crate::buffer::Buffer,
        &mut crate::dissect::PacketContext<'_>,
        &mut crate::tree::ProtoTree<'_>,
    ) -> Result<usize, crate::DissectError>
    + Send
    + Sync
    + 'static {
        |buffer, _cx, _tree| Ok(buffer.reported_length())
    }

    #[test]
    fn duplicate_dissector_name_fails() {
        let mut builder = RegistryBuilder::new();
        let proto = builder.register_protocol("Test", "TEST", "test").unwrap();
        builder.register_fn("test", proto, accept_all()).unwrap();
        let err = builder.register_fn("test", proto, accept_all()).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::DuplicateDissector {
                name: "test".into()
            }
        );
        assert!(matches!(
            builder.register_protocol("Test", "TEST", "test"),
            Err(RegistrationError::DuplicateProtocol { .. })
        ));
    }

    #[test]
    fn bind_checks_table_and_key_type() {
        let mut builder = RegistryBuilder::new();
        let proto = builder.register_protocol("Test", "TEST", "test").unwrap();
        let handle = builder.register_fn("test", proto, accept_all()).unwrap();
        builder
            .register_table("port", KeyType::Uint, BindPolicy::FirstWins)
            .unwrap();

        assert!(matches!(
            builder.bind("port", "http", &handle),
            Err(RegistrationError::KeyType { .. })
        ));
        assert!(matches!(
            builder.bind("missing", 1u16, &handle),
            Err(RegistrationError::UnknownTable { .. })
        ));
        assert!(matches!(
            builder.register_table("port", KeyType::Uint, BindPolicy::Stack),
            Err(RegistrationError::DuplicateTable { .. })
        ));
    }

    #[test]
    fn fields_may_repeat_only_with_the_same_definition() {
        let mut builder = RegistryBuilder::new();
        builder.register_field(&A).unwrap();
        builder.register_field(&A_AGAIN).unwrap();
        assert!(matches!(
            builder.register_field(&A_OTHER),
            Err(RegistrationError::ConflictingField { .. })
        ));
    }

    #[test]
    fn config_disables_protocols_and_applies_decode_as() {
        let mut builder = RegistryBuilder::new();
        let proto = builder.register_protocol("Test", "TEST", "test").unwrap();
        builder.register_fn("test", proto, accept_all()).unwrap();
        builder
            .register_table("port", KeyType::Uint, BindPolicy::Stack)
            .unwrap();

        let config = EngineConfig {
            disabled_protocols: vec!["data".into()],
            decode_as: vec![DecodeAs {
                table: "port".into(),
                key: "0x10".into(),
                dissector: "test".into(),
            }],
            ..EngineConfig::default()
        };
        let registry = builder.build(config).unwrap();
        assert!(!registry.is_enabled(registry.data_handle().protocol()));
        let table = registry.table("port").unwrap();
        let selected = table.select(&TableKey::Uint(16), |p| registry.is_enabled(p));
        assert_eq!(selected.map(|h| h.name()), Some("test"));
    }

    #[test]
    fn unknown_names_in_config_fail_the_build() {
        let config = EngineConfig {
            disabled_heuristics: vec!["nope".into()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            RegistryBuilder::new().build(config),
            Err(RegistrationError::UnknownHeuristic { .. })
        ));

        let config = EngineConfig {
            disabled_protocols: vec!["nope".into()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            RegistryBuilder::new().build(config),
            Err(RegistrationError::UnknownProtocol { .. })
        ));
    }
}
