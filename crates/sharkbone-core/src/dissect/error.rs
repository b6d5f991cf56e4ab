use thiserror::Error;

use super::table::KeyType;

/// Failures of the startup registration phase.
///
/// # Examples
/// ```
/// use sharkbone_core::dissect::RegistrationError;
///
/// let err = RegistrationError::DuplicateDissector { name: "udp".into() };
/// assert!(err.to_string().contains("registered twice"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("protocol {filter_name} registered twice")]
    DuplicateProtocol { filter_name: String },
    #[error("dissector {name} registered twice")]
    DuplicateDissector { name: String },
    #[error("dissector table {name} registered twice")]
    DuplicateTable { name: String },
    #[error("heuristic {short_name} registered twice in list {list}")]
    DuplicateHeuristic { list: String, short_name: String },
    #[error("field {abbrev} registered twice with different definitions")]
    ConflictingField { abbrev: String },
    #[error("table {table} takes {expected:?} keys, got {key}")]
    KeyType {
        table: String,
        expected: KeyType,
        key: String,
    },
    #[error("unknown protocol: {name}")]
    UnknownProtocol { name: String },
    #[error("unknown dissector: {name}")]
    UnknownDissector { name: String },
    #[error("unknown dissector table: {name}")]
    UnknownTable { name: String },
    #[error("unknown heuristic: {name}")]
    UnknownHeuristic { name: String },
}
