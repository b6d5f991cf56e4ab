use std::fmt;

use serde::{Deserialize, Serialize};

use super::field::{FieldDescriptor, FieldType};

/// Severity of an expert annotation, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Chat,
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertGroup {
    Malformed,
    Protocol,
    Sequence,
    Reassemble,
    Undecoded,
}

/// Annotation attached to a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertInfo {
    pub severity: Severity,
    pub group: ExpertGroup,
    pub message: String,
}

impl ExpertInfo {
    pub fn new(severity: Severity, group: ExpertGroup, message: impl Into<String>) -> Self {
        Self {
            severity,
            group,
            message: message.into(),
        }
    }

    pub fn warning(group: ExpertGroup, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, group, message)
    }

    pub fn note(group: ExpertGroup, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, group, message)
    }
}

impl fmt::Display for ExpertInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}: {}", self.severity, self.group, self.message)
    }
}

/// Marker placed where a protocol layer failed on malformed data.
pub static MALFORMED: FieldDescriptor =
    FieldDescriptor::new("Malformed Packet", "_ws.malformed", FieldType::Protocol);

/// Marker placed where a protocol layer ran into the capture limit.
pub static SHORT: FieldDescriptor = FieldDescriptor::new(
    "Packet size limited during capture",
    "_ws.short",
    FieldType::Protocol,
);

/// Generic expert annotation.
pub static EXPERT: FieldDescriptor = FieldDescriptor::new("Expert Info", "_ws.expert", FieldType::None);

/// Free-form text line.
pub static TEXT: FieldDescriptor = FieldDescriptor::new("Text", "text", FieldType::None);
