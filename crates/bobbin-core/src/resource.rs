//! Resource descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub usize);

impl ResourceId {
    /// Create a new resource ID.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf_{}", self.0)
    }
}

/// How a buffer is used across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    /// Written once at setup from a weight source, read-only afterwards.
    Weight,

    /// Overwritten by the tape on every call. Contents between calls are unspecified.
    Scratch,

    /// Upload or download target visible to callers.
    Io,
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceRole::Weight => "weight",
            ResourceRole::Scratch => "scratch",
            ResourceRole::Io => "io",
        };
        f.write_str(name)
    }
}

/// A device buffer declared by a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDesc {
    /// Stable id referenced by the tape.
    pub id: ResourceId,

    /// Declared size in bytes (what callers upload and download).
    pub byte_size: u64,

    /// Usage role.
    pub role: ResourceRole,

    /// Source tensor name for weight resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor: Option<String>,

    /// Label for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ResourceDesc {
    /// A scratch buffer.
    pub fn scratch(id: usize, byte_size: u64) -> Self {
        Self {
            id: ResourceId(id),
            byte_size,
            role: ResourceRole::Scratch,
            tensor: None,
            label: None,
        }
    }

    /// An io buffer.
    pub fn io(id: usize, byte_size: u64) -> Self {
        Self {
            id: ResourceId(id),
            byte_size,
            role: ResourceRole::Io,
            tensor: None,
            label: None,
        }
    }

    /// A weight buffer loaded from the named tensor.
    pub fn weight(id: usize, byte_size: u64, tensor: impl Into<String>) -> Self {
        Self {
            id: ResourceId(id),
            byte_size,
            role: ResourceRole::Weight,
            tensor: Some(tensor.into()),
            label: None,
        }
    }

    /// Attach a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used for device objects: the explicit label, the tensor name, or the id.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.tensor.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&ResourceRole::Scratch).unwrap();
        assert_eq!(json, "\"scratch\"");
        let role: ResourceRole = serde_json::from_str("\"weight\"").unwrap();
        assert_eq!(role, ResourceRole::Weight);
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(ResourceDesc::scratch(3, 16).display_name(), "buf_3");
        assert_eq!(
            ResourceDesc::weight(4, 16, "final_layer_norm.bias").display_name(),
            "final_layer_norm.bias"
        );
        assert_eq!(
            ResourceDesc::io(5, 16).with_label("input0").display_name(),
            "input0"
        );
    }
}
