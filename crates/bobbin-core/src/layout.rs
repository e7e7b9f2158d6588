//! Binding layout signatures.
//!
//! Every pipeline binds a single bind group. Binding 0 is always the shared
//! uniform constant; bindings `1..n` are storage buffers supplied, in order,
//! by the dispatch instruction. Two pipelines with the same ordered list of
//! binding kinds share one device layout.

use serde::{Deserialize, Serialize};

/// Kind of buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// Uniform buffer. Only valid at binding 0.
    Uniform,

    /// Read-only storage buffer (`var<storage, read>`).
    StorageRead,

    /// Read-write storage buffer (`var<storage, read_write>`).
    StorageReadWrite,
}

/// One entry of a layout signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingSlot {
    /// Binding index within group 0.
    pub binding: u32,

    /// Buffer kind bound at this index.
    pub kind: BindingKind,
}

/// Ordered binding layout of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutSignature {
    slots: Vec<BindingSlot>,
}

impl LayoutSignature {
    /// Build a signature from explicit slots.
    pub fn new(slots: Vec<BindingSlot>) -> Self {
        Self { slots }
    }

    /// The layout generated tapes use: the uniform constant followed by
    /// `storage_count` read-write storage buffers.
    pub fn uniform_then_storage(storage_count: usize) -> Self {
        Self::from_kinds(
            std::iter::once(BindingKind::Uniform)
                .chain(std::iter::repeat_n(BindingKind::StorageReadWrite, storage_count)),
        )
    }

    /// Build a signature numbering the given kinds `0..n`.
    pub fn from_kinds(kinds: impl IntoIterator<Item = BindingKind>) -> Self {
        let slots = kinds
            .into_iter()
            .enumerate()
            .map(|(i, kind)| BindingSlot {
                binding: i as u32,
                kind,
            })
            .collect();
        Self { slots }
    }

    /// All slots in binding order.
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Binding kinds in order. Two valid signatures with equal kinds share a layout.
    pub fn kinds(&self) -> Vec<BindingKind> {
        self.slots.iter().map(|s| s.kind).collect()
    }

    /// Total number of bindings, including the constant.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the signature has no bindings.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of resources an instruction must supply (everything after binding 0).
    pub fn resource_count(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    /// Kind of the slot at `binding`, if any.
    pub fn kind_at(&self, binding: u32) -> Option<BindingKind> {
        self.slots
            .iter()
            .find(|s| s.binding == binding)
            .map(|s| s.kind)
    }

    /// Check the structural rules, returning a description of the first violation.
    ///
    /// Bindings must be numbered `0..n` in order, binding 0 must be the uniform
    /// constant, and no other binding may be a uniform.
    pub fn check(&self) -> std::result::Result<(), String> {
        let Some(first) = self.slots.first() else {
            return Err("layout has no bindings; binding 0 must be the uniform constant".into());
        };
        if first.kind != BindingKind::Uniform {
            return Err(format!(
                "binding 0 must be uniform, found {:?}",
                first.kind
            ));
        }
        for (position, slot) in self.slots.iter().enumerate() {
            if slot.binding as usize != position {
                return Err(format!(
                    "binding indices must be contiguous from 0, found {} at position {}",
                    slot.binding, position
                ));
            }
            if position > 0 && slot.kind == BindingKind::Uniform {
                return Err(format!(
                    "only binding 0 may be uniform, found uniform at binding {}",
                    slot.binding
                ));
            }
        }
        Ok(())
    }
}
