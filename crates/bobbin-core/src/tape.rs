//! Dispatch tape records.

use crate::program::PipelineId;
use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};

/// One dispatch on the tape.
///
/// `resources[i]` is bound at binding `i + 1`; binding 0 is the shared
/// constant and is never listed. By convention `resources[0]` is the
/// buffer the kernel writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchInstruction {
    /// Pipeline to run.
    pub pipeline: PipelineId,

    /// Resources bound at bindings `1..=resources.len()`.
    pub resources: Vec<ResourceId>,

    /// Workgroup counts (x, y, z).
    pub workgroups: [u32; 3],
}

impl DispatchInstruction {
    /// Create a dispatch instruction.
    pub fn new(pipeline: usize, resources: &[usize], workgroups: [u32; 3]) -> Self {
        Self {
            pipeline: PipelineId(pipeline),
            resources: resources.iter().copied().map(ResourceId).collect(),
            workgroups,
        }
    }

    /// The resource this dispatch writes, by convention the first binding.
    pub fn destination(&self) -> Option<ResourceId> {
        self.resources.first().copied()
    }

    /// Resources this dispatch reads (everything after the destination).
    pub fn sources(&self) -> &[ResourceId] {
        self.resources.get(1..).unwrap_or(&[])
    }

    /// Total number of workgroups launched.
    pub fn workgroup_total(&self) -> u64 {
        self.workgroups.iter().map(|&n| n as u64).product()
    }
}
