//! Optional read-after-write checking for tapes.
//!
//! The executor trusts tape order. Strict checking verifies at setup that
//! every resource an instruction reads was produced earlier on the tape, is
//! a weight, or is a program input. The first resource of each instruction
//! is its destination; the rest are sources.

use crate::error::{ProgramError, Result};
use crate::program::Program;
use crate::resource::{ResourceId, ResourceRole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether to check tape data dependencies at setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCheck {
    /// Trust tape order.
    #[default]
    Off,

    /// Reject reads with no earlier writer and writes to weights.
    Strict,
}

/// Check that every source read on the tape has an earlier producer.
///
/// Assumes the program already passed [`Program::validate`].
pub fn check_dependencies(program: &Program) -> Result<()> {
    let mut available: HashSet<ResourceId> = program.inputs.iter().copied().collect();
    let mut weights = HashSet::new();
    for desc in &program.resources {
        if desc.role == ResourceRole::Weight {
            available.insert(desc.id);
            weights.insert(desc.id);
        }
    }

    for (index, inst) in program.tape.iter().enumerate() {
        for &source in inst.sources() {
            if !available.contains(&source) {
                return Err(ProgramError::ReadBeforeWrite {
                    instruction: index,
                    resource: source,
                });
            }
        }
        if let Some(dest) = inst.destination() {
            if weights.contains(&dest) {
                return Err(ProgramError::WeightWrite {
                    instruction: index,
                    resource: dest,
                });
            }
            available.insert(dest);
        }
    }

    tracing::debug!(
        instructions = program.tape.len(),
        "tape dependency check passed"
    );
    Ok(())
}
