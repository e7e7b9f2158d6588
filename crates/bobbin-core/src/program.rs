//! Program descriptions: the serialized tape plus everything it references.

use crate::error::{ProgramError, Result};
use crate::layout::LayoutSignature;
use crate::resource::{ResourceDesc, ResourceId, ResourceRole};
use crate::tape::DispatchInstruction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Identifier of a pipeline within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub usize);

impl PipelineId {
    /// Create a new pipeline ID.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline_{}", self.0)
    }
}

fn default_entry_point() -> String {
    "main".to_string()
}

/// A compute kernel and the binding layout it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Stable id referenced by the tape.
    pub id: PipelineId,

    /// Kernel name (e.g., "r_77_16_48"), used for device labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// WGSL source.
    pub source: String,

    /// Compute entry point name.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Binding layout, including the uniform constant at binding 0.
    pub layout: LayoutSignature,
}

impl PipelineSpec {
    /// Create a pipeline spec with the `main` entry point.
    pub fn new(id: usize, source: impl Into<String>, layout: LayoutSignature) -> Self {
        Self {
            id: PipelineId(id),
            label: None,
            source: source.into(),
            entry_point: default_entry_point(),
            layout,
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used for device objects.
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// A complete dispatch program.
///
/// Loaded from JSON, validated once, then handed to the runtime. The tape is
/// replayed in order on every call; its order is the only dependency
/// ordering there is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Program name.
    #[serde(default)]
    pub name: String,

    /// All device buffers.
    pub resources: Vec<ResourceDesc>,

    /// All pipelines.
    pub pipelines: Vec<PipelineSpec>,

    /// Dispatches in execution order.
    #[serde(default)]
    pub tape: Vec<DispatchInstruction>,

    /// Io resources uploaded before each call, in argument order.
    #[serde(default)]
    pub inputs: Vec<ResourceId>,

    /// Io resources downloaded after each call, in result order.
    #[serde(default)]
    pub outputs: Vec<ResourceId>,
}

/// Size and shape statistics for a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramSummary {
    pub resource_count: usize,
    pub weight_bytes: u64,
    pub scratch_bytes: u64,
    pub io_bytes: u64,
    pub pipeline_count: usize,
    /// Pipelines actually referenced by the tape.
    pub referenced_pipelines: usize,
    /// Distinct (source, entry point, layout) triples among referenced pipelines.
    pub distinct_kernels: usize,
    /// Distinct layout signatures among referenced pipelines.
    pub distinct_layouts: usize,
    pub instruction_count: usize,
    pub workgroup_total: u64,
}

impl Program {
    /// Parse a program from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a program from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up a resource by id.
    pub fn resource(&self, id: ResourceId) -> Option<&ResourceDesc> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Look up a pipeline by id.
    pub fn pipeline(&self, id: PipelineId) -> Option<&PipelineSpec> {
        self.pipelines.iter().find(|p| p.id == id)
    }

    /// Pipeline ids referenced by the tape, in order of first use.
    pub fn referenced_pipelines(&self) -> Vec<PipelineId> {
        let mut seen = HashSet::new();
        self.tape
            .iter()
            .map(|inst| inst.pipeline)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Statically validate the program.
    ///
    /// Checks id uniqueness, non-zero sizes, weight tensor names, layout
    /// structure, that every instruction names a declared pipeline and
    /// declared resources, that binding counts match, and that inputs and
    /// outputs are io resources. Buffer sizes versus what shaders index are
    /// not checkable here.
    pub fn validate(&self) -> Result<()> {
        let mut resources: HashMap<ResourceId, &ResourceDesc> = HashMap::new();
        for desc in &self.resources {
            if resources.insert(desc.id, desc).is_some() {
                return Err(ProgramError::DuplicateResource(desc.id));
            }
            if desc.byte_size == 0 {
                return Err(ProgramError::ZeroSizedResource(desc.id));
            }
            if desc.role == ResourceRole::Weight && desc.tensor.is_none() {
                return Err(ProgramError::MissingTensorName(desc.id));
            }
        }

        let mut pipelines: HashMap<PipelineId, &PipelineSpec> = HashMap::new();
        for spec in &self.pipelines {
            if pipelines.insert(spec.id, spec).is_some() {
                return Err(ProgramError::DuplicatePipeline(spec.id));
            }
            spec.layout
                .check()
                .map_err(|reason| ProgramError::InvalidLayout {
                    pipeline: spec.id,
                    reason,
                })?;
        }

        for (index, inst) in self.tape.iter().enumerate() {
            let spec = pipelines
                .get(&inst.pipeline)
                .ok_or(ProgramError::UnknownPipeline {
                    instruction: index,
                    pipeline: inst.pipeline,
                })?;

            let expected = spec.layout.resource_count();
            if inst.resources.len() != expected {
                return Err(ProgramError::BindingCount {
                    instruction: index,
                    pipeline: inst.pipeline,
                    expected,
                    found: inst.resources.len(),
                });
            }

            for &id in &inst.resources {
                if !resources.contains_key(&id) {
                    return Err(ProgramError::UnknownResource {
                        context: format!("Instruction {index}"),
                        resource: id,
                    });
                }
            }
        }

        for (direction, ids) in [("input", &self.inputs), ("output", &self.outputs)] {
            for &id in ids {
                let desc = resources.get(&id).ok_or_else(|| ProgramError::UnknownResource {
                    context: format!("Program {direction} list"),
                    resource: id,
                })?;
                if desc.role != ResourceRole::Io {
                    return Err(ProgramError::NotIo {
                        resource: id,
                        direction,
                        role: desc.role,
                    });
                }
            }
        }

        Ok(())
    }

    /// Compute size statistics. Assumes the program validates.
    pub fn summary(&self) -> ProgramSummary {
        let mut summary = ProgramSummary {
            resource_count: self.resources.len(),
            pipeline_count: self.pipelines.len(),
            instruction_count: self.tape.len(),
            ..Default::default()
        };

        for desc in &self.resources {
            match desc.role {
                ResourceRole::Weight => summary.weight_bytes += desc.byte_size,
                ResourceRole::Scratch => summary.scratch_bytes += desc.byte_size,
                ResourceRole::Io => summary.io_bytes += desc.byte_size,
            }
        }

        let referenced = self.referenced_pipelines();
        summary.referenced_pipelines = referenced.len();

        let mut kernels = HashSet::new();
        let mut layouts = HashSet::new();
        for spec in referenced.iter().filter_map(|&id| self.pipeline(id)) {
            kernels.insert((spec.source.as_str(), spec.entry_point.as_str(), spec.layout.kinds()));
            layouts.insert(spec.layout.kinds());
        }
        summary.distinct_kernels = kernels.len();
        summary.distinct_layouts = layouts.len();

        summary.workgroup_total = self.tape.iter().map(|inst| inst.workgroup_total()).sum();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = "@compute @workgroup_size(1) fn main() {}";

    fn two_step_program() -> Program {
        Program {
            name: "two_step".to_string(),
            resources: vec![
                ResourceDesc::io(0, 16),
                ResourceDesc::weight(1, 16, "w"),
                ResourceDesc::scratch(2, 16),
                ResourceDesc::io(3, 16),
            ],
            pipelines: vec![
                PipelineSpec::new(0, KERNEL, LayoutSignature::uniform_then_storage(3)),
                PipelineSpec::new(1, KERNEL, LayoutSignature::uniform_then_storage(2)),
            ],
            tape: vec![
                DispatchInstruction::new(0, &[2, 0, 1], [1, 1, 1]),
                DispatchInstruction::new(1, &[3, 2], [1, 1, 1]),
            ],
            inputs: vec![ResourceId(0)],
            outputs: vec![ResourceId(3)],
        }
    }

    #[test]
    fn test_valid_program() {
        two_step_program().validate().unwrap();
    }

    #[test]
    fn test_unknown_resource() {
        let mut program = two_step_program();
        program.tape[1].resources[1] = ResourceId(42);
        let err = program.validate().unwrap_err();
        assert!(matches!(
            err,
            ProgramError::UnknownResource {
                resource: ResourceId(42),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_pipeline() {
        let mut program = two_step_program();
        program.tape[0].pipeline = PipelineId(9);
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::UnknownPipeline { instruction: 0, .. }
        ));
    }

    #[test]
    fn test_binding_count_mismatch() {
        let mut program = two_step_program();
        program.tape[1].resources.push(ResourceId(0));
        match program.validate().unwrap_err() {
            ProgramError::BindingCount {
                instruction,
                expected,
                found,
                ..
            } => {
                assert_eq!(instruction, 1);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_size_and_duplicates() {
        let mut program = two_step_program();
        program.resources[2].byte_size = 0;
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::ZeroSizedResource(ResourceId(2))
        ));

        let mut program = two_step_program();
        program.resources.push(ResourceDesc::scratch(2, 8));
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::DuplicateResource(ResourceId(2))
        ));

        let mut program = two_step_program();
        program.pipelines.push(PipelineSpec::new(
            1,
            KERNEL,
            LayoutSignature::uniform_then_storage(1),
        ));
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::DuplicatePipeline(PipelineId(1))
        ));
    }

    #[test]
    fn test_weight_needs_tensor_name() {
        let mut program = two_step_program();
        program.resources[1].tensor = None;
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::MissingTensorName(ResourceId(1))
        ));
    }

    #[test]
    fn test_io_lists_require_io_role() {
        let mut program = two_step_program();
        program.outputs = vec![ResourceId(2)];
        assert!(matches!(
            program.validate().unwrap_err(),
            ProgramError::NotIo {
                direction: "output",
                role: ResourceRole::Scratch,
                ..
            }
        ));
    }

    #[test]
    fn test_summary_counts_distinct_kernels() {
        let mut program = two_step_program();
        // Same kernel and layout as pipeline 1 under another id
        program.pipelines.push(PipelineSpec::new(
            2,
            KERNEL,
            LayoutSignature::uniform_then_storage(2),
        ));
        // Declared but never dispatched
        program.pipelines.push(PipelineSpec::new(
            3,
            KERNEL,
            LayoutSignature::uniform_then_storage(5),
        ));
        program
            .tape
            .push(DispatchInstruction::new(2, &[3, 0], [77, 77, 1]));

        let summary = program.summary();
        assert_eq!(summary.pipeline_count, 4);
        assert_eq!(summary.referenced_pipelines, 3);
        assert_eq!(summary.distinct_kernels, 2);
        assert_eq!(summary.distinct_layouts, 2);
        assert_eq!(summary.weight_bytes, 16);
        assert_eq!(summary.scratch_bytes, 16);
        assert_eq!(summary.io_bytes, 32);
        assert_eq!(summary.workgroup_total, 2 + 77 * 77);
    }

    #[test]
    fn test_json_round_trip_defaults() {
        let json = r#"{
            "resources": [{"id": 0, "byte_size": 308, "role": "io"}],
            "pipelines": [],
            "inputs": [0],
            "outputs": [0]
        }"#;
        let program = Program::from_json(json).unwrap();
        assert!(program.tape.is_empty());
        assert_eq!(program.name, "");
        program.validate().unwrap();

        let spec: PipelineSpec = serde_json::from_str(
            r#"{"id": 7, "source": "x", "layout": [{"binding": 0, "kind": "uniform"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.entry_point, "main");
    }

    #[test]
    fn test_demo_program_is_valid() {
        let json = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/copy_max.json"));
        let program = Program::from_json(json).unwrap();
        program.validate().unwrap();
        crate::check_dependencies(&program).unwrap();

        let summary = program.summary();
        assert_eq!(summary.io_bytes, 312);
        assert_eq!(summary.distinct_layouts, 1);
        assert_eq!(summary.distinct_kernels, 2);
    }
}
