//! Tape executor.
//!
//! Materializes a [`Program`] into a resource table and a pipeline table,
//! resolves every tape instruction to a pipeline and a bind group once, and
//! then replays the whole tape as a single command submission per call.

use crate::config::ExecutorConfig;
use crate::error::{DeviceError, InvocationError, Result, RuntimeError, SetupError};
use crate::pipelines::{PipelineHandle, PipelineRequest, PipelineTable, check_layout_limits};
use crate::resources::{ResourceTable, padded_size, read_back};
use bobbin_core::{
    DependencyCheck, PipelineId, Program, ResourceId, ResourceRole, WeightSource,
    check_dependencies,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// The tape can be replayed.
    Ready,

    /// A device error occurred; further calls are refused.
    Failed,
}

/// One resolved tape instruction.
struct ReplayStep {
    pipeline: PipelineHandle,
    bind_group: wgpu::BindGroup,
    workgroups: [u32; 3],
}

/// Replays a fixed dispatch tape against fixed resources.
///
/// `run` takes `&mut self`, so calls against one set of scratch buffers are
/// serialized by the borrow checker. Callers that want concurrent inference
/// create one executor per caller.
///
/// There is no timeout: a device submission that never completes blocks
/// the caller forever.
pub struct TapeExecutor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    label: String,
    resources: ResourceTable,
    pipelines: PipelineTable,
    steps: Vec<ReplayStep>,
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    state: ExecutorState,
    device_lost: Arc<AtomicBool>,
}

impl TapeExecutor {
    /// Build resources and pipelines for `program`.
    ///
    /// # Errors
    /// Any failure is a [`SetupError`]; no executor is returned.
    #[tracing::instrument(skip_all, fields(program = %program.name, instructions = program.tape.len()))]
    pub(crate) async fn setup(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        device_lost: Arc<AtomicBool>,
        program: &Program,
        weights: &dyn WeightSource,
        config: ExecutorConfig,
    ) -> Result<Self> {
        program.validate().map_err(SetupError::Program)?;
        if config.dependency_check == DependencyCheck::Strict {
            check_dependencies(program).map_err(SetupError::Program)?;
        }

        // Anything over a limit would otherwise surface as a wgpu validation panic
        check_device_limits(program, &device.limits())?;

        let label = config
            .label
            .clone()
            .unwrap_or_else(|| program.name.clone());

        // Resources
        let mut resources =
            ResourceTable::new(Arc::clone(&device), Arc::clone(&queue), config.constant);
        for desc in &program.resources {
            let name = desc.display_name();
            let data = match (desc.role, desc.tensor.as_deref()) {
                (ResourceRole::Weight, Some(tensor)) => {
                    Some(weights.tensor(tensor).ok_or_else(|| SetupError::MissingWeight {
                        resource: desc.id,
                        tensor: tensor.to_string(),
                    })?)
                }
                _ => None,
            };
            resources.create_at(desc.id, desc.byte_size, desc.role, data, &name)?;
        }

        // Pipelines: only those the tape dispatches
        let referenced = program.referenced_pipelines();
        let names: Vec<String> = referenced
            .iter()
            .filter_map(|&id| program.pipeline(id))
            .map(|spec| spec.display_name())
            .collect();
        let requests: Vec<PipelineRequest<'_>> = referenced
            .iter()
            .filter_map(|&id| program.pipeline(id))
            .zip(&names)
            .map(|(spec, name)| PipelineRequest {
                label: name,
                source: &spec.source,
                entry_point: &spec.entry_point,
                layout: &spec.layout,
            })
            .collect();

        let mut pipelines = PipelineTable::new(Arc::clone(&device));
        let handles = pipelines.compile_all(&requests)?;
        let handle_of: HashMap<PipelineId, PipelineHandle> =
            referenced.iter().copied().zip(handles).collect();

        // Bind groups never change: the tape and the buffers are fixed
        let mut steps = Vec::with_capacity(program.tape.len());
        for inst in &program.tape {
            let handle = handle_of[&inst.pipeline];
            let compiled = pipelines
                .get(handle)
                .ok_or_else(|| SetupError::Init(format!("pipeline {handle:?} missing from table")))?;

            let mut entries = Vec::with_capacity(inst.resources.len() + 1);
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: resources.constant().as_entire_binding(),
            });
            for (position, &id) in inst.resources.iter().enumerate() {
                let buffer = resources
                    .buffer(id)
                    .ok_or_else(|| SetupError::Init(format!("resource {id} missing from table")))?;
                entries.push(wgpu::BindGroupEntry {
                    binding: position as u32 + 1,
                    resource: buffer.as_entire_binding(),
                });
            }

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&compiled.label),
                layout: &compiled.layout,
                entries: &entries,
            });

            steps.push(ReplayStep {
                pipeline: handle,
                bind_group,
                workgroups: inst.workgroups,
            });
        }

        tracing::info!(
            resources = resources.len(),
            weight_bytes = resources.total_bytes(ResourceRole::Weight),
            scratch_bytes = resources.total_bytes(ResourceRole::Scratch),
            pipelines = pipelines.len(),
            layouts = pipelines.layout_count(),
            steps = steps.len(),
            "executor ready"
        );

        Ok(Self {
            device,
            queue,
            label,
            resources,
            pipelines,
            steps,
            inputs: program.inputs.clone(),
            outputs: program.outputs.clone(),
            state: ExecutorState::Ready,
            device_lost,
        })
    }

    /// Run the tape on a single f32 input and return the single f32 output.
    ///
    /// # Errors
    /// [`InvocationError`] if the program does not have exactly one input and
    /// one output, or if `input` has the wrong length; [`DeviceError`] if the
    /// device fails.
    pub async fn run(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.inputs.len() != 1 || self.outputs.len() != 1 {
            return Err(InvocationError::Arity {
                inputs: self.inputs.len(),
                outputs: self.outputs.len(),
            }
            .into());
        }

        let output_id = self.outputs[0];
        let output_bytes = self.resources.byte_size(output_id).unwrap_or(0);
        if output_bytes % 4 != 0 {
            return Err(InvocationError::NotF32 {
                resource: output_id,
                bytes: output_bytes,
            }
            .into());
        }

        let outputs = self.run_bytes(&[bytemuck::cast_slice(input)]).await?;
        Ok(outputs
            .into_iter()
            .next()
            .map(|bytes| bytemuck::pod_collect_to_vec(&bytes))
            .unwrap_or_default())
    }

    /// Run the tape with one byte slice per program input, returning one byte
    /// vector per program output.
    ///
    /// Input sizes are checked before anything is written, so a rejected call
    /// leaves every buffer untouched.
    pub async fn run_bytes(&mut self, inputs: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        self.ensure_usable()?;

        if inputs.len() != self.inputs.len() {
            return Err(InvocationError::InputCount {
                expected: self.inputs.len(),
                found: inputs.len(),
            }
            .into());
        }
        for (&id, data) in self.inputs.iter().zip(inputs) {
            self.resources.check_writable(id, data.len())?;
        }

        let result = self.replay(inputs).await;
        if let Err(RuntimeError::Device(e)) = &result {
            tracing::warn!(executor = %self.label, error = %e, "device error; executor is no longer usable");
            self.state = ExecutorState::Failed;
        }
        result
    }

    /// Upload, encode the whole tape plus readbacks, submit once, download.
    async fn replay(&mut self, inputs: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        for (&id, data) in self.inputs.iter().zip(inputs) {
            self.resources.write(id, data)?;
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label),
            });

        for step in &self.steps {
            let compiled = self.pipelines.get(step.pipeline).ok_or_else(|| {
                SetupError::Init(format!("pipeline {:?} missing from table", step.pipeline))
            })?;

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&compiled.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &step.bind_group, &[]);
            let [x, y, z] = step.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }

        let readbacks = self
            .outputs
            .iter()
            .map(|&id| self.resources.encode_readback(&mut encoder, id))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.queue.submit(Some(encoder.finish()));
        tracing::debug!(executor = %self.label, steps = self.steps.len(), "tape submitted");

        let outputs = read_back(&self.device, readbacks).await?;
        // A loss reported while we waited means the results cannot be trusted
        self.ensure_usable()?;
        Ok(outputs)
    }

    fn ensure_usable(&mut self) -> Result<()> {
        if self.device_lost.load(Ordering::SeqCst) {
            self.state = ExecutorState::Failed;
            return Err(DeviceError::Lost.into());
        }
        if self.state == ExecutorState::Failed {
            return Err(DeviceError::Unusable.into());
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Io resources uploaded per call, in argument order.
    pub fn inputs(&self) -> &[ResourceId] {
        &self.inputs
    }

    /// Io resources downloaded per call, in result order.
    pub fn outputs(&self) -> &[ResourceId] {
        &self.outputs
    }

    /// Declared byte size of each input.
    pub fn input_sizes(&self) -> Vec<u64> {
        self.inputs
            .iter()
            .filter_map(|&id| self.resources.byte_size(id))
            .collect()
    }

    /// Declared byte size of each output.
    pub fn output_sizes(&self) -> Vec<u64> {
        self.outputs
            .iter()
            .filter_map(|&id| self.resources.byte_size(id))
            .collect()
    }

    /// Number of instructions on the tape.
    pub fn tape_len(&self) -> usize {
        self.steps.len()
    }

    /// The resource table.
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// The pipeline table.
    pub fn pipelines(&self) -> &PipelineTable {
        &self.pipelines
    }
}

/// Check a validated program against device limits before allocating anything.
///
/// Covers workgroup counts, buffer sizes, storage binding sizes and the
/// binding counts of every layout the tape uses.
pub(crate) fn check_device_limits(
    program: &Program,
    limits: &wgpu::Limits,
) -> std::result::Result<(), SetupError> {
    let workgroup_limit = limits.max_compute_workgroups_per_dimension;
    for (index, inst) in program.tape.iter().enumerate() {
        if inst.workgroups.iter().any(|&n| n > workgroup_limit) {
            return Err(SetupError::WorkgroupLimit {
                instruction: index,
                workgroups: inst.workgroups,
                limit: workgroup_limit,
            });
        }
    }

    let max_buffer = u64::from(limits.max_buffer_size);
    for desc in &program.resources {
        let size = padded_size(desc.byte_size);
        if size > max_buffer {
            return Err(SetupError::DeviceLimit {
                subject: format!("Resource {}", desc.display_name()),
                limit: "max_buffer_size",
                requested: size,
                max: max_buffer,
            });
        }
    }

    let max_binding = u64::from(limits.max_storage_buffer_binding_size);
    let bound: HashSet<ResourceId> = program
        .tape
        .iter()
        .flat_map(|inst| inst.resources.iter().copied())
        .collect();
    for desc in program.resources.iter().filter(|d| bound.contains(&d.id)) {
        let size = padded_size(desc.byte_size);
        if size > max_binding {
            return Err(SetupError::DeviceLimit {
                subject: format!("Resource {}", desc.display_name()),
                limit: "max_storage_buffer_binding_size",
                requested: size,
                max: max_binding,
            });
        }
    }

    for spec in program
        .referenced_pipelines()
        .into_iter()
        .filter_map(|id| program.pipeline(id))
    {
        check_layout_limits(&spec.display_name(), &spec.layout, limits)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobbin_core::{DispatchInstruction, LayoutSignature, PipelineSpec, ResourceDesc};

    fn copy_program(scratch_bytes: u64, storage_slots: usize) -> Program {
        let resources: Vec<usize> = std::iter::once(1)
            .chain(std::iter::repeat_n(0, storage_slots - 1))
            .collect();
        Program {
            name: "limits".to_string(),
            resources: vec![
                ResourceDesc::io(0, 16),
                ResourceDesc::scratch(1, scratch_bytes),
            ],
            pipelines: vec![
                PipelineSpec::new(0, "", LayoutSignature::uniform_then_storage(storage_slots))
                    .with_label("wide"),
            ],
            tape: vec![DispatchInstruction::new(0, &resources, [1, 1, 1])],
            inputs: vec![ResourceId(0)],
            outputs: vec![ResourceId(0)],
        }
    }

    #[test]
    fn test_program_within_limits() {
        let limits = wgpu::Limits::default();
        check_device_limits(&copy_program(1024, 2), &limits).unwrap();
    }

    #[test]
    fn test_text_model_embedding_fits_adapter_limits_only() {
        // 49408 tokens x 768 f32: the token embedding of a CLIP text model
        let program = copy_program(151_781_376, 2);

        let err = check_device_limits(&program, &wgpu::Limits::default()).unwrap_err();
        assert!(matches!(
            err,
            SetupError::DeviceLimit {
                limit: "max_storage_buffer_binding_size",
                requested: 151_781_376,
                ..
            }
        ));

        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 30,
            max_buffer_size: 1 << 30,
            ..wgpu::Limits::default()
        };
        check_device_limits(&program, &limits).unwrap();
    }

    #[test]
    fn test_buffer_over_max_buffer_size() {
        let limits = wgpu::Limits::default();
        let too_big = u64::from(limits.max_buffer_size) + 4;
        let err = check_device_limits(&copy_program(too_big, 2), &limits).unwrap_err();
        assert!(matches!(
            err,
            SetupError::DeviceLimit {
                limit: "max_buffer_size",
                ..
            }
        ));
    }

    #[test]
    fn test_unbound_resource_only_needs_buffer_limit() {
        let limits = wgpu::Limits::default();
        let mut program = copy_program(16, 2);
        program.resources.push(ResourceDesc::scratch(
            2,
            u64::from(limits.max_storage_buffer_binding_size) + 4,
        ));
        check_device_limits(&program, &limits).unwrap();
    }

    #[test]
    fn test_layout_wider_than_storage_limit() {
        let limits = wgpu::Limits::default();
        let slots = limits.max_storage_buffers_per_shader_stage as usize + 1;
        let err = check_device_limits(&copy_program(16, slots), &limits).unwrap_err();
        match err {
            SetupError::DeviceLimit {
                subject,
                limit,
                requested,
                max,
            } => {
                assert_eq!(subject, "Pipeline 'wide'");
                assert_eq!(limit, "max_storage_buffers_per_shader_stage");
                assert_eq!(requested, max + 1);
            }
            other => panic!("Expected DeviceLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_workgroups_over_limit() {
        let limits = wgpu::Limits::default();
        let mut program = copy_program(16, 2);
        program.tape[0].workgroups = [1, limits.max_compute_workgroups_per_dimension + 1, 1];
        let err = check_device_limits(&program, &limits).unwrap_err();
        assert!(matches!(
            err,
            SetupError::WorkgroupLimit { instruction: 0, .. }
        ));
    }
}
