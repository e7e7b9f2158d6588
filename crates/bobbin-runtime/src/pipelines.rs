//! Pipeline table: compiled compute pipelines and shared bind group layouts.

use crate::error::{Result, SetupError};
use bobbin_core::{BindingKind, LayoutSignature};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to a pipeline compiled by a [`PipelineTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(usize);

impl PipelineHandle {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A pipeline to compile.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRequest<'a> {
    /// Label for device objects and error messages.
    pub label: &'a str,
    /// WGSL source.
    pub source: &'a str,
    /// Compute entry point.
    pub entry_point: &'a str,
    /// Binding layout, constant at binding 0.
    pub layout: &'a LayoutSignature,
}

/// Identity of a compiled pipeline. Equal keys share one device pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    source: String,
    entry_point: String,
    kinds: Vec<BindingKind>,
}

impl PipelineKey {
    fn of(request: &PipelineRequest<'_>) -> Self {
        Self {
            source: request.source.to_string(),
            entry_point: request.entry_point.to_string(),
            kinds: request.layout.kinds(),
        }
    }
}

/// A compute pipeline and the layout its bind groups must use.
#[derive(Debug)]
pub(crate) struct CompiledPipeline {
    pub label: String,
    pub pipeline: wgpu::ComputePipeline,
    pub layout: Arc<wgpu::BindGroupLayout>,
}

/// Owns compiled pipelines, one per distinct (source, entry point, layout).
///
/// Bind group layouts are keyed by their ordered binding kinds and shared
/// by every pipeline with the same signature; the `Arc` count is the number
/// of pipelines using a layout.
pub struct PipelineTable {
    device: Arc<wgpu::Device>,
    layouts: HashMap<Vec<BindingKind>, Arc<wgpu::BindGroupLayout>>,
    pipelines: Vec<CompiledPipeline>,
    index: HashMap<PipelineKey, PipelineHandle>,
}

impl PipelineTable {
    /// Create an empty table.
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            layouts: HashMap::new(),
            pipelines: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Compile one pipeline, or return the handle of an identical one.
    ///
    /// # Errors
    /// Fails if the WGSL does not parse or validate, the entry point is
    /// missing, the shader's bindings disagree with `layout`, or `layout`
    /// has more bindings than the device allows.
    pub fn compile(
        &mut self,
        label: &str,
        source: &str,
        entry_point: &str,
        layout: &LayoutSignature,
    ) -> Result<PipelineHandle> {
        let handles = self.compile_all(&[PipelineRequest {
            label,
            source,
            entry_point,
            layout,
        }])?;
        Ok(handles[0])
    }

    /// Compile a batch of pipelines in parallel.
    ///
    /// Returns one handle per request, in request order. Requests equal to
    /// each other or to an already compiled pipeline share its handle. If any
    /// request fails, nothing from the batch is added to the table.
    pub fn compile_all(&mut self, requests: &[PipelineRequest<'_>]) -> Result<Vec<PipelineHandle>> {
        let mut handles = Vec::with_capacity(requests.len());
        let mut new_keys: HashMap<PipelineKey, PipelineHandle> = HashMap::new();
        let mut pending = Vec::new();
        let limits = self.device.limits();

        for request in requests {
            request
                .layout
                .check()
                .map_err(|message| SetupError::LayoutMismatch {
                    pipeline: request.label.to_string(),
                    message,
                })?;
            check_layout_limits(request.label, request.layout, &limits)?;

            let key = PipelineKey::of(request);
            if let Some(&handle) = self.index.get(&key).or_else(|| new_keys.get(&key)) {
                handles.push(handle);
                continue;
            }

            let handle = PipelineHandle(self.pipelines.len() + pending.len());
            new_keys.insert(key, handle);
            handles.push(handle);
            pending.push(*request);
        }

        let layouts: Vec<Arc<wgpu::BindGroupLayout>> = pending
            .iter()
            .map(|request| self.layout_for(request.layout))
            .collect();

        let device = &self.device;
        let compiled = pending
            .par_iter()
            .zip(layouts)
            .map(|(request, layout)| build_pipeline(device, request, layout))
            .collect::<std::result::Result<Vec<_>, SetupError>>();

        let compiled = match compiled {
            Ok(compiled) => compiled,
            Err(e) => {
                // Drop layouts nobody ended up using
                self.layouts.retain(|_, layout| Arc::strong_count(layout) > 1);
                return Err(e.into());
            }
        };

        self.pipelines.extend(compiled);
        self.index.extend(new_keys);
        Ok(handles)
    }

    /// Shared layout for a signature, creating it on first use.
    fn layout_for(&mut self, signature: &LayoutSignature) -> Arc<wgpu::BindGroupLayout> {
        let device = &self.device;
        let layout = self.layouts.entry(signature.kinds()).or_insert_with(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = signature
                .slots()
                .iter()
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: match slot.kind {
                            BindingKind::Uniform => wgpu::BufferBindingType::Uniform,
                            BindingKind::StorageRead => {
                                wgpu::BufferBindingType::Storage { read_only: true }
                            }
                            BindingKind::StorageReadWrite => {
                                wgpu::BufferBindingType::Storage { read_only: false }
                            }
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();

            Arc::new(
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("layout_{}", signature.len())),
                    entries: &entries,
                }),
            )
        });
        Arc::clone(layout)
    }

    /// Look up a compiled pipeline.
    pub(crate) fn get(&self, handle: PipelineHandle) -> Option<&CompiledPipeline> {
        self.pipelines.get(handle.0)
    }

    /// Number of distinct compiled pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Check if no pipelines have been compiled.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Number of distinct bind group layouts.
    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    /// Number of pipelines sharing the layout for `signature`.
    pub fn layout_users(&self, signature: &LayoutSignature) -> usize {
        self.layouts
            .get(&signature.kinds())
            .map(|layout| Arc::strong_count(layout) - 1)
            .unwrap_or(0)
    }
}

/// Check one layout signature's binding counts against device limits.
pub(crate) fn check_layout_limits(
    pipeline: &str,
    layout: &LayoutSignature,
    limits: &wgpu::Limits,
) -> std::result::Result<(), SetupError> {
    let storage = layout
        .kinds()
        .into_iter()
        .filter(|kind| *kind != BindingKind::Uniform)
        .count() as u64;
    let checks = [
        (
            "max_storage_buffers_per_shader_stage",
            storage,
            u64::from(limits.max_storage_buffers_per_shader_stage),
        ),
        (
            "max_bindings_per_bind_group",
            layout.len() as u64,
            u64::from(limits.max_bindings_per_bind_group),
        ),
    ];

    for (limit, requested, max) in checks {
        if requested > max {
            return Err(SetupError::DeviceLimit {
                subject: format!("Pipeline '{pipeline}'"),
                limit,
                requested,
                max,
            });
        }
    }
    Ok(())
}

/// Parse, validate and compile one pipeline. Runs on a rayon worker.
fn build_pipeline(
    device: &wgpu::Device,
    request: &PipelineRequest<'_>,
    layout: Arc<wgpu::BindGroupLayout>,
) -> std::result::Result<CompiledPipeline, SetupError> {
    let shader_error = |message: String| SetupError::Shader {
        pipeline: request.label.to_string(),
        message,
    };

    let module = naga::front::wgsl::parse_str(request.source)
        .map_err(|e| shader_error(e.emit_to_string(request.source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| shader_error(format!("Module validation failed: {}", e)))?;

    let has_entry = module
        .entry_points
        .iter()
        .any(|ep| ep.name == request.entry_point && ep.stage == naga::ShaderStage::Compute);
    if !has_entry {
        return Err(shader_error(format!(
            "compute entry point '{}' not found",
            request.entry_point
        )));
    }

    check_bindings(&module, request.layout).map_err(|message| SetupError::LayoutMismatch {
        pipeline: request.label.to_string(),
        message,
    })?;

    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(request.label),
        source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("Pipeline Layout: {}", request.label)),
        bind_group_layouts: &[&layout],
        immediate_size: 0,
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("Pipeline: {}", request.label)),
        layout: Some(&pipeline_layout),
        module: &shader_module,
        entry_point: Some(request.entry_point),
        compilation_options: Default::default(),
        cache: None,
    });

    tracing::debug!(pipeline = request.label, bindings = request.layout.len(), "compiled pipeline");

    Ok(CompiledPipeline {
        label: request.label.to_string(),
        pipeline,
        layout,
    })
}

/// Check every resource the shader declares against the layout signature.
///
/// A shader may leave layout bindings unused, but every binding it declares
/// must be present with a compatible kind. Read-only storage in the shader
/// accepts a read-write layout slot; the reverse is rejected.
fn check_bindings(module: &naga::Module, layout: &LayoutSignature) -> std::result::Result<(), String> {
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        if binding.group != 0 {
            return Err(format!(
                "shader declares group {}; only group 0 is bound",
                binding.group
            ));
        }

        let declared = layout.kind_at(binding.binding).ok_or_else(|| {
            format!("shader binding {} is missing from the layout", binding.binding)
        })?;

        let compatible = match var.space {
            naga::AddressSpace::Uniform => declared == BindingKind::Uniform,
            naga::AddressSpace::Storage { access } => {
                if access.contains(naga::StorageAccess::STORE) {
                    declared == BindingKind::StorageReadWrite
                } else {
                    matches!(
                        declared,
                        BindingKind::StorageRead | BindingKind::StorageReadWrite
                    )
                }
            }
            _ => false,
        };

        if !compatible {
            return Err(format!(
                "binding {} is {:?} in the layout but {:?} in the shader",
                binding.binding, declared, var.space
            ));
        }
    }
    Ok(())
}
