//! Device acquisition and the entry point for loading programs.

use crate::config::ExecutorConfig;
use crate::error::{Result, SetupError};
use crate::executor::TapeExecutor;
use bobbin_core::{Program, WeightSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Main entry point for GPU execution.
///
/// Owns the device and queue and turns programs into executors.
///
/// # Example
/// ```no_run
/// # use bobbin_runtime::{ExecutorConfig, Runtime};
/// # use bobbin_core::Program;
/// # use std::collections::HashMap;
/// #[pollster::main]
/// async fn main() -> anyhow::Result<()> {
///     let runtime = Runtime::new().await?;
///     let program = Program::from_path("text_model.json")?;
///     let weights: HashMap<String, Vec<u8>> = HashMap::new();
///     let mut executor = runtime
///         .load_program(&program, &weights, ExecutorConfig::default())
///         .await?;
///     let output = executor.run(&[0.0; 77]).await?;
///     println!("{} values", output.len());
///     Ok(())
/// }
/// ```
pub struct Runtime {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    device_lost: Arc<AtomicBool>,
}

impl Runtime {
    /// Acquire the high-performance adapter on any backend.
    ///
    /// # Errors
    /// [`SetupError::Init`] if there is no adapter or the device request fails.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                SetupError::Init(format!("Failed to find suitable GPU adapter: {}", e))
            })?;

        Self::with_adapter(&adapter).await
    }

    /// Acquire a device on a caller-chosen adapter.
    ///
    /// Device loss is recorded here and surfaces as [`crate::DeviceError::Lost`]
    /// on the next call of every executor built from this runtime.
    pub async fn with_adapter(adapter: &wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        // Default limits cap storage bindings at 128 MiB; embedding tables are larger
        let adapter_limits = adapter.limits();

        tracing::debug!(
            max_buffer_size = adapter_limits.max_buffer_size,
            max_storage_buffer_binding_size = adapter_limits.max_storage_buffer_binding_size,
            max_storage_buffers_per_shader_stage = adapter_limits.max_storage_buffers_per_shader_stage,
            "adapter limits"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("bobbin"),
                // Generated kernels may carry `enable f16;`
                required_features: adapter.features() & wgpu::Features::SHADER_F16,
                required_limits: adapter_limits,
                ..Default::default()
            })
            .await
            .map_err(|e| SetupError::Init(format!("Failed to create device: {}", e)))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            tracing::warn!(?reason, %message, "GPU device lost");
            flag.store(true, Ordering::SeqCst);
        });

        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU runtime initialized"
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            device_lost,
        })
    }

    /// Build an executor for `program`, loading weights from `weights`.
    ///
    /// Pipelines are compiled in parallel; this is the slow part of setup.
    ///
    /// # Errors
    /// Returns a setup error if the program is invalid, a weight is missing
    /// or mis-sized, or a shader fails to compile.
    pub async fn load_program(
        &self,
        program: &Program,
        weights: &dyn WeightSource,
        config: ExecutorConfig,
    ) -> Result<TapeExecutor> {
        TapeExecutor::setup(
            Arc::clone(&self.device),
            Arc::clone(&self.queue),
            Arc::clone(&self.device_lost),
            program,
            weights,
            config,
        )
        .await
    }

    /// Adapter the device was created on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Shared device handle.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Shared queue handle.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }
}
