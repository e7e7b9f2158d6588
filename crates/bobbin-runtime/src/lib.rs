//! GPU executor for fixed compute-dispatch tapes.
//!
//! This crate replays a [`bobbin_core::Program`] on the GPU using `wgpu` as
//! the hardware abstraction layer.
//!
//! # Architecture
//!
//! The runtime has three parts:
//! 1. **Resource table** - weight, scratch and io buffers plus the uniform
//!    constant bound at binding 0 of every dispatch
//! 2. **Pipeline table** - one compiled pipeline per distinct kernel, with
//!    bind group layouts shared by signature
//! 3. **Executor** - uploads inputs, encodes the whole tape into one
//!    submission, downloads outputs
//!
//! # Example
//!
//! ```no_run
//! use bobbin_core::{Program, SafetensorsWeights};
//! use bobbin_runtime::{ExecutorConfig, Runtime};
//!
//! #[pollster::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::new().await?;
//!
//!     let program = Program::from_path("net_textModel.json")?;
//!     let weights = SafetensorsWeights::from_path("net.safetensors")?;
//!
//!     let mut executor = runtime
//!         .load_program(&program, &weights, ExecutorConfig::default())
//!         .await?;
//!
//!     let tokens = vec![0.0f32; 77];
//!     let embeddings = executor.run(&tokens).await?;
//!     println!("Result: {} floats", embeddings.len());
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod executor;
mod pipelines;
mod resources;
mod runtime;

// Public exports
pub use config::ExecutorConfig;
pub use error::{DeviceError, InvocationError, Result, RuntimeError, SetupError};
pub use executor::{ExecutorState, TapeExecutor};
pub use pipelines::{PipelineHandle, PipelineRequest, PipelineTable};
pub use resources::ResourceTable;
pub use runtime::Runtime;
