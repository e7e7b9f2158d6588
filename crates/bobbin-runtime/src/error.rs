//! Error types for the runtime crate.

use bobbin_core::{ProgramError, ResourceId};
use thiserror::Error;

/// Runtime errors, split by what they mean for the executor.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Setup failed; no executor was produced.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The call was rejected; the executor is still usable.
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The device failed; the executor must not be used again.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Fatal errors while building resources or pipelines.
#[derive(Debug, Error)]
pub enum SetupError {
    /// GPU initialization failed.
    #[error("GPU initialization failed: {0}")]
    Init(String),

    /// The program description is invalid.
    #[error("Invalid program: {0}")]
    Program(#[from] ProgramError),

    /// A resource was requested with zero bytes.
    #[error("Resource {0} has zero byte size")]
    ZeroSize(ResourceId),

    /// A resource id was created twice.
    #[error("Resource {0} already exists")]
    DuplicateResource(ResourceId),

    /// Weight data does not match the declared size.
    #[error("Weight {resource} declares {expected} bytes but data has {found}")]
    WeightSize {
        resource: ResourceId,
        expected: u64,
        found: usize,
    },

    /// Weight role requested without data.
    #[error("Weight resource must be created with data")]
    WeightWithoutData,

    /// The weight source has no tensor with the requested name.
    #[error("Weight tensor '{tensor}' for resource {resource} not found")]
    MissingWeight { resource: ResourceId, tensor: String },

    /// WGSL parsing or validation failed.
    #[error("Shader compilation failed for '{pipeline}': {message}")]
    Shader { pipeline: String, message: String },

    /// The shader's bindings disagree with the declared layout.
    #[error("Layout mismatch for '{pipeline}': {message}")]
    LayoutMismatch { pipeline: String, message: String },

    /// A dispatch exceeds the device's per-dimension workgroup limit.
    #[error("Instruction {instruction} dispatches {workgroups:?} workgroups; device limit is {limit}")]
    WorkgroupLimit {
        instruction: usize,
        workgroups: [u32; 3],
        limit: u32,
    },

    /// A buffer or layout exceeds a device limit.
    #[error("{subject} needs {requested} against {limit}; device allows {max}")]
    DeviceLimit {
        subject: String,
        limit: &'static str,
        requested: u64,
        max: u64,
    },
}

/// Rejected calls. Nothing on the device was modified.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Wrong number of input buffers.
    #[error("Expected {expected} inputs, got {found}")]
    InputCount { expected: usize, found: usize },

    /// Input length differs from the io resource size.
    #[error("Input for {resource} must be exactly {expected} bytes, got {found}")]
    InputSize {
        resource: ResourceId,
        expected: u64,
        found: usize,
    },

    /// Single-tensor call on a program with several inputs or outputs.
    #[error("run() needs exactly one input and one output; program has {inputs} and {outputs}")]
    Arity { inputs: usize, outputs: usize },

    /// A byte length is not a whole number of f32 elements.
    #[error("Resource {resource} is {bytes} bytes, not a whole number of f32 values")]
    NotF32 { resource: ResourceId, bytes: u64 },

    /// The resource does not exist.
    #[error("Resource {0} not found")]
    UnknownResource(ResourceId),

    /// Weight resources cannot be written after setup.
    #[error("Resource {0} is a weight and is read-only")]
    ReadOnly(ResourceId),
}

/// Device failures during a call.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Waiting on the queue failed.
    #[error("GPU poll failed: {0}")]
    Poll(String),

    /// Mapping a readback buffer failed.
    #[error("Buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    /// The map callback was dropped without reporting.
    #[error("Buffer map callback was dropped")]
    MapCancelled,

    /// The device was lost.
    #[error("GPU device lost")]
    Lost,

    /// An earlier device error left the executor unusable.
    #[error("Executor is unusable after an earlier device error")]
    Unusable,
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
