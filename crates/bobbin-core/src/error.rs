//! Error types for program descriptions.

use crate::program::PipelineId;
use crate::resource::{ResourceId, ResourceRole};
use thiserror::Error;

/// Errors found while loading or statically validating a program.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Two resources share an id.
    #[error("Duplicate resource id {0}")]
    DuplicateResource(ResourceId),

    /// Two pipelines share an id.
    #[error("Duplicate pipeline id {0}")]
    DuplicatePipeline(PipelineId),

    /// A resource was declared with a byte size of zero.
    #[error("Resource {0} has zero byte size")]
    ZeroSizedResource(ResourceId),

    /// A weight resource does not name the tensor it is loaded from.
    #[error("Weight resource {0} does not name a source tensor")]
    MissingTensorName(ResourceId),

    /// A pipeline's binding layout is malformed.
    #[error("Invalid layout for pipeline {pipeline}: {reason}")]
    InvalidLayout { pipeline: PipelineId, reason: String },

    /// An instruction names a pipeline that is not declared.
    #[error("Instruction {instruction} references unknown pipeline {pipeline}")]
    UnknownPipeline {
        instruction: usize,
        pipeline: PipelineId,
    },

    /// An instruction (or the io list) names a resource that is not declared.
    #[error("{context} references unknown resource {resource}")]
    UnknownResource {
        context: String,
        resource: ResourceId,
    },

    /// An instruction binds the wrong number of resources for its pipeline.
    #[error(
        "Instruction {instruction} binds {found} resources but pipeline {pipeline} expects {expected}"
    )]
    BindingCount {
        instruction: usize,
        pipeline: PipelineId,
        expected: usize,
        found: usize,
    },

    /// An input or output resource is not an io resource.
    #[error("Resource {resource} is listed as program {direction} but has role {role}")]
    NotIo {
        resource: ResourceId,
        direction: &'static str,
        role: ResourceRole,
    },

    /// Strict dependency checking found a read with no earlier writer.
    #[error(
        "Instruction {instruction} reads resource {resource} before any earlier instruction writes it"
    )]
    ReadBeforeWrite {
        instruction: usize,
        resource: ResourceId,
    },

    /// Strict dependency checking found a dispatch whose destination is a weight.
    #[error("Instruction {instruction} writes weight resource {resource}")]
    WeightWrite {
        instruction: usize,
        resource: ResourceId,
    },

    /// Weight blob could not be parsed.
    #[error("Weight blob error: {0}")]
    Weights(String),

    /// Program JSON could not be parsed.
    #[error("Program parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading a program or weight file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specialized Result type for program operations.
pub type Result<T> = std::result::Result<T, ProgramError>;
