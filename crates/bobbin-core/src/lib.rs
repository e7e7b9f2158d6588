//! Device-independent descriptions for the Bobbin dispatch executor.
//!
//! A [`Program`] is the serialized form of everything the executor replays:
//! - **Resources** (`ResourceDesc`) - device buffers by stable id and role
//! - **Pipelines** (`PipelineSpec`) - WGSL source, entry point and binding layout
//! - **Tape** (`DispatchInstruction`) - ordered dispatches naming a pipeline,
//!   the resources it binds and its workgroup counts
//!
//! Nothing in this crate touches a GPU. Programs can be loaded, validated and
//! summarized on any machine; `bobbin-runtime` materializes them on a device.

pub mod deps;
pub mod error;
pub mod layout;
pub mod program;
pub mod resource;
pub mod tape;
pub mod weights;

pub use deps::{DependencyCheck, check_dependencies};
pub use error::{ProgramError, Result};
pub use layout::{BindingKind, BindingSlot, LayoutSignature};
pub use program::{PipelineId, PipelineSpec, Program, ProgramSummary};
pub use resource::{ResourceDesc, ResourceId, ResourceRole};
pub use tape::DispatchInstruction;
pub use weights::{SafetensorsWeights, WeightSource};
