//! Common test utilities for end-to-end GPU tests.
//!
//! Small kernels in the shape generated tapes use (uniform constant at
//! binding 0, destination at binding 1) and program builders around them.

#![allow(dead_code)]

use bobbin_core::{DispatchInstruction, LayoutSignature, PipelineSpec, Program, ResourceDesc, ResourceId};
use bobbin_runtime::Runtime;
use std::collections::HashMap;

/// Workgroup size shared by the elementwise kernels below.
pub const WORKGROUP_SIZE: u32 = 64;

/// data0 = data1
pub const COPY_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> INFINITY: f32;
@group(0) @binding(1) var<storage, read_write> data0: array<f32>;
@group(0) @binding(2) var<storage, read_write> data1: array<f32>;
@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let i = gid.x;
  if (i < arrayLength(&data0)) { data0[i] = data1[i]; }
}
"#;

/// data0 = data1 * data2
pub const MUL_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> INFINITY: f32;
@group(0) @binding(1) var<storage, read_write> data0: array<f32>;
@group(0) @binding(2) var<storage, read_write> data1: array<f32>;
@group(0) @binding(3) var<storage, read_write> data2: array<f32>;
@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let i = gid.x;
  if (i < arrayLength(&data0)) { data0[i] = data1[i] * data2[i]; }
}
"#;

/// data0 = data1 + data2
pub const ADD_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> INFINITY: f32;
@group(0) @binding(1) var<storage, read_write> data0: array<f32>;
@group(0) @binding(2) var<storage, read_write> data1: array<f32>;
@group(0) @binding(3) var<storage, read_write> data2: array<f32>;
@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let i = gid.x;
  if (i < arrayLength(&data0)) { data0[i] = data1[i] + data2[i]; }
}
"#;

/// data0[0] = max(-INFINITY, data1[..]), the sentinel pattern reductions use.
pub const MAX_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> INFINITY: f32;
@group(0) @binding(1) var<storage, read_write> data0: array<f32>;
@group(0) @binding(2) var<storage, read_write> data1: array<f32>;
@compute @workgroup_size(1) fn main() {
  var acc = -INFINITY;
  for (var i = 0u; i < arrayLength(&data1); i++) {
    acc = max(acc, data1[i]);
  }
  data0[0] = acc;
}
"#;

/// Does not parse.
pub const BROKEN_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> INFINITY: f32;
@compute @workgroup_size(1) fn main() { let x = ; }
"#;

/// Initialize the runtime, panicking with a readable message on failure.
pub async fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    Runtime::new()
        .await
        .expect("Runtime initialization should succeed")
}

/// Workgroups needed to cover `len` elements.
pub fn workgroups_for(len: usize) -> [u32; 3] {
    [(len as u32).div_ceil(WORKGROUP_SIZE), 1, 1]
}

/// Little-endian bytes of an f32 slice.
pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Program computing `output = input * scale + input` through one scratch buffer.
///
/// Resources:
/// - 0: io input
/// - 1: weight "scale"
/// - 2: scratch
/// - 3: io output
pub fn scale_then_add_program(len: usize) -> Program {
    let bytes = (len * 4) as u64;
    Program {
        name: "scale_then_add".to_string(),
        resources: vec![
            ResourceDesc::io(0, bytes).with_label("input0"),
            ResourceDesc::weight(1, bytes, "scale"),
            ResourceDesc::scratch(2, bytes),
            ResourceDesc::io(3, bytes).with_label("output0"),
        ],
        pipelines: vec![
            PipelineSpec::new(0, MUL_KERNEL, LayoutSignature::uniform_then_storage(3))
                .with_label("mul"),
            PipelineSpec::new(1, ADD_KERNEL, LayoutSignature::uniform_then_storage(3))
                .with_label("add"),
        ],
        tape: vec![
            DispatchInstruction::new(0, &[2, 0, 1], workgroups_for(len)),
            DispatchInstruction::new(1, &[3, 2, 0], workgroups_for(len)),
        ],
        inputs: vec![ResourceId(0)],
        outputs: vec![ResourceId(3)],
    }
}

/// Weights for [`scale_then_add_program`].
pub fn scale_weights(scale: &[f32]) -> HashMap<String, Vec<u8>> {
    let mut weights = HashMap::new();
    weights.insert("scale".to_string(), f32_bytes(scale));
    weights
}

/// CPU reference for [`scale_then_add_program`].
pub fn scale_then_add_reference(input: &[f32], scale: &[f32]) -> Vec<f32> {
    input
        .iter()
        .zip(scale)
        .map(|(&x, &w)| x * w + x)
        .collect()
}
