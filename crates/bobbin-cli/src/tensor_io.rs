//! Raw little-endian f32 tensor files.

use anyhow::{Context, Result, bail};
use std::path::Path;

/// Read an input file and check it against the declared io size.
pub fn read_input(path: &Path, expected_bytes: u64) -> Result<Vec<u8>> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read input {}", path.display()))?;
    if data.len() as u64 != expected_bytes {
        bail!(
            "Input {} is {} bytes but the program expects {} ({} f32 values)",
            path.display(),
            data.len(),
            expected_bytes,
            expected_bytes / 4
        );
    }
    Ok(data)
}

/// Write raw output bytes to a file.
pub fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write output {}", path.display()))
}

/// Decode little-endian f32 values; trailing bytes are ignored.
pub fn decode_f32(data: &[u8]) -> Vec<f32> {
    // Copies, so `data` need not be 4-byte aligned
    bytemuck::pod_collect_to_vec(&data[..data.len() / 4 * 4])
}

/// One-line description of an output buffer: length, range and leading values.
pub fn describe_f32(values: &[f32], preview: usize) -> String {
    if values.is_empty() {
        return "0 values".to_string();
    }

    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let head: Vec<String> = values
        .iter()
        .take(preview)
        .map(|v| format!("{:.4}", v))
        .collect();
    let ellipsis = if values.len() > preview { ", ..." } else { "" };

    format!(
        "{} values, min {:.4}, max {:.4}: [{}{}]",
        values.len(),
        min,
        max,
        head.join(", "),
        ellipsis
    )
}
