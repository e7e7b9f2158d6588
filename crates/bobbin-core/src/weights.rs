//! Weight sources: lookup-by-name access to raw tensor bytes.

use crate::error::{ProgramError, Result};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

/// Provides raw bytes for named weight tensors at setup.
pub trait WeightSource {
    /// Bytes of the named tensor, or `None` if the source has no such tensor.
    fn tensor(&self, name: &str) -> Option<&[u8]>;
}

impl WeightSource for HashMap<String, Vec<u8>> {
    fn tensor(&self, name: &str) -> Option<&[u8]> {
        self.get(name).map(Vec::as_slice)
    }
}

/// A safetensors blob kept in memory, indexed once by tensor name.
///
/// Only the header is parsed; tensor bytes are returned as sub-slices of the
/// blob without conversion.
pub struct SafetensorsWeights {
    blob: Vec<u8>,
    ranges: HashMap<String, Range<usize>>,
}

impl SafetensorsWeights {
    /// Index an in-memory safetensors blob.
    pub fn from_bytes(blob: Vec<u8>) -> Result<Self> {
        let (header_len, metadata) = SafeTensors::read_metadata(&blob)
            .map_err(|e| ProgramError::Weights(format!("Invalid safetensors header: {e}")))?;

        // Offsets in the header are relative to the end of the header
        let data_start = 8 + header_len;
        let ranges = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| {
                let (begin, end) = info.data_offsets;
                (name, data_start + begin..data_start + end)
            })
            .collect::<HashMap<_, _>>();

        if let Some((name, range)) = ranges.iter().find(|(_, r)| r.end > blob.len()) {
            return Err(ProgramError::Weights(format!(
                "Tensor '{name}' spans {range:?} past the end of a {}-byte blob",
                blob.len()
            )));
        }

        tracing::debug!(tensors = ranges.len(), bytes = blob.len(), "indexed safetensors blob");
        Ok(Self { blob, ranges })
    }

    /// Read and index a safetensors file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Names of all tensors in the blob.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    /// Number of tensors in the blob.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the blob has no tensors.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl WeightSource for SafetensorsWeights {
    fn tensor(&self, name: &str) -> Option<&[u8]> {
        self.ranges.get(name).map(|range| &self.blob[range.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::{Dtype, TensorView};

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_hashmap_source() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), vec![1u8, 2, 3, 4]);
        assert_eq!(weights.tensor("a"), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(weights.tensor("b"), None);
    }

    #[test]
    fn test_safetensors_lookup_by_name() {
        let bias = f32_bytes(&[0.5, -1.0]);
        let weight = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let mut tensors = HashMap::new();
        tensors.insert(
            "final_layer_norm.bias".to_string(),
            TensorView::new(Dtype::F32, vec![2], &bias).unwrap(),
        );
        tensors.insert(
            "final_layer_norm.weight".to_string(),
            TensorView::new(Dtype::F32, vec![2, 2], &weight).unwrap(),
        );
        let blob = safetensors::serialize(&tensors, &None).unwrap();

        let source = SafetensorsWeights::from_bytes(blob).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.tensor("final_layer_norm.bias"), Some(bias.as_slice()));
        assert_eq!(
            source.tensor("final_layer_norm.weight"),
            Some(weight.as_slice())
        );
        assert_eq!(source.tensor("missing"), None);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = SafetensorsWeights::from_bytes(vec![0xff; 4]).err().unwrap();
        assert!(matches!(err, ProgramError::Weights(_)));
    }
}
