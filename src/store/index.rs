//! Exhaustive L2 similarity index and its on-disk encoding.
//!
//! Vectors live in one contiguous `Vec<f32>`; the position of a vector is
//! its ordinal. Search computes the squared Euclidean distance to every
//! stored vector, which is exact and fast enough for the single-process
//! corpora this crate targets.
//!
//! # File format
//!
//! ```text
//! offset  size            field
//! 0       4               magic "FRIX"
//! 4       4               format version (u32 LE)
//! 8       4               dims (u32 LE)
//! 12      8               vector count (u64 LE)
//! 20      count*dims*4    f32 LE components, ordinal-major
//! ```

use std::ops::Range;

use anyhow::{bail, Result};

const MAGIC: &[u8; 4] = b"FRIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dims: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored vectors. The next ordinal to be assigned.
    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors, returning the ordinals they were assigned.
    ///
    /// All vectors are checked before any is stored, so a dimension
    /// mismatch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<usize>> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            bail!(
                "vector has {} dimensions, index expects {}",
                bad.len(),
                self.dims
            );
        }
        let start = self.len();
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(start..self.len())
    }

    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Return up to `k` `(ordinal, distance)` pairs among ordinals accepted
    /// by `keep`, by ascending squared L2 distance. Equal distances keep the
    /// earlier ordinal first.
    pub fn search<F>(&self, query: &[f32], k: usize, keep: F) -> Vec<(usize, f32)>
    where
        F: Fn(usize) -> bool,
    {
        if k == 0 || query.len() != self.dims || self.dims == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .filter(|(ordinal, _)| keep(*ordinal))
            .map(|(ordinal, v)| (ordinal, l2_distance_sq(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("index file truncated: {} bytes", bytes.len());
        }
        if &bytes[0..4] != MAGIC {
            bail!("index file has wrong magic bytes");
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            bail!("unsupported index format version {}", version);
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        if dims == 0 {
            bail!("index file declares zero dimensions");
        }
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| anyhow::anyhow!("index file size overflow"))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            bail!(
                "index file body is {} bytes, header implies {}",
                body.len(),
                expected
            );
        }

        Ok(Self {
            dims,
            data: blob_to_vec(body),
        })
    }
}

pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Encode floats as little-endian bytes, 4 per component.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatL2Index {
        let mut index = FlatL2Index::new(4);
        index
            .add(&[
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 0.0],
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_add_assigns_contiguous_ordinals() {
        let mut index = sample();
        let range = index.add(&[vec![0.0; 4], vec![1.0; 4]]).unwrap();
        assert_eq!(range, 3..5);
        assert_eq!(index.len(), 5);
        assert_eq!(index.vector(4), Some(&[1.0f32, 1.0, 1.0, 1.0][..]));
        assert_eq!(index.vector(5), None);
    }

    #[test]
    fn test_add_rejects_mismatch_without_partial_insert() {
        let mut index = sample();
        let err = index.add(&[vec![0.0; 4], vec![0.0; 3]]);
        assert!(err.is_err());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_search_orders_by_distance_then_ordinal() {
        let index = sample();
        let hits = index.search(&[1.0, 0.0, 0.0, 0.1], 2, |_| true);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
        assert!((hits[0].1 - 0.01).abs() < 1e-6);
        // ordinals 1 and 2 are equidistant; the earlier one wins
        assert!((hits[1].1 - 2.01).abs() < 1e-5);
    }

    #[test]
    fn test_search_respects_filter_and_k() {
        let index = sample();
        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, |ord| ord != 0);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.0 != 0));
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 0, |_| true).is_empty());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let index = sample();
        let restored = FlatL2Index::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(restored, index);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn test_from_bytes_rejects_corruption() {
        let bytes = sample().to_bytes();
        assert!(FlatL2Index::from_bytes(&bytes[..10]).is_err());
        assert!(FlatL2Index::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(FlatL2Index::from_bytes(&wrong_magic).is_err());
    }

    #[test]
    fn test_empty_index_roundtrip_keeps_dims() {
        let index = FlatL2Index::new(1024);
        let restored = FlatL2Index::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(restored.dims(), 1024);
        assert!(restored.is_empty());
    }
}
