//! Assembly and reference-sequence records, plus the append-only chunked
//! storage for very large sequences.
//!
//! Sequence bases arrive in arbitrary upload-sized pieces; the chunk store
//! consolidates overlapping or adjacent pieces on insert so lookups stay
//! O(log n) over a small chunk count rather than one chunk per upload unit.

use crate::error::FeatureError;
use crate::feature::FeatureId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assembly {
    pub id: String,
    pub name: String,
    pub refseqs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefSeq {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    /// Top-level feature identifiers on this reference sequence. The features
    /// themselves live in whichever backend owns the forest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<FeatureId>,
    #[serde(default)]
    pub chunks: ChunkStore,
}

impl RefSeq {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            length: None,
            features: Vec::new(),
            chunks: ChunkStore::default(),
        }
    }

    pub fn get_sequence(&self, start: i64, stop: i64) -> Result<&str, FeatureError> {
        self.chunks
            .get_sequence(start, stop)
            .ok_or(FeatureError::SequenceUnavailable {
                refseq: self.id.clone(),
                start,
                stop,
            })
    }
}

/// One stored run of literal bases, interbase `[start,stop)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceChunk {
    pub start: i64,
    pub stop: i64,
    pub bases: String,
}

/// Ordered, gap-tolerant chunk set. Invariant after every insert: chunks are
/// sorted by `start`, pairwise disjoint and non-adjacent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStore {
    chunks: Vec<SequenceChunk>,
}

impl ChunkStore {
    pub fn chunks(&self) -> &[SequenceChunk] {
        &self.chunks
    }

    /// Insert a chunk, merging it with every stored chunk it overlaps or
    /// touches. Where ranges overlap, the incoming bases win.
    pub fn insert(&mut self, chunk: SequenceChunk) {
        debug_assert_eq!((chunk.stop - chunk.start) as usize, chunk.bases.len());

        let mut merged = chunk;
        let mut absorbed = 0usize;
        let mut keep = Vec::with_capacity(self.chunks.len() + 1);
        for existing in self.chunks.drain(..) {
            if existing.stop < merged.start || existing.start > merged.stop {
                keep.push(existing);
                continue;
            }
            // Overlapping or adjacent: widen `merged` with whatever the
            // existing chunk covers beyond it.
            if existing.start < merged.start {
                let head = (merged.start - existing.start) as usize;
                merged.bases.insert_str(0, &existing.bases[..head]);
                merged.start = existing.start;
            }
            if existing.stop > merged.stop {
                let tail = (merged.stop - existing.start) as usize;
                merged.bases.push_str(&existing.bases[tail..]);
                merged.stop = existing.stop;
            }
            absorbed += 1;
        }
        if absorbed > 0 {
            tracing::debug!(
                absorbed,
                start = merged.start,
                stop = merged.stop,
                "consolidated sequence chunks"
            );
        }
        keep.push(merged);
        keep.sort_by_key(|c| c.start);
        self.chunks = keep;
    }

    /// Bases for `[start,stop)`, or `None` when the range is not fully
    /// covered by one consolidated chunk.
    pub fn get_sequence(&self, start: i64, stop: i64) -> Option<&str> {
        if start > stop {
            return None;
        }
        let idx = match self
            .chunks
            .binary_search_by(|c| c.start.cmp(&start).then(std::cmp::Ordering::Less))
        {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let chunk = &self.chunks[idx];
        if chunk.start > start || chunk.stop < stop {
            return None;
        }
        let from = (start - chunk.start) as usize;
        let to = (stop - chunk.start) as usize;
        Some(&chunk.bases[from..to])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: i64, bases: &str) -> SequenceChunk {
        SequenceChunk {
            start,
            stop: start + bases.len() as i64,
            bases: bases.to_string(),
        }
    }

    #[test]
    fn test_gap_then_bridge_consolidates_to_one_chunk() {
        let mut store = ChunkStore::default();
        store.insert(chunk(0, "AAAAAAAAAA"));
        store.insert(chunk(20, "GGGGGGGGGG"));
        assert_eq!(store.chunks().len(), 2);
        assert!(store.get_sequence(5, 25).is_none());

        store.insert(chunk(10, "CCCCCCCCCC"));
        assert_eq!(store.chunks().len(), 1);
        assert_eq!(store.chunks()[0].start, 0);
        assert_eq!(store.chunks()[0].stop, 30);
        assert_eq!(store.get_sequence(8, 12).unwrap(), "AACC");
    }

    #[test]
    fn test_overlapping_insert_keeps_flanks() {
        let mut store = ChunkStore::default();
        store.insert(chunk(0, "AAAAAAAAAA"));
        store.insert(chunk(5, "TTTTTTTTTT"));
        assert_eq!(store.chunks().len(), 1);
        assert_eq!(store.get_sequence(0, 15).unwrap(), "AAAAATTTTTTTTTT");
    }

    #[test]
    fn test_adjacent_chunks_merge() {
        let mut store = ChunkStore::default();
        store.insert(chunk(0, "ACGT"));
        store.insert(chunk(4, "TGCA"));
        assert_eq!(store.chunks().len(), 1);
        assert_eq!(store.get_sequence(2, 6).unwrap(), "GTTG");
    }

    #[test]
    fn test_refseq_sequence_unavailable_error() {
        let mut refseq = RefSeq::new("rs1", "chr1");
        refseq.chunks.insert(chunk(0, "ACGT"));
        assert_eq!(refseq.get_sequence(1, 3).unwrap(), "CG");
        assert!(matches!(
            refseq.get_sequence(2, 10),
            Err(FeatureError::SequenceUnavailable { .. })
        ));
    }
}
