//! Streaming GFF3 importer.
//!
//! Reads interchange text line by line, builds the per-refseq feature forest
//! via the codec in [`crate::gff3`], and, after a literal `##FASTA` marker,
//! accumulates inline sequence into chunks that are flushed to the chunk
//! store as soon as the buffer reaches the configured size, not only at end
//! of stream. Any format error aborts the whole import.

use crate::error::Gff3Error;
use crate::feature::{Feature, FeatureId};
use crate::gff3::{feature_from_records, Gff3Record};
use crate::refseq::{RefSeq, SequenceChunk};
use anyhow::Context;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Default flush threshold for inline sequence, in bases.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 18;

#[derive(Debug, Clone)]
pub struct Gff3Importer {
    chunk_size: usize,
}

impl Default for Gff3Importer {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Everything one import produced, ready to hand to a backend.
#[derive(Debug, Default)]
pub struct ImportedAnnotations {
    /// One record per reference sequence seen, keyed position in `refseqs`
    /// by name via `features_by_refseq`.
    pub refseqs: Vec<RefSeq>,
    /// Top-level features per reference-sequence name.
    pub features_by_refseq: HashMap<String, Vec<Feature>>,
    /// Every feature identifier created during the import, flat, so the
    /// caller can build one AddFeature-class change per top-level feature.
    pub created_ids: Vec<FeatureId>,
}

/// One parsed record group (same ID records merged) plus its Parent link.
struct RecordGroup {
    records: Vec<Gff3Record>,
    external_id: Option<String>,
    parent: Option<String>,
}

impl Gff3Importer {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn import_file(&self, path: &Path) -> anyhow::Result<ImportedAnnotations> {
        let file = File::open(path)
            .with_context(|| format!("could not open GFF3 file '{}'", path.display()))?;
        self.import(BufReader::new(file))
            .with_context(|| format!("could not import GFF3 file '{}'", path.display()))
    }

    pub fn import<R: BufRead>(&self, reader: R) -> Result<ImportedAnnotations, Gff3Error> {
        let mut out = ImportedAnnotations::default();
        let mut groups: Vec<RecordGroup> = Vec::new();
        let mut group_by_id: HashMap<String, usize> = HashMap::new();
        let mut in_fasta = false;

        // FASTA accumulation state.
        let mut fasta_name: Option<String> = None;
        let mut buffer = String::new();
        let mut offset: i64 = 0;

        for line in reader.lines() {
            let line = line?;
            if !in_fasta {
                if line == "##FASTA" {
                    in_fasta = true;
                    continue;
                }
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let record = Gff3Record::parse_line(&line)?;
                let external_id = record
                    .attribute("ID")
                    .and_then(|v| v.first())
                    .cloned();
                let parent = record
                    .attribute("Parent")
                    .and_then(|v| v.first())
                    .cloned();
                match external_id.as_ref().and_then(|id| group_by_id.get(id)) {
                    // Records sharing an ID form one multi-location group.
                    Some(&idx) => groups[idx].records.push(record),
                    None => {
                        if let Some(id) = &external_id {
                            group_by_id.insert(id.clone(), groups.len());
                        }
                        groups.push(RecordGroup {
                            records: vec![record],
                            external_id,
                            parent,
                        });
                    }
                }
                continue;
            }

            // Inline FASTA section.
            if let Some(name) = line.strip_prefix('>') {
                self.flush_chunk(&mut out, &fasta_name, &mut buffer, &mut offset);
                fasta_name = Some(
                    name.split_whitespace()
                        .next()
                        .unwrap_or(name)
                        .to_string(),
                );
                offset = 0;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if fasta_name.is_none() {
                return Err(Gff3Error::SequenceBeforeHeader);
            }
            buffer.push_str(line.trim_end());
            if buffer.len() >= self.chunk_size {
                self.flush_chunk(&mut out, &fasta_name, &mut buffer, &mut offset);
            }
        }
        self.flush_chunk(&mut out, &fasta_name, &mut buffer, &mut offset);

        self.build_forest(&mut out, groups)?;
        tracing::debug!(
            refseqs = out.refseqs.len(),
            features = out.created_ids.len(),
            "GFF3 import complete"
        );
        Ok(out)
    }

    fn flush_chunk(
        &self,
        out: &mut ImportedAnnotations,
        fasta_name: &Option<String>,
        buffer: &mut String,
        offset: &mut i64,
    ) {
        let name = match fasta_name {
            Some(name) if !buffer.is_empty() => name.clone(),
            _ => {
                buffer.clear();
                return;
            }
        };
        let bases = std::mem::take(buffer);
        let len = bases.len() as i64;
        let refseq = Self::refseq_mut(out, &name);
        refseq.chunks.insert(SequenceChunk {
            start: *offset,
            stop: *offset + len,
            bases,
        });
        refseq.length = Some(refseq.length.unwrap_or(0).max(*offset + len));
        *offset += len;
    }

    fn refseq_mut<'a>(out: &'a mut ImportedAnnotations, name: &str) -> &'a mut RefSeq {
        if let Some(idx) = out.refseqs.iter().position(|r| r.name == name) {
            return &mut out.refseqs[idx];
        }
        out.refseqs.push(RefSeq::new(name, name));
        out.refseqs.last_mut().expect("just pushed")
    }

    /// Attach record groups into per-refseq forests, children under their
    /// Parent. Parents may appear after their children in the file; the
    /// grouping pass above has already seen the whole feature section.
    fn build_forest(
        &self,
        out: &mut ImportedAnnotations,
        groups: Vec<RecordGroup>,
    ) -> Result<(), Gff3Error> {
        let mut children_of: HashMap<String, Vec<usize>> = HashMap::new();
        let mut top_level: Vec<usize> = Vec::new();
        for (idx, group) in groups.iter().enumerate() {
            match &group.parent {
                Some(parent) => children_of.entry(parent.clone()).or_default().push(idx),
                None => top_level.push(idx),
            }
        }

        // Any Parent that is not a known ID is a fatal format error.
        for (parent, children) in &children_of {
            if !groups
                .iter()
                .any(|g| g.external_id.as_deref() == Some(parent))
            {
                let child = &groups[children[0]];
                return Err(Gff3Error::UnknownParent {
                    parent: parent.clone(),
                    id: child.external_id.clone().unwrap_or_default(),
                });
            }
        }

        let mut created_ids = Vec::new();
        for idx in top_level {
            let feature = Self::build_feature(&groups, idx, &children_of, &mut created_ids)?;
            let name = feature.refseq().to_string();
            Self::refseq_mut(out, &name).features.push(feature.id().clone());
            out.features_by_refseq.entry(name).or_default().push(feature);
        }
        out.created_ids = created_ids;
        Ok(())
    }

    fn build_feature(
        groups: &[RecordGroup],
        idx: usize,
        children_of: &HashMap<String, Vec<usize>>,
        created_ids: &mut Vec<FeatureId>,
    ) -> Result<Feature, Gff3Error> {
        let group = &groups[idx];
        let mut feature = feature_from_records(&group.records, None, Some(created_ids))?;
        if let Some(external_id) = &group.external_id {
            for &child_idx in children_of.get(external_id).map(|v| v.as_slice()).unwrap_or(&[]) {
                let child = Self::build_feature(groups, child_idx, children_of, created_ids)?;
                feature.add_child(child);
            }
        }
        Ok(feature)
    }
}
