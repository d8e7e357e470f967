//! Minimal feature-type resolution for the annotation model.
//!
//! Only the classifications the tree model actually needs are covered:
//! "is this a coding transcript", "is this an exon", "is this a CDS".
//! Full ontology label tables live outside this crate.

/// GFF3 type tags recognized as coding transcripts. Case-sensitive, as type
/// tags are in GFF3 practice.
const TRANSCRIPT_TYPES: &[&str] = &[
    "mRNA",
    "transcript",
    "C_gene_segment",
    "D_gene_segment",
    "J_gene_segment",
    "V_gene_segment",
];

const EXON_TYPES: &[&str] = &["exon"];

const CDS_TYPES: &[&str] = &["CDS"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Ontology;

impl Ontology {
    pub fn is_transcript(&self, kind: &str) -> bool {
        TRANSCRIPT_TYPES.contains(&kind)
    }

    pub fn is_exon(&self, kind: &str) -> bool {
        EXON_TYPES.contains(&kind)
    }

    pub fn is_cds(&self, kind: &str) -> bool {
        CDS_TYPES.contains(&kind)
    }
}
