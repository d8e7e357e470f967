//! The feature tree model: one annotation feature and its descendants on a
//! reference sequence.
//!
//! Coordinates are interbase (0-based, half-open `min`/`max`) everywhere in
//! this module; 1-based inclusive coordinates exist only at the GFF3
//! boundary. Children are held sorted by `min` after every structural
//! mutation. GFF3 does not require a feature to wholly contain its children,
//! so containment is advisory here and enforced (where wanted) by the Change
//! orchestrating an edit.

use crate::error::FeatureError;
use crate::ontology::Ontology;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type FeatureId = String;

/// Internal attribute key carrying the GFF3 source column.
pub const ATTR_SOURCE: &str = "gff_source";
/// Internal attribute key carrying the GFF3 score column (single-valued).
pub const ATTR_SCORE: &str = "gff_score";
/// Internal attribute key carrying the public GFF3 "ID".
pub const ATTR_ID: &str = "gff_id";

/// One piece of a discontinuous location. Used only for CDS features split
/// across non-adjacent exons; interbase like everything else internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubLocation {
    pub start: i64,
    pub end: i64,
}

/// One exon-intersected piece of a coding region, with its GFF3 phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdsLocation {
    pub start: i64,
    pub end: i64,
    pub phase: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    id: FeatureId,
    refseq: String,
    #[serde(rename = "type")]
    kind: String,
    min: i64,
    max: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strand: Option<i8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    discontinuous_locations: Vec<SubLocation>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Feature>,
}

impl Feature {
    pub fn new(refseq: &str, kind: &str, min: i64, max: i64) -> Result<Self, FeatureError> {
        let id = Self::new_id();
        if min > max {
            return Err(FeatureError::InvalidCoordinate { id, min, max });
        }
        Ok(Self {
            id,
            refseq: refseq.to_string(),
            kind: kind.to_string(),
            min,
            max,
            strand: None,
            discontinuous_locations: Vec::new(),
            attributes: HashMap::new(),
            children: Vec::new(),
        })
    }

    /// Construct with a caller-supplied identifier. Used when an edit's
    /// forward and undo forms must agree on the identifier of a synthetic
    /// feature (e.g. a merged exon).
    pub fn new_with_id(
        id: &str,
        refseq: &str,
        kind: &str,
        min: i64,
        max: i64,
    ) -> Result<Self, FeatureError> {
        if min > max {
            return Err(FeatureError::InvalidCoordinate {
                id: id.to_string(),
                min,
                max,
            });
        }
        let mut feature = Self::new(refseq, kind, min, max)?;
        feature.id = id.to_string();
        Ok(feature)
    }

    /// Globally unique feature identifier. Assigned at creation, never
    /// reassigned; copies get fresh identifiers via [`Feature::with_new_ids`].
    pub fn new_id() -> FeatureId {
        Uuid::new_v4().to_string()
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn refseq(&self) -> &str {
        &self.refseq
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn length(&self) -> i64 {
        self.max - self.min
    }

    pub fn strand(&self) -> Option<i8> {
        self.strand
    }

    pub fn set_strand(&mut self, strand: Option<i8>) {
        self.strand = strand;
    }

    /// Set the lower coordinate. Rejects `min > max` on this feature; parent
    /// or child containment is the orchestrating Change's concern.
    pub fn set_min(&mut self, min: i64) -> Result<(), FeatureError> {
        if min > self.max {
            return Err(FeatureError::InvalidCoordinate {
                id: self.id.clone(),
                min,
                max: self.max,
            });
        }
        self.min = min;
        Ok(())
    }

    pub fn set_max(&mut self, max: i64) -> Result<(), FeatureError> {
        if self.min > max {
            return Err(FeatureError::InvalidCoordinate {
                id: self.id.clone(),
                min: self.min,
                max,
            });
        }
        self.max = max;
        Ok(())
    }

    pub fn discontinuous_locations(&self) -> &[SubLocation] {
        &self.discontinuous_locations
    }

    pub fn set_discontinuous_locations(&mut self, locations: Vec<SubLocation>) {
        self.discontinuous_locations = locations;
    }

    pub fn discontinuous_locations_mut(&mut self) -> &mut Vec<SubLocation> {
        &mut self.discontinuous_locations
    }

    pub fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    pub fn attribute_values(&self, key: &str) -> Option<&[String]> {
        self.attributes.get(key).map(|v| v.as_slice())
    }

    pub fn set_attribute(&mut self, key: &str, values: Vec<String>) {
        self.attributes.insert(key.to_string(), values);
    }

    /// Deleting a missing attribute is a no-op, not an error.
    pub fn delete_attribute(&mut self, key: &str) {
        self.attributes.remove(key);
    }

    pub fn children(&self) -> &[Feature] {
        &self.children
    }

    /// Insert a child and re-sort the whole collection by `min`. Child counts
    /// are tens, not millions, so the full re-sort per insert is fine.
    pub fn add_child(&mut self, child: Feature) {
        self.children.push(child);
        self.sort_children();
    }

    pub fn sort_children(&mut self) {
        self.children.sort_by_key(|c| c.min);
    }

    /// Remove a direct child by identifier, returning it. The caller is
    /// responsible for recomputing ancestor bounds if the deleted child had
    /// widened them.
    pub fn delete_child(&mut self, id: &str) -> Result<Feature, FeatureError> {
        match self.children.iter().position(|c| c.id == id) {
            Some(pos) => Ok(self.children.remove(pos)),
            None => Err(FeatureError::UnknownChild {
                parent: self.id.clone(),
                child: id.to_string(),
            }),
        }
    }

    pub fn child(&self, id: &str) -> Option<&Feature> {
        self.children.iter().find(|c| c.id == id)
    }

    pub fn child_mut(&mut self, id: &str) -> Option<&mut Feature> {
        self.children.iter_mut().find(|c| c.id == id)
    }

    /// Recursive membership test. Used to validate that an identifier named
    /// by a Change payload is actually reachable from the Change's declared
    /// top-level feature.
    pub fn has_descendant(&self, id: &str) -> bool {
        self.children
            .iter()
            .any(|c| c.id == id || c.has_descendant(id))
    }

    /// Top-down search for a feature (self included) by identifier. There are
    /// no parent pointers in this tree; the top-level feature is the arena
    /// root and "parent of" is derived, not stored.
    pub fn find(&self, id: &str) -> Option<&Feature> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Feature> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Top-down search for the parent of `id` among self's descendants.
    /// Returns `None` when `id` is self or unreachable.
    pub fn find_parent(&self, id: &str) -> Option<&Feature> {
        if self.children.iter().any(|c| c.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_parent(id))
    }

    pub fn find_parent_mut(&mut self, id: &str) -> Option<&mut Feature> {
        if self.children.iter().any(|c| c.id == id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_parent_mut(id))
    }

    /// Containment-widened lower bound: GFF3 does not require a feature to
    /// contain its children, so layout code needs the widened span.
    pub fn min_with_children(&self) -> i64 {
        self.children
            .iter()
            .map(|c| c.min_with_children())
            .chain(std::iter::once(self.min))
            .min()
            .unwrap_or(self.min)
    }

    pub fn max_with_children(&self) -> i64 {
        self.children
            .iter()
            .map(|c| c.max_with_children())
            .chain(std::iter::once(self.max))
            .max()
            .unwrap_or(self.max)
    }

    /// Deep copy with freshly generated identifiers throughout, so a pasted
    /// or restored subtree never collides with the original.
    pub fn with_new_ids(&self) -> Feature {
        let mut copy = self.clone();
        copy.regenerate_ids();
        copy
    }

    fn regenerate_ids(&mut self) {
        self.id = Self::new_id();
        for child in &mut self.children {
            child.regenerate_ids();
        }
    }

    /// Coding locations for a transcript: for each CDS child, the pieces of
    /// its span that intersect an exon child, ordered by `min` (reversed on
    /// the minus strand), each annotated with the running GFF3 phase.
    ///
    /// The feature itself must resolve to a coding transcript type.
    /// Recomputed on demand and never cached across mutations, so the result
    /// always reflects the current coordinates.
    pub fn cds_locations(&self, ontology: &Ontology) -> Result<Vec<Vec<CdsLocation>>, FeatureError> {
        if !ontology.is_transcript(&self.kind) {
            return Err(FeatureError::NotATranscript {
                id: self.id.clone(),
                kind: self.kind.clone(),
            });
        }
        let cds_children: Vec<&Feature> = self
            .children
            .iter()
            .filter(|c| ontology.is_cds(&c.kind))
            .collect();
        if cds_children.is_empty() {
            return Err(FeatureError::NoCdsFound {
                id: self.id.clone(),
            });
        }
        let exon_children: Vec<&Feature> = self
            .children
            .iter()
            .filter(|c| ontology.is_exon(&c.kind))
            .collect();
        if exon_children.is_empty() {
            return Err(FeatureError::NoExonFound {
                id: self.id.clone(),
            });
        }

        let reverse = self.strand == Some(-1);
        let mut result = Vec::with_capacity(cds_children.len());
        for cds in &cds_children {
            let mut pieces: Vec<(i64, i64)> = exon_children
                .iter()
                .filter_map(|exon| {
                    let start = cds.min.max(exon.min);
                    let end = cds.max.min(exon.max);
                    (start < end).then_some((start, end))
                })
                .collect();
            pieces.sort_by_key(|p| p.0);
            if reverse {
                pieces.reverse();
            }

            let mut phase: i64 = 0;
            let mut locations = Vec::with_capacity(pieces.len());
            for (start, end) in pieces {
                locations.push(CdsLocation {
                    start,
                    end,
                    phase: phase as u8,
                });
                let len = end - start;
                phase = (3 - ((len - phase) % 3)) % 3;
            }
            result.push(locations);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_with(cds: (i64, i64), exons: &[(i64, i64)]) -> Feature {
        let mut transcript = Feature::new("chr1", "mRNA", 0, 1000).unwrap();
        let cds_child = Feature::new("chr1", "CDS", cds.0, cds.1).unwrap();
        transcript.add_child(cds_child);
        for (min, max) in exons {
            transcript.add_child(Feature::new("chr1", "exon", *min, *max).unwrap());
        }
        transcript
    }

    #[test]
    fn test_min_max_validation() {
        let mut f = Feature::new("chr1", "gene", 10, 90).unwrap();
        assert!(f.set_max(5).is_err());
        assert_eq!(f.max(), 90);
        assert!(f.set_min(95).is_err());
        assert_eq!(f.min(), 10);
        assert!(f.set_min(20).is_ok());
        assert_eq!(f.length(), 70);
        assert!(Feature::new("chr1", "gene", 50, 40).is_err());
    }

    #[test]
    fn test_children_sorted_by_min() {
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        gene.add_child(Feature::new("chr1", "exon", 50, 60).unwrap());
        gene.add_child(Feature::new("chr1", "exon", 10, 20).unwrap());
        gene.add_child(Feature::new("chr1", "exon", 30, 40).unwrap());
        let mins: Vec<i64> = gene.children().iter().map(|c| c.min()).collect();
        assert_eq!(mins, vec![10, 30, 50]);

        let id = gene.children()[0].id().clone();
        let removed = gene.delete_child(&id).unwrap();
        assert_eq!(removed.min(), 10);
        assert_eq!(gene.children().len(), 2);
        assert!(gene.delete_child("no-such-child").is_err());
    }

    #[test]
    fn test_descendant_search() {
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        let mut transcript = Feature::new("chr1", "mRNA", 0, 100).unwrap();
        let exon = Feature::new("chr1", "exon", 10, 20).unwrap();
        let exon_id = exon.id().clone();
        let transcript_id = transcript.id().clone();
        transcript.add_child(exon);
        gene.add_child(transcript);

        assert!(gene.has_descendant(&exon_id));
        assert!(!gene.has_descendant("missing"));
        assert_eq!(gene.find(&exon_id).unwrap().min(), 10);
        assert_eq!(gene.find_parent(&exon_id).unwrap().id(), &transcript_id);
        assert!(gene.find_parent(gene.id()).is_none());
    }

    #[test]
    fn test_bounds_with_children() {
        let mut gene = Feature::new("chr1", "gene", 20, 80).unwrap();
        // GFF3 allows a child to stick out of its parent.
        gene.add_child(Feature::new("chr1", "exon", 5, 30).unwrap());
        gene.add_child(Feature::new("chr1", "exon", 70, 95).unwrap());
        assert_eq!(gene.min_with_children(), 5);
        assert_eq!(gene.max_with_children(), 95);
    }

    #[test]
    fn test_with_new_ids_regenerates_recursively() {
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        gene.add_child(Feature::new("chr1", "exon", 10, 20).unwrap());
        let copy = gene.with_new_ids();
        assert_ne!(gene.id(), copy.id());
        assert_ne!(gene.children()[0].id(), copy.children()[0].id());
        assert_eq!(gene.children()[0].min(), copy.children()[0].min());
    }

    #[test]
    fn test_delete_attribute_is_noop_when_absent() {
        let mut f = Feature::new("chr1", "gene", 0, 10).unwrap();
        f.delete_attribute("gff_name");
        f.set_attribute("gff_name", vec!["abc".into()]);
        assert_eq!(f.attribute_values("gff_name").unwrap(), ["abc"]);
        f.delete_attribute("gff_name");
        assert!(f.attribute_values("gff_name").is_none());
    }

    #[test]
    fn test_cds_phase_plus_strand() {
        // CDS [100,130) and [200,225): first piece phase 0, then
        // (3 - ((30 - 0) % 3)) % 3 = 0 for the second piece.
        let mut transcript = Feature::new("chr1", "mRNA", 100, 225).unwrap();
        transcript.set_strand(Some(1));
        transcript.add_child(Feature::new("chr1", "CDS", 100, 225).unwrap());
        transcript.add_child(Feature::new("chr1", "exon", 100, 130).unwrap());
        transcript.add_child(Feature::new("chr1", "exon", 200, 225).unwrap());

        let locs = transcript.cds_locations(&Ontology).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(
            locs[0],
            vec![
                CdsLocation { start: 100, end: 130, phase: 0 },
                CdsLocation { start: 200, end: 225, phase: 0 },
            ]
        );
    }

    #[test]
    fn test_cds_phase_minus_strand_reverses_pieces() {
        let mut transcript = Feature::new("chr1", "mRNA", 100, 226).unwrap();
        transcript.set_strand(Some(-1));
        transcript.add_child(Feature::new("chr1", "CDS", 100, 226).unwrap());
        transcript.add_child(Feature::new("chr1", "exon", 100, 130).unwrap());
        transcript.add_child(Feature::new("chr1", "exon", 200, 226).unwrap());

        let locs = transcript.cds_locations(&Ontology).unwrap();
        // Minus strand: the rightmost piece comes first and carries phase 0;
        // 26 bases leave (3 - (26 % 3)) % 3 = 1 for the next piece.
        assert_eq!(
            locs[0],
            vec![
                CdsLocation { start: 200, end: 226, phase: 0 },
                CdsLocation { start: 100, end: 130, phase: 1 },
            ]
        );
    }

    #[test]
    fn test_cds_phase_uneven_pieces() {
        let transcript = {
            let mut t = transcript_with((100, 225), &[(100, 131), (200, 225)]);
            t.set_strand(Some(1));
            t
        };
        let locs = transcript.cds_locations(&Ontology).unwrap();
        // First piece is 31 bases: (3 - (31 % 3)) % 3 = 2.
        assert_eq!(locs[0][0].phase, 0);
        assert_eq!(locs[0][1].phase, 2);
    }

    #[test]
    fn test_cds_locations_requires_transcript_type() {
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        gene.add_child(Feature::new("chr1", "CDS", 10, 90).unwrap());
        gene.add_child(Feature::new("chr1", "exon", 10, 90).unwrap());
        assert!(matches!(
            gene.cds_locations(&Ontology),
            Err(FeatureError::NotATranscript { .. })
        ));
    }

    #[test]
    fn test_cds_locations_requires_cds_and_exon() {
        let mut transcript = Feature::new("chr1", "mRNA", 0, 100).unwrap();
        assert!(matches!(
            transcript.cds_locations(&Ontology),
            Err(FeatureError::NoCdsFound { .. })
        ));
        transcript.add_child(Feature::new("chr1", "CDS", 10, 90).unwrap());
        assert!(matches!(
            transcript.cds_locations(&Ontology),
            Err(FeatureError::NoExonFound { .. })
        ));
    }
}
