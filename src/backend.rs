//! The three execution backends a Change can replay against: the
//! authoritative record store, the immutable GFF3 import snapshot, and the
//! live in-memory editing tree held by each client.
//!
//! Serialization across multiple callers is the authoritative backend's job
//! (record-level locking in whatever store implements [`RecordSession`]);
//! the client tree carries no lock of its own and expects one caller.

use crate::error::ChangeError;
use crate::feature::{Feature, FeatureId};
use crate::refseq::{Assembly, RefSeq, SequenceChunk};
use std::collections::HashMap;

/// Record-style accessors over the authoritative store, scoped to one
/// `execute_on_server` call. Top-level features are the persistence unit:
/// nested features travel inside their top-level ancestor's record. Every
/// write carries the acting user for audit.
pub trait RecordSession {
    fn get_top_level_feature(&self, id: &str) -> Result<Feature, ChangeError>;
    fn put_top_level_feature(&mut self, feature: Feature, user: &str) -> Result<(), ChangeError>;
    fn delete_top_level_feature(&mut self, id: &str, user: &str) -> Result<Feature, ChangeError>;
    /// Identifier of the top-level feature whose subtree contains `id`.
    fn top_level_ancestor(&self, id: &str) -> Option<FeatureId>;
    fn get_refseq(&self, id: &str) -> Result<RefSeq, ChangeError>;
    fn put_refseq(&mut self, refseq: RefSeq, user: &str) -> Result<(), ChangeError>;
    fn get_assembly(&self, id: &str) -> Result<Assembly, ChangeError>;
    fn put_assembly(&mut self, assembly: Assembly, user: &str) -> Result<(), ChangeError>;
    fn add_sequence_chunk(
        &mut self,
        refseq_id: &str,
        chunk: SequenceChunk,
        user: &str,
    ) -> Result<(), ChangeError>;
}

/// The authoritative backend: a session handle plus the user identity
/// attached to every written record.
pub struct ServerBackend {
    pub session: Box<dyn RecordSession>,
    pub user: String,
}

impl ServerBackend {
    pub fn new(session: Box<dyn RecordSession>, user: &str) -> Self {
        Self {
            session,
            user: user.to_string(),
        }
    }

    /// Fetch the top-level record containing `feature_id`, run `f` over it,
    /// and persist the result under this backend's user. The ancestor must be
    /// among the change's declared top-level identifiers; anything else is a
    /// cross-tree identifier confusion and fails before any mutation.
    pub fn update<F>(
        &mut self,
        feature_id: &str,
        changed_ids: &[FeatureId],
        f: F,
    ) -> Result<(), ChangeError>
    where
        F: FnOnce(&mut Feature) -> Result<(), ChangeError>,
    {
        let ancestor = self
            .session
            .top_level_ancestor(feature_id)
            .ok_or_else(|| ChangeError::FeatureNotFound(feature_id.to_string()))?;
        if !changed_ids.contains(&ancestor) {
            return Err(ChangeError::Malformed(format!(
                "feature '{feature_id}' is not reachable from the change's declared top-level features"
            )));
        }
        let mut record = self.session.get_top_level_feature(&ancestor)?;
        f(&mut record)?;
        self.session.put_top_level_feature(record, &self.user)
    }
}

/// In-memory implementation of [`RecordSession`]; the reference authoritative
/// store for tests and embedding.
#[derive(Default)]
pub struct MemoryRecordSession {
    features: HashMap<FeatureId, Feature>,
    refseqs: HashMap<String, RefSeq>,
    assemblies: HashMap<String, Assembly>,
    last_modified_by: HashMap<String, String>,
}

impl MemoryRecordSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_refseq(&mut self, refseq: RefSeq) {
        self.refseqs.insert(refseq.id.clone(), refseq);
    }

    pub fn insert_feature(&mut self, feature: Feature) {
        self.features.insert(feature.id().clone(), feature);
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.get(id)
    }

    pub fn last_modified_by(&self, record_id: &str) -> Option<&str> {
        self.last_modified_by.get(record_id).map(|s| s.as_str())
    }
}

impl RecordSession for MemoryRecordSession {
    fn get_top_level_feature(&self, id: &str) -> Result<Feature, ChangeError> {
        self.features
            .get(id)
            .cloned()
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))
    }

    fn put_top_level_feature(&mut self, feature: Feature, user: &str) -> Result<(), ChangeError> {
        self.last_modified_by
            .insert(feature.id().clone(), user.to_string());
        self.features.insert(feature.id().clone(), feature);
        Ok(())
    }

    fn delete_top_level_feature(&mut self, id: &str, user: &str) -> Result<Feature, ChangeError> {
        self.last_modified_by.insert(id.to_string(), user.to_string());
        self.features
            .remove(id)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))
    }

    fn top_level_ancestor(&self, id: &str) -> Option<FeatureId> {
        self.features
            .values()
            .find(|f| f.id() == id || f.has_descendant(id))
            .map(|f| f.id().clone())
    }

    fn get_refseq(&self, id: &str) -> Result<RefSeq, ChangeError> {
        self.refseqs
            .get(id)
            .cloned()
            .ok_or_else(|| ChangeError::RefSeqNotFound(id.to_string()))
    }

    fn put_refseq(&mut self, refseq: RefSeq, user: &str) -> Result<(), ChangeError> {
        self.last_modified_by
            .insert(refseq.id.clone(), user.to_string());
        self.refseqs.insert(refseq.id.clone(), refseq);
        Ok(())
    }

    fn get_assembly(&self, id: &str) -> Result<Assembly, ChangeError> {
        self.assemblies
            .get(id)
            .cloned()
            .ok_or_else(|| ChangeError::AssemblyNotFound(id.to_string()))
    }

    fn put_assembly(&mut self, assembly: Assembly, user: &str) -> Result<(), ChangeError> {
        self.last_modified_by
            .insert(assembly.id.clone(), user.to_string());
        self.assemblies.insert(assembly.id.clone(), assembly);
        Ok(())
    }

    fn add_sequence_chunk(
        &mut self,
        refseq_id: &str,
        chunk: SequenceChunk,
        user: &str,
    ) -> Result<(), ChangeError> {
        let refseq = self
            .refseqs
            .get_mut(refseq_id)
            .ok_or_else(|| ChangeError::RefSeqNotFound(refseq_id.to_string()))?;
        refseq.chunks.insert(chunk);
        self.last_modified_by
            .insert(refseq_id.to_string(), user.to_string());
        Ok(())
    }
}

/// The client's live editing tree. Absence of a referenced feature is fatal
/// for the enclosing Change, never a silent no-op.
#[derive(Debug, Default)]
pub struct ClientTree {
    top_level: HashMap<FeatureId, Feature>,
    ancestor_of: HashMap<FeatureId, FeatureId>,
}

impl ClientTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_feature(&self, id: &str) -> Option<&Feature> {
        let top = self.top_level_ancestor(id)?;
        self.top_level.get(&top)?.find(id)
    }

    pub fn top_level_ancestor(&self, id: &str) -> Option<FeatureId> {
        if self.top_level.contains_key(id) {
            return Some(id.to_string());
        }
        self.ancestor_of.get(id).cloned()
    }

    /// Mutable access to the top-level record containing `id`.
    pub fn top_level_mut(&mut self, id: &str) -> Result<&mut Feature, ChangeError> {
        let top = self
            .top_level_ancestor(id)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        self.top_level
            .get_mut(&top)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))
    }

    pub fn top_level_features(&self) -> impl Iterator<Item = &Feature> {
        self.top_level.values()
    }

    /// Add a top-level feature, or graft a subtree under `parent` when given.
    pub fn add_feature(
        &mut self,
        feature: Feature,
        parent: Option<&str>,
    ) -> Result<(), ChangeError> {
        match parent {
            None => {
                let id = feature.id().clone();
                self.top_level.insert(id.clone(), feature);
                self.reindex(&id);
            }
            Some(parent_id) => {
                let top = self
                    .top_level_ancestor(parent_id)
                    .ok_or_else(|| ChangeError::FeatureNotFound(parent_id.to_string()))?;
                let root = self
                    .top_level
                    .get_mut(&top)
                    .ok_or_else(|| ChangeError::FeatureNotFound(parent_id.to_string()))?;
                root.find_mut(parent_id)
                    .ok_or_else(|| ChangeError::FeatureNotFound(parent_id.to_string()))?
                    .add_child(feature);
                self.reindex(&top);
            }
        }
        Ok(())
    }

    /// Detach and return a feature, wherever it sits in the forest.
    pub fn delete_feature(&mut self, id: &str) -> Result<Feature, ChangeError> {
        if let Some(feature) = self.top_level.remove(id) {
            self.drop_index(&feature);
            return Ok(feature);
        }
        let top = self
            .top_level_ancestor(id)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        let root = self
            .top_level
            .get_mut(&top)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        let parent = root
            .find_parent_mut(id)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        let removed = parent.delete_child(id).map_err(ChangeError::Feature)?;
        self.reindex(&top);
        self.drop_index(&removed);
        self.ancestor_of.remove(id);
        Ok(removed)
    }

    /// Run `f` over the top-level record containing `id`, then refresh the
    /// ancestor index (the mutation may have been structural).
    pub fn update<F>(&mut self, id: &str, f: F) -> Result<(), ChangeError>
    where
        F: FnOnce(&mut Feature) -> Result<(), ChangeError>,
    {
        let top = self
            .top_level_ancestor(id)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        let root = self
            .top_level
            .get_mut(&top)
            .ok_or_else(|| ChangeError::FeatureNotFound(id.to_string()))?;
        f(root)?;
        self.reindex(&top);
        Ok(())
    }

    /// Rebuild the id -> top-level-ancestor index for one subtree. Structural
    /// mutations are rare next to lookups, so full reindex per mutation is
    /// fine.
    pub fn reindex(&mut self, top_id: &str) {
        fn walk(map: &mut HashMap<FeatureId, FeatureId>, top: &str, feature: &Feature) {
            for child in feature.children() {
                map.insert(child.id().clone(), top.to_string());
                walk(map, top, child);
            }
        }
        if let Some(root) = self.top_level.get(top_id) {
            let root = root.clone();
            walk(&mut self.ancestor_of, top_id, &root);
        }
    }

    fn drop_index(&mut self, removed: &Feature) {
        fn walk(map: &mut HashMap<FeatureId, FeatureId>, feature: &Feature) {
            map.remove(feature.id());
            for child in feature.children() {
                walk(map, child);
            }
        }
        walk(&mut self.ancestor_of, removed);
    }
}

/// An imported GFF3 file held as an immutable snapshot. The only supported
/// mutation is appending freshly added features; everything else answers
/// `UnsupportedBackend`.
#[derive(Debug, Default)]
pub struct Gff3Snapshot {
    pub refseqs: Vec<RefSeq>,
    features_by_refseq: HashMap<String, Vec<Feature>>,
}

impl Gff3Snapshot {
    pub fn from_imported(imported: crate::gff3_import::ImportedAnnotations) -> Self {
        Self {
            refseqs: imported.refseqs,
            features_by_refseq: imported.features_by_refseq,
        }
    }

    pub fn features(&self, refseq: &str) -> &[Feature] {
        self.features_by_refseq
            .get(refseq)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn append_feature(&mut self, refseq: &str, feature: Feature) {
        self.features_by_refseq
            .entry(refseq.to_string())
            .or_default()
            .push(feature);
    }
}

/// The backend a Change is dispatched against.
pub enum Backend {
    Server(ServerBackend),
    LocalGff3(Gff3Snapshot),
    Client(ClientTree),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Server(_) => "server",
            Backend::LocalGff3(_) => "local-gff3",
            Backend::Client(_) => "client",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_gene() -> (ClientTree, FeatureId, FeatureId) {
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        let exon = Feature::new("chr1", "exon", 10, 20).unwrap();
        let exon_id = exon.id().clone();
        gene.add_child(exon);
        let gene_id = gene.id().clone();
        let mut tree = ClientTree::new();
        tree.add_feature(gene, None).unwrap();
        (tree, gene_id, exon_id)
    }

    #[test]
    fn test_client_tree_lookup_and_delete() {
        let (mut tree, gene_id, exon_id) = tree_with_gene();
        assert_eq!(tree.get_feature(&exon_id).unwrap().min(), 10);
        assert_eq!(tree.top_level_ancestor(&exon_id).unwrap(), gene_id);

        let removed = tree.delete_feature(&exon_id).unwrap();
        assert_eq!(removed.id(), &exon_id);
        assert!(tree.get_feature(&exon_id).is_none());
        assert!(matches!(
            tree.delete_feature(&exon_id),
            Err(ChangeError::FeatureNotFound(_))
        ));
        assert!(tree.get_feature(&gene_id).is_some());
    }

    #[test]
    fn test_client_tree_graft_under_parent() {
        let (mut tree, gene_id, exon_id) = tree_with_gene();
        let second = Feature::new("chr1", "exon", 40, 60).unwrap();
        let second_id = second.id().clone();
        tree.add_feature(second, Some(&gene_id)).unwrap();
        assert_eq!(tree.top_level_ancestor(&second_id).unwrap(), gene_id);
        let gene = tree.get_feature(&gene_id).unwrap();
        let mins: Vec<i64> = gene.children().iter().map(|c| c.min()).collect();
        assert_eq!(mins, vec![10, 40]);
        assert!(tree.get_feature(&exon_id).is_some());
    }

    #[test]
    fn test_memory_session_assembly_records() {
        let mut session = MemoryRecordSession::new();
        assert!(matches!(
            session.get_assembly("asm1"),
            Err(ChangeError::AssemblyNotFound(_))
        ));
        let assembly = Assembly {
            id: "asm1".to_string(),
            name: "hg38".to_string(),
            refseqs: vec!["rs1".to_string()],
        };
        session.put_assembly(assembly, "alice").unwrap();
        let fetched = session.get_assembly("asm1").unwrap();
        assert_eq!(fetched.name, "hg38");
        assert_eq!(fetched.refseqs, vec!["rs1".to_string()]);
        assert_eq!(session.last_modified_by("asm1"), Some("alice"));
    }

    #[test]
    fn test_memory_session_audit_and_ancestor() {
        let mut session = MemoryRecordSession::new();
        let mut gene = Feature::new("chr1", "gene", 0, 100).unwrap();
        let exon = Feature::new("chr1", "exon", 10, 20).unwrap();
        let exon_id = exon.id().clone();
        gene.add_child(exon);
        let gene_id = gene.id().clone();

        session.put_top_level_feature(gene, "alice").unwrap();
        assert_eq!(session.top_level_ancestor(&exon_id).unwrap(), gene_id);
        assert_eq!(session.last_modified_by(&gene_id), Some("alice"));
        assert!(matches!(
            session.get_top_level_feature("missing"),
            Err(ChangeError::FeatureNotFound(_))
        ));
    }
}
