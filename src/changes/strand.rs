//! Batched strand flips.
//!
//! Unlike coordinate edits, a strand batch is atomic with respect to the
//! optimistic-concurrency check: every feature's current strand is validated
//! against the caller's expectation before any feature is mutated, even
//! though persistence itself stays per-feature.

use crate::backend::{ClientTree, Gff3Snapshot, ServerBackend};
use crate::change::{Change, ChangeBatch, ChangeResult};
use crate::error::ChangeError;
use crate::feature::{Feature, FeatureId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandEdit {
    pub feature_id: FeatureId,
    pub old_strand: Option<i8>,
    pub new_strand: Option<i8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<StrandEdit>,
}

fn strand_str(strand: Option<i8>) -> &'static str {
    match strand {
        Some(1) => "+",
        Some(-1) => "-",
        _ => ".",
    }
}

fn validate(feature: &Feature, edit: &StrandEdit) -> Result<(), ChangeError> {
    if feature.strand() != edit.old_strand {
        return Err(ChangeError::StaleEdit {
            feature: edit.feature_id.clone(),
            expected: strand_str(edit.old_strand).to_string(),
            found: strand_str(feature.strand()).to_string(),
        });
    }
    Ok(())
}

impl StrandChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "StrandChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        // Phase one: fetch every touched record and validate every edit.
        let mut records: HashMap<FeatureId, Feature> = HashMap::new();
        let mut ancestors: Vec<(usize, FeatureId)> = Vec::new();
        for (idx, edit) in self.changes.iter().enumerate() {
            let ancestor = server
                .session
                .top_level_ancestor(&edit.feature_id)
                .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
            if !self.changed_ids.contains(&ancestor) {
                return Err(ChangeError::Malformed(format!(
                    "feature '{}' is not reachable from the change's declared top-level features",
                    edit.feature_id
                )));
            }
            if !records.contains_key(&ancestor) {
                let record = server.session.get_top_level_feature(&ancestor)?;
                records.insert(ancestor.clone(), record);
            }
            let target = records[&ancestor]
                .find(&edit.feature_id)
                .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
            validate(target, edit)?;
            ancestors.push((idx, ancestor));
        }

        // Phase two: apply every edit, then persist each touched record once.
        for (idx, ancestor) in &ancestors {
            let edit = &self.changes.0[*idx];
            if let Some(target) = records
                .get_mut(ancestor)
                .and_then(|record| record.find_mut(&edit.feature_id))
            {
                target.set_strand(edit.new_strand);
            }
        }
        for (_, record) in records {
            server.session.put_top_level_feature(record, &server.user)?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "StrandChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for edit in self.changes.iter() {
            let feature = tree
                .get_feature(&edit.feature_id)
                .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
            validate(feature, edit)?;
        }
        for edit in self.changes.iter() {
            tree.update(&edit.feature_id, |root| {
                if let Some(target) = root.find_mut(&edit.feature_id) {
                    target.set_strand(edit.new_strand);
                }
                Ok(())
            })?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::StrandChange(StrandChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|edit| StrandEdit {
                        feature_id: edit.feature_id.clone(),
                        old_strand: edit.new_strand,
                        new_strand: edit.old_strand,
                    })
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryRecordSession};

    fn two_genes() -> (Vec<Feature>, Vec<FeatureId>) {
        let mut a = Feature::new("chr1", "gene", 0, 100).unwrap();
        a.set_strand(Some(1));
        let mut b = Feature::new("chr1", "gene", 200, 300).unwrap();
        b.set_strand(Some(1));
        let ids = vec![a.id().clone(), b.id().clone()];
        (vec![a, b], ids)
    }

    fn flip(ids: &[FeatureId], edits: Vec<StrandEdit>) -> Change {
        Change::StrandChange(StrandChange {
            assembly: "asm1".to_string(),
            changed_ids: ids.to_vec(),
            changes: ChangeBatch(edits),
        })
    }

    #[test]
    fn test_batch_is_atomic_under_stale_check() {
        let (genes, ids) = two_genes();
        let mut tree = ClientTree::new();
        for gene in genes {
            tree.add_feature(gene, None).unwrap();
        }
        let mut backend = Backend::Client(tree);
        // First edit's expectation matches, second one is stale: neither
        // feature's strand may change.
        let change = flip(
            &ids,
            vec![
                StrandEdit {
                    feature_id: ids[0].clone(),
                    old_strand: Some(1),
                    new_strand: Some(-1),
                },
                StrandEdit {
                    feature_id: ids[1].clone(),
                    old_strand: Some(-1),
                    new_strand: Some(1),
                },
            ],
        );
        assert!(matches!(
            change.execute(&mut backend).unwrap_err(),
            ChangeError::StaleEdit { .. }
        ));
        let Backend::Client(tree) = &backend else { unreachable!() };
        assert_eq!(tree.get_feature(&ids[0]).unwrap().strand(), Some(1));
        assert_eq!(tree.get_feature(&ids[1]).unwrap().strand(), Some(1));
    }

    #[test]
    fn test_server_flip_and_inverse() {
        let (genes, ids) = two_genes();
        let mut session = MemoryRecordSession::new();
        for gene in genes {
            session.insert_feature(gene);
        }
        let mut backend = Backend::Server(ServerBackend::new(Box::new(session), "bob"));
        let change = flip(
            &ids,
            vec![
                StrandEdit {
                    feature_id: ids[0].clone(),
                    old_strand: Some(1),
                    new_strand: Some(-1),
                },
                StrandEdit {
                    feature_id: ids[1].clone(),
                    old_strand: Some(1),
                    new_strand: None,
                },
            ],
        );
        change.execute(&mut backend).unwrap();
        {
            let Backend::Server(server) = &backend else { unreachable!() };
            assert_eq!(
                server.session.get_top_level_feature(&ids[0]).unwrap().strand(),
                Some(-1)
            );
            assert_eq!(
                server.session.get_top_level_feature(&ids[1]).unwrap().strand(),
                None
            );
        }
        change.inverse().execute(&mut backend).unwrap();
        let Backend::Server(server) = &backend else { unreachable!() };
        assert_eq!(
            server.session.get_top_level_feature(&ids[0]).unwrap().strand(),
            Some(1)
        );
        assert_eq!(
            server.session.get_top_level_feature(&ids[1]).unwrap().strand(),
            Some(1)
        );
    }
}
