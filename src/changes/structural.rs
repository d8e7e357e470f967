//! Structural edits: adding and deleting whole features, and the exon
//! merge/split family.
//!
//! Merging adjacent exons is not expressible as the inverse of a single
//! generic edit, so the merge and split operations come as explicit
//! forward/backward change pairs instead of algebraically-derived inverses:
//! the undo form reinserts the removed children verbatim (original
//! identifiers included) and deletes whatever the forward form created.

use crate::backend::{ClientTree, Gff3Snapshot, ServerBackend};
use crate::change::{Change, ChangeBatch, ChangeResult};
use crate::error::ChangeError;
use crate::feature::{Feature, FeatureId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFeaturePayload {
    pub refseq: String,
    pub feature: Feature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<FeatureId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFeatureChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<AddFeaturePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFeatureChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    /// Each payload carries the full deleted subtree so the inverse is an
    /// exact AddFeatureChange.
    #[serde(flatten)]
    pub changes: ChangeBatch<AddFeaturePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeExonsPayload {
    pub transcript_id: FeatureId,
    pub removed_exons: Vec<Feature>,
    pub merged_exon_id: FeatureId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeExonsChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<MergeExonsPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoMergeExonsPayload {
    pub parent_id: FeatureId,
    /// Reinserted verbatim, original identifiers included.
    pub restored: Vec<Feature>,
    /// Identifiers created by the forward merge, to be removed.
    pub delete_ids: Vec<FeatureId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoMergeExonsChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<UndoMergeExonsPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitExonPayload {
    pub exon_id: FeatureId,
    /// Interbase split point; the left part keeps the original identifier.
    pub split_at: i64,
    pub right_exon_id: FeatureId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitExonChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<SplitExonPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoSplitExonChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<SplitExonPayload>,
}

fn apply_merge(root: &mut Feature, payload: &MergeExonsPayload) -> Result<(), ChangeError> {
    let transcript = root
        .find(&payload.transcript_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.transcript_id.clone()))?;
    // Validate every exon against the recorded state before touching any.
    for exon in &payload.removed_exons {
        let current = transcript
            .child(exon.id())
            .ok_or_else(|| ChangeError::FeatureNotFound(exon.id().clone()))?;
        if current.min() != exon.min() || current.max() != exon.max() {
            return Err(ChangeError::StaleEdit {
                feature: exon.id().clone(),
                expected: format!("[{},{})", exon.min(), exon.max()),
                found: format!("[{},{})", current.min(), current.max()),
            });
        }
    }
    let min = payload.removed_exons.iter().map(Feature::min).min();
    let max = payload.removed_exons.iter().map(Feature::max).max();
    let (Some(min), Some(max)) = (min, max) else {
        return Err(ChangeError::Malformed(
            "merge requires at least one exon".to_string(),
        ));
    };
    let strand = payload.removed_exons[0].strand();
    let refseq = payload.removed_exons[0].refseq().to_string();

    let transcript = root
        .find_mut(&payload.transcript_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.transcript_id.clone()))?;
    for exon in &payload.removed_exons {
        transcript.delete_child(exon.id())?;
    }
    let mut merged = Feature::new_with_id(&payload.merged_exon_id, &refseq, "exon", min, max)?;
    merged.set_strand(strand);
    transcript.add_child(merged);
    Ok(())
}

fn apply_undo_merge(root: &mut Feature, payload: &UndoMergeExonsPayload) -> Result<(), ChangeError> {
    let parent = root
        .find_mut(&payload.parent_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.parent_id.clone()))?;
    for id in &payload.delete_ids {
        parent.delete_child(id)?;
    }
    for feature in &payload.restored {
        parent.add_child(feature.clone());
    }
    Ok(())
}

fn apply_split(root: &mut Feature, payload: &SplitExonPayload) -> Result<(), ChangeError> {
    let exon = root
        .find(&payload.exon_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.exon_id.clone()))?;
    if payload.split_at <= exon.min() || payload.split_at >= exon.max() {
        return Err(ChangeError::Malformed(format!(
            "split point {} is outside exon '{}' [{},{})",
            payload.split_at,
            payload.exon_id,
            exon.min(),
            exon.max()
        )));
    }
    let kind = exon.kind().to_string();
    let refseq = exon.refseq().to_string();
    let strand = exon.strand();
    let old_max = exon.max();
    if root.id() == &payload.exon_id {
        return Err(ChangeError::Malformed(format!(
            "cannot split top-level feature '{}'",
            payload.exon_id
        )));
    }

    let mut right =
        Feature::new_with_id(&payload.right_exon_id, &refseq, &kind, payload.split_at, old_max)?;
    right.set_strand(strand);
    root.find_mut(&payload.exon_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.exon_id.clone()))?
        .set_max(payload.split_at)?;
    let parent = root
        .find_parent_mut(&payload.exon_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.exon_id.clone()))?;
    parent.add_child(right);
    Ok(())
}

fn apply_undo_split(root: &mut Feature, payload: &SplitExonPayload) -> Result<(), ChangeError> {
    let parent = root
        .find_parent_mut(&payload.right_exon_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.right_exon_id.clone()))?;
    let removed = parent.delete_child(&payload.right_exon_id)?;
    let left = parent
        .child_mut(&payload.exon_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(payload.exon_id.clone()))?;
    left.set_max(removed.max())?;
    parent.sort_children();
    Ok(())
}

impl AddFeatureChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "AddFeatureChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            match &payload.parent_id {
                Some(parent_id) => {
                    server.update(parent_id, &self.changed_ids, |root| {
                        root.find_mut(parent_id)
                            .ok_or_else(|| ChangeError::FeatureNotFound(parent_id.clone()))?
                            .add_child(payload.feature.clone());
                        Ok(())
                    })?;
                }
                None => {
                    // A new top-level feature also joins its refseq record.
                    let mut refseq = server.session.get_refseq(&payload.refseq)?;
                    server
                        .session
                        .put_top_level_feature(payload.feature.clone(), &server.user)?;
                    refseq.features.push(payload.feature.id().clone());
                    server.session.put_refseq(refseq, &server.user)?;
                }
            }
        }
        Ok(self.result())
    }

    /// The one mutation the imported snapshot supports: appending. Grafting
    /// under an existing parent would rewrite imported records and is
    /// rejected.
    pub fn execute_on_local_gff3(
        &self,
        snapshot: &mut Gff3Snapshot,
    ) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            if payload.parent_id.is_some() {
                return Err(ChangeError::UnsupportedBackend {
                    change: "AddFeatureChange (nested)",
                    backend: "local-gff3",
                });
            }
            snapshot.append_feature(&payload.refseq, payload.feature.clone());
        }
        Ok(self.result())
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.add_feature(payload.feature.clone(), payload.parent_id.as_deref())?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::DeleteFeatureChange(DeleteFeatureChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(self.changes.iter().rev().cloned().collect()),
        })
    }
}

impl DeleteFeatureChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "DeleteFeatureChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            let id = payload.feature.id().clone();
            match &payload.parent_id {
                Some(_) => {
                    server.update(&id, &self.changed_ids, |root| {
                        let parent = root
                            .find_parent_mut(&id)
                            .ok_or_else(|| ChangeError::FeatureNotFound(id.clone()))?;
                        parent.delete_child(&id)?;
                        Ok(())
                    })?;
                }
                None => {
                    server.session.delete_top_level_feature(&id, &server.user)?;
                    let mut refseq = server.session.get_refseq(&payload.refseq)?;
                    refseq.features.retain(|f| f != &id);
                    server.session.put_refseq(refseq, &server.user)?;
                }
            }
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "DeleteFeatureChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.delete_feature(payload.feature.id())?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::AddFeatureChange(AddFeatureChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(self.changes.iter().rev().cloned().collect()),
        })
    }
}

impl MergeExonsChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "MergeExonsChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            server.update(&payload.transcript_id, &self.changed_ids, |root| {
                apply_merge(root, payload)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "MergeExonsChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.update(&payload.transcript_id, |root| apply_merge(root, payload))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::UndoMergeExonsChange(UndoMergeExonsChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|payload| UndoMergeExonsPayload {
                        parent_id: payload.transcript_id.clone(),
                        restored: payload.removed_exons.clone(),
                        delete_ids: vec![payload.merged_exon_id.clone()],
                    })
                    .collect(),
            ),
        })
    }
}

impl UndoMergeExonsChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "UndoMergeExonsChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            server.update(&payload.parent_id, &self.changed_ids, |root| {
                apply_undo_merge(root, payload)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "UndoMergeExonsChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.update(&payload.parent_id, |root| apply_undo_merge(root, payload))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::MergeExonsChange(MergeExonsChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|payload| MergeExonsPayload {
                        transcript_id: payload.parent_id.clone(),
                        removed_exons: payload.restored.clone(),
                        merged_exon_id: payload
                            .delete_ids
                            .first()
                            .cloned()
                            .unwrap_or_else(Feature::new_id),
                    })
                    .collect(),
            ),
        })
    }
}

impl SplitExonChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "SplitExonChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            server.update(&payload.exon_id, &self.changed_ids, |root| {
                apply_split(root, payload)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "SplitExonChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.update(&payload.exon_id, |root| apply_split(root, payload))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::UndoSplitExonChange(UndoSplitExonChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(self.changes.iter().rev().cloned().collect()),
        })
    }
}

impl UndoSplitExonChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "UndoSplitExonChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            server.update(&payload.exon_id, &self.changed_ids, |root| {
                apply_undo_split(root, payload)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "UndoSplitExonChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for payload in self.changes.iter() {
            tree.update(&payload.exon_id, |root| apply_undo_split(root, payload))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::SplitExonChange(SplitExonChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(self.changes.iter().rev().cloned().collect()),
        })
    }
}
