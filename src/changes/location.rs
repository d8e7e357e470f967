//! Coordinate edits: change one feature's start or end, batched N features
//! per change.
//!
//! Each sub-edit carries the caller's expected old value as an
//! optimistic-concurrency check. Sub-edits execute in array order; a failing
//! sub-edit aborts the whole change but earlier sub-edits in the same batch
//! are not rolled back; the caller resyncs with the change's inverse.

use crate::backend::{ClientTree, Gff3Snapshot, ServerBackend};
use crate::change::{Change, ChangeBatch, ChangeResult};
use crate::error::ChangeError;
use crate::feature::{Feature, FeatureId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEdit {
    pub feature_id: FeatureId,
    pub old_start: i64,
    pub new_start: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndEdit {
    pub feature_id: FeatureId,
    pub old_end: i64,
    pub new_end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStartChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<StartEdit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEndChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<EndEdit>,
}

fn apply_start_edit(root: &mut Feature, edit: &StartEdit) -> Result<(), ChangeError> {
    let target = root
        .find(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
    if !target.discontinuous_locations().is_empty() {
        return Err(ChangeError::WrongChangeType {
            feature: edit.feature_id.clone(),
            reason: "feature has discontinuous locations; use DiscontinuousLocationStartChange"
                .to_string(),
        });
    }
    if target.min() != edit.old_start {
        return Err(ChangeError::StaleEdit {
            feature: edit.feature_id.clone(),
            expected: edit.old_start.to_string(),
            found: target.min().to_string(),
        });
    }
    // Containment is not propagated upward: an edit that would push the
    // feature outside its parent is rejected outright.
    if let Some(parent) = root.find_parent(&edit.feature_id) {
        if edit.new_start < parent.min() {
            return Err(ChangeError::ExceedsParentBounds {
                feature: edit.feature_id.clone(),
                parent: parent.id().clone(),
            });
        }
    }
    root.find_mut(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?
        .set_min(edit.new_start)?;
    // The target's min moved; its siblings stay sorted by min.
    if let Some(parent) = root.find_parent_mut(&edit.feature_id) {
        parent.sort_children();
    }
    Ok(())
}

fn apply_end_edit(root: &mut Feature, edit: &EndEdit) -> Result<(), ChangeError> {
    let target = root
        .find(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
    if !target.discontinuous_locations().is_empty() {
        return Err(ChangeError::WrongChangeType {
            feature: edit.feature_id.clone(),
            reason: "feature has discontinuous locations; use DiscontinuousLocationEndChange"
                .to_string(),
        });
    }
    if target.max() != edit.old_end {
        return Err(ChangeError::StaleEdit {
            feature: edit.feature_id.clone(),
            expected: edit.old_end.to_string(),
            found: target.max().to_string(),
        });
    }
    if let Some(parent) = root.find_parent(&edit.feature_id) {
        if edit.new_end > parent.max() {
            return Err(ChangeError::ExceedsParentBounds {
                feature: edit.feature_id.clone(),
                parent: parent.id().clone(),
            });
        }
    }
    root.find_mut(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?
        .set_max(edit.new_end)?;
    Ok(())
}

impl LocationStartChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "LocationStartChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for edit in self.changes.iter() {
            server.update(&edit.feature_id, &self.changed_ids, |root| {
                apply_start_edit(root, edit)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "LocationStartChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for edit in self.changes.iter() {
            tree.update(&edit.feature_id, |root| apply_start_edit(root, edit))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::LocationStartChange(LocationStartChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|edit| StartEdit {
                        feature_id: edit.feature_id.clone(),
                        old_start: edit.new_start,
                        new_start: edit.old_start,
                    })
                    .collect(),
            ),
        })
    }
}

impl LocationEndChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "LocationEndChange",
            changed_ids: self.changed_ids.clone(),
        }
    }

    pub fn execute_on_server(&self, server: &mut ServerBackend) -> Result<ChangeResult, ChangeError> {
        for edit in self.changes.iter() {
            server.update(&edit.feature_id, &self.changed_ids, |root| {
                apply_end_edit(root, edit)
            })?;
        }
        Ok(self.result())
    }

    pub fn execute_on_local_gff3(&self, _: &mut Gff3Snapshot) -> Result<ChangeResult, ChangeError> {
        Err(ChangeError::UnsupportedBackend {
            change: "LocationEndChange",
            backend: "local-gff3",
        })
    }

    pub fn execute_on_client(&self, tree: &mut ClientTree) -> Result<ChangeResult, ChangeError> {
        for edit in self.changes.iter() {
            tree.update(&edit.feature_id, |root| apply_end_edit(root, edit))?;
        }
        Ok(self.result())
    }

    pub fn inverse(&self) -> Change {
        Change::LocationEndChange(LocationEndChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|edit| EndEdit {
                        feature_id: edit.feature_id.clone(),
                        old_end: edit.new_end,
                        new_end: edit.old_end,
                    })
                    .collect(),
            ),
        })
    }
}
