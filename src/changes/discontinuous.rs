//! Edits to one sub-range of a discontinuous location (split CDS).
//!
//! These changes only apply to features that already carry discontinuous
//! locations; a plain start/end change must be used otherwise. A sub-range
//! may not cross its immediate neighbor, and editing the first or last
//! sub-range moves the feature's own min/max envelope in lockstep.

use crate::backend::{ClientTree, Gff3Snapshot, ServerBackend};
use crate::change::{Change, ChangeBatch, ChangeResult};
use crate::error::{ChangeError, FeatureError};
use crate::feature::{Feature, FeatureId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscontinuousStartEdit {
    pub feature_id: FeatureId,
    pub index: usize,
    pub old_start: i64,
    pub new_start: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscontinuousEndEdit {
    pub feature_id: FeatureId,
    pub index: usize,
    pub old_end: i64,
    pub new_end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscontinuousLocationStartChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<DiscontinuousStartEdit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscontinuousLocationEndChange {
    pub assembly: String,
    pub changed_ids: Vec<FeatureId>,
    #[serde(flatten)]
    pub changes: ChangeBatch<DiscontinuousEndEdit>,
}

fn locations_of<'a>(
    root: &'a Feature,
    feature_id: &str,
    index: usize,
    plain_change: &str,
) -> Result<&'a Feature, ChangeError> {
    let target = root
        .find(feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(feature_id.to_string()))?;
    if target.discontinuous_locations().is_empty() {
        return Err(ChangeError::WrongChangeType {
            feature: feature_id.to_string(),
            reason: format!("feature has no discontinuous locations; use {plain_change}"),
        });
    }
    if index >= target.discontinuous_locations().len() {
        return Err(ChangeError::Malformed(format!(
            "sub-range index {index} out of range for feature '{feature_id}'"
        )));
    }
    Ok(target)
}

fn apply_start_edit(root: &mut Feature, edit: &DiscontinuousStartEdit) -> Result<(), ChangeError> {
    let target = locations_of(root, &edit.feature_id, edit.index, "LocationStartChange")?;
    let locations = target.discontinuous_locations();
    let location = locations[edit.index];
    if location.start != edit.old_start {
        return Err(ChangeError::StaleEdit {
            feature: edit.feature_id.clone(),
            expected: edit.old_start.to_string(),
            found: location.start.to_string(),
        });
    }
    if edit.new_start > location.end {
        return Err(ChangeError::Feature(FeatureError::InvalidCoordinate {
            id: edit.feature_id.clone(),
            min: edit.new_start,
            max: location.end,
        }));
    }
    if edit.index > 0 && edit.new_start < locations[edit.index - 1].end {
        return Err(ChangeError::DiscontinuousOrderViolation {
            feature: edit.feature_id.clone(),
            index: edit.index,
        });
    }

    let target = root
        .find_mut(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
    target.discontinuous_locations_mut()[edit.index].start = edit.new_start;
    if edit.index == 0 {
        target.set_min(edit.new_start)?;
        // The envelope min moved; siblings stay sorted by min.
        if let Some(parent) = root.find_parent_mut(&edit.feature_id) {
            parent.sort_children();
        }
    }
    Ok(())
}

fn apply_end_edit(root: &mut Feature, edit: &DiscontinuousEndEdit) -> Result<(), ChangeError> {
    let target = locations_of(root, &edit.feature_id, edit.index, "LocationEndChange")?;
    let locations = target.discontinuous_locations();
    let location = locations[edit.index];
    if location.end != edit.old_end {
        return Err(ChangeError::StaleEdit {
            feature: edit.feature_id.clone(),
            expected: edit.old_end.to_string(),
            found: location.end.to_string(),
        });
    }
    if edit.new_end < location.start {
        return Err(ChangeError::Feature(FeatureError::InvalidCoordinate {
            id: edit.feature_id.clone(),
            min: location.start,
            max: edit.new_end,
        }));
    }
    if edit.index + 1 < locations.len() && edit.new_end > locations[edit.index + 1].start {
        return Err(ChangeError::DiscontinuousOrderViolation {
            feature: edit.feature_id.clone(),
            index: edit.index,
        });
    }

    let last = locations.len() - 1;
    let target = root
        .find_mut(&edit.feature_id)
        .ok_or_else(|| ChangeError::FeatureNotFound(edit.feature_id.clone()))?;
    target.discontinuous_locations_mut()[edit.index].end = edit.new_end;
    if edit.index == last {
        target.set_max(edit.new_end)?;
    }
    Ok(())
}

impl DiscontinuousLocationStartChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "DiscontinuousLocationStartChange",
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
            change: "DiscontinuousLocationStartChange",
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
        Change::DiscontinuousLocationStartChange(DiscontinuousLocationStartChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|edit| DiscontinuousStartEdit {
                        feature_id: edit.feature_id.clone(),
                        index: edit.index,
                        old_start: edit.new_start,
                        new_start: edit.old_start,
                    })
                    .collect(),
            ),
        })
    }
}

impl DiscontinuousLocationEndChange {
    fn result(&self) -> ChangeResult {
        ChangeResult {
            change_type: "DiscontinuousLocationEndChange",
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
            change: "DiscontinuousLocationEndChange",
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
        Change::DiscontinuousLocationEndChange(DiscontinuousLocationEndChange {
            assembly: self.assembly.clone(),
            changed_ids: self.changed_ids.iter().rev().cloned().collect(),
            changes: ChangeBatch(
                self.changes
                    .iter()
                    .rev()
                    .map(|edit| DiscontinuousEndEdit {
                        feature_id: edit.feature_id.clone(),
                        index: edit.index,
                        old_end: edit.new_end,
                        new_end: edit.old_end,
                    })
                    .collect(),
            ),
        })
    }
}
