//! The operation/change abstraction: every mutation of the annotation model
//! is a typed, serializable, invertible command.
//!
//! The catalog is a closed enum, so the dispatcher knows every concrete type
//! at compile time. A runtime registry on top reconstitutes changes
//! received from peers by their `typeName` tag (and for embedders that need
//! to plug in extra tags).

use crate::backend::Backend;
use crate::changes::discontinuous::{DiscontinuousLocationEndChange, DiscontinuousLocationStartChange};
use crate::changes::location::{LocationEndChange, LocationStartChange};
use crate::changes::strand::StrandChange;
use crate::changes::structural::{
    AddFeatureChange, DeleteFeatureChange, MergeExonsChange, SplitExonChange,
    UndoMergeExonsChange, UndoSplitExonChange,
};
use crate::error::ChangeError;
use crate::feature::FeatureId;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What one execution touched, fed through any registered
/// `"<TypeName>-transformResults"` hook on the server path.
#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub change_type: &'static str,
    pub changed_ids: Vec<FeatureId>,
}

/// A batch of logically-identical sub-edits. Serializes the single-edit shape
/// when exactly one edit is batched and an explicit `changes` array
/// otherwise; accepts either on input.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch<T>(pub Vec<T>);

impl<T> ChangeBatch<T> {
    pub fn single(edit: T) -> Self {
        ChangeBatch(vec![edit])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for ChangeBatch<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(untagged)]
        enum Repr<'a, T> {
            One(&'a T),
            Many { changes: &'a [T] },
        }
        match self.0.as_slice() {
            [single] => Repr::One(single).serialize(serializer),
            many => Repr::Many { changes: many }.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ChangeBatch<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr<T> {
            Many { changes: Vec<T> },
            One(T),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Many { changes } => ChangeBatch(changes),
            Repr::One(single) => ChangeBatch(vec![single]),
        })
    }
}

/// The closed change catalog, tagged on the wire by `typeName`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typeName")]
pub enum Change {
    LocationStartChange(LocationStartChange),
    LocationEndChange(LocationEndChange),
    DiscontinuousLocationStartChange(DiscontinuousLocationStartChange),
    DiscontinuousLocationEndChange(DiscontinuousLocationEndChange),
    StrandChange(StrandChange),
    AddFeatureChange(AddFeatureChange),
    DeleteFeatureChange(DeleteFeatureChange),
    MergeExonsChange(MergeExonsChange),
    UndoMergeExonsChange(UndoMergeExonsChange),
    SplitExonChange(SplitExonChange),
    UndoSplitExonChange(UndoSplitExonChange),
}

macro_rules! for_each_change {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Change::LocationStartChange($inner) => $body,
            Change::LocationEndChange($inner) => $body,
            Change::DiscontinuousLocationStartChange($inner) => $body,
            Change::DiscontinuousLocationEndChange($inner) => $body,
            Change::StrandChange($inner) => $body,
            Change::AddFeatureChange($inner) => $body,
            Change::DeleteFeatureChange($inner) => $body,
            Change::MergeExonsChange($inner) => $body,
            Change::UndoMergeExonsChange($inner) => $body,
            Change::SplitExonChange($inner) => $body,
            Change::UndoSplitExonChange($inner) => $body,
        }
    };
}

const BUILTIN_TAGS: &[&str] = &[
    "LocationStartChange",
    "LocationEndChange",
    "DiscontinuousLocationStartChange",
    "DiscontinuousLocationEndChange",
    "StrandChange",
    "AddFeatureChange",
    "DeleteFeatureChange",
    "MergeExonsChange",
    "UndoMergeExonsChange",
    "SplitExonChange",
    "UndoSplitExonChange",
];

impl Change {
    pub fn type_name(&self) -> &'static str {
        match self {
            Change::LocationStartChange(_) => "LocationStartChange",
            Change::LocationEndChange(_) => "LocationEndChange",
            Change::DiscontinuousLocationStartChange(_) => "DiscontinuousLocationStartChange",
            Change::DiscontinuousLocationEndChange(_) => "DiscontinuousLocationEndChange",
            Change::StrandChange(_) => "StrandChange",
            Change::AddFeatureChange(_) => "AddFeatureChange",
            Change::DeleteFeatureChange(_) => "DeleteFeatureChange",
            Change::MergeExonsChange(_) => "MergeExonsChange",
            Change::UndoMergeExonsChange(_) => "UndoMergeExonsChange",
            Change::SplitExonChange(_) => "SplitExonChange",
            Change::UndoSplitExonChange(_) => "UndoSplitExonChange",
        }
    }

    pub fn assembly(&self) -> &str {
        for_each_change!(self, c => &c.assembly)
    }

    /// Top-level feature identifiers this change touches, in replay order.
    pub fn changed_ids(&self) -> &[FeatureId] {
        for_each_change!(self, c => &c.changed_ids)
    }

    /// Route to exactly one backend-specific execution. The authoritative
    /// path additionally runs the result through the registered
    /// `"<TypeName>-transformResults"` hook before returning.
    pub fn execute(&self, backend: &mut Backend) -> Result<ChangeResult, ChangeError> {
        tracing::debug!(
            change = self.type_name(),
            backend = backend.kind(),
            ids = self.changed_ids().len(),
            "executing change"
        );
        let mut result = match backend {
            Backend::Server(server) => {
                for_each_change!(self, c => c.execute_on_server(server))?
            }
            Backend::LocalGff3(snapshot) => {
                for_each_change!(self, c => c.execute_on_local_gff3(snapshot))?
            }
            Backend::Client(tree) => {
                for_each_change!(self, c => c.execute_on_client(tree))?
            }
        };
        if matches!(backend, Backend::Server(_)) {
            run_transform_hook(self.type_name(), &mut result);
        }
        Ok(result)
    }

    /// A new change whose execution undoes this one. Most types invert onto
    /// themselves with old/new swapped; merge and split invert onto their
    /// explicit undo counterparts.
    /// Batched sub-edits and `changed_ids` come back reversed, because
    /// re-application can be order-sensitive when edits touch overlapping
    /// regions.
    pub fn inverse(&self) -> Change {
        for_each_change!(self, c => c.inverse())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("changes always serialize")
    }

    /// Reconstitute a change received from a peer via the type registry.
    pub fn from_json(value: serde_json::Value) -> Result<Change, ChangeError> {
        let tag = value
            .get("typeName")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ChangeError::Malformed("missing typeName".to_string()))?
            .to_string();
        let decode = {
            let registry = CHANGE_REGISTRY.read().expect("change registry poisoned");
            registry
                .get(&tag)
                .cloned()
                .ok_or(ChangeError::UnknownChangeType(tag))?
        };
        decode(value)
    }
}

pub type DecodeFn = Arc<dyn Fn(serde_json::Value) -> Result<Change, ChangeError> + Send + Sync>;

fn decode_builtin(value: serde_json::Value) -> Result<Change, ChangeError> {
    serde_json::from_value(value).map_err(|e| ChangeError::Malformed(e.to_string()))
}

lazy_static! {
    static ref CHANGE_REGISTRY: RwLock<HashMap<String, DecodeFn>> = {
        let mut map: HashMap<String, DecodeFn> = HashMap::new();
        for tag in BUILTIN_TAGS {
            map.insert(tag.to_string(), Arc::new(decode_builtin));
        }
        RwLock::new(map)
    };
    static ref TRANSFORM_HOOKS: RwLock<HashMap<String, Arc<dyn Fn(&mut ChangeResult) + Send + Sync>>> =
        RwLock::new(HashMap::new());
}

/// Register an extra change-type tag, e.g. an embedder's own change decoded
/// into one of the catalog shapes.
pub fn register_change_type(tag: &str, decode: DecodeFn) {
    CHANGE_REGISTRY
        .write()
        .expect("change registry poisoned")
        .insert(tag.to_string(), decode);
}

/// Register a server-side post-processing hook under
/// `"<TypeName>-transformResults"`.
pub fn register_transform_hook<F>(name: &str, hook: F)
where
    F: Fn(&mut ChangeResult) + Send + Sync + 'static,
{
    TRANSFORM_HOOKS
        .write()
        .expect("transform hooks poisoned")
        .insert(name.to_string(), Arc::new(hook));
}

fn run_transform_hook(type_name: &str, result: &mut ChangeResult) {
    let hook = {
        let hooks = TRANSFORM_HOOKS.read().expect("transform hooks poisoned");
        hooks.get(&format!("{type_name}-transformResults")).cloned()
    };
    if let Some(hook) = hook {
        hook(result);
    }
}

/// Caller-side undo/redo history. Pure bookkeeping over recorded changes; it
/// never executes anything itself.
#[derive(Debug, Default)]
pub struct ChangeLog {
    undo: Vec<Change>,
    redo: Vec<Change>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully executed change. Clears the redo stack.
    pub fn record(&mut self, change: Change) {
        self.undo.push(change);
        self.redo.clear();
    }

    /// The inverse of the most recent change, ready to execute. The forward
    /// form moves onto the redo stack.
    pub fn undo(&mut self) -> Option<Change> {
        let change = self.undo.pop()?;
        let inverse = change.inverse();
        self.redo.push(change);
        Some(inverse)
    }

    /// The most recently undone change, ready to re-execute.
    pub fn redo(&mut self) -> Option<Change> {
        let change = self.redo.pop()?;
        self.undo.push(change.clone());
        Some(change)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::location::{LocationEndChange, EndEdit};
    use serde_json::json;

    fn end_change(edits: Vec<EndEdit>, ids: Vec<FeatureId>) -> Change {
        Change::LocationEndChange(LocationEndChange {
            assembly: "asm1".to_string(),
            changed_ids: ids,
            changes: ChangeBatch(edits),
        })
    }

    fn end_edit(feature: &str, old: i64, new: i64) -> EndEdit {
        EndEdit {
            feature_id: feature.to_string(),
            old_end: old,
            new_end: new,
        }
    }

    #[test]
    fn test_single_edit_serializes_flat() {
        let change = end_change(vec![end_edit("f1", 90, 95)], vec!["f1".to_string()]);
        let value = change.to_json();
        assert_eq!(value["typeName"], "LocationEndChange");
        assert_eq!(value["featureId"], "f1");
        assert_eq!(value["oldEnd"], 90);
        assert!(value.get("changes").is_none());
        assert_eq!(Change::from_json(value).unwrap(), change);
    }

    #[test]
    fn test_multi_edit_serializes_changes_array() {
        let change = end_change(
            vec![end_edit("f1", 90, 95), end_edit("f2", 10, 20)],
            vec!["f1".to_string(), "f2".to_string()],
        );
        let value = change.to_json();
        assert_eq!(value["changes"].as_array().unwrap().len(), 2);
        assert!(value.get("featureId").is_none());
        assert_eq!(Change::from_json(value).unwrap(), change);
    }

    #[test]
    fn test_unknown_change_type_rejected() {
        let value = json!({ "typeName": "FrobnicateChange", "assembly": "asm1" });
        assert!(matches!(
            Change::from_json(value),
            Err(ChangeError::UnknownChangeType(tag)) if tag == "FrobnicateChange"
        ));
        assert!(matches!(
            Change::from_json(json!({ "assembly": "asm1" })),
            Err(ChangeError::Malformed(_))
        ));
    }

    #[test]
    fn test_inverse_reverses_batch_and_ids() {
        let change = end_change(
            vec![end_edit("f1", 90, 95), end_edit("f2", 10, 20)],
            vec!["f1".to_string(), "f2".to_string()],
        );
        let inverse = change.inverse();
        let Change::LocationEndChange(inner) = &inverse else {
            panic!("inverse keeps the concrete type");
        };
        assert_eq!(inner.changed_ids, vec!["f2".to_string(), "f1".to_string()]);
        assert_eq!(inner.changes.0[0], end_edit("f2", 20, 10));
        assert_eq!(inner.changes.0[1], end_edit("f1", 95, 90));
        // Undoing the undo is the forward change again.
        assert_eq!(inverse.inverse(), change);
    }

    #[test]
    fn test_change_log_ordering() {
        let a = end_change(vec![end_edit("f1", 90, 95)], vec!["f1".to_string()]);
        let b = end_change(vec![end_edit("f2", 10, 20)], vec!["f2".to_string()]);
        let mut log = ChangeLog::new();
        log.record(a.clone());
        log.record(b.clone());

        assert_eq!(log.undo().unwrap(), b.inverse());
        assert_eq!(log.undo().unwrap(), a.inverse());
        assert!(log.undo().is_none());

        assert_eq!(log.redo().unwrap(), a);
        assert_eq!(log.redo().unwrap(), b);
        assert!(log.redo().is_none());

        // Recording after an undo clears the redo stack.
        log.undo();
        log.record(a.clone());
        assert!(log.redo().is_none());
    }

    #[test]
    fn test_registered_extra_tag_decodes() {
        register_change_type(
            "RenamedEndChange",
            Arc::new(|mut value| {
                value["typeName"] = serde_json::Value::from("LocationEndChange");
                serde_json::from_value(value).map_err(|e| ChangeError::Malformed(e.to_string()))
            }),
        );
        let value = json!({
            "typeName": "RenamedEndChange",
            "assembly": "asm1",
            "changedIds": ["f1"],
            "featureId": "f1",
            "oldEnd": 90,
            "newEnd": 95,
        });
        let change = Change::from_json(value).unwrap();
        assert_eq!(change.type_name(), "LocationEndChange");
    }

    #[test]
    fn test_transform_hook_runs_on_server_path_only() {
        use crate::backend::{ClientTree, MemoryRecordSession, ServerBackend};
        use crate::changes::discontinuous::{DiscontinuousEndEdit, DiscontinuousLocationEndChange};
        use crate::feature::{Feature, SubLocation};

        register_transform_hook("DiscontinuousLocationEndChange-transformResults", |result| {
            result.changed_ids.push("post-processed".to_string());
        });

        let mut cds = Feature::new("chr1", "CDS", 0, 30).unwrap();
        cds.set_discontinuous_locations(vec![
            SubLocation { start: 0, end: 10 },
            SubLocation { start: 20, end: 30 },
        ]);
        let cds_id = cds.id().clone();
        let change = Change::DiscontinuousLocationEndChange(DiscontinuousLocationEndChange {
            assembly: "asm1".to_string(),
            changed_ids: vec![cds_id.clone()],
            changes: ChangeBatch::single(DiscontinuousEndEdit {
                feature_id: cds_id.clone(),
                index: 1,
                old_end: 30,
                new_end: 27,
            }),
        });

        let mut session = MemoryRecordSession::new();
        session.insert_feature(cds.clone());
        let mut server = Backend::Server(ServerBackend::new(Box::new(session), "alice"));
        let result = change.execute(&mut server).unwrap();
        assert!(result.changed_ids.contains(&"post-processed".to_string()));

        // The hook is a server-side post-processing step; the client path
        // returns the result untouched.
        let mut tree = ClientTree::new();
        tree.add_feature(cds, None).unwrap();
        let mut client = Backend::Client(tree);
        let result = change.execute(&mut client).unwrap();
        assert_eq!(result.changed_ids, vec![cds_id]);
    }
}
