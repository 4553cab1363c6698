//! Graph diff variants and the handler they are applied to.
//!
//! Arc diffs name the source object, the relationship and the target. A to-one
//! reassignment is recorded as an `ArcDelete` of the old target followed by an
//! `ArcCreate` of the new one, so every variant has an exact inverse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pcx_types::ObjectId;

/// Target of diff application.
///
/// Every method defaults to a no-op so handlers only implement the events
/// they care about.
pub trait GraphChangeHandler {
    type Error;

    fn node_created(&mut self, _id: &ObjectId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn node_removed(&mut self, _id: &ObjectId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn node_property_changed(
        &mut self,
        _id: &ObjectId,
        _property: &str,
        _old: &Value,
        _new: &Value,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn arc_created(
        &mut self,
        _id: &ObjectId,
        _target: &ObjectId,
        _arc: &str,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn arc_deleted(
        &mut self,
        _id: &ObjectId,
        _target: &ObjectId,
        _arc: &str,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn node_id_changed(&mut self, _id: &ObjectId, _new_id: &ObjectId) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One graph mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphDiff {
    /// A new object was registered.
    CreateNode { id: ObjectId },
    /// An object was scheduled for deletion.
    DeleteNode { id: ObjectId },
    /// An attribute value changed from `old` to `new`.
    SetAttribute {
        id: ObjectId,
        property: String,
        old: Value,
        new: Value,
    },
    /// `target` was added to relationship `arc` of `id`.
    ArcCreate {
        id: ObjectId,
        target: ObjectId,
        arc: String,
    },
    /// `target` was removed from relationship `arc` of `id`.
    ArcDelete {
        id: ObjectId,
        target: ObjectId,
        arc: String,
    },
    /// A temporary identifier was replaced by a permanent one.
    IdChange { id: ObjectId, new_id: ObjectId },
    /// An ordered group of diffs.
    Compound(CompoundDiff),
}

impl GraphDiff {
    /// An empty compound diff.
    pub fn empty() -> Self {
        Self::Compound(CompoundDiff::new())
    }

    /// Returns `true` if applying this diff changes nothing.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::SetAttribute { old, new, .. } => old == new,
            Self::IdChange { id, new_id } => id == new_id,
            Self::Compound(compound) => compound.is_noop(),
            _ => false,
        }
    }

    /// The object an atomic diff is about. `None` for compounds.
    pub fn subject(&self) -> Option<&ObjectId> {
        match self {
            Self::CreateNode { id }
            | Self::DeleteNode { id }
            | Self::SetAttribute { id, .. }
            | Self::ArcCreate { id, .. }
            | Self::ArcDelete { id, .. }
            | Self::IdChange { id, .. } => Some(id),
            Self::Compound(_) => None,
        }
    }

    /// Returns `true` if `id` is the subject or arc target of this diff (or of
    /// any diff nested in it).
    pub fn references(&self, id: &ObjectId) -> bool {
        match self {
            Self::ArcCreate {
                id: source, target, ..
            }
            | Self::ArcDelete {
                id: source, target, ..
            } => source == id || target == id,
            Self::IdChange { id: old, new_id } => old == id || new_id == id,
            Self::Compound(compound) => compound.references(id),
            other => other.subject() == Some(id),
        }
    }

    /// Rewrite every occurrence of `old` (subject or arc target) to `new`.
    pub fn replace_id(&mut self, old: &ObjectId, new: &ObjectId) {
        let swap = |id: &mut ObjectId| {
            if id == old {
                *id = new.clone();
            }
        };
        match self {
            Self::CreateNode { id } | Self::DeleteNode { id } | Self::SetAttribute { id, .. } => swap(id),
            Self::ArcCreate { id, target, .. } | Self::ArcDelete { id, target, .. } => {
                swap(id);
                swap(target);
            }
            Self::IdChange { id, new_id } => {
                swap(id);
                swap(new_id);
            }
            Self::Compound(compound) => {
                for diff in &mut compound.diffs {
                    diff.replace_id(old, new);
                }
            }
        }
    }

    /// Number of atomic diffs.
    pub fn atomic_len(&self) -> usize {
        match self {
            Self::Compound(compound) => compound.diffs.iter().map(GraphDiff::atomic_len).sum(),
            _ => 1,
        }
    }

    /// Append the atomic diffs of this diff to `out`, in replay order.
    pub fn flatten_into(self, out: &mut Vec<GraphDiff>) {
        match self {
            Self::Compound(compound) => {
                for diff in compound.diffs {
                    diff.flatten_into(out);
                }
            }
            atomic => out.push(atomic),
        }
    }

    /// The diff that reverses this one.
    pub fn inverse(&self) -> GraphDiff {
        match self {
            Self::CreateNode { id } => Self::DeleteNode { id: id.clone() },
            Self::DeleteNode { id } => Self::CreateNode { id: id.clone() },
            Self::SetAttribute {
                id,
                property,
                old,
                new,
            } => Self::SetAttribute {
                id: id.clone(),
                property: property.clone(),
                old: new.clone(),
                new: old.clone(),
            },
            Self::ArcCreate { id, target, arc } => Self::ArcDelete {
                id: id.clone(),
                target: target.clone(),
                arc: arc.clone(),
            },
            Self::ArcDelete { id, target, arc } => Self::ArcCreate {
                id: id.clone(),
                target: target.clone(),
                arc: arc.clone(),
            },
            Self::IdChange { id, new_id } => Self::IdChange {
                id: new_id.clone(),
                new_id: id.clone(),
            },
            Self::Compound(compound) => Self::Compound(CompoundDiff {
                diffs: compound.diffs.iter().rev().map(GraphDiff::inverse).collect(),
            }),
        }
    }

    /// Replay this diff forward against `handler`.
    pub fn apply<H: GraphChangeHandler + ?Sized>(&self, handler: &mut H) -> Result<(), H::Error> {
        match self {
            Self::CreateNode { id } => handler.node_created(id),
            Self::DeleteNode { id } => handler.node_removed(id),
            Self::SetAttribute {
                id,
                property,
                old,
                new,
            } => handler.node_property_changed(id, property, old, new),
            Self::ArcCreate { id, target, arc } => handler.arc_created(id, target, arc),
            Self::ArcDelete { id, target, arc } => handler.arc_deleted(id, target, arc),
            Self::IdChange { id, new_id } => handler.node_id_changed(id, new_id),
            Self::Compound(compound) => compound.apply(handler),
        }
    }

    /// Reverse this diff against `handler`.
    pub fn undo<H: GraphChangeHandler + ?Sized>(&self, handler: &mut H) -> Result<(), H::Error> {
        match self {
            Self::CreateNode { id } => handler.node_removed(id),
            Self::DeleteNode { id } => handler.node_created(id),
            Self::SetAttribute {
                id,
                property,
                old,
                new,
            } => handler.node_property_changed(id, property, new, old),
            Self::ArcCreate { id, target, arc } => handler.arc_deleted(id, target, arc),
            Self::ArcDelete { id, target, arc } => handler.arc_created(id, target, arc),
            Self::IdChange { id, new_id } => handler.node_id_changed(new_id, id),
            Self::Compound(compound) => compound.undo(handler),
        }
    }
}

impl From<CompoundDiff> for GraphDiff {
    fn from(compound: CompoundDiff) -> Self {
        Self::Compound(compound)
    }
}

/// An ordered list of diffs, replayed in order and undone in reverse.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundDiff {
    pub diffs: Vec<GraphDiff>,
}

impl CompoundDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_diffs(diffs: Vec<GraphDiff>) -> Self {
        Self { diffs }
    }

    pub fn push(&mut self, diff: GraphDiff) {
        self.diffs.push(diff);
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.diffs.iter().all(GraphDiff::is_noop)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GraphDiff> {
        self.diffs.iter()
    }

    pub fn references(&self, id: &ObjectId) -> bool {
        self.diffs.iter().any(|diff| diff.references(id))
    }

    pub fn apply<H: GraphChangeHandler + ?Sized>(&self, handler: &mut H) -> Result<(), H::Error> {
        for diff in &self.diffs {
            diff.apply(handler)?;
        }
        Ok(())
    }

    pub fn undo<H: GraphChangeHandler + ?Sized>(&self, handler: &mut H) -> Result<(), H::Error> {
        for diff in self.diffs.iter().rev() {
            diff.undo(handler)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CompoundDiff {
    type Item = &'a GraphDiff;
    type IntoIter = std::slice::Iter<'a, GraphDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.diffs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    /// A tiny graph: node set, attribute map and arc set.
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Graph {
        nodes: BTreeSet<ObjectId>,
        attributes: BTreeMap<(ObjectId, String), Value>,
        arcs: BTreeSet<(ObjectId, String, ObjectId)>,
    }

    impl GraphChangeHandler for Graph {
        type Error = String;

        fn node_created(&mut self, id: &ObjectId) -> Result<(), String> {
            self.nodes.insert(id.clone());
            Ok(())
        }

        fn node_removed(&mut self, id: &ObjectId) -> Result<(), String> {
            self.nodes.remove(id);
            Ok(())
        }

        fn node_property_changed(
            &mut self,
            id: &ObjectId,
            property: &str,
            _old: &Value,
            new: &Value,
        ) -> Result<(), String> {
            let key = (id.clone(), property.to_string());
            if new.is_null() {
                self.attributes.remove(&key);
            } else {
                self.attributes.insert(key, new.clone());
            }
            Ok(())
        }

        fn arc_created(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> Result<(), String> {
            self.arcs.insert((id.clone(), arc.to_string(), target.clone()));
            Ok(())
        }

        fn arc_deleted(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> Result<(), String> {
            self.arcs.remove(&(id.clone(), arc.to_string(), target.clone()));
            Ok(())
        }
    }

    fn artist(n: i64) -> ObjectId {
        ObjectId::single("Artist", "ARTIST_ID", n)
    }

    fn painting(n: i64) -> ObjectId {
        ObjectId::single("Painting", "PAINTING_ID", n)
    }

    fn sample() -> CompoundDiff {
        CompoundDiff::from_diffs(vec![
            GraphDiff::CreateNode { id: artist(1) },
            GraphDiff::SetAttribute {
                id: artist(1),
                property: "name".into(),
                old: Value::Null,
                new: json!("Monet"),
            },
            GraphDiff::CreateNode { id: painting(1) },
            GraphDiff::ArcCreate {
                id: painting(1),
                target: artist(1),
                arc: "artist".into(),
            },
        ])
    }

    #[test]
    fn apply_replays_in_order() {
        let mut graph = Graph::default();
        sample().apply(&mut graph).unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(
            graph.attributes.get(&(artist(1), "name".to_string())),
            Some(&json!("Monet"))
        );
        assert!(graph
            .arcs
            .contains(&(painting(1), "artist".to_string(), artist(1))));
    }

    #[test]
    fn undo_restores_previous_graph() {
        let mut graph = Graph::default();
        graph.nodes.insert(artist(9));
        let before = graph.clone();

        let diff = GraphDiff::from(sample());
        diff.apply(&mut graph).unwrap();
        diff.undo(&mut graph).unwrap();
        assert_eq!(graph, before);
    }

    #[test]
    fn inverse_applied_equals_undo() {
        let diff = GraphDiff::from(sample());
        let mut a = Graph::default();
        let mut b = Graph::default();
        diff.apply(&mut a).unwrap();
        diff.apply(&mut b).unwrap();

        diff.undo(&mut a).unwrap();
        diff.inverse().apply(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn replace_id_rewrites_subjects_and_targets() {
        let mut diff = GraphDiff::from(sample());
        diff.replace_id(&artist(1), &artist(42));

        assert!(!diff.references(&artist(1)));
        assert!(diff.references(&artist(42)));
        assert!(diff.references(&painting(1)));
    }

    #[test]
    fn noop_detection() {
        let same = GraphDiff::SetAttribute {
            id: artist(1),
            property: "name".into(),
            old: json!("a"),
            new: json!("a"),
        };
        assert!(same.is_noop());
        assert!(GraphDiff::empty().is_noop());
        assert!(!GraphDiff::CreateNode { id: artist(1) }.is_noop());
        assert!(GraphDiff::from(CompoundDiff::from_diffs(vec![same])).is_noop());
    }

    #[test]
    fn references_include_arc_targets() {
        let diff = GraphDiff::from(sample());
        assert!(diff.references(&artist(1)));
        assert!(diff.references(&painting(1)));
        assert!(!diff.references(&artist(2)));

        let id_change = GraphDiff::IdChange {
            id: ObjectId::temporary("Artist"),
            new_id: artist(5),
        };
        assert!(id_change.references(&artist(5)));
    }

    #[test]
    fn flatten_nested_compounds() {
        let nested = GraphDiff::from(CompoundDiff::from_diffs(vec![
            GraphDiff::from(sample()),
            GraphDiff::DeleteNode { id: artist(2) },
        ]));
        assert_eq!(nested.atomic_len(), 5);

        let mut out = Vec::new();
        nested.flatten_into(&mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(out[4], GraphDiff::DeleteNode { id: artist(2) });
    }

    #[test]
    fn handler_error_stops_replay() {
        struct Failing(usize);
        impl GraphChangeHandler for Failing {
            type Error = &'static str;
            fn node_created(&mut self, _id: &ObjectId) -> Result<(), Self::Error> {
                self.0 += 1;
                Err("boom")
            }
        }

        let mut handler = Failing(0);
        assert_eq!(sample().apply(&mut handler), Err("boom"));
        assert_eq!(handler.0, 1);
    }

    #[test]
    fn serde_tagging() {
        let diff = GraphDiff::CreateNode { id: artist(3) };
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["op"], "create_node");
        let parsed: GraphDiff = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, diff);
    }
}
