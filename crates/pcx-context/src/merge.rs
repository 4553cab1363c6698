//! Diff handlers that fold foreign changes into a context's graph.
//!
//! [`ChildDiffLoader`] replays a child's flushed changes as recorded edits of
//! the parent. [`PeerMerge`] applies changes committed by another context on
//! the same upstream channel, leaving local edits alone.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use pcx_diff::{GraphChangeHandler, GraphDiff};
use pcx_map::Property;
use pcx_types::{ObjectId, ObjectValues, PersistenceState};

use crate::context::Context;
use crate::error::{ContextError, ContextResult};
use crate::identity_map::{ChangeMode, IdentityMap};
use crate::object::PersistentObject;

/// Replays a child's diff into the parent graph as record-only changes.
///
/// Objects the parent has never seen become hollow placeholders, and are
/// faulted before their values are touched.
pub(crate) struct ChildDiffLoader<'a> {
    context: &'a Context,
    map: &'a mut IdentityMap,
}

impl<'a> ChildDiffLoader<'a> {
    pub(crate) fn new(context: &'a Context, map: &'a mut IdentityMap) -> Self {
        Self { context, map }
    }

    fn loaded(&mut self, id: &ObjectId) -> ContextResult<Arc<PersistentObject>> {
        let object = self.context.local_object_locked(self.map, id, None)?;
        if object.persistence_state() == PersistenceState::Hollow {
            self.context.resolve_fault(&object)?;
        }
        Ok(object)
    }

    fn loaded_relationship(
        &mut self,
        id: &ObjectId,
        arc: &str,
    ) -> ContextResult<Arc<PersistentObject>> {
        let object = self.loaded(id)?;
        self.context.load_to_many_locked(self.map, &object, arc)?;
        Ok(object)
    }
}

impl GraphChangeHandler for ChildDiffLoader<'_> {
    type Error = ContextError;

    fn node_created(&mut self, id: &ObjectId) -> ContextResult<()> {
        if self.map.contains(id) {
            return Ok(());
        }
        let class = self.map.class_for(id.entity())?;
        let mut values = ObjectValues::new();
        for property in class.properties() {
            if let Property::ToMany(p) = property {
                p.load(&mut values, Vec::new());
            }
        }
        let object = Arc::new(PersistentObject::from_parts(
            id.clone(),
            PersistenceState::New,
            values,
            self.context.weak_self(),
        ));
        self.map.register(object)?;
        self.map
            .record(GraphDiff::CreateNode { id: id.clone() }, ChangeMode::RecordOnly);
        Ok(())
    }

    fn node_removed(&mut self, id: &ObjectId) -> ContextResult<()> {
        let object = self.context.local_object_locked(self.map, id, None)?;
        match object.persistence_state() {
            PersistenceState::New => self.map.evict(id),
            PersistenceState::Deleted | PersistenceState::Transient => {}
            _ => {
                object.lock().state = PersistenceState::Deleted;
                self.map
                    .record(GraphDiff::DeleteNode { id: id.clone() }, ChangeMode::RecordOnly);
            }
        }
        Ok(())
    }

    fn node_property_changed(
        &mut self,
        id: &ObjectId,
        property: &str,
        _old: &Value,
        new: &Value,
    ) -> ContextResult<()> {
        let object = self.loaded(id)?;
        self.map
            .set_attribute(&object, property, new.clone(), ChangeMode::RecordOnly)?;
        Ok(())
    }

    fn arc_created(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        let object = self.loaded_relationship(id, arc)?;
        self.map.link(&object, arc, target, ChangeMode::RecordOnly)
    }

    fn arc_deleted(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        let object = self.loaded_relationship(id, arc)?;
        self.map.unlink(&object, arc, target, ChangeMode::RecordOnly)
    }

    fn node_id_changed(&mut self, id: &ObjectId, new_id: &ObjectId) -> ContextResult<()> {
        self.map.rekey(id, new_id)
    }
}

/// Applies a peer's committed changes without recording them.
///
/// Committed objects take every change. Modified objects take changes to
/// properties they have not edited locally. Hollow, new and deleted objects
/// ignore value changes.
pub(crate) struct PeerMerge<'a> {
    map: &'a mut IdentityMap,
    merged: usize,
}

impl<'a> PeerMerge<'a> {
    pub(crate) fn new(map: &'a mut IdentityMap) -> Self {
        Self { map, merged: 0 }
    }

    /// Number of diffs that changed the local graph.
    pub(crate) fn merged(&self) -> usize {
        self.merged
    }

    fn accepts(&self, id: &ObjectId, property: &str) -> bool {
        match self.map.get(id).map(|object| object.persistence_state()) {
            Some(PersistenceState::Committed) => true,
            Some(PersistenceState::Modified) => !self.map.has_local_change(id, property),
            _ => false,
        }
    }
}

impl GraphChangeHandler for PeerMerge<'_> {
    type Error = ContextError;

    fn node_removed(&mut self, id: &ObjectId) -> ContextResult<()> {
        let Some(state) = self.map.get(id).map(|object| object.persistence_state()) else {
            return Ok(());
        };
        match state {
            PersistenceState::Hollow | PersistenceState::Committed | PersistenceState::Deleted => {
                self.map.evict(id);
                debug!(%id, "object deleted by peer evicted");
            }
            PersistenceState::Modified => self.map.resurrect(id),
            PersistenceState::New | PersistenceState::Transient => return Ok(()),
        }
        self.merged += 1;
        Ok(())
    }

    fn node_property_changed(
        &mut self,
        id: &ObjectId,
        property: &str,
        _old: &Value,
        new: &Value,
    ) -> ContextResult<()> {
        if self.accepts(id, property) {
            self.map.apply_attribute(id, property, new.clone());
            self.merged += 1;
        }
        Ok(())
    }

    fn arc_created(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        if self.accepts(id, arc) {
            self.map.apply_arc(id, arc, target, true)?;
            self.merged += 1;
        }
        Ok(())
    }

    fn arc_deleted(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        if self.accepts(id, arc) {
            self.map.apply_arc(id, arc, target, false)?;
            self.merged += 1;
        }
        Ok(())
    }

    fn node_id_changed(&mut self, id: &ObjectId, new_id: &ObjectId) -> ContextResult<()> {
        let registered = self.map.contains(id);
        self.map.rekey(id, new_id)?;
        if registered {
            self.merged += 1;
        }
        Ok(())
    }
}
