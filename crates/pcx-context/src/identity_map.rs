//! The object graph owned by one context.
//!
//! The [`IdentityMap`] holds at most one object per identifier, the change
//! log of uncommitted edits, and the commit phase. All graph mutation goes
//! through the primitives here so that value edits, change recording and
//! reverse-relationship bookkeeping stay in step.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::debug;

use pcx_diff::{ChangeLog, CompoundDiff, GraphChangeHandler, GraphDiff};
use pcx_event::{EventSubject, EventTopic};
use pcx_map::{ClassDescriptor, EntityResolver, Property};
use pcx_types::{ChannelId, ObjectId, ObjectValues, PersistenceState};

use crate::error::{ContextError, ContextResult};
use crate::object::{ObjectData, PersistentObject};

pub(crate) const FLUSH_MARKER: &str = "flush";
pub(crate) const COMMIT_MARKER: &str = "commit";
pub(crate) const MERGE_MARKER: &str = "merge";

/// How a mutation primitive treats the change it makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChangeMode {
    /// User edit: recorded, marks the object modified, maintains reverse
    /// arcs and emits a change event.
    Tracked,
    /// Merged child change: recorded and marks the object modified. The
    /// diff already carries both sides of every arc.
    RecordOnly,
    /// Upstream or replayed change: values only.
    Untracked,
}

impl ChangeMode {
    fn records(self) -> bool {
        !matches!(self, Self::Untracked)
    }
}

/// Where the context is in the commit protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitPhase {
    Idle,
    Started,
    Committed,
    Aborted,
}

/// An event queued while the graph lock is held.
#[derive(Clone, Debug)]
pub(crate) struct PendingEvent {
    pub(crate) subject: EventSubject,
    pub(crate) topic: EventTopic,
    pub(crate) posted_by: ChannelId,
    pub(crate) diff: GraphDiff,
}

/// Registered objects plus the log of uncommitted changes.
pub struct IdentityMap {
    owner: ChannelId,
    resolver: Arc<EntityResolver>,
    nodes: HashMap<ObjectId, Arc<PersistentObject>>,
    change_log: ChangeLog,
    phase: CommitPhase,
    change_events: bool,
    outbox: Vec<PendingEvent>,
}

impl IdentityMap {
    pub fn new(owner: ChannelId, resolver: Arc<EntityResolver>) -> Self {
        let mut change_log = ChangeLog::new();
        change_log.mark(FLUSH_MARKER);
        Self {
            owner,
            resolver,
            nodes: HashMap::new(),
            change_log,
            phase: CommitPhase::Idle,
            change_events: false,
            outbox: Vec::new(),
        }
    }

    pub(crate) fn set_change_events(&mut self, enabled: bool) {
        self.change_events = enabled;
    }

    /// Channel id of the owning context.
    pub fn owner(&self) -> ChannelId {
        self.owner
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    /// Register `object` under its current identifier. Registering the same
    /// handle twice is a no-op; a different handle with an equal identifier
    /// is rejected.
    pub fn register(&mut self, object: Arc<PersistentObject>) -> ContextResult<()> {
        let id = object.object_id();
        if let Some(existing) = self.nodes.get(&id) {
            if Arc::ptr_eq(existing, &object) {
                return Ok(());
            }
            return Err(ContextError::DuplicateRegistration(id));
        }
        self.nodes.insert(id, object);
        Ok(())
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<PersistentObject>> {
        self.nodes.get(id).cloned()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every registered object, ordered by identifier.
    pub fn objects(&self) -> Vec<Arc<PersistentObject>> {
        self.collect(|_| true)
    }

    /// Drop the registration for `id` and detach the object, which becomes
    /// transient.
    pub fn unregister(&mut self, id: &ObjectId) -> Option<Arc<PersistentObject>> {
        let object = self.nodes.remove(id)?;
        {
            let mut data = object.lock();
            data.state = PersistenceState::Transient;
            data.context = Weak::new();
        }
        Some(object)
    }

    /// New, modified and deleted objects, ordered by identifier.
    pub fn dirty_nodes(&self) -> Vec<Arc<PersistentObject>> {
        self.collect(|state| state.is_dirty())
    }

    pub fn dirty_nodes_in(&self, state: PersistenceState) -> Vec<Arc<PersistentObject>> {
        self.collect(|s| s == state)
    }

    fn collect(&self, keep: impl Fn(PersistenceState) -> bool) -> Vec<Arc<PersistentObject>> {
        let mut found: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, object)| keep(object.persistence_state()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));
        found.into_iter().map(|(_, object)| Arc::clone(object)).collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.change_log.is_empty()
            || self
                .nodes
                .values()
                .any(|object| object.persistence_state().is_dirty())
    }

    /// Snapshot of the diffs recorded since the last commit or rollback.
    pub fn diffs_since_last_flush(&self) -> ContextResult<CompoundDiff> {
        Ok(self.change_log.diffs_since(FLUSH_MARKER)?)
    }

    /// Returns `true` if an uncommitted diff touches `property` of `id`.
    pub fn has_local_change(&self, id: &ObjectId, property: &str) -> bool {
        self.change_log.diffs().iter().any(|diff| match diff {
            GraphDiff::SetAttribute {
                id: subject,
                property: name,
                ..
            } => subject == id && name == property,
            GraphDiff::ArcCreate {
                id: subject, arc, ..
            }
            | GraphDiff::ArcDelete {
                id: subject, arc, ..
            } => subject == id && arc == property,
            _ => false,
        })
    }

    pub fn commit_started(&mut self) {
        self.phase = CommitPhase::Started;
        self.change_log.mark(COMMIT_MARKER);
    }

    pub fn commit_aborted(&mut self) {
        self.phase = CommitPhase::Aborted;
    }

    /// Fold the upstream result into the graph and make every dirty object
    /// clean. Deleted objects are evicted.
    pub fn commit_succeeded(&mut self, result: &GraphDiff) -> ContextResult<()> {
        result.apply(&mut Replay { map: self })?;

        let mut evicted = Vec::new();
        for (id, object) in &self.nodes {
            let mut data = object.lock();
            match data.state {
                PersistenceState::New | PersistenceState::Modified => {
                    data.state = PersistenceState::Committed;
                }
                PersistenceState::Deleted => evicted.push(id.clone()),
                _ => {}
            }
        }
        for id in &evicted {
            self.unregister(id);
            self.strip_references(id);
        }

        self.reset_log();
        self.phase = CommitPhase::Committed;
        debug!(context = %self.owner, evicted = evicted.len(), "commit folded");
        Ok(())
    }

    /// Undo every uncommitted change. New objects are evicted; modified and
    /// deleted objects return to committed. Returns the reverted diffs.
    pub fn reverted(&mut self) -> ContextResult<CompoundDiff> {
        let diffs = self.change_log.diffs();
        diffs.undo(&mut Replay { map: self })?;

        let mut evicted = Vec::new();
        for (id, object) in &self.nodes {
            let mut data = object.lock();
            match data.state {
                PersistenceState::New => evicted.push(id.clone()),
                PersistenceState::Modified | PersistenceState::Deleted => {
                    data.state = PersistenceState::Committed;
                }
                _ => {}
            }
        }
        for id in &evicted {
            self.unregister(id);
        }

        self.reset_log();
        self.phase = CommitPhase::Idle;
        debug!(context = %self.owner, diffs = diffs.len(), "graph reverted");
        Ok(diffs)
    }

    fn reset_log(&mut self) {
        self.change_log.reset();
        self.change_log.mark(FLUSH_MARKER);
    }

    pub(crate) fn mark_merge(&mut self) {
        self.change_log.mark(MERGE_MARKER);
    }

    /// Undo whatever was recorded since [`mark_merge`](Self::mark_merge).
    pub(crate) fn rollback_merge(&mut self) -> ContextResult<()> {
        let tail = self.change_log.rollback_to(MERGE_MARKER)?;
        tail.undo(&mut Replay { map: self })?;

        let remaining = self.change_log.diffs();
        for (id, object) in &self.nodes {
            let mut data = object.lock();
            let touched = matches!(
                data.state,
                PersistenceState::Modified | PersistenceState::Deleted
            );
            if touched && tail.references(id) && !remaining.references(id) {
                data.state = PersistenceState::Committed;
            }
        }
        debug!(context = %self.owner, diffs = tail.len(), "partial merge undone");
        Ok(())
    }

    pub(crate) fn push_event(
        &mut self,
        subject: EventSubject,
        topic: EventTopic,
        posted_by: ChannelId,
        diff: GraphDiff,
    ) {
        self.outbox.push(PendingEvent {
            subject,
            topic,
            posted_by,
            diff,
        });
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn class_for(&self, entity: &str) -> ContextResult<Arc<ClassDescriptor>> {
        Ok(self.resolver.class_descriptor(entity)?)
    }

    pub(crate) fn record(&mut self, diff: GraphDiff, mode: ChangeMode) {
        if !mode.records() {
            return;
        }
        if mode == ChangeMode::Tracked && self.change_events {
            self.push_event(
                EventSubject::Graph(self.owner),
                EventTopic::Changed,
                self.owner,
                diff.clone(),
            );
        }
        self.change_log.record(diff);
    }

    /// Set an attribute. Returns `true` if the stored value changed.
    pub(crate) fn set_attribute(
        &mut self,
        object: &Arc<PersistentObject>,
        property: &str,
        value: Value,
        mode: ChangeMode,
    ) -> ContextResult<bool> {
        let (id, old) = {
            let mut data = object.lock();
            let old = data.values.set_attribute(property, value.clone());
            if old == value {
                return Ok(false);
            }
            if mode.records() {
                mark_modified(&mut data);
            }
            (data.id.clone(), old)
        };
        self.record(
            GraphDiff::SetAttribute {
                id,
                property: property.to_string(),
                old,
                new: value,
            },
            mode,
        );
        Ok(true)
    }

    /// Add an arc from `object` to `target`. Tracked links also link the
    /// reverse side and unlink a displaced to-one target.
    pub(crate) fn link(
        &mut self,
        object: &Arc<PersistentObject>,
        relationship: &str,
        target: &ObjectId,
        mode: ChangeMode,
    ) -> ContextResult<()> {
        self.link_arc(object, relationship, target, mode, mode == ChangeMode::Tracked)
    }

    pub(crate) fn unlink(
        &mut self,
        object: &Arc<PersistentObject>,
        relationship: &str,
        target: &ObjectId,
        mode: ChangeMode,
    ) -> ContextResult<()> {
        self.unlink_arc(object, relationship, target, mode, mode == ChangeMode::Tracked)
    }

    fn link_arc(
        &mut self,
        object: &Arc<PersistentObject>,
        relationship: &str,
        target: &ObjectId,
        mode: ChangeMode,
        reverse: bool,
    ) -> ContextResult<()> {
        let class = self.class_for(&object.entity_name())?;
        let property = relationship_property(&class, relationship)?;

        if let Property::ToOne(p) = property {
            let current = p.target(&object.lock().values);
            match current {
                Some(current) if &current == target => return Ok(()),
                Some(displaced) if mode == ChangeMode::Tracked => {
                    self.unlink_arc(object, relationship, &displaced, mode, true)?;
                }
                _ => {}
            }
        }

        let (id, changed) = {
            let mut data = object.lock();
            let changed = write_arc(&mut data.values, property, target, true);
            if (changed || mode == ChangeMode::RecordOnly) && mode.records() {
                mark_modified(&mut data);
            }
            (data.id.clone(), changed)
        };
        if changed || mode == ChangeMode::RecordOnly {
            self.record(
                GraphDiff::ArcCreate {
                    id: id.clone(),
                    target: target.clone(),
                    arc: relationship.to_string(),
                },
                mode,
            );
        }

        if changed && reverse {
            if let Some(reverse_name) = property.relationship().and_then(|r| r.reverse.as_deref()) {
                if let Some(target_object) = self.reverse_side(target, reverse_name)? {
                    self.link_arc(&target_object, reverse_name, &id, ChangeMode::Tracked, false)?;
                }
            }
        }
        Ok(())
    }

    fn unlink_arc(
        &mut self,
        object: &Arc<PersistentObject>,
        relationship: &str,
        target: &ObjectId,
        mode: ChangeMode,
        reverse: bool,
    ) -> ContextResult<()> {
        let class = self.class_for(&object.entity_name())?;
        let property = relationship_property(&class, relationship)?;

        let (id, changed) = {
            let mut data = object.lock();
            let changed = write_arc(&mut data.values, property, target, false);
            if (changed || mode == ChangeMode::RecordOnly) && mode.records() {
                mark_modified(&mut data);
            }
            (data.id.clone(), changed)
        };
        if changed || mode == ChangeMode::RecordOnly {
            self.record(
                GraphDiff::ArcDelete {
                    id: id.clone(),
                    target: target.clone(),
                    arc: relationship.to_string(),
                },
                mode,
            );
        }

        if changed && reverse {
            if let Some(reverse_name) = property.relationship().and_then(|r| r.reverse.as_deref()) {
                if let Some(target_object) = self.reverse_side(target, reverse_name)? {
                    self.unlink_arc(&target_object, reverse_name, &id, ChangeMode::Tracked, false)?;
                }
            }
        }
        Ok(())
    }

    /// The registered target whose reverse relationship should follow an
    /// arc edit. Unregistered and hollow targets are skipped, as are
    /// to-many reverses that have not been loaded yet.
    fn reverse_side(
        &self,
        target: &ObjectId,
        reverse_name: &str,
    ) -> ContextResult<Option<Arc<PersistentObject>>> {
        let Some(target_object) = self.get(target) else {
            return Ok(None);
        };
        if target_object.persistence_state() == PersistenceState::Hollow {
            return Ok(None);
        }
        let class = self.class_for(target.entity())?;
        if let Property::ToMany(p) = relationship_property(&class, reverse_name)? {
            if !p.is_loaded(&target_object.lock().values) {
                return Ok(None);
            }
        }
        Ok(Some(target_object))
    }

    /// Write an attribute without recording. Hollow and unregistered
    /// objects are left alone.
    pub(crate) fn apply_attribute(&mut self, id: &ObjectId, property: &str, value: Value) {
        if let Some(object) = self.nodes.get(id) {
            let mut data = object.lock();
            if data.state != PersistenceState::Hollow {
                data.values.set_attribute(property, value);
            }
        }
    }

    /// Add or remove an arc without recording or reverse bookkeeping.
    pub(crate) fn apply_arc(
        &mut self,
        id: &ObjectId,
        arc: &str,
        target: &ObjectId,
        created: bool,
    ) -> ContextResult<()> {
        let Some(object) = self.get(id) else {
            return Ok(());
        };
        if object.persistence_state() == PersistenceState::Hollow {
            return Ok(());
        }
        let class = self.class_for(id.entity())?;
        let property = relationship_property(&class, arc)?;
        write_arc(&mut object.lock().values, property, target, created);
        Ok(())
    }

    /// Move a registration from `old` to `new`, rewriting every reference
    /// held by other objects and the change log. References are rewritten
    /// even when `old` itself is not registered here.
    pub(crate) fn rekey(&mut self, old: &ObjectId, new: &ObjectId) -> ContextResult<()> {
        if old == new {
            return Ok(());
        }
        if let Some(object) = self.nodes.remove(old) {
            if self.nodes.contains_key(new) {
                self.nodes.insert(old.clone(), object);
                return Err(ContextError::DuplicateRegistration(new.clone()));
            }
            object.lock().id = new.clone();
            self.nodes.insert(new.clone(), object);
        }
        for other in self.nodes.values() {
            other.lock().values.replace_reference(old, new);
        }
        self.change_log.replace_id(old, new);
        debug!(context = %self.owner, %old, %new, "identifier replaced");
        Ok(())
    }

    /// Remove `id` from the graph entirely: registration, log entries and
    /// references held by other objects.
    pub(crate) fn evict(&mut self, id: &ObjectId) {
        self.unregister(id);
        self.change_log.unregister(id);
        self.strip_references(id);
    }

    fn strip_references(&self, id: &ObjectId) {
        for object in self.nodes.values() {
            let mut data = object.lock();
            data.values.to_one.retain(|_, target| target.as_ref() != Some(id));
            for targets in data.values.to_many.values_mut() {
                targets.retain(|target| target != id);
            }
        }
    }

    /// Turn a modified object whose upstream row vanished into a new one,
    /// re-recording its current values as an insert.
    pub(crate) fn resurrect(&mut self, id: &ObjectId) {
        let Some(object) = self.get(id) else {
            return;
        };
        self.change_log.unregister(id);
        let values = {
            let mut data = object.lock();
            data.state = PersistenceState::New;
            data.values.clone()
        };

        self.change_log.record(GraphDiff::CreateNode { id: id.clone() });
        for diff in insert_diffs(id, values) {
            self.change_log.record(diff);
        }
        debug!(context = %self.owner, %id, "modified object re-inserted");
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("owner", &self.owner)
            .field("nodes", &self.nodes.len())
            .field("changes", &self.change_log.size())
            .field("phase", &self.phase)
            .finish()
    }
}

fn mark_modified(data: &mut ObjectData) {
    if data.state == PersistenceState::Committed {
        data.state = PersistenceState::Modified;
    }
}

fn relationship_property<'a>(class: &'a ClassDescriptor, name: &str) -> ContextResult<&'a Property> {
    let property = class.property(name)?;
    if property.is_relationship() {
        Ok(property)
    } else {
        Err(ContextError::PropertyKind {
            entity: class.entity_name().to_string(),
            property: name.to_string(),
            expected: "a relationship",
        })
    }
}

/// Raw arc edit on a value bag. Returns `true` if the values changed.
fn write_arc(values: &mut ObjectValues, property: &Property, target: &ObjectId, created: bool) -> bool {
    match property {
        Property::ToOne(p) => {
            let current = p.target(values);
            if created {
                if current.as_ref() == Some(target) {
                    return false;
                }
                p.set_target(values, Some(target.clone()));
                true
            } else if current.as_ref() == Some(target) {
                p.set_target(values, None);
                true
            } else {
                false
            }
        }
        Property::ToMany(p) => {
            if created {
                p.add_target(values, target)
            } else {
                p.remove_target(values, target)
            }
        }
        Property::Attribute(_) => false,
    }
}

/// Diffs that insert `values` for `id` from scratch.
pub(crate) fn insert_diffs(id: &ObjectId, values: ObjectValues) -> Vec<GraphDiff> {
    let mut diffs = Vec::new();
    for (property, value) in values.attributes {
        diffs.push(GraphDiff::SetAttribute {
            id: id.clone(),
            property,
            old: Value::Null,
            new: value,
        });
    }
    for (arc, target) in values.to_one {
        if let Some(target) = target {
            diffs.push(GraphDiff::ArcCreate {
                id: id.clone(),
                target,
                arc,
            });
        }
    }
    for (arc, targets) in values.to_many {
        for target in targets {
            diffs.push(GraphDiff::ArcCreate {
                id: id.clone(),
                target,
                arc: arc.clone(),
            });
        }
    }
    diffs
}

/// Untracked replay of diffs onto the graph, used to fold commit results
/// and to undo the change log.
struct Replay<'a> {
    map: &'a mut IdentityMap,
}

impl GraphChangeHandler for Replay<'_> {
    type Error = ContextError;

    fn node_removed(&mut self, id: &ObjectId) -> ContextResult<()> {
        if self
            .map
            .get(id)
            .is_some_and(|object| object.persistence_state() == PersistenceState::New)
        {
            self.map.unregister(id);
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
        self.map.apply_attribute(id, property, new.clone());
        Ok(())
    }

    fn arc_created(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        self.map.apply_arc(id, arc, target, true)
    }

    fn arc_deleted(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> ContextResult<()> {
        self.map.apply_arc(id, arc, target, false)
    }

    fn node_id_changed(&mut self, id: &ObjectId, new_id: &ObjectId) -> ContextResult<()> {
        self.map.rekey(id, new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcx_map::{EntityDescriptor, RelationshipDescriptor};
    use serde_json::json;

    fn resolver() -> Arc<EntityResolver> {
        Arc::new(
            EntityResolver::new()
                .with_entity(
                    EntityDescriptor::new("Artist")
                        .with_primary_key("ARTIST_ID")
                        .with_attribute("name")
                        .with_relationship(
                            RelationshipDescriptor::to_many("paintings", "Painting")
                                .with_reverse("artist"),
                        ),
                )
                .with_entity(
                    EntityDescriptor::new("Painting")
                        .with_primary_key("PAINTING_ID")
                        .with_attribute("title")
                        .with_relationship(
                            RelationshipDescriptor::to_one("artist", "Artist")
                                .with_reverse("paintings"),
                        ),
                ),
        )
    }

    fn committed(map: &mut IdentityMap, id: ObjectId, values: ObjectValues) -> Arc<PersistentObject> {
        let object = Arc::new(PersistentObject::from_parts(
            id,
            PersistenceState::Committed,
            values,
            Weak::new(),
        ));
        map.register(Arc::clone(&object)).unwrap();
        object
    }

    fn artist_values() -> ObjectValues {
        let mut values = ObjectValues::new().with_attribute("name", "Monet");
        values.to_many.insert("paintings".into(), Vec::new());
        values
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let id = ObjectId::single("Artist", "ARTIST_ID", 1);
        let first = committed(&mut map, id.clone(), ObjectValues::new());

        assert!(map.register(Arc::clone(&first)).is_ok());
        let twin = Arc::new(PersistentObject::from_parts(
            id,
            PersistenceState::Committed,
            ObjectValues::new(),
            Weak::new(),
        ));
        assert!(matches!(
            map.register(twin),
            Err(ContextError::DuplicateRegistration(_))
        ));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn tracked_attribute_marks_modified() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let id = ObjectId::single("Artist", "ARTIST_ID", 1);
        let artist = committed(&mut map, id.clone(), artist_values());

        assert!(!map
            .set_attribute(&artist, "name", json!("Monet"), ChangeMode::Tracked)
            .unwrap());
        assert!(!map.has_changes());

        assert!(map
            .set_attribute(&artist, "name", json!("Manet"), ChangeMode::Tracked)
            .unwrap());
        assert_eq!(artist.persistence_state(), PersistenceState::Modified);
        assert!(map.has_local_change(&id, "name"));
        assert_eq!(map.dirty_nodes().len(), 1);
    }

    #[test]
    fn tracked_link_maintains_reverse_side() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let a1 = committed(&mut map, ObjectId::single("Artist", "ARTIST_ID", 1), artist_values());
        let a2 = committed(&mut map, ObjectId::single("Artist", "ARTIST_ID", 2), artist_values());
        let painting = committed(
            &mut map,
            ObjectId::single("Painting", "PAINTING_ID", 1),
            ObjectValues::new(),
        );

        map.link(&painting, "artist", &a1.object_id(), ChangeMode::Tracked).unwrap();
        assert_eq!(a1.snapshot().to_many_targets("paintings").unwrap().len(), 1);

        map.link(&painting, "artist", &a2.object_id(), ChangeMode::Tracked).unwrap();
        assert!(a1.snapshot().to_many_targets("paintings").unwrap().is_empty());
        assert_eq!(
            a2.snapshot().to_many_targets("paintings").unwrap(),
            &[painting.object_id()]
        );
        assert_eq!(
            painting.snapshot().to_one_target("artist"),
            Some(&a2.object_id())
        );
    }

    #[test]
    fn reverse_skipped_for_unloaded_collection() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let artist = committed(
            &mut map,
            ObjectId::single("Artist", "ARTIST_ID", 1),
            ObjectValues::new(),
        );
        let painting = committed(
            &mut map,
            ObjectId::single("Painting", "PAINTING_ID", 1),
            ObjectValues::new(),
        );

        map.link(&painting, "artist", &artist.object_id(), ChangeMode::Tracked).unwrap();
        assert!(artist.snapshot().to_many_targets("paintings").is_none());
        assert_eq!(artist.persistence_state(), PersistenceState::Committed);
    }

    #[test]
    fn revert_restores_values_and_evicts_new() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let artist = committed(
            &mut map,
            ObjectId::single("Artist", "ARTIST_ID", 1),
            artist_values(),
        );
        let before = artist.snapshot();

        let fresh = Arc::new(PersistentObject::from_parts(
            ObjectId::temporary("Painting"),
            PersistenceState::New,
            ObjectValues::new(),
            Weak::new(),
        ));
        map.register(Arc::clone(&fresh)).unwrap();
        map.record(GraphDiff::CreateNode { id: fresh.object_id() }, ChangeMode::Tracked);
        map.link(&fresh, "artist", &artist.object_id(), ChangeMode::Tracked).unwrap();
        map.set_attribute(&artist, "name", json!("Manet"), ChangeMode::Tracked)
            .unwrap();

        let reverted = map.reverted().unwrap();
        assert_eq!(reverted.len(), 4);
        assert_eq!(artist.snapshot(), before);
        assert_eq!(artist.persistence_state(), PersistenceState::Committed);
        assert_eq!(fresh.persistence_state(), PersistenceState::Transient);
        assert!(!map.has_changes());
    }

    #[test]
    fn commit_folds_id_changes() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let temp = ObjectId::temporary("Artist");
        let artist = Arc::new(PersistentObject::from_parts(
            temp.clone(),
            PersistenceState::New,
            artist_values(),
            Weak::new(),
        ));
        map.register(Arc::clone(&artist)).unwrap();
        map.record(GraphDiff::CreateNode { id: temp.clone() }, ChangeMode::Tracked);
        map.commit_started();

        let permanent = ObjectId::single("Artist", "ARTIST_ID", 42);
        map.commit_succeeded(&GraphDiff::IdChange {
            id: temp.clone(),
            new_id: permanent.clone(),
        })
        .unwrap();

        assert_eq!(artist.object_id(), permanent);
        assert_eq!(artist.persistence_state(), PersistenceState::Committed);
        assert!(map.get(&temp).is_none());
        assert!(map.get(&permanent).is_some());
        assert_eq!(map.phase(), CommitPhase::Committed);
        assert!(!map.has_changes());
    }

    #[test]
    fn rekey_rewrites_references_to_unregistered_ids() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let temp = ObjectId::temporary("Painting");
        let mut values = artist_values();
        values.to_many.insert("paintings".into(), vec![temp.clone()]);
        let artist = committed(&mut map, ObjectId::single("Artist", "ARTIST_ID", 1), values);

        let permanent = ObjectId::single("Painting", "PAINTING_ID", 7);
        map.rekey(&temp, &permanent).unwrap();

        assert!(map.get(&permanent).is_none());
        assert_eq!(
            artist.snapshot().to_many_targets("paintings"),
            Some(&[permanent][..])
        );
    }

    #[test]
    fn merge_tail_can_be_undone() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let artist = committed(
            &mut map,
            ObjectId::single("Artist", "ARTIST_ID", 1),
            artist_values(),
        );
        map.set_attribute(&artist, "name", json!("A"), ChangeMode::Tracked)
            .unwrap();
        map.mark_merge();
        map.set_attribute(&artist, "name", json!("B"), ChangeMode::RecordOnly)
            .unwrap();

        map.rollback_merge().unwrap();
        assert_eq!(artist.peek_attribute("name"), json!("A"));
        assert_eq!(map.change_log().size(), 1);
    }

    #[test]
    fn resurrect_records_insert() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        let id = ObjectId::single("Artist", "ARTIST_ID", 1);
        let artist = committed(&mut map, id.clone(), artist_values());
        map.set_attribute(&artist, "name", json!("Manet"), ChangeMode::Tracked)
            .unwrap();

        map.resurrect(&id);
        assert_eq!(artist.persistence_state(), PersistenceState::New);
        let diffs = map.diffs_since_last_flush().unwrap();
        assert_eq!(diffs.diffs[0], GraphDiff::CreateNode { id: id.clone() });
        assert!(diffs.iter().any(|d| matches!(
            d,
            GraphDiff::SetAttribute { new, .. } if new == &json!("Manet")
        )));
    }

    #[test]
    fn change_events_queue_in_outbox() {
        let mut map = IdentityMap::new(ChannelId::new(), resolver());
        map.set_change_events(true);
        let artist = committed(
            &mut map,
            ObjectId::single("Artist", "ARTIST_ID", 1),
            artist_values(),
        );
        map.set_attribute(&artist, "name", json!("X"), ChangeMode::Tracked)
            .unwrap();
        map.set_attribute(&artist, "name", json!("Y"), ChangeMode::RecordOnly)
            .unwrap();

        let outbox = map.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].topic, EventTopic::Changed);
        assert!(map.take_outbox().is_empty());
    }
}
