//! The persistence context.
//!
//! A [`Context`] owns an [`IdentityMap`] and talks to exactly one upstream
//! [`DataChannel`]: a backing store, or a parent context. It is itself a
//! `DataChannel`, so contexts nest. Children flush into their parent; peers on
//! the same upstream learn about each other's commits through the upstream's
//! [`EventManager`].
//!
//! Locking: one mutex guards the graph. Object mutexes are only taken while
//! the graph mutex is held (or for single reads), one at a time. Events are
//! queued while the graph is locked and published after it is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use pcx_diff::{CompoundDiff, GraphDiff};
use pcx_event::{EventManager, EventSubject, EventTopic, GraphEvent};
use pcx_map::{DeleteRule, EntityResolver, Property, PropertyAccessor, PropertyValue};
use pcx_types::{ChannelId, DataRow, ObjectId, ObjectValues, PersistenceState};

use crate::bridge::PeerEventBridge;
use crate::channel::{DataChannel, Query, QueryResponse, SyncMode};
use crate::config::ContextConfig;
use crate::error::{ContextError, ContextResult};
use crate::identity_map::{ChangeMode, IdentityMap, PendingEvent};
use crate::merge::{ChildDiffLoader, PeerMerge};
use crate::object::PersistentObject;
use crate::validation::{MandatoryAttributeValidator, ObjectView, ValidationResult, Validator};

/// Values offered to [`Context::local_object`] for an object that may not
/// be registered yet.
pub(crate) struct Prototype<'a> {
    source: Option<&'a Arc<PersistentObject>>,
    state: PersistenceState,
    values: ObjectValues,
}

impl Prototype<'_> {
    fn row(values: ObjectValues) -> Self {
        Self {
            source: None,
            state: PersistenceState::Committed,
            values,
        }
    }
}

/// A unit of work over an object graph.
pub struct Context {
    id: ChannelId,
    self_ref: Weak<Context>,
    config: ContextConfig,
    resolver: Arc<EntityResolver>,
    events: Arc<EventManager>,
    graph: Mutex<IdentityMap>,
    channel: RwLock<Option<Arc<dyn DataChannel>>>,
    bridge: Mutex<Option<PeerEventBridge>>,
    validators: RwLock<Vec<Arc<dyn Validator>>>,
    user_properties: RwLock<HashMap<String, Value>>,
    inbox: Mutex<VecDeque<GraphEvent>>,
}

impl Context {
    /// A context on top of `channel`, with default configuration.
    pub fn new(channel: Arc<dyn DataChannel>) -> ContextResult<Arc<Self>> {
        Self::with_config(channel, ContextConfig::default())
    }

    pub fn with_config(
        channel: Arc<dyn DataChannel>,
        config: ContextConfig,
    ) -> ContextResult<Arc<Self>> {
        let resolver = channel
            .entity_resolver()
            .ok_or(ContextError::NoEntityResolver)?;
        let events = channel
            .event_manager()
            .unwrap_or_else(|| Arc::new(EventManager::new()));
        let context = Self::build(resolver, events, config);
        context.set_channel(Some(channel));
        Ok(context)
    }

    /// A context with no upstream channel. It can track changes and roll
    /// them back, but commits fail until a channel is set.
    pub fn detached(resolver: Arc<EntityResolver>, config: ContextConfig) -> Arc<Self> {
        Self::build(resolver, Arc::new(EventManager::new()), config)
    }

    fn build(
        resolver: Arc<EntityResolver>,
        events: Arc<EventManager>,
        config: ContextConfig,
    ) -> Arc<Self> {
        let id = ChannelId::new();
        let mut graph = IdentityMap::new(id, Arc::clone(&resolver));
        graph.set_change_events(config.change_events);
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(MandatoryAttributeValidator)];
        info!(context = %id, "context created");

        Arc::new_cyclic(|self_ref| Self {
            id,
            self_ref: self_ref.clone(),
            config,
            resolver,
            events,
            graph: Mutex::new(graph),
            channel: RwLock::new(None),
            bridge: Mutex::new(None),
            validators: RwLock::new(validators),
            user_properties: RwLock::new(HashMap::new()),
            inbox: Mutex::new(VecDeque::new()),
        })
    }

    /// A child context whose upstream is this context.
    pub fn create_child_context(&self) -> ContextResult<Arc<Context>> {
        self.create_child_context_with(self.config.child_config())
    }

    pub fn create_child_context_with(&self, config: ContextConfig) -> ContextResult<Arc<Context>> {
        let parent: Arc<dyn DataChannel> = self.self_ref.upgrade().ok_or(ContextError::Released)?;
        let child = Context::with_config(parent, config)?;
        debug!(parent = %self.id, child = %child.id, "child context created");
        Ok(child)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// The event manager this context publishes on. Shared with the
    /// upstream channel when it has one.
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the upstream channel. The old peer subscription is released
    /// and a new one attached if the new channel publishes events.
    pub fn set_channel(&self, channel: Option<Arc<dyn DataChannel>>) {
        let current = self.channel().map(|c| c.channel_id());
        let next = channel.as_ref().map(|c| c.channel_id());
        if current == next {
            return;
        }

        if let Some(old) = self.lock_bridge().take() {
            old.release();
        }
        let bridge = channel.as_ref().and_then(|upstream| {
            upstream.event_manager().map(|manager| {
                PeerEventBridge::attach(self.self_ref.clone(), self.id, upstream.channel_id(), manager)
            })
        });
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = channel;
        *self.lock_bridge() = bridge;
        info!(context = %self.id, upstream = ?next, "channel set");
    }

    /// Returns `true` while the context receives its upstream's events.
    pub fn has_peer_subscription(&self) -> bool {
        self.lock_bridge()
            .as_ref()
            .is_some_and(PeerEventBridge::is_active)
    }

    /// Stop receiving upstream events. Also run on drop.
    pub fn release(&self) {
        if let Some(bridge) = self.lock_bridge().take() {
            bridge.release();
        }
    }

    /// Add a validator run before every commit, after the built-in
    /// mandatory-attribute check.
    pub fn add_validator(&self, validator: Arc<dyn Validator>) {
        debug!(context = %self.id, validator = validator.name(), "validator added");
        self.validators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(validator);
    }

    // -- objects ---------------------------------------------------------

    /// Create and register a new object of `entity`.
    pub fn new_object(&self, entity: &str) -> ContextResult<Arc<PersistentObject>> {
        self.resolver.entity(entity)?;
        let object = PersistentObject::transient(entity);
        self.register_new(&object)?;
        Ok(object)
    }

    /// Register a transient object as new. Preset values are replayed as
    /// tracked edits.
    pub fn register_new(&self, object: &Arc<PersistentObject>) -> ContextResult<()> {
        let class = self.resolver.class_descriptor(&object.entity_name())?;
        {
            let data = object.lock();
            if data.state != PersistenceState::Transient {
                if std::ptr::eq(data.context.as_ptr(), self) {
                    return Ok(());
                }
                return Err(ContextError::ForeignObject(data.id.clone()));
            }
            let values = &data.values;
            for name in values
                .attributes
                .keys()
                .chain(values.to_one.keys())
                .chain(values.to_many.keys())
            {
                class.property(name)?;
            }
        }

        let mut graph = self.lock_graph();
        let result = self.register_new_locked(&mut graph, object);
        self.unlock(graph);
        result
    }

    fn register_new_locked(
        &self,
        graph: &mut IdentityMap,
        object: &Arc<PersistentObject>,
    ) -> ContextResult<()> {
        let class = graph.class_for(&object.entity_name())?;
        let (id, preset) = {
            let mut data = object.lock();
            let preset = std::mem::take(&mut data.values);
            for property in class.properties() {
                if let Property::ToMany(p) = property {
                    p.load(&mut data.values, Vec::new());
                }
            }
            data.state = PersistenceState::New;
            data.context = self.self_ref.clone();
            (data.id.clone(), preset)
        };

        if let Err(err) = graph.register(Arc::clone(object)) {
            let mut data = object.lock();
            data.state = PersistenceState::Transient;
            data.context = Weak::new();
            data.values = preset;
            return Err(err);
        }
        graph.record(GraphDiff::CreateNode { id: id.clone() }, ChangeMode::Tracked);

        for (name, value) in preset.attributes {
            graph.set_attribute(object, &name, value, ChangeMode::Tracked)?;
        }
        for (name, target) in preset.to_one {
            if let Some(target) = target {
                graph.link(object, &name, &target, ChangeMode::Tracked)?;
            }
        }
        for (name, targets) in preset.to_many {
            for target in targets {
                graph.link(object, &name, &target, ChangeMode::Tracked)?;
            }
        }
        debug!(context = %self.id, %id, "object registered");
        Ok(())
    }

    /// Mark `object` deleted, applying the delete rules of its
    /// relationships. A new object is simply forgotten.
    pub fn delete(&self, object: &Arc<PersistentObject>) -> ContextResult<()> {
        self.check_owned(object, "delete")?;
        let mut graph = self.lock_graph();
        let result = self.delete_locked(&mut graph, object, &mut HashSet::new());
        self.unlock(graph);
        result
    }

    fn delete_locked(
        &self,
        graph: &mut IdentityMap,
        object: &Arc<PersistentObject>,
        visited: &mut HashSet<ObjectId>,
    ) -> ContextResult<()> {
        let (id, state) = {
            let data = object.lock();
            (data.id.clone(), data.state)
        };
        if !visited.insert(id.clone()) {
            return Ok(());
        }
        match state {
            PersistenceState::Deleted => return Ok(()),
            PersistenceState::Transient => {
                return Err(ContextError::InvalidState {
                    id,
                    state,
                    operation: "delete",
                })
            }
            PersistenceState::Hollow => self.resolve_fault(object)?,
            _ => {}
        }

        let class = graph.class_for(id.entity())?;
        let mut related = Vec::new();
        for property in class.properties() {
            let Some(relationship) = property.relationship() else {
                continue;
            };
            if relationship.delete_rule == DeleteRule::NoAction {
                continue;
            }
            self.load_to_many_locked(graph, object, &relationship.name)?;
            let targets = match property.read(&object.lock().values) {
                PropertyValue::ToOne(target) => target.into_iter().collect(),
                PropertyValue::ToMany(targets) => targets.unwrap_or_default(),
                PropertyValue::Attribute(_) => Vec::new(),
            };
            if relationship.delete_rule == DeleteRule::Deny && !targets.is_empty() {
                return Err(ContextError::DeleteDenied {
                    id,
                    relationship: relationship.name.clone(),
                });
            }
            related.push((relationship.clone(), targets));
        }

        for (relationship, targets) in related {
            for target in &targets {
                match relationship.delete_rule {
                    DeleteRule::Nullify => {
                        graph.unlink(object, &relationship.name, target, ChangeMode::Tracked)?;
                    }
                    DeleteRule::Cascade => {
                        let target = self.local_object_locked(graph, target, None)?;
                        self.delete_locked(graph, &target, visited)?;
                    }
                    DeleteRule::Deny | DeleteRule::NoAction => {}
                }
            }
        }

        if object.persistence_state() == PersistenceState::New {
            graph.evict(&id);
            debug!(context = %self.id, %id, "new object forgotten");
        } else {
            object.lock().state = PersistenceState::Deleted;
            graph.record(GraphDiff::DeleteNode { id: id.clone() }, ChangeMode::Tracked);
            debug!(context = %self.id, %id, "object deleted");
        }
        Ok(())
    }

    /// The object registered here for `id`.
    ///
    /// Without a prototype, an unknown identifier yields a hollow
    /// placeholder. With one, an unknown identifier yields a committed copy
    /// of the prototype's values (hollow if the prototype is hollow), and a
    /// known object that is neither modified nor deleted takes the
    /// prototype's attribute and to-one values.
    pub fn local_object(
        &self,
        id: &ObjectId,
        prototype: Option<&Arc<PersistentObject>>,
    ) -> ContextResult<Arc<PersistentObject>> {
        let prototype = prototype.map(|source| {
            let data = source.lock();
            Prototype {
                source: Some(source),
                state: data.state,
                values: data.values.clone(),
            }
        });
        let mut graph = self.lock_graph();
        let result = self.local_object_locked(&mut graph, id, prototype);
        self.unlock(graph);
        result
    }

    pub(crate) fn local_object_locked(
        &self,
        graph: &mut IdentityMap,
        id: &ObjectId,
        prototype: Option<Prototype<'_>>,
    ) -> ContextResult<Arc<PersistentObject>> {
        let class = graph.class_for(id.entity())?;

        if let Some(cached) = graph.get(id) {
            if let Some(prototype) = prototype {
                let same = prototype.source.is_some_and(|source| Arc::ptr_eq(source, &cached));
                if !same && prototype.state != PersistenceState::Hollow {
                    let mut data = cached.lock();
                    if !matches!(data.state, PersistenceState::Modified | PersistenceState::Deleted) {
                        class.shallow_merge(&prototype.values, &mut data.values);
                        if data.state == PersistenceState::Hollow {
                            data.state = PersistenceState::Committed;
                        }
                    }
                }
            }
            return Ok(cached);
        }

        let (state, values) = match prototype {
            Some(prototype) if prototype.state != PersistenceState::Hollow => {
                let mut values = ObjectValues::new();
                class.shallow_merge(&prototype.values, &mut values);
                (PersistenceState::Committed, values)
            }
            _ => (PersistenceState::Hollow, ObjectValues::new()),
        };
        let object = Arc::new(PersistentObject::from_parts(
            id.clone(),
            state,
            values,
            self.self_ref.clone(),
        ));
        graph.register(Arc::clone(&object))?;
        Ok(object)
    }

    /// Run `query` upstream and map every row to a local object.
    pub fn perform_query(&self, query: &Query) -> ContextResult<Vec<Arc<PersistentObject>>> {
        let response = self.upstream()?.on_query(self.id, query)?;
        let mut graph = self.lock_graph();
        let mut objects = Vec::with_capacity(response.len());
        let mut result = Ok(());
        for row in response.rows {
            match self.local_object_locked(&mut graph, &row.id, Some(Prototype::row(row.values))) {
                Ok(object) => objects.push(object),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.unlock(graph);
        result.map(|()| objects)
    }

    // -- property access -------------------------------------------------

    /// Make `object` ready to be read: resolve a hollow object and, unless
    /// `lazy`, load the named to-many collection.
    pub fn prepare_for_access(
        &self,
        object: &Arc<PersistentObject>,
        property: Option<&str>,
        lazy: bool,
    ) -> ContextResult<()> {
        self.check_owned(object, "access")?;
        if let Some(name) = property {
            self.resolver
                .class_descriptor(&object.entity_name())?
                .property(name)?;
        }
        let mut graph = self.lock_graph();
        let result = self.prepare_locked(&mut graph, object, property, lazy);
        self.unlock(graph);
        result
    }

    fn prepare_locked(
        &self,
        graph: &mut IdentityMap,
        object: &Arc<PersistentObject>,
        property: Option<&str>,
        lazy: bool,
    ) -> ContextResult<()> {
        if object.persistence_state() == PersistenceState::Hollow {
            self.resolve_fault(object)?;
        }
        match property {
            Some(name) if !lazy => self.load_to_many_locked(graph, object, name),
            _ => Ok(()),
        }
    }

    /// Run `f` with `object` prepared for access to `name`.
    fn access<R>(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        f: impl FnOnce(&Self, &mut IdentityMap, &Property) -> ContextResult<R>,
    ) -> ContextResult<R> {
        self.check_owned(object, "access")?;
        let class = self.resolver.class_descriptor(&object.entity_name())?;
        let property = class.property(name)?;

        let mut graph = self.lock_graph();
        let result = self
            .prepare_locked(&mut graph, object, Some(name), false)
            .and_then(|()| f(self, &mut *graph, property));
        self.unlock(graph);
        result
    }

    pub fn read_property(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
    ) -> ContextResult<PropertyValue> {
        self.access(object, name, |_, _, property| {
            Ok(property.read(&object.lock().values))
        })
    }

    pub fn read_attribute(&self, object: &Arc<PersistentObject>, name: &str) -> ContextResult<Value> {
        match self.read_property(object, name)? {
            PropertyValue::Attribute(value) => Ok(value),
            _ => Err(self.kind_error(object, name, "an attribute")),
        }
    }

    /// The object a to-one relationship points at, if any.
    pub fn read_to_one(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
    ) -> ContextResult<Option<Arc<PersistentObject>>> {
        self.access(object, name, |context, graph, property| {
            let Property::ToOne(p) = property else {
                return Err(context.kind_error(object, name, "a to-one relationship"));
            };
            let target = p.target(&object.lock().values);
            target
                .map(|id| context.local_object_locked(graph, &id, None))
                .transpose()
        })
    }

    /// The objects a to-many relationship holds, loading it if needed.
    pub fn read_to_many(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
    ) -> ContextResult<Vec<Arc<PersistentObject>>> {
        self.access(object, name, |context, graph, property| {
            let Property::ToMany(p) = property else {
                return Err(context.kind_error(object, name, "a to-many relationship"));
            };
            let targets = p.targets(&object.lock().values).unwrap_or_default();
            targets
                .iter()
                .map(|id| context.local_object_locked(graph, id, None))
                .collect()
        })
    }

    /// Write any property. The value kind must match the property kind.
    pub fn write_property(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        value: PropertyValue,
    ) -> ContextResult<()> {
        self.access(object, name, |context, graph, property| {
            context.check_writable(object)?;
            match (property, value) {
                (Property::Attribute(_), PropertyValue::Attribute(value)) => {
                    graph.set_attribute(object, name, value, ChangeMode::Tracked)?;
                }
                (Property::ToOne(p), PropertyValue::ToOne(target)) => {
                    let current = p.target(&object.lock().values);
                    match (target, current) {
                        (Some(target), _) => graph.link(object, name, &target, ChangeMode::Tracked)?,
                        (None, Some(current)) => {
                            graph.unlink(object, name, &current, ChangeMode::Tracked)?
                        }
                        (None, None) => {}
                    }
                }
                (Property::ToMany(p), PropertyValue::ToMany(Some(targets))) => {
                    let current = p.targets(&object.lock().values).unwrap_or_default();
                    for removed in current.iter().filter(|id| !targets.contains(id)) {
                        graph.unlink(object, name, removed, ChangeMode::Tracked)?;
                    }
                    for added in targets.iter().filter(|id| !current.contains(id)) {
                        graph.link(object, name, added, ChangeMode::Tracked)?;
                    }
                }
                (property, _) => {
                    let expected = match property {
                        Property::Attribute(_) => "an attribute",
                        Property::ToOne(_) => "a to-one relationship",
                        Property::ToMany(_) => "a to-many relationship",
                    };
                    return Err(context.kind_error(object, name, expected));
                }
            }
            Ok(())
        })
    }

    pub fn set_attribute(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        value: impl Into<Value>,
    ) -> ContextResult<()> {
        self.write_property(object, name, PropertyValue::Attribute(value.into()))
    }

    pub fn set_to_one(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        target: Option<&Arc<PersistentObject>>,
    ) -> ContextResult<()> {
        let target = match target {
            Some(target) => {
                self.check_owned(target, "link")?;
                Some(target.object_id())
            }
            None => None,
        };
        self.write_property(object, name, PropertyValue::ToOne(target))
    }

    pub fn add_to_many(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        target: &Arc<PersistentObject>,
    ) -> ContextResult<()> {
        self.check_owned(target, "link")?;
        let target = target.object_id();
        self.access(object, name, |context, graph, property| {
            context.check_writable(object)?;
            if !matches!(property, Property::ToMany(_)) {
                return Err(context.kind_error(object, name, "a to-many relationship"));
            }
            graph.link(object, name, &target, ChangeMode::Tracked)
        })
    }

    pub fn remove_to_many(
        &self,
        object: &Arc<PersistentObject>,
        name: &str,
        target: &Arc<PersistentObject>,
    ) -> ContextResult<()> {
        let target = target.object_id();
        self.access(object, name, |context, graph, property| {
            context.check_writable(object)?;
            if !matches!(property, Property::ToMany(_)) {
                return Err(context.kind_error(object, name, "a to-many relationship"));
            }
            graph.unlink(object, name, &target, ChangeMode::Tracked)
        })
    }

    // -- graph state -----------------------------------------------------

    pub fn has_changes(&self) -> bool {
        self.with_graph(IdentityMap::has_changes)
    }

    pub fn uncommitted_objects(&self) -> Vec<Arc<PersistentObject>> {
        self.with_graph(IdentityMap::dirty_nodes)
    }

    pub fn new_objects(&self) -> Vec<Arc<PersistentObject>> {
        self.with_graph(|graph| graph.dirty_nodes_in(PersistenceState::New))
    }

    pub fn modified_objects(&self) -> Vec<Arc<PersistentObject>> {
        self.with_graph(|graph| graph.dirty_nodes_in(PersistenceState::Modified))
    }

    pub fn deleted_objects(&self) -> Vec<Arc<PersistentObject>> {
        self.with_graph(|graph| graph.dirty_nodes_in(PersistenceState::Deleted))
    }

    /// The object registered for `id`, without creating a placeholder.
    pub fn registered_object(&self, id: &ObjectId) -> Option<Arc<PersistentObject>> {
        self.with_graph(|graph| graph.get(id))
    }

    pub fn registered_count(&self) -> usize {
        self.with_graph(IdentityMap::len)
    }

    /// Snapshot of the changes a commit would send right now.
    pub fn pending_changes(&self) -> ContextResult<CompoundDiff> {
        self.with_graph(IdentityMap::diffs_since_last_flush)
    }

    pub fn user_property(&self, key: &str) -> Option<Value> {
        self.user_properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store an arbitrary value on the context. Returns the previous value.
    pub fn set_user_property(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.user_properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn remove_user_property(&self, key: &str) -> Option<Value> {
        self.user_properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    // -- commit and rollback ---------------------------------------------

    /// Commit all changes through every level down to the backing store.
    pub fn commit(&self) -> ContextResult<GraphDiff> {
        self.commit_with(true)
    }

    /// Flush all changes into the upstream context only.
    pub fn commit_to_parent(&self) -> ContextResult<GraphDiff> {
        self.commit_with(false)
    }

    fn commit_with(&self, cascade: bool) -> ContextResult<GraphDiff> {
        let mut graph = self.lock_graph();
        let result = self.commit_locked(&mut graph, cascade, self.id);
        self.unlock(graph);
        result
    }

    fn commit_locked(
        &self,
        graph: &mut IdentityMap,
        cascade: bool,
        posted_by: ChannelId,
    ) -> ContextResult<GraphDiff> {
        if !graph.has_changes() {
            debug!(context = %self.id, "nothing to commit");
            return Ok(GraphDiff::empty());
        }
        if self.config.validate_on_commit {
            self.validate_locked(graph)?;
        }
        let channel = self.upstream()?;
        let mode = if cascade {
            SyncMode::FlushCascade
        } else {
            SyncMode::FlushNoCascade
        };

        graph.commit_started();
        self.push_lifecycle(graph, EventTopic::CommitStarted, posted_by, GraphDiff::empty());
        let shipped = GraphDiff::from(graph.diffs_since_last_flush()?);
        info!(context = %self.id, diffs = shipped.atomic_len(), %mode, "commit started");

        match channel.on_sync(self.id, &shipped, mode) {
            Ok(result) => {
                graph.commit_succeeded(&result)?;
                let payload = GraphDiff::from(CompoundDiff::from_diffs(vec![shipped, result.clone()]));
                graph.push_event(
                    EventSubject::Channel(self.id),
                    EventTopic::Committed,
                    posted_by,
                    payload.clone(),
                );
                self.push_lifecycle(graph, EventTopic::Committed, posted_by, payload);
                info!(context = %self.id, %mode, "commit succeeded");
                Ok(result)
            }
            Err(err) => {
                graph.commit_aborted();
                self.push_lifecycle(graph, EventTopic::CommitAborted, posted_by, shipped);
                warn!(context = %self.id, error = %err, "commit aborted");
                Err(ContextError::SyncChannel(Box::new(err)))
            }
        }
    }

    fn validate_locked(&self, graph: &IdentityMap) -> ContextResult<()> {
        let validators = self
            .validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut result = ValidationResult::new();

        for object in graph.dirty_nodes() {
            let (id, state, values) = {
                let data = object.lock();
                (data.id.clone(), data.state, data.values.clone())
            };
            let class = graph.class_for(id.entity())?;
            let view = ObjectView {
                id: &id,
                entity: class.entity(),
                values: &values,
            };
            for validator in &validators {
                match state {
                    PersistenceState::New => validator.validate_for_insert(&view, &mut result),
                    PersistenceState::Modified => validator.validate_for_update(&view, &mut result),
                    PersistenceState::Deleted => validator.validate_for_delete(&view, &mut result),
                    _ => {}
                }
            }
        }

        if result.has_failures() {
            warn!(context = %self.id, failures = result.failures().len(), "validation failed");
            return Err(ContextError::Validation(result));
        }
        Ok(())
    }

    /// Discard all changes here and in every upstream context.
    pub fn rollback(&self) -> ContextResult<()> {
        self.rollback_from(self.id, false)
    }

    fn rollback_from(&self, posted_by: ChannelId, always_notify: bool) -> ContextResult<()> {
        let mut graph = self.lock_graph();
        let result = self.rollback_locked(&mut graph, posted_by, always_notify);
        self.unlock(graph);
        result
    }

    fn rollback_locked(
        &self,
        graph: &mut IdentityMap,
        posted_by: ChannelId,
        always_notify: bool,
    ) -> ContextResult<()> {
        if !graph.has_changes() {
            if always_notify {
                graph.push_event(
                    EventSubject::Channel(self.id),
                    EventTopic::RolledBack,
                    posted_by,
                    GraphDiff::empty(),
                );
            }
            return Ok(());
        }

        let reverted = GraphDiff::from(graph.reverted()?);
        info!(context = %self.id, diffs = reverted.atomic_len(), "rolled back");
        let upstream = match self.channel() {
            Some(channel) => channel
                .on_sync(self.id, &reverted, SyncMode::RollbackCascade)
                .map(|_| ())
                .map_err(|err| ContextError::SyncChannel(Box::new(err))),
            None => Ok(()),
        };
        self.notify_rolled_back(graph, posted_by, reverted);
        upstream
    }

    /// Discard all changes here only.
    pub fn rollback_locally(&self) -> ContextResult<()> {
        let mut graph = self.lock_graph();
        let result = self.revert_locked(&mut graph);
        self.unlock(graph);
        result
    }

    fn revert_locked(&self, graph: &mut IdentityMap) -> ContextResult<()> {
        if !graph.has_changes() {
            return Ok(());
        }
        let reverted = GraphDiff::from(graph.reverted()?);
        info!(context = %self.id, diffs = reverted.atomic_len(), "rolled back locally");
        self.notify_rolled_back(graph, self.id, reverted);
        Ok(())
    }

    fn notify_rolled_back(&self, graph: &mut IdentityMap, posted_by: ChannelId, reverted: GraphDiff) {
        graph.push_event(
            EventSubject::Channel(self.id),
            EventTopic::RolledBack,
            posted_by,
            reverted.clone(),
        );
        self.push_lifecycle(graph, EventTopic::RolledBack, posted_by, reverted);
    }

    fn flush_locked(
        &self,
        graph: &mut IdentityMap,
        originator: ChannelId,
        changes: &GraphDiff,
        cascade: bool,
    ) -> ContextResult<GraphDiff> {
        let merged = originator != self.id && !changes.is_noop();
        if merged {
            graph.mark_merge();
            let applied = changes.apply(&mut ChildDiffLoader::new(self, graph));
            if let Err(err) = applied {
                graph.rollback_merge()?;
                warn!(context = %self.id, %originator, error = %err, "child changes rejected");
                return Err(err);
            }
            debug!(context = %self.id, %originator, diffs = changes.atomic_len(), "child changes merged");
            if self.config.change_events {
                graph.push_event(
                    EventSubject::Graph(self.id),
                    EventTopic::Changed,
                    originator,
                    changes.clone(),
                );
            }
        }

        if !cascade {
            if merged {
                graph.push_event(
                    EventSubject::Channel(self.id),
                    EventTopic::Changed,
                    originator,
                    changes.clone(),
                );
            }
            return Ok(GraphDiff::empty());
        }

        let result = self.commit_locked(graph, true, originator);
        if result.is_err() && merged {
            graph.rollback_merge()?;
        }
        result
    }

    // -- faults ----------------------------------------------------------

    /// Load the values of a hollow object with a point query upstream.
    pub(crate) fn resolve_fault(&self, object: &Arc<PersistentObject>) -> ContextResult<()> {
        let id = object.object_id();
        let response = self
            .upstream()?
            .on_query(self.id, &Query::ObjectId(id.clone()))?;

        let rows = response.len();
        let mut found = response.rows.into_iter();
        let (Some(row), None) = (found.next(), found.next()) else {
            warn!(context = %self.id, %id, rows, "fault resolution failed");
            return Err(ContextError::FaultResolution { id, rows });
        };

        let mut data = object.lock();
        if data.state == PersistenceState::Hollow {
            data.values = row.values;
            data.state = PersistenceState::Committed;
        }
        debug!(context = %self.id, %id, "fault resolved");
        Ok(())
    }

    /// Load a to-many collection of `object` if it is not loaded yet. A no-op
    /// for other property kinds.
    pub(crate) fn load_to_many_locked(
        &self,
        graph: &mut IdentityMap,
        object: &Arc<PersistentObject>,
        relationship: &str,
    ) -> ContextResult<()> {
        let (id, state) = {
            let data = object.lock();
            (data.id.clone(), data.state)
        };
        let class = graph.class_for(id.entity())?;
        let Property::ToMany(property) = class.property(relationship)? else {
            return Ok(());
        };
        if property.is_loaded(&object.lock().values) {
            return Ok(());
        }

        let mut targets = Vec::new();
        if state != PersistenceState::New {
            let query = Query::Relationship {
                source: id.clone(),
                relationship: relationship.to_string(),
            };
            let response = self.upstream()?.on_query(self.id, &query)?;
            for row in response.rows {
                let target =
                    self.local_object_locked(graph, &row.id, Some(Prototype::row(row.values)))?;
                targets.push(target.object_id());
            }

            let descriptor = property.descriptor();
            if let Some(reverse) = descriptor.reverse.as_deref() {
                let target_class = graph.class_for(&descriptor.target)?;
                if matches!(target_class.property(reverse)?, Property::ToOne(_)) {
                    reconcile_reverse(graph, &id, &descriptor.target, reverse, &mut targets);
                }
            }
        }

        debug!(context = %self.id, %id, relationship, targets = targets.len(), "relationship loaded");
        property.load(&mut object.lock().values, targets);
        Ok(())
    }

    // -- peer events -----------------------------------------------------

    pub(crate) fn enqueue_peer_event(&self, event: GraphEvent) {
        self.lock_inbox().push_back(event);
        let mut graph = match self.graph.try_lock() {
            Ok(graph) => graph,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.drain_inbox(&mut graph);
        self.unlock(graph);
    }

    fn drain_inbox(&self, graph: &mut IdentityMap) {
        loop {
            let Some(event) = self.lock_inbox().pop_front() else {
                return;
            };
            if let Err(err) = self.merge_peer_event(graph, &event) {
                warn!(
                    context = %self.id,
                    posted_by = %event.posted_by,
                    topic = %event.topic,
                    error = %err,
                    "peer event not merged"
                );
            }
        }
    }

    fn merge_peer_event(&self, graph: &mut IdentityMap, event: &GraphEvent) -> ContextResult<()> {
        match event.topic {
            EventTopic::Committed | EventTopic::Changed => {
                let mut merge = PeerMerge::new(graph);
                event.diff.apply(&mut merge)?;
                let merged = merge.merged();
                debug!(context = %self.id, posted_by = %event.posted_by, merged, "peer changes merged");
                if merged > 0 && self.config.change_events {
                    graph.push_event(
                        EventSubject::Graph(self.id),
                        EventTopic::Changed,
                        event.posted_by,
                        event.diff.clone(),
                    );
                }
                Ok(())
            }
            EventTopic::RolledBack => self.revert_locked(graph),
            EventTopic::CommitStarted | EventTopic::CommitAborted => Ok(()),
        }
    }

    // -- helpers ---------------------------------------------------------

    pub(crate) fn weak_self(&self) -> Weak<Context> {
        self.self_ref.clone()
    }

    fn upstream(&self) -> ContextResult<Arc<dyn DataChannel>> {
        self.channel().ok_or(ContextError::NoChannel)
    }

    fn lock_graph(&self) -> MutexGuard<'_, IdentityMap> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bridge(&self) -> MutexGuard<'_, Option<PeerEventBridge>> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_inbox(&self) -> MutexGuard<'_, VecDeque<GraphEvent>> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_graph<R>(&self, f: impl FnOnce(&IdentityMap) -> R) -> R {
        let graph = self.lock_graph();
        let result = f(&*graph);
        self.unlock(graph);
        result
    }

    /// Release the graph lock, then publish queued events and merge any peer
    /// events that arrived while it was held.
    fn unlock<'a>(&'a self, mut graph: MutexGuard<'a, IdentityMap>) {
        loop {
            let pending = graph.take_outbox();
            drop(graph);
            self.publish(pending);

            if self.lock_inbox().is_empty() {
                return;
            }
            graph = match self.graph.try_lock() {
                Ok(graph) => graph,
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            self.drain_inbox(&mut graph);
        }
    }

    fn publish(&self, pending: Vec<PendingEvent>) {
        for event in pending {
            self.events
                .publish(event.subject, event.topic, event.posted_by, event.diff);
        }
    }

    fn push_lifecycle(
        &self,
        graph: &mut IdentityMap,
        topic: EventTopic,
        posted_by: ChannelId,
        diff: GraphDiff,
    ) {
        if self.config.lifecycle_events {
            graph.push_event(EventSubject::Graph(self.id), topic, posted_by, diff);
        }
    }

    fn check_owned(&self, object: &PersistentObject, operation: &'static str) -> ContextResult<()> {
        let data = object.lock();
        if data.state == PersistenceState::Transient {
            return Err(ContextError::InvalidState {
                id: data.id.clone(),
                state: data.state,
                operation,
            });
        }
        if !std::ptr::eq(data.context.as_ptr(), self) {
            return Err(ContextError::ForeignObject(data.id.clone()));
        }
        Ok(())
    }

    fn check_writable(&self, object: &PersistentObject) -> ContextResult<()> {
        let data = object.lock();
        if data.state == PersistenceState::Deleted {
            return Err(ContextError::InvalidState {
                id: data.id.clone(),
                state: data.state,
                operation: "modify",
            });
        }
        Ok(())
    }

    fn kind_error(&self, object: &PersistentObject, name: &str, expected: &'static str) -> ContextError {
        ContextError::PropertyKind {
            entity: object.entity_name(),
            property: name.to_string(),
            expected,
        }
    }
}

/// Fold local to-one edits into a to-many list loaded from upstream.
fn reconcile_reverse(
    graph: &IdentityMap,
    source: &ObjectId,
    target_entity: &str,
    reverse: &str,
    targets: &mut Vec<ObjectId>,
) {
    for object in graph.objects() {
        let data = object.lock();
        if data.id.entity() != target_entity || data.state == PersistenceState::Hollow {
            continue;
        }
        let points_here = data.values.to_one_target(reverse) == Some(source);
        let listed = targets.contains(&data.id);
        if points_here && !listed {
            targets.push(data.id.clone());
        } else if !points_here && listed && data.state.is_dirty() {
            targets.retain(|id| id != &data.id);
        }
    }
}

impl DataChannel for Context {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    /// Point lookups are answered from registered, loaded objects. Anything
    /// else goes upstream.
    fn on_query(&self, originator: ChannelId, query: &Query) -> ContextResult<QueryResponse> {
        if let Query::ObjectId(id) = query {
            let local = self.with_graph(|graph| {
                graph.get(id).and_then(|object| {
                    let data = object.lock();
                    matches!(
                        data.state,
                        PersistenceState::New
                            | PersistenceState::Committed
                            | PersistenceState::Modified
                    )
                    .then(|| DataRow::new(data.id.clone(), data.values.clone()))
                })
            });
            if let Some(row) = local {
                debug!(context = %self.id, %originator, %id, "query answered locally");
                return Ok(QueryResponse::new(vec![row]));
            }
        }
        self.upstream()?.on_query(self.id, query)
    }

    fn on_sync(
        &self,
        originator: ChannelId,
        changes: &GraphDiff,
        mode: SyncMode,
    ) -> ContextResult<GraphDiff> {
        debug!(context = %self.id, %originator, %mode, diffs = changes.atomic_len(), "sync received");
        match mode {
            SyncMode::RollbackCascade => {
                self.rollback_from(originator, true)?;
                Ok(GraphDiff::empty())
            }
            SyncMode::FlushNoCascade | SyncMode::FlushCascade => {
                let mut graph = self.lock_graph();
                let result = self.flush_locked(&mut graph, originator, changes, mode.is_cascade());
                self.unlock(graph);
                result
            }
        }
    }

    fn entity_resolver(&self) -> Option<Arc<EntityResolver>> {
        Some(Arc::clone(&self.resolver))
    }

    fn event_manager(&self) -> Option<Arc<EventManager>> {
        Some(Arc::clone(&self.events))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.release();
        debug!(context = %self.id, "context dropped");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
