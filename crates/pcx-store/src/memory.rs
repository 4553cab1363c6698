use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use pcx_context::{ContextResult, DataChannel, Query, QueryResponse, SyncMode};
use pcx_diff::{CompoundDiff, GraphChangeHandler, GraphDiff};
use pcx_event::{EventManager, EventManagerConfig, EventSubject, EventTopic};
use pcx_map::{EntityResolver, Property};
use pcx_types::{ChannelId, DataRow, ObjectId, ObjectValues};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Rows, link pairs and key sequences. Cloned for every flush so a failed
/// flush leaves the committed tables untouched.
#[derive(Clone, Debug, Default)]
struct Tables {
    rows: BTreeMap<ObjectId, ObjectValues>,
    links: BTreeMap<(ObjectId, String), BTreeSet<ObjectId>>,
    sequences: HashMap<String, i64>,
}

/// In-memory terminal channel.
///
/// Intended for tests, demos and embedding. All tables sit behind one
/// `RwLock`; queries share it, flushes take it exclusively.
pub struct InMemoryDataStore {
    id: ChannelId,
    config: StoreConfig,
    resolver: Arc<EntityResolver>,
    events: Arc<EventManager>,
    tables: RwLock<Tables>,
    syncs: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryDataStore {
    pub fn new(resolver: Arc<EntityResolver>) -> Arc<Self> {
        Self::with_config(resolver, StoreConfig::default())
    }

    pub fn with_config(resolver: Arc<EntityResolver>, config: StoreConfig) -> Arc<Self> {
        Self::with_events(
            resolver,
            config,
            Arc::new(EventManager::with_config(EventManagerConfig::default())),
        )
    }

    /// A store publishing on an existing event manager.
    pub fn with_events(
        resolver: Arc<EntityResolver>,
        config: StoreConfig,
        events: Arc<EventManager>,
    ) -> Arc<Self> {
        let id = ChannelId::new();
        info!(store = %id, first_key = config.first_key, "store created");
        Arc::new(Self {
            id,
            config,
            resolver,
            events,
            tables: RwLock::new(Tables::default()),
            syncs: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Seed a committed row. To-many values are stored the same way a
    /// flushed `ArcCreate` would store them.
    pub fn insert_row(&self, id: ObjectId, values: ObjectValues) -> StoreResult<()> {
        let mut tables = self.write_tables();
        let mut staged = tables.clone();
        let mut writer = Writer::new(self, &mut staged);
        writer.insert(&id, values)?;
        *tables = staged;
        Ok(())
    }

    /// The committed values of `id`, without to-many arcs.
    pub fn row(&self, id: &ObjectId) -> Option<ObjectValues> {
        self.read_tables().rows.get(id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.read_tables().rows.len()
    }

    /// Identifiers of every row of `entity`, in key order.
    pub fn ids_of(&self, entity: &str) -> Vec<ObjectId> {
        self.read_tables()
            .rows
            .keys()
            .filter(|id| id.entity() == entity)
            .cloned()
            .collect()
    }

    /// Number of `on_sync` calls received, including failed and rollback
    /// calls.
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a flushed diff to a staged copy and swap it in. Returns the
    /// key assignments as `IdChange` diffs.
    fn apply(&self, changes: &GraphDiff) -> StoreResult<GraphDiff> {
        let mut tables = self.write_tables();
        let mut staged = tables.clone();
        let mut writer = Writer::new(self, &mut staged);
        changes.apply(&mut writer)?;
        let assigned = writer.into_result();
        *tables = staged;
        Ok(GraphDiff::from(assigned))
    }

    fn relationship_rows(
        &self,
        tables: &Tables,
        source: &ObjectId,
        relationship: &str,
    ) -> StoreResult<Vec<DataRow>> {
        let class = self.resolver.class_descriptor(source.entity())?;
        let ids: Vec<ObjectId> = match class.property(relationship)? {
            Property::ToOne(p) => tables
                .rows
                .get(source)
                .and_then(|values| p.target(values))
                .into_iter()
                .collect(),
            Property::ToMany(p) => {
                let descriptor = p.descriptor();
                match to_one_reverse(&self.resolver, &descriptor.target, descriptor.reverse.as_deref())? {
                    Some(reverse) => tables
                        .rows
                        .iter()
                        .filter(|(id, values)| {
                            id.entity() == descriptor.target
                                && values.to_one_target(&reverse) == Some(source)
                        })
                        .map(|(id, _)| id.clone())
                        .collect(),
                    None => tables
                        .links
                        .get(&(source.clone(), relationship.to_string()))
                        .map(|targets| targets.iter().cloned().collect())
                        .unwrap_or_default(),
                }
            }
            Property::Attribute(_) => Vec::new(),
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| {
                let values = tables.rows.get(&id)?.clone();
                Some(DataRow::new(id, values))
            })
            .collect())
    }
}

impl std::fmt::Debug for InMemoryDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDataStore")
            .field("id", &self.id)
            .field("rows", &self.row_count())
            .field("config", &self.config)
            .finish()
    }
}

impl DataChannel for InMemoryDataStore {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn on_query(&self, originator: ChannelId, query: &Query) -> ContextResult<QueryResponse> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.read_tables();
        let rows = match query {
            Query::ObjectId(id) => tables
                .rows
                .get(id)
                .map(|values| DataRow::new(id.clone(), values.clone()))
                .into_iter()
                .collect(),
            Query::Relationship {
                source,
                relationship,
            } => self.relationship_rows(&tables, source, relationship)?,
            Query::Select { entity, filter } => {
                self.resolver.entity(entity)?;
                tables
                    .rows
                    .iter()
                    .filter(|(id, values)| {
                        id.entity() == entity
                            && filter
                                .iter()
                                .all(|(name, value)| &values.attribute(name) == value)
                    })
                    .map(|(id, values)| DataRow::new(id.clone(), values.clone()))
                    .collect()
            }
        };
        debug!(store = %self.id, %originator, rows = rows.len(), "query answered");
        Ok(QueryResponse::new(rows))
    }

    fn on_sync(
        &self,
        originator: ChannelId,
        changes: &GraphDiff,
        mode: SyncMode,
    ) -> ContextResult<GraphDiff> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if mode == SyncMode::RollbackCascade {
            debug!(store = %self.id, %originator, "rollback ignored");
            return Ok(GraphDiff::empty());
        }

        let result = self.apply(changes)?;
        info!(
            store = %self.id,
            %originator,
            diffs = changes.atomic_len(),
            keys = result.atomic_len(),
            "flush applied"
        );

        if self.config.publish_events {
            let payload = CompoundDiff::from_diffs(vec![changes.clone(), result.clone()]);
            self.events.publish(
                EventSubject::Channel(self.id),
                EventTopic::Committed,
                originator,
                GraphDiff::from(payload),
            );
        }
        Ok(result)
    }

    fn entity_resolver(&self) -> Option<Arc<EntityResolver>> {
        Some(Arc::clone(&self.resolver))
    }

    fn event_manager(&self) -> Option<Arc<EventManager>> {
        Some(Arc::clone(&self.events))
    }
}

/// The name of the to-one relationship on `target` that mirrors a to-many,
/// if the reverse is declared and is to-one.
fn to_one_reverse(
    resolver: &EntityResolver,
    target: &str,
    reverse: Option<&str>,
) -> StoreResult<Option<String>> {
    let Some(reverse) = reverse else {
        return Ok(None);
    };
    let class = resolver.class_descriptor(target)?;
    Ok(matches!(class.property(reverse)?, Property::ToOne(_)).then(|| reverse.to_string()))
}

/// Applies diffs to staged tables, assigning permanent keys to inserts.
struct Writer<'a> {
    store: &'a InMemoryDataStore,
    tables: &'a mut Tables,
    assigned: HashMap<ObjectId, ObjectId>,
    result: CompoundDiff,
}

impl<'a> Writer<'a> {
    fn new(store: &'a InMemoryDataStore, tables: &'a mut Tables) -> Self {
        Self {
            store,
            tables,
            assigned: HashMap::new(),
            result: CompoundDiff::new(),
        }
    }

    fn into_result(self) -> CompoundDiff {
        self.result
    }

    /// The stored identifier for `id`, following keys assigned in this
    /// flush.
    fn resolve(&self, id: &ObjectId) -> ObjectId {
        self.assigned.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    fn row_mut(&mut self, id: &ObjectId) -> StoreResult<&mut ObjectValues> {
        self.tables
            .rows
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingRow(id.clone()))
    }

    fn permanent_id(&mut self, id: &ObjectId) -> StoreResult<ObjectId> {
        if id.is_replacement_id_attached() {
            return id.create_replacement_id().map_err(|e| StoreError::KeyGeneration {
                entity: id.entity().to_string(),
                reason: e.to_string(),
            });
        }
        if !id.is_temporary() {
            return Ok(id.clone());
        }

        let entity = self.store.resolver.entity(id.entity())?;
        let column = entity
            .single_primary_key()
            .ok_or_else(|| StoreError::KeyGeneration {
                entity: entity.name.clone(),
                reason: format!("compound primary key {:?}", entity.primary_key),
            })?;
        let config = &self.store.config;
        let next = self
            .tables
            .sequences
            .entry(entity.name.clone())
            .or_insert(config.first_key);
        loop {
            let candidate = ObjectId::single(entity.name.clone(), column, *next);
            *next += config.key_step;
            if !self.tables.rows.contains_key(&candidate) {
                debug!(store = %self.store.id, %candidate, "key generated");
                return Ok(candidate);
            }
        }
    }

    fn insert(&mut self, id: &ObjectId, values: ObjectValues) -> StoreResult<()> {
        self.node_created(id)?;
        let stored = self.resolve(id);
        let row = self.row_mut(&stored)?;
        row.attributes = values.attributes;
        row.to_one = values.to_one;
        for (arc, targets) in values.to_many {
            for target in targets {
                self.arc_created(&stored, &target, &arc)?;
            }
        }
        Ok(())
    }

    fn write_arc(&mut self, id: &ObjectId, target: &ObjectId, arc: &str, created: bool) -> StoreResult<()> {
        let id = self.resolve(id);
        let target = self.resolve(target);
        let class = self.store.resolver.class_descriptor(id.entity())?;

        match class.property(arc)? {
            Property::ToOne(p) => {
                let row = self.row_mut(&id)?;
                if created {
                    p.set_target(row, Some(target));
                } else if p.target(row).as_ref() == Some(&target) {
                    p.set_target(row, None);
                }
            }
            Property::ToMany(p) => {
                let descriptor = p.descriptor();
                match to_one_reverse(&self.store.resolver, &descriptor.target, descriptor.reverse.as_deref())? {
                    Some(reverse) => {
                        if created {
                            self.row_mut(&target)?.set_to_one(&reverse, Some(id));
                        } else if let Some(row) = self.tables.rows.get_mut(&target) {
                            if row.to_one_target(&reverse) == Some(&id) {
                                row.set_to_one(&reverse, None);
                            }
                        }
                    }
                    None => {
                        let key = (id, arc.to_string());
                        if created {
                            self.tables.links.entry(key).or_default().insert(target);
                        } else if let Some(targets) = self.tables.links.get_mut(&key) {
                            targets.remove(&target);
                            if targets.is_empty() {
                                self.tables.links.remove(&key);
                            }
                        }
                    }
                }
            }
            Property::Attribute(_) => {}
        }
        Ok(())
    }
}

impl GraphChangeHandler for Writer<'_> {
    type Error = StoreError;

    fn node_created(&mut self, id: &ObjectId) -> StoreResult<()> {
        let stored = self.permanent_id(id)?;
        if self.tables.rows.contains_key(&stored) {
            return Err(StoreError::DuplicateKey(stored));
        }
        self.tables.rows.insert(stored.clone(), ObjectValues::new());
        if &stored != id {
            self.assigned.insert(id.clone(), stored.clone());
            self.result.push(GraphDiff::IdChange {
                id: id.clone(),
                new_id: stored,
            });
        }
        Ok(())
    }

    fn node_removed(&mut self, id: &ObjectId) -> StoreResult<()> {
        let id = self.resolve(id);
        if self.tables.rows.remove(&id).is_none() {
            return Err(StoreError::MissingRow(id));
        }
        for values in self.tables.rows.values_mut() {
            values.to_one.retain(|_, target| target.as_ref() != Some(&id));
        }
        self.tables.links.retain(|(source, _), targets| {
            targets.remove(&id);
            source != &id && !targets.is_empty()
        });
        Ok(())
    }

    fn node_property_changed(
        &mut self,
        id: &ObjectId,
        property: &str,
        _old: &Value,
        new: &Value,
    ) -> StoreResult<()> {
        let id = self.resolve(id);
        self.store
            .resolver
            .class_descriptor(id.entity())?
            .property(property)?;
        self.row_mut(&id)?.set_attribute(property, new.clone());
        Ok(())
    }

    fn arc_created(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> StoreResult<()> {
        self.write_arc(id, target, arc, true)
    }

    fn arc_deleted(&mut self, id: &ObjectId, target: &ObjectId, arc: &str) -> StoreResult<()> {
        self.write_arc(id, target, arc, false)
    }

    fn node_id_changed(&mut self, id: &ObjectId, new_id: &ObjectId) -> StoreResult<()> {
        let id = self.resolve(id);
        let values = self
            .tables
            .rows
            .remove(&id)
            .ok_or_else(|| StoreError::MissingRow(id.clone()))?;
        if self.tables.rows.contains_key(new_id) {
            return Err(StoreError::DuplicateKey(new_id.clone()));
        }
        self.tables.rows.insert(new_id.clone(), values);
        for values in self.tables.rows.values_mut() {
            values.replace_reference(&id, new_id);
        }
        Ok(())
    }
}
