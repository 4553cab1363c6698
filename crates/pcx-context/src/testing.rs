//! Recording upstream channel for context tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pcx_diff::{CompoundDiff, GraphDiff};
use pcx_event::EventManager;
use pcx_map::{DeleteRule, EntityDescriptor, EntityResolver, RelationshipDescriptor};
use pcx_types::{ChannelId, DataRow, ObjectId, ObjectValues};

use crate::channel::{DataChannel, Query, QueryResponse, SyncMode};
use crate::error::{ContextError, ContextResult};

/// Artist 1..* Painting, Gallery 1..* Painting (deny), Artist 1 Studio
/// (cascade).
pub(crate) fn model() -> Arc<EntityResolver> {
    Arc::new(
        EntityResolver::new()
            .with_entity(
                EntityDescriptor::new("Artist")
                    .with_primary_key("ARTIST_ID")
                    .with_mandatory_attribute("name")
                    .with_attribute("born")
                    .with_relationship(
                        RelationshipDescriptor::to_many("paintings", "Painting")
                            .with_reverse("artist"),
                    )
                    .with_relationship(
                        RelationshipDescriptor::to_one("studio", "Studio")
                            .with_delete_rule(DeleteRule::Cascade),
                    ),
            )
            .with_entity(
                EntityDescriptor::new("Painting")
                    .with_primary_key("PAINTING_ID")
                    .with_attribute("title")
                    .with_relationship(
                        RelationshipDescriptor::to_one("artist", "Artist")
                            .with_reverse("paintings"),
                    )
                    .with_relationship(
                        RelationshipDescriptor::to_one("gallery", "Gallery")
                            .with_reverse("paintings")
                            .with_delete_rule(DeleteRule::NoAction),
                    ),
            )
            .with_entity(
                EntityDescriptor::new("Gallery")
                    .with_primary_key("GALLERY_ID")
                    .with_attribute("name")
                    .with_relationship(
                        RelationshipDescriptor::to_many("paintings", "Painting")
                            .with_reverse("gallery")
                            .with_delete_rule(DeleteRule::Deny),
                    ),
            )
            .with_entity(
                EntityDescriptor::new("Studio")
                    .with_primary_key("STUDIO_ID")
                    .with_attribute("city"),
            ),
    )
}

pub(crate) fn artist_id(n: i64) -> ObjectId {
    ObjectId::single("Artist", "ARTIST_ID", n)
}

pub(crate) fn painting_id(n: i64) -> ObjectId {
    ObjectId::single("Painting", "PAINTING_ID", n)
}

/// Upstream double: serves canned rows, records every sync, assigns
/// permanent keys to inserted objects.
pub(crate) struct MemoryChannel {
    id: ChannelId,
    resolver: Arc<EntityResolver>,
    events: Arc<EventManager>,
    rows: Mutex<BTreeMap<ObjectId, ObjectValues>>,
    relationships: Mutex<HashMap<(ObjectId, String), Vec<ObjectId>>>,
    syncs: Mutex<Vec<(GraphDiff, SyncMode)>>,
    queries: AtomicUsize,
    failures: AtomicUsize,
    next_key: AtomicI64,
}

impl MemoryChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::new(),
            resolver: model(),
            events: Arc::new(EventManager::new()),
            rows: Mutex::new(BTreeMap::new()),
            relationships: Mutex::new(HashMap::new()),
            syncs: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            next_key: AtomicI64::new(100),
        })
    }

    pub(crate) fn insert_row(&self, id: ObjectId, values: ObjectValues) {
        self.rows.lock().unwrap().insert(id, values);
    }

    pub(crate) fn insert_relationship(&self, source: ObjectId, name: &str, targets: Vec<ObjectId>) {
        self.relationships
            .lock()
            .unwrap()
            .insert((source, name.to_string()), targets);
    }

    /// Fail the next `count` syncs.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }

    pub(crate) fn last_sync(&self) -> Option<(GraphDiff, SyncMode)> {
        self.syncs.lock().unwrap().last().cloned()
    }

    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn row(&self, id: &ObjectId) -> Option<DataRow> {
        self.rows
            .lock()
            .unwrap()
            .get(id)
            .map(|values| DataRow::new(id.clone(), values.clone()))
    }
}

impl DataChannel for MemoryChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn on_query(&self, _originator: ChannelId, query: &Query) -> ContextResult<QueryResponse> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let rows = match query {
            Query::ObjectId(id) => self.row(id).into_iter().collect(),
            Query::Relationship {
                source,
                relationship,
            } => self
                .relationships
                .lock()
                .unwrap()
                .get(&(source.clone(), relationship.clone()))
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|id| self.row(&id).unwrap_or_else(|| DataRow::new(id, ObjectValues::new())))
                .collect(),
            Query::Select { entity, filter } => self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, values)| {
                    id.entity() == entity
                        && filter
                            .iter()
                            .all(|(name, value)| &values.attribute(name) == value)
                })
                .map(|(id, values)| DataRow::new(id.clone(), values.clone()))
                .collect(),
        };
        Ok(QueryResponse::new(rows))
    }

    fn on_sync(
        &self,
        _originator: ChannelId,
        changes: &GraphDiff,
        mode: SyncMode,
    ) -> ContextResult<GraphDiff> {
        self.syncs.lock().unwrap().push((changes.clone(), mode));
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ContextError::Store("backend unavailable".into()));
        }
        if mode == SyncMode::RollbackCascade {
            return Ok(GraphDiff::empty());
        }

        let mut flat = Vec::new();
        changes.clone().flatten_into(&mut flat);
        let mut result = CompoundDiff::new();
        for diff in flat {
            if let GraphDiff::CreateNode { id } = diff {
                if !id.is_temporary() {
                    continue;
                }
                let entity = self.resolver.entity(id.entity())?;
                let key = entity.primary_key[0].clone();
                let new_id = ObjectId::single(
                    id.entity(),
                    key,
                    self.next_key.fetch_add(1, Ordering::SeqCst),
                );
                result.push(GraphDiff::IdChange { id, new_id });
            }
        }
        Ok(GraphDiff::from(result))
    }

    fn entity_resolver(&self) -> Option<Arc<EntityResolver>> {
        Some(Arc::clone(&self.resolver))
    }

    fn event_manager(&self) -> Option<Arc<EventManager>> {
        Some(Arc::clone(&self.events))
    }
}
