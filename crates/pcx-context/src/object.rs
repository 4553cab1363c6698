//! Persistent objects.
//!
//! A [`PersistentObject`] is a shared handle (`Arc`) to an identifier, a
//! persistence state, a value bag and a weak back-reference to the owning
//! context. Values are read and written through the owning context, which
//! handles faults, change recording and relationship bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use pcx_types::{ObjectId, ObjectValues, PersistenceState};

use crate::context::Context;

pub(crate) struct ObjectData {
    pub(crate) id: ObjectId,
    pub(crate) state: PersistenceState,
    pub(crate) values: ObjectValues,
    pub(crate) context: Weak<Context>,
}

/// An entity instance tracked by at most one context.
pub struct PersistentObject {
    data: Mutex<ObjectData>,
}

impl PersistentObject {
    /// A transient object of `entity` with a fresh temporary identifier.
    pub fn transient(entity: impl Into<String>) -> Arc<Self> {
        Self::with_values(entity, ObjectValues::new())
    }

    /// A transient object with preset values. The values are recorded as
    /// changes when the object is registered.
    pub fn with_values(entity: impl Into<String>, values: ObjectValues) -> Arc<Self> {
        Arc::new(Self::from_parts(
            ObjectId::temporary(entity),
            PersistenceState::Transient,
            values,
            Weak::new(),
        ))
    }

    pub(crate) fn from_parts(
        id: ObjectId,
        state: PersistenceState,
        values: ObjectValues,
        context: Weak<Context>,
    ) -> Self {
        Self {
            data: Mutex::new(ObjectData {
                id,
                state,
                values,
                context,
            }),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.lock().id.clone()
    }

    pub fn entity_name(&self) -> String {
        self.lock().id.entity().to_string()
    }

    pub fn persistence_state(&self) -> PersistenceState {
        self.lock().state
    }

    /// The owning context, if registered and still alive.
    pub fn context(&self) -> Option<Arc<Context>> {
        self.lock().context.upgrade()
    }

    /// Copy of the currently loaded values. Does not resolve faults.
    pub fn snapshot(&self) -> ObjectValues {
        self.lock().values.clone()
    }

    /// Raw attribute read. Does not resolve faults; hollow objects read `Null`.
    pub fn peek_attribute(&self, name: &str) -> Value {
        self.lock().values.attribute(name)
    }

    /// Returns `true` if `context` owns this object.
    pub fn is_owned_by(&self, context: &Context) -> bool {
        std::ptr::eq(self.lock().context.as_ptr(), context)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ObjectData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.lock();
        f.debug_struct("PersistentObject")
            .field("id", &data.id)
            .field("state", &data.state)
            .field("values", &data.values)
            .finish()
    }
}
