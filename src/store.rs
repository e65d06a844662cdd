//! Object store: native pointer identity to wrapper objects.
//!
//! Every wrapper registers its native pointer here together with the id of
//! its logical parent. Two lookups of the same pointer while the wrapper is
//! alive return the same `Arc`, and liveness is inherited: an entry is only
//! alive while every ancestor entry is.
//!
//! The store holds weak references only. The host owns wrappers; when the
//! last `Arc` goes away the wrapper disposes itself and its entry leaves the
//! store. The store never destroys native memory: [`ObjectStore::dispose`]
//! hands the pointer back to the wrapper, which owns the destructor.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{BindError, Result};
use crate::native::NativePtr;

/// Store-assigned identity of a wrapper. `0` means "no parent".
pub type ObjectId = u64;

type AnyWrapper = dyn Any + Send + Sync;

struct Entry {
    ptr: NativePtr,
    wrapper: Weak<AnyWrapper>,
    parent: ObjectId,
}

struct StoreInner {
    next_id: ObjectId,
    by_ptr: HashMap<NativePtr, ObjectId>,
    entries: HashMap<ObjectId, Entry>,
}

impl StoreInner {
    fn is_alive(&self, mut id: ObjectId) -> bool {
        loop {
            let Some(entry) = self.entries.get(&id) else {
                return false;
            };
            if entry.wrapper.strong_count() == 0 {
                return false;
            }
            if entry.parent == 0 {
                return true;
            }
            id = entry.parent;
        }
    }

    /// Live id registered for `ptr`; a dead entry is evicted.
    fn live_id(&mut self, ptr: NativePtr) -> Option<ObjectId> {
        let id = *self.by_ptr.get(&ptr)?;
        if self.is_alive(id) {
            return Some(id);
        }
        trace!(%ptr, id, "evicting stale entry");
        self.by_ptr.remove(&ptr);
        self.entries.remove(&id);
        None
    }

    fn insert(&mut self, ptr: NativePtr, wrapper: Weak<AnyWrapper>, parent: ObjectId) -> ObjectId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_ptr.insert(ptr, id);
        self.entries.insert(
            id,
            Entry {
                ptr,
                wrapper,
                parent,
            },
        );
        trace!(%ptr, id, parent, live = self.entries.len(), "registered");
        id
    }
}

/// Registry of live wrappers keyed by native pointer.
pub struct ObjectStore {
    inner: Mutex<StoreInner>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_id: 0,
                by_ptr: HashMap::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Register an already constructed wrapper.
    ///
    /// Fails with [`BindError::AlreadyRegistered`] if a live wrapper exists
    /// for `ptr`; call sites check [`ObjectStore::has`] first.
    pub fn add(
        &self,
        ptr: NativePtr,
        wrapper: &Arc<AnyWrapper>,
        parent: ObjectId,
    ) -> Result<ObjectId> {
        let mut inner = self.inner.lock();
        if inner.live_id(ptr).is_some() {
            return Err(BindError::AlreadyRegistered(ptr));
        }
        Ok(inner.insert(ptr, Arc::downgrade(wrapper), parent))
    }

    /// Construct and register a wrapper that needs its own id.
    ///
    /// `make` runs under the store lock and must not call back into the
    /// store.
    pub fn register<T, F>(&self, ptr: NativePtr, parent: ObjectId, make: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(ObjectId) -> T,
    {
        let mut inner = self.inner.lock();
        if inner.live_id(ptr).is_some() {
            return Err(BindError::AlreadyRegistered(ptr));
        }
        let id = inner.next_id + 1;
        let wrapper = Arc::new(make(id));
        let erased: Arc<AnyWrapper> = wrapper.clone();
        let assigned = inner.insert(ptr, Arc::downgrade(&erased), parent);
        debug_assert_eq!(assigned, id);
        Ok(wrapper)
    }

    /// Return the live wrapper for `ptr`, or construct and register one.
    pub fn wrap<T, F>(&self, ptr: NativePtr, parent: ObjectId, make: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(ObjectId) -> T,
    {
        if self.has(ptr) {
            if let Ok(existing) = self.get_as::<T>(ptr) {
                return Ok(existing);
            }
        }
        self.register(ptr, parent, make)
    }

    /// Whether a live wrapper is registered for `ptr`.
    pub fn has(&self, ptr: NativePtr) -> bool {
        self.inner.lock().live_id(ptr).is_some()
    }

    /// The wrapper registered for `ptr`.
    pub fn get(&self, ptr: NativePtr) -> Result<Arc<AnyWrapper>> {
        let mut inner = self.inner.lock();
        inner
            .live_id(ptr)
            .and_then(|id| inner.entries.get(&id))
            .and_then(|entry| entry.wrapper.upgrade())
            .ok_or(BindError::NotFound(ptr))
    }

    /// The wrapper registered for `ptr`, downcast to its concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self, ptr: NativePtr) -> Result<Arc<T>> {
        // The lock is released before the downcast so a mismatched Arc is
        // dropped outside of it.
        let wrapper = self.get(ptr)?;
        wrapper.downcast::<T>().map_err(|_| {
            BindError::internal(format!(
                "wrapper registered for {ptr} is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Whether `id` and all its ancestors are alive.
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.inner.lock().is_alive(id)
    }

    /// Parent id of a registered entry.
    pub fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.inner.lock().entries.get(&id).map(|e| e.parent)
    }

    /// Remove an entry and return its native pointer for the caller to
    /// destroy. `None` if the entry was already gone.
    pub fn dispose(&self, id: ObjectId) -> Option<NativePtr> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(&id)?;
        if inner.by_ptr.get(&entry.ptr) == Some(&id) {
            inner.by_ptr.remove(&entry.ptr);
        }
        trace!(ptr = %entry.ptr, id, live = inner.entries.len(), "disposed");
        Some(entry.ptr)
    }

    /// Number of registered entries, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static STORE: Lazy<ObjectStore> = Lazy::new(ObjectStore::new);

/// Process-wide object store.
pub fn object_store() -> &'static ObjectStore {
    &STORE
}
