//! Wrapper objects around native handles.
//!
//! Every wrapper embeds a [`NativeObject`]: the native pointer, whether the
//! wrapper owns it, the store id of the wrapper and its parent, and the id
//! of the root resource whose lock guards it. The host holds wrappers
//! through `Arc`s; when the last one goes the wrapper disposes itself.
//!
//! Wrapping an existing native pointer goes through the object store so the
//! same pointer always yields the same wrapper. Public constructors always
//! allocate a fresh native object owned by the wrapper.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::error::{BindError, Result};
use crate::lock::locks;
use crate::native::NativePtr;
use crate::store::{ObjectId, object_store};

pub mod band;
pub mod color_table;
pub mod dataset;
pub mod geometry;

pub use band::{PixelOptions, RasterBand};
pub use color_table::{Color, ColorTable};
pub use dataset::{Dataset, DatasetBands};
pub use geometry::{
    Geometry, GeometryCollection, GeometryOps, LineString, LinearRing, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon,
};

/// Native destructor of an owned object.
pub(crate) type Destroy = unsafe fn(NativePtr);

/// Identity, ownership and liveness of one wrapped native object.
pub struct NativeObject {
    ptr: NativePtr,
    id: ObjectId,
    parent: ObjectId,
    root: ObjectId,
    kind: &'static str,
    destroy: Option<Destroy>,
    disposed: AtomicBool,
}

impl NativeObject {
    /// A root object: owned, locking on its own id.
    pub(crate) fn root(ptr: NativePtr, id: ObjectId, kind: &'static str, destroy: Destroy) -> Self {
        Self {
            ptr,
            id,
            parent: 0,
            root: id,
            kind,
            destroy: Some(destroy),
            disposed: AtomicBool::new(false),
        }
    }

    /// A borrowed object living inside `parent`, locking on `root`.
    pub(crate) fn child(
        ptr: NativePtr,
        id: ObjectId,
        parent: ObjectId,
        root: ObjectId,
        kind: &'static str,
    ) -> Self {
        Self {
            ptr,
            id,
            parent,
            root,
            kind,
            destroy: None,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent(&self) -> ObjectId {
        self.parent
    }

    /// Id of the resource whose lock guards this object.
    pub fn root_id(&self) -> ObjectId {
        self.root
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Whether this wrapper destroys the native object on disposal.
    pub fn is_owned(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn raw(&self) -> NativePtr {
        self.ptr
    }

    pub fn is_alive(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && object_store().is_alive(self.id)
    }

    /// The native pointer, if this object and its ancestors are alive.
    pub fn ptr(&self) -> Result<NativePtr> {
        if self.is_alive() {
            Ok(self.ptr)
        } else {
            Err(BindError::ObjectDestroyed(self.kind))
        }
    }

    /// Run `f` on the native pointer under the root's lock.
    pub fn call<T>(&self, f: impl FnOnce(NativePtr) -> Result<T>) -> Result<T> {
        self.ptr()?;
        let _guard = locks().acquire(&[self.root])?;
        f(self.ptr()?)
    }

    /// Remove the store entry and destroy the native object if owned.
    /// Only the first call has an effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        object_store().dispose(self.id);
        if self.root == self.id {
            locks().remove(self.id);
        }
        if let Some(destroy) = self.destroy {
            // SAFETY: owned pointers are destroyed exactly once, here.
            unsafe { destroy(self.ptr) };
        }
        trace!(kind = self.kind, id = self.id, ptr = %self.ptr, "disposed");
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind)
            .field("ptr", &self.ptr)
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// Register a freshly created owned root object, destroying it if the
/// registration fails.
pub(crate) fn register_root<T, F>(ptr: NativePtr, destroy: Destroy, make: F) -> Result<std::sync::Arc<T>>
where
    T: std::any::Any + Send + Sync,
    F: FnOnce(ObjectId) -> T,
{
    object_store().register(ptr, 0, make).inspect_err(|_| {
        // SAFETY: the pointer was just created and nothing else refers to it.
        unsafe { destroy(ptr) }
    })
}
