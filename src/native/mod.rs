//! In-process geospatial library consumed by the binding.
//!
//! This module presents the capability surface the binding layer relies on
//! with the conventions of a C library: objects are addressed through
//! opaque [`NativePtr`] handles, calls report failure through a status code
//! or a null handle plus the thread-local side channel in [`error`], and
//! every object has an explicit destroy function.
//!
//! Nothing here knows about wrappers, locks or jobs. Callers are
//! responsible for passing live handles and for serialising access to a
//! dataset's object graph.

use std::fmt;

pub mod color;
pub mod error;
pub mod geometry;
pub mod raster;
pub mod vsi;

/// Opaque identity of a native object.
///
/// The value is the object's address. It cannot be dereferenced outside
/// this module; the binding only compares, hashes and passes it back.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(usize);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    pub(crate) fn from_box<T>(value: Box<T>) -> Self {
        NativePtr(Box::into_raw(value) as usize)
    }

    pub(crate) fn from_raw<T>(ptr: *const T) -> Self {
        NativePtr(ptr as usize)
    }

    /// # Safety
    ///
    /// The handle must have been produced by `from_box::<T>` and not yet
    /// destroyed.
    pub(crate) unsafe fn into_box<T>(self) -> Box<T> {
        unsafe { Box::from_raw(self.0 as *mut T) }
    }

    /// # Safety
    ///
    /// The handle must point at a live `T` and no other reference to it may
    /// be active for the returned lifetime.
    pub(crate) unsafe fn as_mut<'a, T>(self) -> &'a mut T {
        unsafe { &mut *(self.0 as *mut T) }
    }

    /// # Safety
    ///
    /// The handle must point at a live `T` that is not mutated for the
    /// returned lifetime.
    pub(crate) unsafe fn as_ref<'a, T>(self) -> &'a T {
        unsafe { &*(self.0 as *const T) }
    }

    pub(crate) fn as_byte_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Numeric address, for naming and diagnostics.
    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
