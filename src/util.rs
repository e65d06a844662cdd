//! Utility functions for FFI operations.

use crate::error::GeoError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

/// Borrow a C string argument as `&str`. NULL is `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string that outlives
/// `'a`.
unsafe fn borrow_cstr<'a>(
    ptr: *const c_char,
    param_name: &str,
) -> Result<Option<&'a str>, GeoError> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(Some)
        .map_err(|_| GeoError::invalid_utf8(param_name))
}

/// Copy a required C string argument. NULL and invalid UTF-8 are errors.
///
/// # Safety
///
/// The caller must ensure `ptr` is either null or points to a valid
/// null-terminated C string.
pub unsafe fn cstr_to_string(ptr: *const c_char, param_name: &str) -> Result<String, GeoError> {
    unsafe { borrow_cstr(ptr, param_name) }?
        .map(str::to_owned)
        .ok_or_else(|| GeoError::null_pointer(param_name))
}

/// Copy an optional C string argument; NULL is `Ok(None)`.
///
/// # Safety
///
/// Same as [`cstr_to_string`].
pub unsafe fn cstr_to_option_string(
    ptr: *const c_char,
    param_name: &str,
) -> Result<Option<String>, GeoError> {
    Ok(unsafe { borrow_cstr(ptr, param_name) }?.map(str::to_owned))
}

/// Parse an optional JSON options string. NULL yields the defaults.
///
/// # Safety
///
/// The caller must ensure `ptr` is either null or points to a valid
/// null-terminated C string.
pub unsafe fn parse_options<T: DeserializeOwned + Default>(
    ptr: *const c_char,
    param_name: &str,
) -> Result<T, GeoError> {
    match unsafe { borrow_cstr(ptr, param_name) }? {
        Some(json) => serde_json::from_str(json).map_err(GeoError::json_parse),
        None => Ok(T::default()),
    }
}

/// Convert a Rust string to a C string, returning an owned pointer.
///
/// The caller is responsible for freeing the returned pointer with `geo_string_free`.
/// Returns null if the string contains internal null bytes.
pub fn string_to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Serialize `value` into an owned C string, reporting failures through
/// `error`.
///
/// # Safety
///
/// The caller must ensure `error` is either null or a valid pointer.
pub unsafe fn json_to_cstr<T: Serialize>(value: &T, error: *mut GeoError) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(s) => {
            unsafe { set_ok(error) };
            string_to_cstr(s)
        }
        Err(e) => unsafe { set_error_null(error, GeoError::json_serialize(e)) },
    }
}

/// Hand an `Arc` to the host as a raw handle.
///
/// The same `Arc` target always yields the same handle value.
pub fn into_handle<T>(arc: Arc<T>) -> *const T {
    Arc::into_raw(arc)
}

/// A new `Arc` for a handle the host still holds, or `None` for NULL.
///
/// # Safety
///
/// `ptr` must be null or a live handle produced by [`into_handle`] for the
/// same `T`.
pub unsafe fn handle_arc<T>(ptr: *const T) -> Option<Arc<T>> {
    if ptr.is_null() {
        return None;
    }
    unsafe {
        Arc::increment_strong_count(ptr);
        Some(Arc::from_raw(ptr))
    }
}

/// Give a handle back. NULL is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live handle produced by [`into_handle`], and
/// must not be used afterwards.
pub unsafe fn release_handle<T>(ptr: *const T) {
    if !ptr.is_null() {
        drop(unsafe { Arc::from_raw(ptr) });
    }
}

/// Set an error in the out-parameter and return a default value.
///
/// # Safety
///
/// The caller must ensure `error` is either null or a valid pointer.
pub unsafe fn set_error<T: Default>(error: *mut GeoError, err: impl Into<GeoError>) -> T {
    if let Some(e) = unsafe { error.as_mut() } {
        *e = err.into();
    }
    T::default()
}

/// Set an error in the out-parameter and return null.
///
/// # Safety
///
/// The caller must ensure `error` is either null or a valid pointer.
pub unsafe fn set_error_null<T>(error: *mut GeoError, err: impl Into<GeoError>) -> *mut T {
    if let Some(e) = unsafe { error.as_mut() } {
        *e = err.into();
    }
    std::ptr::null_mut()
}

/// Set success in the out-parameter error.
///
/// # Safety
///
/// The caller must ensure `error` is either null or a valid pointer.
pub unsafe fn set_ok(error: *mut GeoError) {
    if let Some(e) = unsafe { error.as_mut() } {
        *e = GeoError::ok();
    }
}
