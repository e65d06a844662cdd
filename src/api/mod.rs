//! C ABI.
//!
//! Wrapper handles cross the boundary as `Arc::into_raw` pointers, so the
//! identity the object store preserves is visible to the host as pointer
//! equality. Every handle a function returns is released exactly once with
//! the matching `*_release` function.

use std::ffi::CString;
use std::os::raw::{c_char, c_void};

use serde::Serialize;

use crate::context::ProgressCallback;
use crate::error::{BindError, GeoError, Result, geo_error_free};

pub mod band;
pub mod buffer;
pub mod dataset;
pub mod geometry;
pub mod lifecycle;

/// Completion of an asynchronous call, run on the context thread.
///
/// On success `error` is NULL and `result_json` holds the result; on
/// failure `result_json` is NULL. Both pointers are only valid for the
/// duration of the call.
pub type GeoCompletionCallback =
    extern "C" fn(user_data: *mut c_void, error: *const GeoError, result_json: *const c_char);

/// Progress report `(fraction complete, message)`. Returning false cancels
/// the operation.
pub type GeoProgressCallback =
    extern "C" fn(user_data: *mut c_void, complete: f64, message: *const c_char) -> bool;

/// A host completion callback with its user data.
pub(crate) struct Completion {
    callback: GeoCompletionCallback,
    user_data: *mut c_void,
}

impl Completion {
    pub(crate) fn new(callback: GeoCompletionCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data,
        }
    }

    pub(crate) fn finish<T: Serialize>(self, result: Result<T>) {
        let json = result.and_then(|value| {
            serde_json::to_string(&value)
                .map_err(|e| BindError::internal(format!("cannot serialize result: {e}")))
        });
        match json {
            Ok(json) => {
                let json = CString::new(json).unwrap_or_default();
                (self.callback)(self.user_data, std::ptr::null(), json.as_ptr());
            }
            Err(e) => {
                let mut error = GeoError::from(e);
                (self.callback)(self.user_data, &error, std::ptr::null());
                unsafe { geo_error_free(&mut error) };
            }
        }
    }
}

pub(crate) fn progress_adapter(
    callback: Option<GeoProgressCallback>,
    user_data: *mut c_void,
) -> Option<ProgressCallback> {
    let callback = callback?;
    Some(Box::new(move |complete: f64, message: &str| {
        let message = CString::new(message).unwrap_or_default();
        callback(user_data, complete, message.as_ptr())
    }))
}
