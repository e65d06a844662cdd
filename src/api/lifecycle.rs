//! Process setup, main contexts and returned strings.

use crate::config::{self, BindingConfig};
use crate::context::MainContext;
use crate::error::GeoError;
use crate::logging::init_logging;
use crate::util::{cstr_to_option_string, set_error, set_error_null, set_ok};
use libc::size_t;
use std::os::raw::c_char;

/// Configure the library and install logging.
///
/// # Parameters
///
/// - `config_json`: JSON configuration, or NULL to read `GEOBIND_*`
///   environment variables
/// - `error`: Out-parameter for error information
///
/// # Returns
///
/// true on success. The configuration freezes the first time any other
/// function reads it, after which a call asking for different settings
/// fails with `InvalidArgument` and changes nothing. Repeating
/// the settings already in effect succeeds.
///
/// # Config JSON Schema
///
/// ```json
/// {
///   "worker_threads": 4,
///   "vsimem_prefix": "/vsimem/geobind",
///   "log_filter": "geobind=debug",
///   "progress_poll_ms": 2
/// }
/// ```
///
/// # Safety
///
/// - `config_json` must be a valid null-terminated UTF-8 string or NULL
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_init(config_json: *const c_char, error: *mut GeoError) -> bool {
    let config = match unsafe { cstr_to_option_string(config_json, "config_json") } {
        Ok(Some(json)) => match BindingConfig::from_json(&json) {
            Ok(c) => c,
            Err(e) => return unsafe { set_error(error, GeoError::json_parse(e)) },
        },
        Ok(None) => BindingConfig::from_env(),
        Err(e) => return unsafe { set_error(error, e) },
    };

    init_logging(config.log_filter.as_deref());
    match config::install(config) {
        Ok(()) => {
            unsafe { set_ok(error) };
            true
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Create a main context for the calling thread.
///
/// # Ownership
///
/// Caller owns the returned context. Must call `geo_context_free()` on the
/// same thread. Continuations of asynchronous calls only run while the
/// host drives the context with `geo_context_poll()` or
/// `geo_context_run_until_idle()`.
///
/// # Safety
///
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_context_new(error: *mut GeoError) -> *mut MainContext {
    match MainContext::new() {
        Ok(ctx) => {
            unsafe { set_ok(error) };
            Box::into_raw(Box::new(ctx))
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Free a main context. Jobs still running finish, but their continuations
/// never run.
///
/// # Safety
///
/// - `ctx` must be a context returned by `geo_context_new`, or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_context_free(ctx: *mut MainContext) {
    if ctx.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(ctx));
    }
}

/// Run the continuations that are ready without blocking.
///
/// # Returns
///
/// Number of continuations run.
///
/// # Safety
///
/// - `ctx` must be a valid context or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_context_poll(ctx: *mut MainContext) -> size_t {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.run_pending(),
        None => 0,
    }
}

/// Block until every submitted job has run its continuation.
///
/// # Safety
///
/// - `ctx` must be a valid context or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_context_run_until_idle(ctx: *mut MainContext) -> size_t {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.run_until_idle(),
        None => 0,
    }
}

/// Number of jobs whose continuation has not run yet.
///
/// # Safety
///
/// - `ctx` must be a valid context or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_context_pending(ctx: *mut MainContext) -> size_t {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => ctx.pending(),
        None => 0,
    }
}

/// Free a string returned by the FFI layer.
///
/// # Safety
///
/// - `str` must be a string returned by an FFI function, or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_string_free(str: *mut c_char) {
    if !str.is_null() {
        unsafe {
            drop(std::ffi::CString::from_raw(str));
        }
    }
}
