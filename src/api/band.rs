//! Raster band functions.

use crate::api::buffer::view_arc;
use crate::api::{Completion, GeoCompletionCallback, GeoProgressCallback, progress_adapter};
use crate::context::MainContext;
use crate::error::GeoError;
use crate::native::raster::Statistics;
use crate::util::{handle_arc, json_to_cstr, parse_options, release_handle, set_error, set_error_null, set_ok};
use crate::wrapper::band::BandInner;
use crate::wrapper::{PixelOptions, RasterBand};
use crate::typed::TypedView;
use libc::size_t;
use serde::Serialize;
use std::os::raw::{c_char, c_void};

/// JSON schema for band statistics.
#[derive(Debug, Serialize)]
struct StatisticsJson {
    min: f64,
    max: f64,
    mean: f64,
    std_dev: f64,
    valid_count: u64,
}

impl From<Statistics> for StatisticsJson {
    fn from(s: Statistics) -> Self {
        Self {
            min: s.min,
            max: s.max,
            mean: s.mean,
            std_dev: s.std_dev,
            valid_count: s.valid_count,
        }
    }
}

/// JSON schema for a completed asynchronous pixel transfer.
#[derive(Debug, Serialize)]
struct TransferJson {
    bytes: usize,
}

/// A `RasterBand` for a handle the host still holds.
///
/// # Safety
///
/// `handle` must be null or a live band handle.
unsafe fn band(handle: *const BandInner) -> Result<RasterBand, GeoError> {
    unsafe { handle_arc(handle) }
        .map(RasterBand)
        .ok_or_else(GeoError::invalid_handle)
}

/// Release a band handle.
///
/// # Safety
///
/// - `handle` must be a band handle, or NULL, and must not be used afterwards
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_release(handle: *const BandInner) {
    unsafe { release_handle(handle) }
}

struct Transfer {
    band: RasterBand,
    view: std::sync::Arc<TypedView>,
    options: PixelOptions,
}

unsafe fn transfer(
    handle: *const BandInner,
    view: *const TypedView,
    options_json: *const c_char,
) -> Result<Transfer, GeoError> {
    Ok(Transfer {
        band: unsafe { band(handle) }?,
        view: unsafe { view_arc(view) }?,
        options: unsafe { parse_options(options_json, "options_json") }?,
    })
}

/// Read a window of the band into a typed view.
///
/// # Parameters
///
/// - `handle`: Valid band handle
/// - `x`, `y`, `width`, `height`: Window in pixels
/// - `view`: Destination view
/// - `options_json`: Buffer layout, or NULL for a packed buffer
/// - `error`: Out-parameter for error information
///
/// # Options JSON Schema
///
/// ```json
/// {
///   "buffer_width": 256,
///   "buffer_height": 256,
///   "data_type": "Float32",
///   "pixel_space": 4,
///   "line_space": 1024,
///   "offset": 0
/// }
/// ```
///
/// # Safety
///
/// - `handle` and `view` must be valid handles
/// - `options_json` must be a valid null-terminated UTF-8 string or NULL
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_read(
    handle: *const BandInner,
    x: size_t,
    y: size_t,
    width: size_t,
    height: size_t,
    view: *const TypedView,
    options_json: *const c_char,
    error: *mut GeoError,
) -> bool {
    let t = match unsafe { transfer(handle, view, options_json) } {
        Ok(t) => t,
        Err(e) => return unsafe { set_error(error, e) },
    };
    match t.band.read(x, y, width, height, &t.view, &t.options) {
        Ok(()) => {
            unsafe { set_ok(error) };
            true
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Write a window of the band from a typed view.
///
/// Parameters as for `geo_band_read`.
///
/// # Safety
///
/// - `handle` and `view` must be valid handles
/// - `options_json` must be a valid null-terminated UTF-8 string or NULL
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_write(
    handle: *const BandInner,
    x: size_t,
    y: size_t,
    width: size_t,
    height: size_t,
    view: *const TypedView,
    options_json: *const c_char,
    error: *mut GeoError,
) -> bool {
    let t = match unsafe { transfer(handle, view, options_json) } {
        Ok(t) => t,
        Err(e) => return unsafe { set_error(error, e) },
    };
    match t.band.write(x, y, width, height, &t.view, &t.options) {
        Ok(()) => {
            unsafe { set_ok(error) };
            true
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Read a window on the worker pool.
///
/// The view is kept alive until `callback` has run on `ctx`. The result
/// JSON is `{"bytes": <view length>}`.
///
/// # Returns
///
/// true if the read was scheduled or its failure was already delivered to
/// `callback`; false if the arguments were rejected (check error->code).
///
/// # Safety
///
/// - `ctx` must be a valid context on the calling thread
/// - `handle` and `view` must be valid handles
/// - `options_json` must be a valid null-terminated UTF-8 string or NULL
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_read_async(
    ctx: *mut MainContext,
    handle: *const BandInner,
    x: size_t,
    y: size_t,
    width: size_t,
    height: size_t,
    view: *const TypedView,
    options_json: *const c_char,
    callback: GeoCompletionCallback,
    user_data: *mut c_void,
    error: *mut GeoError,
) -> bool {
    let Some(ctx) = (unsafe { ctx.as_ref() }) else {
        return unsafe { set_error(error, GeoError::null_pointer("ctx")) };
    };
    let t = match unsafe { transfer(handle, view, options_json) } {
        Ok(t) => t,
        Err(e) => return unsafe { set_error(error, e) },
    };
    let completion = Completion::new(callback, user_data);
    t.band.read_async(ctx, (x, y, width, height), t.view, &t.options, move |result| {
        completion.finish(result.map(|view| TransferJson {
            bytes: view.byte_len(),
        }))
    });
    unsafe { set_ok(error) };
    true
}

/// Compute band statistics on the calling thread.
///
/// # Returns
///
/// JSON string on success, NULL on failure.
///
/// # Ownership
///
/// Caller owns the returned string. Must call `geo_string_free()`.
///
/// # Response JSON Schema
///
/// ```json
/// {"min": 0.0, "max": 255.0, "mean": 127.5, "std_dev": 73.9, "valid_count": 65536}
/// ```
///
/// # Safety
///
/// - `handle` must be a valid band handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_statistics_json(
    handle: *const BandInner,
    approx_ok: bool,
    error: *mut GeoError,
) -> *mut c_char {
    let band = match unsafe { band(handle) } {
        Ok(b) => b,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match band.compute_statistics(approx_ok, None) {
        Ok(stats) => unsafe { json_to_cstr(&StatisticsJson::from(stats), error) },
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Compute band statistics on the worker pool.
///
/// `progress` (optional) is called on the context thread; the scan waits
/// for each answer and returning false cancels it with a `Cancelled`
/// error. `callback` receives the statistics JSON.
///
/// # Safety
///
/// - `ctx` must be a valid context on the calling thread
/// - `handle` must be a valid band handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_band_statistics_async(
    ctx: *mut MainContext,
    handle: *const BandInner,
    approx_ok: bool,
    progress: Option<GeoProgressCallback>,
    callback: GeoCompletionCallback,
    user_data: *mut c_void,
    error: *mut GeoError,
) -> bool {
    let Some(ctx) = (unsafe { ctx.as_ref() }) else {
        return unsafe { set_error(error, GeoError::null_pointer("ctx")) };
    };
    let band = match unsafe { band(handle) } {
        Ok(b) => b,
        Err(e) => return unsafe { set_error(error, e) },
    };
    let completion = Completion::new(callback, user_data);
    band.compute_statistics_async(
        ctx,
        approx_ok,
        progress_adapter(progress, user_data),
        move |result| completion.finish(result.map(StatisticsJson::from)),
    );
    unsafe { set_ok(error) };
    true
}
