//! Dataset functions.

use crate::api::buffer::parse_data_type;
use crate::buffer::HostBuffer;
use crate::error::GeoError;
use crate::util::{
    cstr_to_string, handle_arc, into_handle, json_to_cstr, release_handle, set_error,
    set_error_null, set_ok,
};
use crate::wrapper::band::BandInner;
use crate::wrapper::dataset::DatasetInner;
use crate::wrapper::Dataset;
use libc::size_t;
use serde_json::{Map, Value};
use std::os::raw::c_char;

/// A `Dataset` for a handle the host still holds.
///
/// # Safety
///
/// `handle` must be null or a live dataset handle.
unsafe fn dataset(handle: *const DatasetInner) -> Result<Dataset, GeoError> {
    unsafe { handle_arc(handle) }
        .map(Dataset)
        .ok_or_else(GeoError::invalid_handle)
}

fn dataset_handle(result: crate::error::Result<Dataset>, error: *mut GeoError) -> *const DatasetInner {
    match result {
        Ok(ds) => {
            unsafe { set_ok(error) };
            into_handle(ds.0)
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Open a raster dataset.
///
/// # Parameters
///
/// - `path`: File path or `/vsimem/` name (UTF-8, null-terminated)
/// - `error`: Out-parameter for error information
///
/// # Returns
///
/// Dataset handle on success, NULL on failure.
///
/// # Ownership
///
/// Caller owns the returned handle. Must call `geo_dataset_release()`.
///
/// # Safety
///
/// - `path` must be a valid null-terminated UTF-8 string
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_open(
    path: *const c_char,
    error: *mut GeoError,
) -> *const DatasetInner {
    let path = match unsafe { cstr_to_string(path, "path") } {
        Ok(p) => p,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    dataset_handle(Dataset::open(&path), error)
}

/// Open a dataset from file content held in a host buffer. The dataset
/// keeps the buffer's memory alive until it is closed.
///
/// # Safety
///
/// - `buffer` must be a valid buffer handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_open_buffer(
    buffer: *const HostBuffer,
    error: *mut GeoError,
) -> *const DatasetInner {
    let Some(buffer) = (unsafe { buffer.as_ref() }) else {
        return unsafe { set_error_null(error, GeoError::invalid_handle()) };
    };
    dataset_handle(Dataset::open_buffer(buffer), error)
}

/// Create an in-memory dataset.
///
/// # Safety
///
/// - `data_type` must be a valid null-terminated UTF-8 string
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_create(
    width: size_t,
    height: size_t,
    bands: size_t,
    data_type: *const c_char,
    error: *mut GeoError,
) -> *const DatasetInner {
    let data_type = match unsafe { parse_data_type(data_type) } {
        Ok(t) => t,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    dataset_handle(Dataset::create(width, height, bands, data_type), error)
}

/// Close a dataset. Its bands stop working; handles stay valid until
/// released. Closing twice is a no-op.
///
/// # Safety
///
/// - `handle` must be a valid dataset handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_close(
    handle: *const DatasetInner,
    error: *mut GeoError,
) -> bool {
    let ds = match unsafe { dataset(handle) } {
        Ok(ds) => ds,
        Err(e) => return unsafe { set_error(error, e) },
    };
    match ds.close() {
        Ok(()) => {
            unsafe { set_ok(error) };
            true
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Release a dataset handle. The dataset is closed when its last handle,
/// band and pending job are gone.
///
/// # Safety
///
/// - `handle` must be a dataset handle, or NULL, and must not be used afterwards
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_release(handle: *const DatasetInner) {
    unsafe { release_handle(handle) }
}

/// Number of raster bands.
///
/// # Returns
///
/// Band count, 0 on failure (check error->code).
///
/// # Safety
///
/// - `handle` must be a valid dataset handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_band_count(
    handle: *const DatasetInner,
    error: *mut GeoError,
) -> size_t {
    let ds = match unsafe { dataset(handle) } {
        Ok(ds) => ds,
        Err(e) => return unsafe { set_error(error, e) },
    };
    match ds.bands().count() {
        Ok(n) => {
            unsafe { set_ok(error) };
            n
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Band `index`, counted from 1.
///
/// # Returns
///
/// Band handle on success, NULL on failure. While the band is alive every
/// call returns the same pointer; each must be released.
///
/// # Safety
///
/// - `handle` must be a valid dataset handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_band(
    handle: *const DatasetInner,
    index: size_t,
    error: *mut GeoError,
) -> *const BandInner {
    let ds = match unsafe { dataset(handle) } {
        Ok(ds) => ds,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match ds.bands().get(index) {
        Ok(band) => {
            unsafe { set_ok(error) };
            into_handle(band.0)
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Dataset metadata as a JSON object of strings.
///
/// # Ownership
///
/// Caller owns the returned string. Must call `geo_string_free()`.
///
/// # Safety
///
/// - `handle` must be a valid dataset handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_dataset_metadata_json(
    handle: *const DatasetInner,
    error: *mut GeoError,
) -> *mut c_char {
    let ds = match unsafe { dataset(handle) } {
        Ok(ds) => ds,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match ds.metadata() {
        Ok(items) => {
            let object: Map<String, Value> = items
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            unsafe { json_to_cstr(&object, error) }
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}
