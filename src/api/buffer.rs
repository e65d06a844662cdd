//! Host buffers and typed views.

use crate::buffer::HostBuffer;
use crate::error::{BindError, GeoError};
use crate::native::raster::DataType;
use crate::typed::TypedView;
use crate::util::{cstr_to_string, handle_arc, into_handle, release_handle, set_error_null, set_ok};
use libc::size_t;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;

pub(crate) fn data_type_name(data_type: Option<DataType>) -> &'static CStr {
    match data_type {
        Some(DataType::Byte) => c"Byte",
        Some(DataType::Int8) => c"Int8",
        Some(DataType::UInt16) => c"UInt16",
        Some(DataType::Int16) => c"Int16",
        Some(DataType::UInt32) => c"UInt32",
        Some(DataType::Int32) => c"Int32",
        Some(DataType::Float32) => c"Float32",
        Some(DataType::Float64) => c"Float64",
        None => c"Unknown",
    }
}

/// Parse a data type name passed by the host.
///
/// # Safety
///
/// `name` must be null or a valid null-terminated C string.
pub(crate) unsafe fn parse_data_type(name: *const c_char) -> Result<DataType, GeoError> {
    let name = unsafe { cstr_to_string(name, "data_type") }?;
    DataType::from_name(&name)
        .ok_or_else(|| BindError::invalid(format!("unknown data type \"{name}\"")).into())
}

/// Copy `len` bytes into a new host buffer.
///
/// # Ownership
///
/// Caller owns the returned buffer. Must call `geo_buffer_release()`.
/// Datasets opened from the buffer keep the memory alive on their own.
///
/// # Safety
///
/// - `data` must point to at least `len` bytes, or be NULL if `len` is 0
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_buffer_new(
    data: *const u8,
    len: size_t,
    error: *mut GeoError,
) -> *mut HostBuffer {
    if data.is_null() && len > 0 {
        return unsafe { set_error_null(error, GeoError::null_pointer("data")) };
    }
    let bytes = if len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
    };
    unsafe { set_ok(error) };
    Box::into_raw(Box::new(HostBuffer::new(bytes)))
}

/// Release a host buffer handle.
///
/// # Safety
///
/// - `buffer` must be a buffer returned by `geo_buffer_new`, or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_buffer_release(buffer: *mut HostBuffer) {
    if !buffer.is_null() {
        unsafe { drop(Box::from_raw(buffer)) };
    }
}

/// Allocate a zeroed typed view of `count` elements.
///
/// # Ownership
///
/// Caller owns the returned view. Must call `geo_view_release()`.
///
/// # Safety
///
/// - `data_type` must be a valid null-terminated UTF-8 string
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_allocate(
    data_type: *const c_char,
    count: size_t,
    error: *mut GeoError,
) -> *const TypedView {
    let data_type = match unsafe { parse_data_type(data_type) } {
        Ok(t) => t,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match TypedView::allocate(data_type, count) {
        Ok(view) => {
            unsafe { set_ok(error) };
            into_handle(Arc::new(view))
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// An untagged byte view sharing a host buffer's memory.
///
/// # Safety
///
/// - `buffer` must be a valid buffer handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_from_buffer(
    buffer: *const HostBuffer,
    error: *mut GeoError,
) -> *const TypedView {
    let Some(buffer) = (unsafe { buffer.as_ref() }) else {
        return unsafe { set_error_null(error, GeoError::invalid_handle()) };
    };
    unsafe { set_ok(error) };
    into_handle(Arc::new(TypedView::from_host_bytes(buffer.clone())))
}

/// Element type name of a view, "Unknown" for untagged views.
///
/// # Returns
///
/// Static string. Do not free it.
///
/// # Safety
///
/// - `view` must be a valid view handle or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_identify(view: *const TypedView) -> *const c_char {
    let tag = unsafe { view.as_ref() }.and_then(TypedView::identify);
    data_type_name(tag).as_ptr()
}

/// Start of a view's memory, NULL for a NULL view.
///
/// # Safety
///
/// - `view` must be a valid view handle or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_data(view: *const TypedView) -> *mut u8 {
    match unsafe { view.as_ref() } {
        Some(view) => view.as_ptr(),
        None => std::ptr::null_mut(),
    }
}

/// Length of a view in bytes.
///
/// # Safety
///
/// - `view` must be a valid view handle or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_byte_length(view: *const TypedView) -> size_t {
    unsafe { view.as_ref() }.map_or(0, TypedView::byte_len)
}

/// Release a view handle.
///
/// # Safety
///
/// - `view` must be a view handle, or NULL, and must not be used afterwards
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_view_release(view: *const TypedView) {
    unsafe { release_handle(view) }
}

/// A new `Arc` for a view handle.
///
/// # Safety
///
/// `view` must be null or a live view handle.
pub(crate) unsafe fn view_arc(view: *const TypedView) -> Result<Arc<TypedView>, GeoError> {
    unsafe { handle_arc(view) }.ok_or_else(GeoError::invalid_handle)
}
