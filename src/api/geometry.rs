//! Geometry functions.

use crate::error::GeoError;
use crate::native::geometry::WkbType;
use crate::util::{
    cstr_to_string, handle_arc, into_handle, release_handle, set_error, set_error_null, set_ok,
    string_to_cstr,
};
use crate::wrapper::geometry::GeometryInner;
use crate::wrapper::{Geometry, GeometryOps};
use std::ffi::CStr;
use std::os::raw::c_char;

/// A `Geometry` for a handle the host still holds.
///
/// # Safety
///
/// `handle` must be null or a live geometry handle.
unsafe fn geometry(handle: *const GeometryInner) -> Result<Geometry, GeoError> {
    let inner = unsafe { handle_arc(handle) }.ok_or_else(GeoError::invalid_handle)?;
    Geometry::from_inner(inner).map_err(GeoError::from)
}

fn type_name(kind: WkbType) -> &'static CStr {
    match kind {
        WkbType::Point => c"Point",
        WkbType::LineString => c"LineString",
        WkbType::LinearRing => c"LinearRing",
        WkbType::Polygon => c"Polygon",
        WkbType::MultiPoint => c"MultiPoint",
        WkbType::MultiLineString => c"MultiLineString",
        WkbType::MultiPolygon => c"MultiPolygon",
        WkbType::GeometryCollection => c"GeometryCollection",
        WkbType::Unknown => c"Geometry",
    }
}

/// Parse well-known text.
///
/// # Returns
///
/// Owned geometry handle on success, NULL on failure.
///
/// # Ownership
///
/// Caller owns the returned handle. Must call `geo_geometry_release()`.
///
/// # Safety
///
/// - `wkt` must be a valid null-terminated UTF-8 string
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_geometry_from_wkt(
    wkt: *const c_char,
    error: *mut GeoError,
) -> *const GeometryInner {
    let wkt = match unsafe { cstr_to_string(wkt, "wkt") } {
        Ok(s) => s,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match Geometry::from_wkt(&wkt) {
        Ok(g) => {
            unsafe { set_ok(error) };
            into_handle(g.inner().clone())
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Well-known text of a geometry.
///
/// # Ownership
///
/// Caller owns the returned string. Must call `geo_string_free()`.
///
/// # Safety
///
/// - `handle` must be a valid geometry handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_geometry_to_wkt(
    handle: *const GeometryInner,
    error: *mut GeoError,
) -> *mut c_char {
    let g = match unsafe { geometry(handle) } {
        Ok(g) => g,
        Err(e) => return unsafe { set_error_null(error, e) },
    };
    match g.to_wkt() {
        Ok(wkt) => {
            unsafe { set_ok(error) };
            string_to_cstr(wkt)
        }
        Err(e) => unsafe { set_error_null(error, e) },
    }
}

/// Concrete type name, e.g. "LinearRing".
///
/// # Returns
///
/// Static string. Do not free it. NULL for a NULL handle.
///
/// # Safety
///
/// - `handle` must be a valid geometry handle or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_geometry_type_name(handle: *const GeometryInner) -> *const c_char {
    match unsafe { geometry(handle) } {
        Ok(g) => type_name(g.wkb_type()).as_ptr(),
        Err(_) => std::ptr::null(),
    }
}

/// Area of a geometry.
///
/// # Returns
///
/// Area on success, 0.0 on failure (check error->code).
///
/// # Safety
///
/// - `handle` must be a valid geometry handle
/// - `error` must be a valid pointer or NULL
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_geometry_area(
    handle: *const GeometryInner,
    error: *mut GeoError,
) -> f64 {
    let g = match unsafe { geometry(handle) } {
        Ok(g) => g,
        Err(e) => return unsafe { set_error(error, e) },
    };
    match g.area() {
        Ok(area) => {
            unsafe { set_ok(error) };
            area
        }
        Err(e) => unsafe { set_error(error, e) },
    }
}

/// Release a geometry handle. An owned geometry is destroyed with its last
/// handle.
///
/// # Safety
///
/// - `handle` must be a geometry handle, or NULL, and must not be used afterwards
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_geometry_release(handle: *const GeometryInner) {
    unsafe { release_handle(handle) }
}
