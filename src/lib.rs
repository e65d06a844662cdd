//! Binding layer between a native geospatial library and garbage-collected
//! host runtimes.
//!
//! The crate exposes the library's raster and vector object model
//! (datasets, raster bands, geometries, color tables) as wrapper objects
//! with a lifetime and concurrency contract a managed host can rely on:
//!
//! - [`store`]: one wrapper per live native handle, with parent links so a
//!   band dies with its dataset.
//! - [`lock`]: one FIFO lock per root resource; every native call on a
//!   resource graph runs under its root's lock.
//! - [`job`] and [`context`]: native work on a worker pool, with results
//!   and progress delivered back on the host's main context.
//! - [`memfile`]: host buffers opened as virtual files.
//! - [`typed`]: typed views over pixel memory with window validation.
//! - [`wrapper`]: the wrapper types themselves.
//!
//! The C surface in [`api`] uses the `geo_` prefix.
//!
//! # Thread Safety
//!
//! Wrapper handles may be shared across threads. A `MainContext` belongs to
//! the thread that created it, and continuations of asynchronous calls run
//! only when that thread drives it.
//!
//! # Memory Management
//!
//! - Dataset, band, geometry and view handles are released with their
//!   `*_release` function, exactly once per returned handle
//! - Contexts are freed with `geo_context_free`, buffers with
//!   `geo_buffer_release`
//! - Strings returned by functions must be freed with `geo_string_free`
//! - Error messages must be freed with `geo_error_free`

#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

pub mod api;
pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod lock;
pub mod logging;
pub mod memfile;
pub mod native;
pub mod store;
pub mod typed;
mod util;
pub mod wrapper;

// Re-export the core types and every FFI function
pub use api::band::{
    geo_band_read, geo_band_read_async, geo_band_release, geo_band_statistics_async,
    geo_band_statistics_json, geo_band_write,
};
pub use api::buffer::{
    geo_buffer_new, geo_buffer_release, geo_view_allocate, geo_view_byte_length, geo_view_data,
    geo_view_from_buffer, geo_view_identify, geo_view_release,
};
pub use api::dataset::{
    geo_dataset_band, geo_dataset_band_count, geo_dataset_close, geo_dataset_create,
    geo_dataset_metadata_json, geo_dataset_open, geo_dataset_open_buffer, geo_dataset_release,
};
pub use api::geometry::{
    geo_geometry_area, geo_geometry_from_wkt, geo_geometry_release, geo_geometry_to_wkt,
    geo_geometry_type_name,
};
pub use api::lifecycle::{
    geo_context_free, geo_context_new, geo_context_pending, geo_context_poll,
    geo_context_run_until_idle, geo_init, geo_string_free,
};
pub use api::{GeoCompletionCallback, GeoProgressCallback};
pub use buffer::HostBuffer;
pub use config::BindingConfig;
pub use context::{MainContext, ProgressCallback};
pub use error::{BindError, GeoError, GeoErrorCode, Result, geo_error_free};
pub use job::{Job, JobPromise};
pub use native::raster::DataType;
pub use typed::{TypedView, Window};
pub use wrapper::{
    Color, ColorTable, Dataset, Geometry, GeometryOps, PixelOptions, RasterBand,
};

use std::os::raw::c_char;

/// Library version string.
///
/// # Returns
///
/// Static string containing the version (e.g., "0.1.0").
/// Do not free this string.
#[unsafe(no_mangle)]
pub extern "C" fn geo_version() -> *const c_char {
    // Include null terminator in the static string
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString, c_void};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const GRID: &str = "ncols 4\nnrows 4\nxllcorner 0\nyllcorner 0\ncellsize 1\nNODATA_value -1\n\
                        1 2 3 4\n5 6 7 8\n9 10 11 12\n13 14 15 -1\n";

    fn message(err: &GeoError) -> String {
        if err.message.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(err.message) }
            .to_string_lossy()
            .into_owned()
    }

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { geo_string_free(ptr) };
        s
    }

    #[derive(Default)]
    struct Outcome {
        code: Option<GeoErrorCode>,
        message: String,
        json: Option<serde_json::Value>,
        progress: Vec<f64>,
        cancel_at: Option<f64>,
    }

    extern "C" fn on_done(user_data: *mut c_void, error: *const GeoError, result: *const c_char) {
        let out = unsafe { &mut *(user_data as *mut Outcome) };
        match unsafe { error.as_ref() } {
            Some(err) => {
                out.code = Some(err.code);
                out.message = message(err);
            }
            None => {
                out.code = Some(GeoErrorCode::Ok);
                let text = unsafe { CStr::from_ptr(result) }.to_str().unwrap();
                out.json = Some(serde_json::from_str(text).unwrap());
            }
        }
    }

    extern "C" fn on_progress(user_data: *mut c_void, complete: f64, _: *const c_char) -> bool {
        let out = unsafe { &mut *(user_data as *mut Outcome) };
        out.progress.push(complete);
        out.cancel_at.is_none_or(|limit| complete < limit)
    }

    #[test]
    fn test_version() {
        let version = geo_version();
        assert!(!version.is_null());
        let version_str = unsafe { CStr::from_ptr(version) };
        assert_eq!(version_str.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_init() {
        let mut error = GeoError::ok();
        let in_effect = config::current().clone();
        let same = CString::new(serde_json::to_string(&in_effect).unwrap()).unwrap();
        assert!(unsafe { geo_init(same.as_ptr(), &mut error) });
        assert_eq!(error.code, GeoErrorCode::Ok);

        // Settings freeze on first use; a late, different request is reported.
        let other = format!(r#"{{"worker_threads": {}}}"#, in_effect.worker_threads + 1);
        let other = CString::new(other).unwrap();
        assert!(!unsafe { geo_init(other.as_ptr(), &mut error) });
        assert_eq!(error.code, GeoErrorCode::InvalidArgument);
        assert!(message(&error).contains("already in effect"));
        unsafe { geo_error_free(&mut error) };
        assert_eq!(config::current().worker_threads, in_effect.worker_threads);

        let bad = CString::new(r#"{"worker_threads": "many"}"#).unwrap();
        assert!(!unsafe { geo_init(bad.as_ptr(), &mut error) });
        assert_eq!(error.code, GeoErrorCode::JsonParse);
        unsafe { geo_error_free(&mut error) };
    }

    #[test]
    fn test_band_identity_is_pointer_equality() {
        let mut error = GeoError::ok();
        let ds = unsafe { geo_dataset_create(4, 4, 2, c"Byte".as_ptr(), &mut error) };
        assert!(!ds.is_null());
        assert_eq!(unsafe { geo_dataset_band_count(ds, &mut error) }, 2);

        let a = unsafe { geo_dataset_band(ds, 1, &mut error) };
        let b = unsafe { geo_dataset_band(ds, 1, &mut error) };
        let c = unsafe { geo_dataset_band(ds, 2, &mut error) };
        assert!(!a.is_null());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let missing = unsafe { geo_dataset_band(ds, 3, &mut error) };
        assert!(missing.is_null());
        assert_eq!(error.code, GeoErrorCode::Native);
        assert!(message(&error).contains("Illegal band #"));
        unsafe { geo_error_free(&mut error) };

        unsafe {
            geo_band_release(a);
            geo_band_release(b);
            geo_band_release(c);
            geo_dataset_release(ds);
        }
    }

    #[test]
    fn test_pixel_io_and_close() {
        let mut error = GeoError::ok();
        let ds = unsafe { geo_dataset_create(4, 4, 1, c"Int16".as_ptr(), &mut error) };
        let band = unsafe { geo_dataset_band(ds, 1, &mut error) };

        let source = unsafe { geo_view_allocate(c"Float64".as_ptr(), 16, &mut error) };
        assert_eq!(
            unsafe { CStr::from_ptr(geo_view_identify(source)) },
            c"Float64"
        );
        assert_eq!(unsafe { geo_view_byte_length(source) }, 128);
        let values =
            unsafe { std::slice::from_raw_parts_mut(geo_view_data(source) as *mut f64, 16) };
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as f64 * 10.0;
        }
        assert!(unsafe {
            geo_band_write(band, 0, 0, 4, 4, source, std::ptr::null(), &mut error)
        });

        // Half-resolution read into an Int16 view
        let target = unsafe { geo_view_allocate(c"Int16".as_ptr(), 4, &mut error) };
        let options = CString::new(r#"{"buffer_width": 2, "buffer_height": 2}"#).unwrap();
        assert!(unsafe { geo_band_read(band, 0, 0, 4, 4, target, options.as_ptr(), &mut error) });
        let read = unsafe { std::slice::from_raw_parts(geo_view_data(target) as *const i16, 4) };
        assert_eq!(read, &[50, 70, 130, 150]);

        // A view too short for the window is rejected before any native call
        assert!(!unsafe {
            geo_band_read(band, 0, 0, 4, 4, target, std::ptr::null(), &mut error)
        });
        assert_eq!(error.code, GeoErrorCode::Length);
        unsafe { geo_error_free(&mut error) };

        assert!(unsafe { geo_dataset_close(ds, &mut error) });
        assert!(!unsafe {
            geo_band_read(band, 0, 0, 2, 2, target, options.as_ptr(), &mut error)
        });
        assert_eq!(error.code, GeoErrorCode::ObjectDestroyed);
        unsafe { geo_error_free(&mut error) };

        unsafe {
            geo_view_release(source);
            geo_view_release(target);
            geo_band_release(band);
            geo_dataset_release(ds);
        }
    }

    #[test]
    fn test_open_buffer_and_statistics() {
        let mut error = GeoError::ok();
        let buffer = unsafe { geo_buffer_new(GRID.as_ptr(), GRID.len(), &mut error) };
        let ds = unsafe { geo_dataset_open_buffer(buffer, &mut error) };
        assert!(!ds.is_null(), "{}", message(&error));
        // The dataset keeps the memory alive on its own
        unsafe { geo_buffer_release(buffer) };

        let meta = take_string(unsafe { geo_dataset_metadata_json(ds, &mut error) });
        assert!(serde_json::from_str::<serde_json::Value>(&meta).unwrap().is_object());

        let band = unsafe { geo_dataset_band(ds, 1, &mut error) };
        let stats = take_string(unsafe { geo_band_statistics_json(band, false, &mut error) });
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["min"], 1.0);
        assert_eq!(stats["max"], 15.0);
        assert_eq!(stats["valid_count"], 15);

        unsafe {
            geo_band_release(band);
            geo_dataset_release(ds);
        }
    }

    #[test]
    fn test_async_calls_complete_on_the_context() {
        let mut error = GeoError::ok();
        let ctx = unsafe { geo_context_new(&mut error) };
        assert!(!ctx.is_null());
        let buffer = unsafe { geo_buffer_new(GRID.as_ptr(), GRID.len(), &mut error) };
        let ds = unsafe { geo_dataset_open_buffer(buffer, &mut error) };
        let band = unsafe { geo_dataset_band(ds, 1, &mut error) };

        let view = unsafe { geo_view_allocate(c"Int32".as_ptr(), 16, &mut error) };
        let mut read = Outcome::default();
        assert!(unsafe {
            geo_band_read_async(
                ctx,
                band,
                0,
                0,
                4,
                4,
                view,
                std::ptr::null(),
                on_done,
                &mut read as *mut Outcome as *mut c_void,
                &mut error,
            )
        });
        // The view may be released while the read is in flight
        unsafe { geo_view_release(view) };

        let mut stats = Outcome::default();
        assert!(unsafe {
            geo_band_statistics_async(
                ctx,
                band,
                false,
                Some(on_progress),
                on_done,
                &mut stats as *mut Outcome as *mut c_void,
                &mut error,
            )
        });

        let mut cancelled = Outcome {
            cancel_at: Some(0.5),
            ..Outcome::default()
        };
        assert!(unsafe {
            geo_band_statistics_async(
                ctx,
                band,
                false,
                Some(on_progress),
                on_done,
                &mut cancelled as *mut Outcome as *mut c_void,
                &mut error,
            )
        });

        assert_eq!(unsafe { geo_context_pending(ctx) }, 3);
        assert_eq!(unsafe { geo_context_run_until_idle(ctx) }, 3);
        assert_eq!(unsafe { geo_context_pending(ctx) }, 0);

        assert_eq!(read.code, Some(GeoErrorCode::Ok));
        assert_eq!(read.json.unwrap()["bytes"], 64);

        assert_eq!(stats.code, Some(GeoErrorCode::Ok));
        assert_eq!(stats.json.unwrap()["max"], 15.0);
        assert_eq!(stats.progress, vec![0.25, 0.5, 0.75, 1.0]);

        assert_eq!(cancelled.code, Some(GeoErrorCode::Cancelled));
        assert_eq!(cancelled.message, "User terminated");
        assert_eq!(cancelled.progress, vec![0.25, 0.5]);

        unsafe {
            geo_band_release(band);
            geo_dataset_release(ds);
            geo_buffer_release(buffer);
            geo_context_free(ctx);
        }
    }

    #[test]
    fn test_geometry() {
        let mut error = GeoError::ok();
        let wkt = CString::new("POLYGON ((0 0,4 0,4 4,0 4,0 0))").unwrap();
        let g = unsafe { geo_geometry_from_wkt(wkt.as_ptr(), &mut error) };
        assert!(!g.is_null());
        assert_eq!(
            unsafe { CStr::from_ptr(geo_geometry_type_name(g)) },
            c"Polygon"
        );
        assert_eq!(unsafe { geo_geometry_area(g, &mut error) }, 16.0);
        assert_eq!(
            take_string(unsafe { geo_geometry_to_wkt(g, &mut error) }),
            "POLYGON ((0 0,4 0,4 4,0 4,0 0))"
        );
        unsafe { geo_geometry_release(g) };

        let bad = CString::new("POLYGON ((0 0").unwrap();
        assert!(unsafe { geo_geometry_from_wkt(bad.as_ptr(), &mut error) }.is_null());
        assert_eq!(error.code, GeoErrorCode::Native);
        assert!(message(&error).starts_with("Failed to parse WKT"));
        unsafe { geo_error_free(&mut error) };
    }

    #[test]
    fn test_buffer_views_and_bad_arguments() {
        let mut error = GeoError::ok();
        let bytes = [1u8, 2, 3];
        let buffer = unsafe { geo_buffer_new(bytes.as_ptr(), bytes.len(), &mut error) };
        let view = unsafe { geo_view_from_buffer(buffer, &mut error) };
        assert_eq!(unsafe { CStr::from_ptr(geo_view_identify(view)) }, c"Unknown");
        assert_eq!(unsafe { geo_view_byte_length(view) }, 3);
        unsafe { geo_buffer_release(buffer) };
        // The view shares the buffer's memory and keeps it alive
        let data = unsafe { std::slice::from_raw_parts(geo_view_data(view), 3) };
        assert_eq!(data, &bytes);
        unsafe { geo_view_release(view) };

        let nothing = unsafe { geo_view_allocate(c"Complex64".as_ptr(), 4, &mut error) };
        assert!(nothing.is_null());
        assert_eq!(error.code, GeoErrorCode::InvalidArgument);
        unsafe { geo_error_free(&mut error) };

        assert_eq!(
            unsafe { geo_dataset_band_count(std::ptr::null(), &mut error) },
            0
        );
        assert_eq!(error.code, GeoErrorCode::InvalidHandle);
        unsafe { geo_error_free(&mut error) };

        let missing = CString::new("/nonexistent/grid.asc").unwrap();
        assert!(unsafe { geo_dataset_open(missing.as_ptr(), &mut error) }.is_null());
        assert_ne!(error.code, GeoErrorCode::Ok);
        unsafe { geo_error_free(&mut error) };
    }

    #[test]
    fn test_jobs_on_root_and_descendants_never_overlap() {
        use crate::native::error::{guarded_opt, guarded_status};
        use crate::native::raster::{self, IoRequest, RwFlag};
        use crate::store::ObjectId;
        use std::cell::RefCell;
        use std::collections::BTreeMap;
        use std::rc::Rc;

        let ctx = MainContext::with_config(&BindingConfig {
            worker_threads: 4,
            ..BindingConfig::default()
        })
        .unwrap();
        let ds = Dataset::create(8, 6, 2, DataType::Byte).unwrap();
        let b1 = ds.bands().get(1).unwrap();
        let b2 = ds.bands().get(2).unwrap();
        b1.fill(5.0).unwrap();
        b2.fill(3.0).unwrap();
        let roots = [ds.core().root_id(), b1.core().root_id(), b2.core().root_id()];
        assert!(roots.iter().all(|r| *r == ds.id()));

        let spans = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let results = Rc::new(RefCell::new(BTreeMap::new()));
        let timed = |label: &'static str, body: Box<dyn FnOnce() -> Result<f64> + Send>| {
            let spans = spans.clone();
            move |_: &crate::job::Progress| {
                let start = Instant::now();
                let value = body();
                std::thread::sleep(Duration::from_millis(10));
                spans.lock().push((start, Instant::now(), label));
                value
            }
        };

        let ds_ptr = ds.core().ptr().unwrap();
        let b1_ptr = b1.core().ptr().unwrap();
        let b2_ptr = b2.core().ptr().unwrap();
        let jobs: [(&'static str, ObjectId, Box<dyn FnOnce() -> Result<f64> + Send>); 3] = [
            (
                "dataset",
                roots[0],
                Box::new(move || {
                    let (w, h) = unsafe { raster::dataset_raster_size(ds_ptr) };
                    Ok((w * h) as f64)
                }),
            ),
            (
                "band 1",
                roots[1],
                Box::new(move || {
                    let mut pixel = 0u8;
                    let req = IoRequest {
                        x_off: 7,
                        y_off: 5,
                        x_size: 1,
                        y_size: 1,
                        buf_width: 1,
                        buf_height: 1,
                        buf_type: DataType::Byte,
                        pixel_space: 1,
                        line_space: 1,
                    };
                    let dst = crate::native::NativePtr::from_raw(&mut pixel as *mut u8);
                    guarded_status(|| unsafe {
                        raster::band_raster_io(b1_ptr, RwFlag::Read, &req, dst)
                    })?;
                    Ok(f64::from(pixel))
                }),
            ),
            (
                "band 2",
                roots[2],
                Box::new(move || {
                    guarded_opt(|| unsafe {
                        raster::band_compute_statistics(b2_ptr, false, &mut |_, _| true)
                    })
                    .map(|stats| stats.max + stats.mean)
                }),
            ),
        ];
        for (label, root, body) in jobs {
            let results = results.clone();
            Job::new("span", timed(label, body))
                .lock(root)
                .persist(ds.clone())
                .run_async(&ctx, move |r| {
                    results.borrow_mut().insert(label, r.unwrap());
                });
        }
        // A synchronous call on a band waits its turn; it rewrites the
        // value band 2 already holds.
        b2.fill(3.0).unwrap();
        assert_eq!(ctx.run_until_idle(), 3);

        let expected = BTreeMap::from([("band 1", 5.0), ("band 2", 6.0), ("dataset", 48.0)]);
        assert_eq!(*results.borrow(), expected);

        let mut spans = spans.lock().clone();
        assert_eq!(spans.len(), 3);
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{} overlaps {}", pair[0].2, pair[1].2);
        }
    }
}
