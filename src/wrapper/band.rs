//! Raster band wrapper.
//!
//! A band belongs to its dataset: it never owns its native handle, it locks
//! on the dataset's id, and it stops working once the dataset is closed.

use std::sync::Arc;

use serde::Deserialize;

use crate::context::{MainContext, ProgressCallback};
use crate::error::{BindError, Result};
use crate::job::Job;
use crate::lock::locks;
use crate::native::NativePtr;
use crate::native::error::{guarded_opt, guarded_status};
use crate::native::raster::{self, DataType, IoRequest, RwFlag, Statistics};
use crate::store::{ObjectId, object_store};
use crate::typed::{TypedView, Window};

use super::color_table::{ColorTable, ColorTableInner};
use super::dataset::Dataset;
use super::NativeObject;

pub struct BandInner {
    core: NativeObject,
    dataset: Dataset,
}

/// One band of a dataset.
#[derive(Clone)]
pub struct RasterBand(pub(crate) Arc<BandInner>);

/// Buffer layout of a pixel read or write.
///
/// Unset fields default to a packed buffer of the window's size whose type
/// is the view's element type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PixelOptions {
    pub buffer_width: Option<usize>,
    pub buffer_height: Option<usize>,
    /// Element type name, e.g. `"Float32"`.
    pub data_type: Option<String>,
    /// Bytes between horizontally adjacent pixels; may be negative.
    pub pixel_space: Option<isize>,
    /// Bytes between vertically adjacent pixels; may be negative.
    pub line_space: Option<isize>,
    /// Byte offset of buffer pixel (0, 0) in the view.
    pub offset: usize,
}

impl PixelOptions {
    fn data_type(&self) -> Result<Option<DataType>> {
        self.data_type
            .as_deref()
            .map(|name| {
                DataType::from_name(name)
                    .ok_or_else(|| BindError::invalid(format!("unknown data type \"{name}\"")))
            })
            .transpose()
    }
}

/// A validated pixel transfer: native request plus buffer origin.
#[derive(Clone, Copy)]
struct Transfer {
    request: IoRequest,
    data: NativePtr,
}

impl RasterBand {
    /// Wrap a band pointer of `dataset`, reusing a live wrapper.
    pub(crate) fn wrap(dataset: &Dataset, ptr: NativePtr) -> Result<Self> {
        let parent = dataset.core();
        if !object_store().has(parent.raw()) {
            return Err(BindError::internal(format!(
                "parent dataset of band {ptr} is not registered"
            )));
        }
        let inner = object_store().wrap(ptr, parent.id(), |id| BandInner {
            core: NativeObject::child(ptr, id, parent.id(), parent.root_id(), "RasterBand"),
            dataset: dataset.clone(),
        })?;
        Ok(RasterBand(inner))
    }

    pub fn id(&self) -> ObjectId {
        self.0.core.id()
    }

    pub fn is_alive(&self) -> bool {
        self.0.core.is_alive()
    }

    pub fn dataset(&self) -> Dataset {
        self.0.dataset.clone()
    }

    pub(crate) fn core(&self) -> &NativeObject {
        &self.0.core
    }

    /// Band number within the dataset, from 1.
    pub fn index(&self) -> Result<usize> {
        self.0.core.call(|p| Ok(unsafe { raster::band_index(p) }))
    }

    pub fn size(&self) -> Result<(usize, usize)> {
        self.0.core.call(|p| Ok(unsafe { raster::band_size(p) }))
    }

    pub fn data_type(&self) -> Result<DataType> {
        self.0.core.call(|p| Ok(unsafe { raster::band_data_type(p) }))
    }

    pub fn nodata(&self) -> Result<Option<f64>> {
        self.0.core.call(|p| Ok(unsafe { raster::band_nodata(p) }))
    }

    pub fn set_nodata(&self, nodata: Option<f64>) -> Result<()> {
        self.0
            .core
            .call(|p| Ok(unsafe { raster::band_set_nodata(p, nodata) }))
    }

    fn transfer(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        view: &TypedView,
        options: &PixelOptions,
    ) -> Result<Transfer> {
        let data_type = match options.data_type()?.or(view.identify()) {
            Some(t) => t,
            None => self.data_type()?,
        };
        if x.checked_add(width).is_none() || y.checked_add(height).is_none() {
            return Err(BindError::invalid(format!(
                "window at ({x},{y}) of size {width}x{height} overflows"
            )));
        }
        let buf_width = options.buffer_width.unwrap_or(width);
        let buf_height = options.buffer_height.unwrap_or(height);
        let pixel_space = options.pixel_space.unwrap_or(data_type.size() as isize);
        let line_space = match options.line_space {
            Some(space) => space,
            None => isize::try_from(buf_width)
                .ok()
                .and_then(|w| pixel_space.checked_mul(w))
                .ok_or_else(|| {
                    BindError::invalid(format!("line spacing of a {buf_width} pixel row overflows"))
                })?,
        };
        let window = Window {
            width: buf_width,
            height: buf_height,
            pixel_stride: pixel_space,
            line_stride: line_space,
            offset: options.offset,
        };
        let data = view.validate_window(data_type, &window)?;
        Ok(Transfer {
            request: IoRequest {
                x_off: x,
                y_off: y,
                x_size: width,
                y_size: height,
                buf_width,
                buf_height,
                buf_type: data_type,
                pixel_space,
                line_space,
            },
            data,
        })
    }

    fn io(band: NativePtr, rw: RwFlag, t: Transfer) -> Result<()> {
        guarded_status(|| unsafe { raster::band_raster_io(band, rw, &t.request, t.data) })
    }

    /// Read a window into `view`.
    pub fn read(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        view: &TypedView,
        options: &PixelOptions,
    ) -> Result<()> {
        let t = self.transfer(x, y, width, height, view, options)?;
        self.0.core.call(|p| Self::io(p, RwFlag::Read, t))
    }

    /// Write a window from `view`.
    pub fn write(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        view: &TypedView,
        options: &PixelOptions,
    ) -> Result<()> {
        let t = self.transfer(x, y, width, height, view, options)?;
        self.0.core.call(|p| Self::io(p, RwFlag::Write, t))
    }

    fn io_async(
        &self,
        ctx: &MainContext,
        rw: RwFlag,
        window: (usize, usize, usize, usize),
        view: Arc<TypedView>,
        options: &PixelOptions,
        callback: impl FnOnce(Result<Arc<TypedView>>) + 'static,
    ) {
        let (x, y, width, height) = window;
        let prepared = self
            .transfer(x, y, width, height, &view, options)
            .and_then(|t| Ok((self.0.core.ptr()?, t)));
        let (band, t) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return callback(Err(e)),
        };
        let label = match rw {
            RwFlag::Read => "RasterBand::read",
            RwFlag::Write => "RasterBand::write",
        };
        Job::new(label, move |_| Self::io(band, rw, t))
            .lock(self.0.core.root_id())
            .persist(self.clone())
            .persist(view)
            .rval(|(), persisted| {
                persisted
                    .get::<Arc<TypedView>>()
                    .cloned()
                    .ok_or_else(|| BindError::internal("pixel buffer was not persisted"))
            })
            .run_async(ctx, callback);
    }

    /// Read a window into `view` on the worker pool. The view is handed
    /// back to `callback` once filled.
    pub fn read_async(
        &self,
        ctx: &MainContext,
        window: (usize, usize, usize, usize),
        view: Arc<TypedView>,
        options: &PixelOptions,
        callback: impl FnOnce(Result<Arc<TypedView>>) + 'static,
    ) {
        self.io_async(ctx, RwFlag::Read, window, view, options, callback)
    }

    pub fn write_async(
        &self,
        ctx: &MainContext,
        window: (usize, usize, usize, usize),
        view: Arc<TypedView>,
        options: &PixelOptions,
        callback: impl FnOnce(Result<Arc<TypedView>>) + 'static,
    ) {
        self.io_async(ctx, RwFlag::Write, window, view, options, callback)
    }

    pub fn fill(&self, value: f64) -> Result<()> {
        self.0
            .core
            .call(|p| guarded_status(|| unsafe { raster::band_fill(p, value) }))
    }

    fn statistics_job(&self, approx_ok: bool) -> Result<Job<Statistics>> {
        let band = self.0.core.ptr()?;
        Ok(Job::new("RasterBand::compute_statistics", move |progress| {
            guarded_opt(|| unsafe {
                raster::band_compute_statistics(band, approx_ok, &mut |complete, message| {
                    progress.report(complete, message)
                })
            })
        })
        .lock(self.0.core.root_id()))
    }

    /// Compute statistics on the calling thread. Returning false from
    /// `progress` cancels the scan.
    pub fn compute_statistics(
        &self,
        approx_ok: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<Statistics> {
        let job = self.statistics_job(approx_ok)?;
        match progress {
            Some(progress) => job.progress(progress).run_sync(),
            None => job.run_sync(),
        }
    }

    /// Compute statistics on the worker pool. Progress reports reach
    /// `progress` on `ctx` while the scan waits for each answer.
    pub fn compute_statistics_async(
        &self,
        ctx: &MainContext,
        approx_ok: bool,
        progress: Option<ProgressCallback>,
        callback: impl FnOnce(Result<Statistics>) + 'static,
    ) {
        let job = match self.statistics_job(approx_ok) {
            Ok(job) => job.persist(self.clone()),
            Err(e) => return callback(Err(e)),
        };
        match progress {
            Some(progress) => job.progress(progress).run_async(ctx, callback),
            None => job.run_async(ctx, callback),
        }
    }

    /// The band's color table, read-only.
    pub fn color_table(&self) -> Result<Option<ColorTable>> {
        let ptr = self
            .0
            .core
            .call(|p| Ok(unsafe { raster::band_color_table(p) }))?;
        if ptr.is_null() {
            return Ok(None);
        }
        ColorTable::wrap_band(self, ptr).map(Some)
    }

    /// Attach a copy of `table`, or remove the color table with `None`.
    pub fn set_color_table(&self, table: Option<&ColorTable>) -> Result<()> {
        let mut roots = vec![self.0.core.root_id()];
        if let Some(table) = table {
            roots.push(table.core().root_id());
        }
        let _guard = locks().acquire(&roots)?;
        let band = self.0.core.ptr()?;
        let source = match table {
            Some(table) => table.core().ptr()?,
            None => NativePtr::NULL,
        };
        // The band frees its previous table; its wrapper must not outlive it.
        let previous = unsafe { raster::band_color_table(band) };
        if !previous.is_null() && object_store().has(previous) {
            if let Ok(stale) = object_store().get_as::<ColorTableInner>(previous) {
                stale.core().dispose();
            }
        }
        guarded_status(|| unsafe { raster::band_set_color_table(band, source) })
    }
}

impl PartialEq for RasterBand {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for RasterBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0.core, f)
    }
}
