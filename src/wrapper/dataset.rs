//! Dataset wrapper: the root resource of a raster object graph.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::HostBuffer;
use crate::context::MainContext;
use crate::error::{BindError, Result};
use crate::job::Job;
use crate::lock::locks;
use crate::memfile::memfiles;
use crate::native::NativePtr;
use crate::native::error::{guarded, guarded_ptr, guarded_status};
use crate::native::raster::{self, DataType};
use crate::store::ObjectId;

use super::band::RasterBand;
use super::{NativeObject, register_root};

pub struct DatasetInner {
    core: NativeObject,
    // Host buffer a buffer-backed dataset reads from, held until close.
    source: Mutex<Option<HostBuffer>>,
}

/// An open raster dataset.
#[derive(Clone)]
pub struct Dataset(pub(crate) Arc<DatasetInner>);

unsafe fn destroy_dataset(ptr: NativePtr) {
    unsafe { raster::dataset_close(ptr) }
}

impl Dataset {
    fn from_owned(ptr: NativePtr, source: Option<HostBuffer>) -> Result<Self> {
        let inner = register_root(ptr, destroy_dataset, |id| DatasetInner {
            core: NativeObject::root(ptr, id, "Dataset", destroy_dataset),
            source: Mutex::new(source),
        })?;
        debug!(id = inner.core.id(), %ptr, "dataset opened");
        Ok(Dataset(inner))
    }

    /// Open a raster file or `/vsimem/` name.
    pub fn open(path: &str) -> Result<Self> {
        let ptr = guarded_ptr(|| raster::dataset_open(path))?;
        Self::from_owned(ptr, None)
    }

    /// Open on the worker pool; `callback` receives the dataset on `ctx`.
    pub fn open_async(
        ctx: &MainContext,
        path: impl Into<String>,
        callback: impl FnOnce(Result<Dataset>) + 'static,
    ) {
        let path = path.into();
        Job::new("Dataset::open", move |_| {
            guarded_ptr(|| raster::dataset_open(&path))
        })
        .rval(|ptr, _| Self::from_owned(ptr, None))
        .run_async(ctx, callback);
    }

    /// Open a dataset whose file content is held in a host buffer.
    ///
    /// The buffer is mapped as a virtual file without copying and kept
    /// alive by the dataset until it is closed.
    pub fn open_buffer(buffer: &HostBuffer) -> Result<Self> {
        let mapping = memfiles().get(buffer)?;
        let ptr = guarded_ptr(|| raster::dataset_open(mapping.filename()))?;
        Self::from_owned(ptr, Some(buffer.clone()))
    }

    /// Create an in-memory dataset.
    pub fn create(width: usize, height: usize, bands: usize, data_type: DataType) -> Result<Self> {
        let ptr = guarded_ptr(|| raster::dataset_create(width, height, bands, data_type))?;
        Self::from_owned(ptr, None)
    }

    /// Store id, also the id of the dataset's resource lock.
    pub fn id(&self) -> ObjectId {
        self.0.core.id()
    }

    pub fn is_alive(&self) -> bool {
        self.0.core.is_alive()
    }

    pub(crate) fn core(&self) -> &NativeObject {
        &self.0.core
    }

    pub fn driver(&self) -> Result<&'static str> {
        self.0.core.call(|p| Ok(unsafe { raster::dataset_driver(p) }))
    }

    pub fn description(&self) -> Result<String> {
        self.0.core.call(|p| Ok(unsafe { raster::dataset_description(p) }))
    }

    pub fn raster_size(&self) -> Result<(usize, usize)> {
        self.0.core.call(|p| Ok(unsafe { raster::dataset_raster_size(p) }))
    }

    pub fn bands(&self) -> DatasetBands<'_> {
        DatasetBands { dataset: self }
    }

    pub fn geo_transform(&self) -> Result<[f64; 6]> {
        self.0.core.call(|p| Ok(unsafe { raster::dataset_geo_transform(p) }))
    }

    pub fn set_geo_transform(&self, transform: [f64; 6]) -> Result<()> {
        self.0.core.call(|p| {
            guarded_status(|| unsafe { raster::dataset_set_geo_transform(p, transform) })
        })
    }

    pub fn metadata(&self) -> Result<Vec<(String, String)>> {
        self.0
            .core
            .call(|p| guarded(|| unsafe { raster::dataset_metadata(p) }))
    }

    pub fn set_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(BindError::invalid("metadata key must not be empty"));
        }
        self.0.core.call(|p| {
            guarded_status(|| unsafe { raster::dataset_set_metadata_item(p, key, value) })
        })
    }

    /// Close the dataset. Bands and other descendants become unusable.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.0.core.is_alive() {
            return Ok(());
        }
        // Wait for in-flight work on the dataset before destroying it.
        let _guard = locks().acquire(&[self.id()])?;
        self.0.core.dispose();
        self.0.source.lock().take();
        debug!(id = self.id(), "dataset closed");
        Ok(())
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0.core, f)
    }
}

/// The bands of a dataset, numbered from 1.
pub struct DatasetBands<'a> {
    dataset: &'a Dataset,
}

impl DatasetBands<'_> {
    pub fn count(&self) -> Result<usize> {
        self.dataset
            .0
            .core
            .call(|p| Ok(unsafe { raster::dataset_band_count(p) }))
    }

    /// Band `index`, counted from 1. Repeated calls return the same band.
    pub fn get(&self, index: usize) -> Result<RasterBand> {
        let ptr = self
            .dataset
            .0
            .core
            .call(|p| guarded_ptr(|| unsafe { raster::dataset_get_band(p, index) }))?;
        RasterBand::wrap(self.dataset, ptr)
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Result<RasterBand>> + '_> {
        let count = self.count()?;
        Ok((1..=count).map(move |i| self.get(i)))
    }
}
