//! Raster datasets and bands.
//!
//! Two drivers are available: `MEM` (created in memory with
//! [`dataset_create`]) and `AAIGrid` (ESRI ASCII grid, opened from a path or
//! a `/vsimem/` virtual file with [`dataset_open`]). A band is owned by its
//! dataset and is destroyed together with it.

use std::collections::BTreeMap;

use super::NativePtr;
use super::color::{NativeColorTable, color_table_boxed};
use super::error::{CplErr, ErrorNum, fail, report};
use super::vsi;

/// Pixel data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Byte,
        DataType::Int8,
        DataType::UInt16,
        DataType::Int16,
        DataType::UInt32,
        DataType::Int32,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Byte | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::Int8 => "Int8",
            DataType::UInt16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::UInt32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }

    /// Parse a type name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// # Safety
    ///
    /// `p` must be valid for reading `self.size()` bytes.
    pub(crate) unsafe fn read(self, p: *const u8) -> f64 {
        unsafe {
            match self {
                DataType::Byte => p.read() as f64,
                DataType::Int8 => p.cast::<i8>().read() as f64,
                DataType::UInt16 => p.cast::<u16>().read_unaligned() as f64,
                DataType::Int16 => p.cast::<i16>().read_unaligned() as f64,
                DataType::UInt32 => p.cast::<u32>().read_unaligned() as f64,
                DataType::Int32 => p.cast::<i32>().read_unaligned() as f64,
                DataType::Float32 => p.cast::<f32>().read_unaligned() as f64,
                DataType::Float64 => p.cast::<f64>().read_unaligned(),
            }
        }
    }

    /// Store `v`, rounding and saturating for integer types.
    ///
    /// # Safety
    ///
    /// `p` must be valid for writing `self.size()` bytes.
    pub(crate) unsafe fn write(self, p: *mut u8, v: f64) {
        let int = if v.is_nan() { 0.0 } else { v.round() };
        unsafe {
            match self {
                DataType::Byte => p.write(int as u8),
                DataType::Int8 => p.cast::<i8>().write(int as i8),
                DataType::UInt16 => p.cast::<u16>().write_unaligned(int as u16),
                DataType::Int16 => p.cast::<i16>().write_unaligned(int as i16),
                DataType::UInt32 => p.cast::<u32>().write_unaligned(int as u32),
                DataType::Int32 => p.cast::<i32>().write_unaligned(int as i32),
                DataType::Float32 => p.cast::<f32>().write_unaligned(v as f32),
                DataType::Float64 => p.cast::<f64>().write_unaligned(v),
            }
        }
    }
}

/// Direction of a raster I/O call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwFlag {
    Read,
    Write,
}

/// Window and buffer layout of a raster I/O call.
///
/// Spacings are in bytes and may be negative; the data pointer passed
/// alongside addresses buffer pixel (0, 0).
#[derive(Debug, Clone, Copy)]
pub struct IoRequest {
    pub x_off: usize,
    pub y_off: usize,
    pub x_size: usize,
    pub y_size: usize,
    pub buf_width: usize,
    pub buf_height: usize,
    pub buf_type: DataType,
    pub pixel_space: isize,
    pub line_space: isize,
}

/// Band statistics over valid (non-nodata, non-NaN) pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub valid_count: u64,
}

pub struct NativeDataset {
    driver: &'static str,
    description: String,
    width: usize,
    height: usize,
    bands: Vec<Box<NativeBand>>,
    geo_transform: [f64; 6],
    metadata: BTreeMap<String, String>,
}

pub struct NativeBand {
    index: usize,
    dataset: NativePtr,
    width: usize,
    height: usize,
    data_type: DataType,
    data: Vec<u8>,
    nodata: Option<f64>,
    color_table: Option<Box<NativeColorTable>>,
}

const DEFAULT_GEO_TRANSFORM: [f64; 6] = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

fn build_dataset(
    driver: &'static str,
    description: String,
    width: usize,
    height: usize,
    band_data: Vec<(DataType, Vec<u8>, Option<f64>)>,
    geo_transform: [f64; 6],
) -> NativePtr {
    let mut ds = Box::new(NativeDataset {
        driver,
        description,
        width,
        height,
        bands: Vec::with_capacity(band_data.len()),
        geo_transform,
        metadata: BTreeMap::new(),
    });
    let ds_ptr = NativePtr::from_raw(&*ds as *const NativeDataset);
    for (i, (data_type, data, nodata)) in band_data.into_iter().enumerate() {
        ds.bands.push(Box::new(NativeBand {
            index: i + 1,
            dataset: ds_ptr,
            width,
            height,
            data_type,
            data,
            nodata,
            color_table: None,
        }));
    }
    NativePtr::from_box(ds)
}

/// Create an in-memory dataset with zero-filled bands.
pub fn dataset_create(
    width: usize,
    height: usize,
    band_count: usize,
    data_type: DataType,
) -> NativePtr {
    if width == 0 || height == 0 {
        report(
            ErrorNum::IllegalArg,
            format!("Invalid dataset dimensions : {width} x {height}"),
        );
        return NativePtr::NULL;
    }
    let Some(bytes) = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(data_type.size()))
    else {
        report(ErrorNum::OutOfMemory, "dataset too large");
        return NativePtr::NULL;
    };
    let bands = (0..band_count)
        .map(|_| (data_type, vec![0u8; bytes], None))
        .collect();
    build_dataset(
        "MEM",
        String::new(),
        width,
        height,
        bands,
        DEFAULT_GEO_TRANSFORM,
    )
}

/// Open a dataset from a filesystem path or a `/vsimem/` name.
pub fn dataset_open(path: &str) -> NativePtr {
    let bytes = if path.starts_with(vsi::VSIMEM_ROOT) {
        // SAFETY: registered regions are kept valid by whoever registered them.
        unsafe { vsi::read_file(path) }
    } else {
        std::fs::read(path).ok()
    };
    let Some(bytes) = bytes else {
        report(
            ErrorNum::OpenFailed,
            format!("{path}: No such file or directory"),
        );
        return NativePtr::NULL;
    };
    let grid = std::str::from_utf8(&bytes)
        .ok()
        .and_then(|text| parse_ascii_grid(text).transpose());
    match grid {
        Some(Ok(grid)) => build_dataset(
            "AAIGrid",
            path.to_string(),
            grid.ncols,
            grid.nrows,
            vec![(grid.data_type, grid.data, grid.nodata)],
            grid.geo_transform,
        ),
        Some(Err(msg)) => {
            report(ErrorNum::FileIo, format!("{path}: {msg}"));
            NativePtr::NULL
        }
        None => {
            report(
                ErrorNum::OpenFailed,
                format!("`{path}' not recognized as a supported file format."),
            );
            NativePtr::NULL
        }
    }
}

struct AsciiGrid {
    ncols: usize,
    nrows: usize,
    data_type: DataType,
    data: Vec<u8>,
    nodata: Option<f64>,
    geo_transform: [f64; 6],
}

/// Ok(None) when the text is not an ASCII grid at all, Err when it is one
/// but malformed.
fn parse_ascii_grid(text: &str) -> Result<Option<AsciiGrid>, String> {
    let mut tokens = text.split_whitespace().peekable();
    let mut header: BTreeMap<String, f64> = BTreeMap::new();
    while let Some(tok) = tokens.peek() {
        if !tok.starts_with(|c: char| c.is_ascii_alphabetic()) {
            break;
        }
        let key = tok.to_ascii_lowercase();
        tokens.next();
        let value = tokens
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| format!("missing value for header {key}"))?;
        header.insert(key, value);
    }
    let (Some(ncols), Some(nrows)) = (header.get("ncols"), header.get("nrows")) else {
        return Ok(None);
    };
    let (ncols, nrows) = (*ncols as usize, *nrows as usize);
    if ncols == 0 || nrows == 0 {
        return Err("empty grid".into());
    }
    let cellsize = header.get("cellsize").copied().unwrap_or(1.0);
    let (xll, yll) = match (header.get("xllcorner"), header.get("yllcorner")) {
        (Some(x), Some(y)) => (*x, *y),
        _ => (
            header.get("xllcenter").copied().unwrap_or(0.0) - cellsize / 2.0,
            header.get("yllcenter").copied().unwrap_or(0.0) - cellsize / 2.0,
        ),
    };
    let nodata = header.get("nodata_value").copied();

    let raw: Vec<&str> = tokens.collect();
    if raw.len() < ncols * nrows {
        return Err(format!(
            "too few values: expected {}, found {}",
            ncols * nrows,
            raw.len()
        ));
    }
    let raw = &raw[..ncols * nrows];
    let integral = raw.iter().all(|t| t.parse::<i64>().is_ok());
    let data_type = if integral {
        DataType::Int32
    } else {
        DataType::Float32
    };
    let mut data = vec![0u8; raw.len() * data_type.size()];
    for (i, tok) in raw.iter().enumerate() {
        let v: f64 = tok.parse().map_err(|_| format!("invalid value `{tok}'"))?;
        // SAFETY: `data` holds exactly one element per token.
        unsafe { data_type.write(data.as_mut_ptr().add(i * data_type.size()), v) };
    }
    Ok(Some(AsciiGrid {
        ncols,
        nrows,
        data_type,
        data,
        nodata,
        geo_transform: [
            xll,
            cellsize,
            0.0,
            yll + nrows as f64 * cellsize,
            0.0,
            -cellsize,
        ],
    }))
}

/// # Safety
///
/// `ds` must be a live dataset; all its band handles become invalid.
pub unsafe fn dataset_close(ds: NativePtr) {
    drop(unsafe { ds.into_box::<NativeDataset>() });
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_driver(ds: NativePtr) -> &'static str {
    unsafe { ds.as_mut::<NativeDataset>() }.driver
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_description(ds: NativePtr) -> String {
    unsafe { ds.as_mut::<NativeDataset>() }.description.clone()
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_raster_size(ds: NativePtr) -> (usize, usize) {
    let ds = unsafe { ds.as_mut::<NativeDataset>() };
    (ds.width, ds.height)
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_band_count(ds: NativePtr) -> usize {
    unsafe { ds.as_mut::<NativeDataset>() }.bands.len()
}

/// Band handle by 1-based index; the handle is owned by the dataset.
///
/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_get_band(ds: NativePtr, index: usize) -> NativePtr {
    let ds = unsafe { ds.as_mut::<NativeDataset>() };
    match index.checked_sub(1).and_then(|i| ds.bands.get(i)) {
        Some(band) => NativePtr::from_raw(&**band as *const NativeBand),
        None => {
            report(
                ErrorNum::IllegalArg,
                format!("GetRasterBand({index}) - Illegal band #"),
            );
            NativePtr::NULL
        }
    }
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_geo_transform(ds: NativePtr) -> [f64; 6] {
    unsafe { ds.as_mut::<NativeDataset>() }.geo_transform
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_set_geo_transform(ds: NativePtr, gt: [f64; 6]) -> CplErr {
    if gt[1] == 0.0 || gt[5] == 0.0 {
        return fail(ErrorNum::IllegalArg, "geotransform pixel size cannot be zero");
    }
    unsafe { ds.as_mut::<NativeDataset>() }.geo_transform = gt;
    CplErr::None
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_metadata(ds: NativePtr) -> Vec<(String, String)> {
    unsafe { ds.as_mut::<NativeDataset>() }
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// # Safety
///
/// `ds` must be a live dataset.
pub unsafe fn dataset_set_metadata_item(ds: NativePtr, key: &str, value: &str) -> CplErr {
    if key.is_empty() || key.contains('=') {
        return fail(ErrorNum::IllegalArg, format!("invalid metadata key `{key}'"));
    }
    unsafe { ds.as_mut::<NativeDataset>() }
        .metadata
        .insert(key.to_string(), value.to_string());
    CplErr::None
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_size(band: NativePtr) -> (usize, usize) {
    let b = unsafe { band.as_mut::<NativeBand>() };
    (b.width, b.height)
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_data_type(band: NativePtr) -> DataType {
    unsafe { band.as_mut::<NativeBand>() }.data_type
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_index(band: NativePtr) -> usize {
    unsafe { band.as_mut::<NativeBand>() }.index
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_dataset(band: NativePtr) -> NativePtr {
    unsafe { band.as_mut::<NativeBand>() }.dataset
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_nodata(band: NativePtr) -> Option<f64> {
    unsafe { band.as_mut::<NativeBand>() }.nodata
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_set_nodata(band: NativePtr, nodata: Option<f64>) {
    unsafe { band.as_mut::<NativeBand>() }.nodata = nodata;
}

fn nearest(index: usize, buf_len: usize, win_len: usize) -> usize {
    let src = ((index as f64 + 0.5) * win_len as f64 / buf_len as f64) as usize;
    src.min(win_len - 1)
}

/// Read or write a window of the band through a strided buffer.
///
/// Reads resample with nearest neighbour when the buffer size differs from
/// the window; writes require equal sizes.
///
/// # Safety
///
/// `band` must be a live band and `data` must address a buffer covering
/// every pixel the request touches.
pub unsafe fn band_raster_io(
    band: NativePtr,
    rw: RwFlag,
    req: &IoRequest,
    data: NativePtr,
) -> CplErr {
    let b = unsafe { band.as_mut::<NativeBand>() };
    let fits = |off: usize, size: usize, limit: usize| {
        size > 0 && off.checked_add(size).is_some_and(|end| end <= limit)
    };
    if !fits(req.x_off, req.x_size, b.width) || !fits(req.y_off, req.y_size, b.height) {
        return fail(
            ErrorNum::IllegalArg,
            format!(
                "Access window out of range in RasterIO().  Requested ({},{}) of size {}x{} on raster of {}x{}.",
                req.x_off, req.y_off, req.x_size, req.y_size, b.width, b.height
            ),
        );
    }
    if req.buf_width == 0 || req.buf_height == 0 {
        return fail(ErrorNum::IllegalArg, "RasterIO() buffer has no pixels");
    }
    if rw == RwFlag::Write && (req.buf_width != req.x_size || req.buf_height != req.y_size) {
        return fail(
            ErrorNum::NotSupported,
            "RasterIO() write with resampling is not supported",
        );
    }
    let elem = b.data_type.size();
    let base = data.as_byte_ptr();
    for by in 0..req.buf_height {
        let sy = req.y_off + nearest(by, req.buf_height, req.y_size);
        for bx in 0..req.buf_width {
            let sx = req.x_off + nearest(bx, req.buf_width, req.x_size);
            let band_off = (sy * b.width + sx) * elem;
            let buf_ptr = base.wrapping_offset(
                (bx as isize)
                    .wrapping_mul(req.pixel_space)
                    .wrapping_add((by as isize).wrapping_mul(req.line_space)),
            );
            unsafe {
                match rw {
                    RwFlag::Read => {
                        let v = b.data_type.read(b.data.as_ptr().add(band_off));
                        req.buf_type.write(buf_ptr, v);
                    }
                    RwFlag::Write => {
                        let v = req.buf_type.read(buf_ptr);
                        b.data_type.write(b.data.as_mut_ptr().add(band_off), v);
                    }
                }
            }
        }
    }
    CplErr::None
}

/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_fill(band: NativePtr, value: f64) -> CplErr {
    let b = unsafe { band.as_mut::<NativeBand>() };
    let elem = b.data_type.size();
    for i in 0..b.width * b.height {
        unsafe { b.data_type.write(b.data.as_mut_ptr().add(i * elem), value) };
    }
    CplErr::None
}

/// Compute statistics row by row, reporting progress after each row.
///
/// Returning false from `progress` aborts with a user-interrupt error.
/// With `approx_ok` every other row is sampled.
///
/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_compute_statistics(
    band: NativePtr,
    approx_ok: bool,
    progress: &mut dyn FnMut(f64, &str) -> bool,
) -> Option<Statistics> {
    let b = unsafe { band.as_mut::<NativeBand>() };
    let step = if approx_ok && b.height > 1 { 2 } else { 1 };
    let rows = b.height.div_ceil(step);
    let elem = b.data_type.size();
    let (mut count, mut sum, mut sum_sq) = (0u64, 0.0f64, 0.0f64);
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for (done, y) in (0..b.height).step_by(step).enumerate() {
        for x in 0..b.width {
            let v = unsafe { b.data_type.read(b.data.as_ptr().add((y * b.width + x) * elem)) };
            if v.is_nan() || b.nodata == Some(v) {
                continue;
            }
            count += 1;
            sum += v;
            sum_sq += v * v;
            min = min.min(v);
            max = max.max(v);
        }
        if !progress((done + 1) as f64 / rows as f64, "Compute Statistics") {
            report(ErrorNum::UserInterrupt, "User terminated");
            return None;
        }
    }
    if count == 0 {
        report(
            ErrorNum::AppDefined,
            "Failed to compute statistics, no valid pixels found in sampling.",
        );
        return None;
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    Some(Statistics {
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
        valid_count: count,
    })
}

/// Color table attached to the band, owned by the band. Null if none.
///
/// # Safety
///
/// `band` must be a live band.
pub unsafe fn band_color_table(band: NativePtr) -> NativePtr {
    match &unsafe { band.as_mut::<NativeBand>() }.color_table {
        Some(ct) => NativePtr::from_raw(&**ct as *const NativeColorTable),
        None => NativePtr::NULL,
    }
}

/// Replace the band's color table with a copy of `ct` (null clears it).
/// The previous table handle becomes invalid.
///
/// # Safety
///
/// `band` must be a live band; `ct` must be null or a live color table.
pub unsafe fn band_set_color_table(band: NativePtr, ct: NativePtr) -> CplErr {
    let b = unsafe { band.as_mut::<NativeBand>() };
    b.color_table = if ct.is_null() {
        None
    } else {
        Some(color_table_boxed(unsafe { ct.as_mut::<NativeColorTable>() }))
    };
    CplErr::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;
    use crate::native::error::{guarded, guarded_ptr, guarded_status, take_last_error};

    const GRID: &str = "ncols 3\nnrows 2\nxllcorner 10\nyllcorner 20\ncellsize 2\nNODATA_value -9999\n1 2 3\n4 -9999 6\n";

    #[test]
    fn data_type_names_round_trip() {
        for t in DataType::ALL {
            assert_eq!(DataType::from_name(t.name()), Some(t));
        }
        assert_eq!(DataType::from_name("float32"), Some(DataType::Float32));
        assert_eq!(DataType::from_name("Complex64"), None);
    }

    #[test]
    fn integer_writes_round_and_saturate() {
        let mut buf = [0u8; 2];
        unsafe {
            DataType::Byte.write(buf.as_mut_ptr(), 300.0);
            assert_eq!(DataType::Byte.read(buf.as_ptr()), 255.0);
            DataType::Int16.write(buf.as_mut_ptr(), -2.6);
            assert_eq!(DataType::Int16.read(buf.as_ptr()), -3.0);
        }
    }

    #[test]
    fn open_ascii_grid_from_vsimem() {
        let name = "/vsimem/test/raster_open_grid.asc";
        unsafe { vsi::file_from_mem_buffer(name, GRID.as_ptr(), GRID.len()) };
        let ds = guarded_ptr(|| dataset_open(name)).unwrap();
        unsafe {
            assert_eq!(dataset_driver(ds), "AAIGrid");
            assert_eq!(dataset_raster_size(ds), (3, 2));
            assert_eq!(dataset_geo_transform(ds), [10.0, 2.0, 0.0, 24.0, 0.0, -2.0]);
            let band = dataset_get_band(ds, 1);
            assert_eq!(band_data_type(band), DataType::Int32);
            assert_eq!(band_nodata(band), Some(-9999.0));
            let mut out = [0i32; 6];
            let req = IoRequest {
                x_off: 0,
                y_off: 0,
                x_size: 3,
                y_size: 2,
                buf_width: 3,
                buf_height: 2,
                buf_type: DataType::Int32,
                pixel_space: 4,
                line_space: 12,
            };
            guarded_status(|| {
                band_raster_io(band, RwFlag::Read, &req, NativePtr::from_raw(out.as_mut_ptr()))
            })
            .unwrap();
            assert_eq!(out, [1, 2, 3, 4, -9999, 6]);
            dataset_close(ds);
        }
        vsi::unlink(name);
    }

    #[test]
    fn open_unknown_format_fails_with_message() {
        let name = "/vsimem/test/raster_not_a_grid";
        let junk = b"\x89PNG....";
        unsafe { vsi::file_from_mem_buffer(name, junk.as_ptr(), junk.len()) };
        let err = guarded_ptr(|| dataset_open(name)).unwrap_err();
        assert!(err.to_string().contains("not recognized"));
        vsi::unlink(name);
        assert!(guarded_ptr(|| dataset_open("/no/such/file.asc")).is_err());
    }

    #[test]
    fn wrapping_window_offset_is_out_of_range() {
        let ds = dataset_create(4, 4, 1, DataType::Byte);
        unsafe {
            let band = dataset_get_band(ds, 1);
            let mut dst = [0u8; 4];
            let req = IoRequest {
                x_off: usize::MAX,
                y_off: 0,
                x_size: 2,
                y_size: 2,
                buf_width: 2,
                buf_height: 2,
                buf_type: DataType::Byte,
                pixel_space: 1,
                line_space: 2,
            };
            let err = guarded_status(|| {
                band_raster_io(band, RwFlag::Read, &req, NativePtr::from_raw(dst.as_mut_ptr()))
            })
            .unwrap_err();
            assert!(matches!(
                err,
                BindError::Native {
                    code: ErrorNum::IllegalArg,
                    ..
                }
            ));
            assert!(err.to_string().starts_with("Access window out of range"));
            dataset_close(ds);
        }
    }

    #[test]
    fn out_of_range_band_reports_error() {
        let ds = dataset_create(2, 2, 1, DataType::Byte);
        let err = guarded_ptr(|| unsafe { dataset_get_band(ds, 2) }).unwrap_err();
        assert!(err.to_string().contains("Illegal band"));
        unsafe { dataset_close(ds) };
    }

    #[test]
    fn flipped_stride_read() {
        let ds = dataset_create(3, 1, 1, DataType::Byte);
        unsafe {
            let band = dataset_get_band(ds, 1);
            let src = [1u8, 2, 3];
            let w = IoRequest {
                x_off: 0,
                y_off: 0,
                x_size: 3,
                y_size: 1,
                buf_width: 3,
                buf_height: 1,
                buf_type: DataType::Byte,
                pixel_space: 1,
                line_space: 3,
            };
            band_raster_io(band, RwFlag::Write, &w, NativePtr::from_raw(src.as_ptr()));
            let mut dst = [0u8; 3];
            let r = IoRequest {
                pixel_space: -1,
                ..w
            };
            let start = NativePtr::from_raw(dst.as_mut_ptr().wrapping_add(2));
            band_raster_io(band, RwFlag::Read, &r, start);
            assert_eq!(dst, [3, 2, 1]);
            dataset_close(ds);
        }
    }

    #[test]
    fn downsampled_read_uses_nearest() {
        let ds = dataset_create(4, 4, 1, DataType::Byte);
        unsafe {
            let band = dataset_get_band(ds, 1);
            let src: Vec<u8> = (0..16).collect();
            let w = IoRequest {
                x_off: 0,
                y_off: 0,
                x_size: 4,
                y_size: 4,
                buf_width: 4,
                buf_height: 4,
                buf_type: DataType::Byte,
                pixel_space: 1,
                line_space: 4,
            };
            band_raster_io(band, RwFlag::Write, &w, NativePtr::from_raw(src.as_ptr()));
            let mut dst = [0f64; 4];
            let r = IoRequest {
                buf_width: 2,
                buf_height: 2,
                buf_type: DataType::Float64,
                pixel_space: 8,
                line_space: 16,
                ..w
            };
            band_raster_io(band, RwFlag::Read, &r, NativePtr::from_raw(dst.as_mut_ptr()));
            assert_eq!(dst, [5.0, 7.0, 13.0, 15.0]);
            dataset_close(ds);
        }
    }

    #[test]
    fn statistics_skip_nodata_and_can_cancel() {
        let name = "/vsimem/test/raster_stats_grid.asc";
        unsafe { vsi::file_from_mem_buffer(name, GRID.as_ptr(), GRID.len()) };
        let ds = dataset_open(name);
        unsafe {
            let band = dataset_get_band(ds, 1);
            let mut calls = 0;
            let stats = guarded(|| {
                band_compute_statistics(band, false, &mut |_, _| {
                    calls += 1;
                    true
                })
            })
            .unwrap()
            .unwrap();
            assert_eq!(calls, 2);
            assert_eq!(stats.valid_count, 5);
            assert_eq!(stats.min, 1.0);
            assert_eq!(stats.max, 6.0);
            assert!((stats.mean - 3.2).abs() < 1e-12);

            assert!(band_compute_statistics(band, false, &mut |_, _| false).is_none());
            let (num, msg) = take_last_error().unwrap();
            assert_eq!(num, ErrorNum::UserInterrupt);
            assert_eq!(msg, "User terminated");
            dataset_close(ds);
        }
        vsi::unlink(name);
    }

    #[test]
    fn write_out_of_window_is_rejected() {
        let ds = dataset_create(2, 2, 1, DataType::Byte);
        unsafe {
            let band = dataset_get_band(ds, 1);
            let src = [0u8; 9];
            let req = IoRequest {
                x_off: 1,
                y_off: 1,
                x_size: 3,
                y_size: 3,
                buf_width: 3,
                buf_height: 3,
                buf_type: DataType::Byte,
                pixel_space: 1,
                line_space: 3,
            };
            let err = guarded_status(|| {
                band_raster_io(band, RwFlag::Write, &req, NativePtr::from_raw(src.as_ptr()))
            })
            .unwrap_err();
            assert!(err.to_string().starts_with("Access window out of range"));
            dataset_close(ds);
        }
    }
}
