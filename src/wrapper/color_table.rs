//! Color table wrapper.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BindError, Result};
use crate::native::NativePtr;
use crate::native::color::{self, ColorEntry, PaletteInterp};
use crate::native::error::{guarded_opt, guarded_ptr};
use crate::store::{ObjectId, object_store};

use super::band::RasterBand;
use super::{NativeObject, register_root};

/// One palette entry. The meaning of the components depends on the
/// table's interpretation (RGBA, CMYK, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub c1: i16,
    pub c2: i16,
    pub c3: i16,
    pub c4: i16,
}

impl From<ColorEntry> for Color {
    fn from([c1, c2, c3, c4]: ColorEntry) -> Self {
        Color { c1, c2, c3, c4 }
    }
}

impl From<Color> for ColorEntry {
    fn from(c: Color) -> Self {
        [c.c1, c.c2, c.c3, c.c4]
    }
}

pub struct ColorTableInner {
    core: NativeObject,
    // Set for a band's own table, which is read-only and dies with the band.
    band: Option<RasterBand>,
}

impl ColorTableInner {
    pub(crate) fn core(&self) -> &NativeObject {
        &self.core
    }
}

#[derive(Clone)]
pub struct ColorTable(pub(crate) Arc<ColorTableInner>);

unsafe fn destroy_color_table(ptr: NativePtr) {
    unsafe { color::color_table_destroy(ptr) }
}

impl ColorTable {
    fn from_owned(ptr: NativePtr) -> Result<Self> {
        let inner = register_root(ptr, destroy_color_table, |id| ColorTableInner {
            core: NativeObject::root(ptr, id, "ColorTable", destroy_color_table),
            band: None,
        })?;
        Ok(ColorTable(inner))
    }

    /// An empty table; `interpretation` is one of "Gray", "RGB", "CMYK" or
    /// "HLS".
    pub fn new(interpretation: &str) -> Result<Self> {
        let interp = PaletteInterp::from_name(interpretation).ok_or_else(|| {
            BindError::invalid(format!("unknown palette interpretation \"{interpretation}\""))
        })?;
        Self::from_owned(color::color_table_create(interp))
    }

    /// Wrap the table a band owns.
    pub(crate) fn wrap_band(band: &RasterBand, ptr: NativePtr) -> Result<Self> {
        let parent = band.core();
        let inner = object_store().wrap(ptr, parent.id(), |id| ColorTableInner {
            core: NativeObject::child(ptr, id, parent.id(), parent.root_id(), "ColorTable"),
            band: Some(band.clone()),
        })?;
        Ok(ColorTable(inner))
    }

    pub fn id(&self) -> ObjectId {
        self.0.core.id()
    }

    pub fn is_alive(&self) -> bool {
        self.0.core.is_alive()
    }

    pub(crate) fn core(&self) -> &NativeObject {
        &self.0.core
    }

    /// The band this table belongs to, if any.
    pub fn band(&self) -> Option<RasterBand> {
        self.0.band.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.0.band.is_some()
    }

    pub fn count(&self) -> Result<usize> {
        self.0
            .core
            .call(|p| Ok(unsafe { color::color_table_count(p) }))
    }

    pub fn interpretation(&self) -> Result<&'static str> {
        self.0
            .core
            .call(|p| Ok(unsafe { color::color_table_interpretation(p) }.name()))
    }

    pub fn get(&self, index: usize) -> Result<Color> {
        self.0.core.call(|p| {
            guarded_opt(|| unsafe { color::color_table_get_entry(p, index) }).map(Color::from)
        })
    }

    /// Set entry `index`, growing the table if needed.
    pub fn set(&self, index: usize, color: Color) -> Result<()> {
        if self.is_read_only() {
            return Err(BindError::invalid(
                "color table of a raster band is read-only; set a modified copy instead",
            ));
        }
        self.0.core.call(|p| {
            unsafe { color::color_table_set_entry(p, index, color.into()) };
            Ok(())
        })
    }

    /// An owned, writable copy.
    pub fn clone_table(&self) -> Result<ColorTable> {
        let ptr = self
            .0
            .core
            .call(|p| guarded_ptr(|| unsafe { color::color_table_clone(p) }))?;
        Self::from_owned(ptr)
    }
}

impl PartialEq for ColorTable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ColorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0.core, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::raster::DataType;
    use crate::wrapper::Dataset;

    #[test]
    fn owned_table_is_writable() {
        let table = ColorTable::new("rgb").unwrap();
        assert_eq!(table.interpretation().unwrap(), "RGB");
        table.set(1, Color::from([1, 2, 3, 4])).unwrap();
        assert_eq!(table.count().unwrap(), 2);
        assert_eq!(table.get(0).unwrap(), Color::default());
        assert!(table.get(5).unwrap_err().is_native());
        assert!(matches!(
            ColorTable::new("YUV"),
            Err(BindError::InvalidArgument(_))
        ));
    }

    #[test]
    fn band_table_is_read_only_but_cloneable() {
        let ds = Dataset::create(1, 1, 1, DataType::Byte).unwrap();
        let band = ds.bands().get(1).unwrap();
        let source = ColorTable::new("Gray").unwrap();
        source.set(0, Color::from([9, 9, 9, 255])).unwrap();
        band.set_color_table(Some(&source)).unwrap();

        let attached = band.color_table().unwrap().unwrap();
        assert!(attached.is_read_only());
        assert_eq!(attached.band(), Some(band.clone()));
        assert!(matches!(
            attached.set(0, Color::default()),
            Err(BindError::InvalidArgument(_))
        ));

        let copy = attached.clone_table().unwrap();
        copy.set(0, Color::default()).unwrap();
        assert_eq!(attached.get(0).unwrap(), Color::from([9, 9, 9, 255]));

        ds.close().unwrap();
        assert!(!attached.is_alive());
        assert!(copy.is_alive());
        assert_eq!(copy.count().unwrap(), 1);
    }

    #[test]
    fn color_serializes_by_component() {
        let json = serde_json::to_string(&Color::from([1, 2, 3, 4])).unwrap();
        assert_eq!(json, r#"{"c1":1,"c2":2,"c3":3,"c4":4}"#);
    }
}
