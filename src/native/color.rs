//! Palette color tables.

use super::NativePtr;
use super::error::{ErrorNum, report};

/// How the four entry components are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteInterp {
    Gray,
    Rgb,
    Cmyk,
    Hls,
}

impl PaletteInterp {
    pub fn name(self) -> &'static str {
        match self {
            PaletteInterp::Gray => "Gray",
            PaletteInterp::Rgb => "RGB",
            PaletteInterp::Cmyk => "CMYK",
            PaletteInterp::Hls => "HLS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GRAY" | "GREY" => Some(PaletteInterp::Gray),
            "RGB" => Some(PaletteInterp::Rgb),
            "CMYK" => Some(PaletteInterp::Cmyk),
            "HLS" => Some(PaletteInterp::Hls),
            _ => None,
        }
    }
}

/// One palette entry.
pub type ColorEntry = [i16; 4];

#[derive(Debug, Clone)]
pub struct NativeColorTable {
    interp: PaletteInterp,
    entries: Vec<ColorEntry>,
}

pub fn color_table_create(interp: PaletteInterp) -> NativePtr {
    NativePtr::from_box(Box::new(NativeColorTable {
        interp,
        entries: Vec::new(),
    }))
}

pub(crate) fn color_table_boxed(table: &NativeColorTable) -> Box<NativeColorTable> {
    Box::new(table.clone())
}

/// # Safety
///
/// `ct` must be a live table created by [`color_table_create`] or
/// [`color_table_clone`], and not owned by a band.
pub unsafe fn color_table_destroy(ct: NativePtr) {
    drop(unsafe { ct.into_box::<NativeColorTable>() });
}

/// # Safety
///
/// `ct` must be a live color table.
pub unsafe fn color_table_clone(ct: NativePtr) -> NativePtr {
    let table = unsafe { ct.as_mut::<NativeColorTable>() };
    NativePtr::from_box(color_table_boxed(table))
}

/// # Safety
///
/// `ct` must be a live color table.
pub unsafe fn color_table_count(ct: NativePtr) -> usize {
    unsafe { ct.as_mut::<NativeColorTable>() }.entries.len()
}

/// # Safety
///
/// `ct` must be a live color table.
pub unsafe fn color_table_interpretation(ct: NativePtr) -> PaletteInterp {
    unsafe { ct.as_mut::<NativeColorTable>() }.interp
}

/// # Safety
///
/// `ct` must be a live color table.
pub unsafe fn color_table_get_entry(ct: NativePtr, index: usize) -> Option<ColorEntry> {
    let table = unsafe { ct.as_mut::<NativeColorTable>() };
    let entry = table.entries.get(index).copied();
    if entry.is_none() {
        report(
            ErrorNum::IllegalArg,
            format!(
                "color entry {index} out of range (table has {} entries)",
                table.entries.len()
            ),
        );
    }
    entry
}

/// Set an entry, growing the table with zeroed entries if needed.
///
/// # Safety
///
/// `ct` must be a live color table.
pub unsafe fn color_table_set_entry(ct: NativePtr, index: usize, entry: ColorEntry) {
    let table = unsafe { ct.as_mut::<NativeColorTable>() };
    if index >= table.entries.len() {
        table.entries.resize(index + 1, [0, 0, 0, 0]);
    }
    table.entries[index] = entry;
}
