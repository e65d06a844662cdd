//! Typed views over pixel memory.
//!
//! A [`TypedView`] is a fixed-width numeric array tagged with its element
//! [`DataType`]. It either owns a freshly allocated zeroed store, overlays
//! memory owned by someone else, or wraps an untagged host byte buffer.
//! Before a pointer from a view reaches a native I/O call the tag and the
//! extent of the access are checked against the view.

use std::fmt;

use crate::buffer::HostBuffer;
use crate::error::{BindError, Result};
use crate::native::NativePtr;
use crate::native::raster::DataType;

/// Largest byte size a view may have: the biggest integer a host double
/// represents exactly.
pub const MAX_SAFE_BYTES: u64 = (1 << 53) - 1;

enum Backing {
    // u64 words keep every element type aligned.
    Owned(#[allow(dead_code)] Box<[u64]>),
    Host(#[allow(dead_code)] HostBuffer),
    External,
}

pub struct TypedView {
    tag: Option<DataType>,
    ptr: *mut u8,
    byte_len: usize,
    backing: Backing,
}

// The view is a plain region of bytes; callers serialise access to the
// native memory behind it through the resource locks.
unsafe impl Send for TypedView {}
unsafe impl Sync for TypedView {}

fn byte_size(data_type: DataType, count: usize) -> Result<usize> {
    let bytes = (count as u64)
        .checked_mul(data_type.size() as u64)
        .filter(|b| *b <= MAX_SAFE_BYTES)
        .ok_or_else(|| {
            BindError::invalid(format!(
                "{count} {} elements exceed the maximum view size",
                data_type.name()
            ))
        })?;
    usize::try_from(bytes).map_err(|_| BindError::invalid("view size exceeds address space"))
}

impl TypedView {
    /// Allocate a zeroed view of `count` elements.
    pub fn allocate(data_type: DataType, count: usize) -> Result<Self> {
        let bytes = byte_size(data_type, count)?;
        let mut words = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();
        Ok(Self {
            tag: Some(data_type),
            ptr: words.as_mut_ptr().cast(),
            byte_len: bytes,
            backing: Backing::Owned(words),
        })
    }

    /// View `count` elements of memory owned elsewhere, without copying.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `count` elements of
    /// `data_type` for as long as the view is used.
    pub unsafe fn overlay(data_type: DataType, ptr: *mut u8, count: usize) -> Result<Self> {
        let bytes = byte_size(data_type, count)?;
        if ptr.is_null() && bytes > 0 {
            return Err(BindError::invalid("cannot overlay a null pointer"));
        }
        Ok(Self {
            tag: Some(data_type),
            ptr,
            byte_len: bytes,
            backing: Backing::External,
        })
    }

    /// Untagged view over a host byte buffer. [`TypedView::identify`]
    /// returns `None` for it.
    pub fn from_host_bytes(buffer: HostBuffer) -> Self {
        Self {
            tag: None,
            ptr: buffer.as_ptr().cast_mut(),
            byte_len: buffer.len(),
            backing: Backing::Host(buffer),
        }
    }

    /// The element type the view was tagged with, if any.
    pub fn identify(&self) -> Option<DataType> {
        self.tag
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Element count; bytes for an untagged view.
    pub fn len(&self) -> usize {
        self.byte_len / self.tag.map_or(1, DataType::size)
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    pub fn is_external(&self) -> bool {
        matches!(self.backing, Backing::External)
    }

    fn check_tag(&self, expected: DataType) -> Result<()> {
        match self.tag {
            Some(tag) if tag == expected => Ok(()),
            found => Err(BindError::TypeMismatch {
                expected: expected.name(),
                found: found.map_or("Unknown", DataType::name),
            }),
        }
    }

    /// Pointer to the first element after checking the tag and that at
    /// least `min_count` elements are available.
    pub fn validate(&self, expected: DataType, min_count: usize) -> Result<NativePtr> {
        self.check_tag(expected)?;
        if self.len() < min_count {
            return Err(BindError::Length {
                required: min_count,
                actual: self.len(),
            });
        }
        Ok(NativePtr::from_raw(self.ptr))
    }

    /// Pointer to the window origin after checking the tag and that every
    /// byte the strided window touches lies inside the view.
    pub fn validate_window(&self, expected: DataType, window: &Window) -> Result<NativePtr> {
        self.check_tag(expected)?;
        let Some((lowest, highest)) = window.extent(expected.size()) else {
            return Ok(NativePtr::from_raw(self.ptr));
        };
        if lowest < 0 {
            return Err(BindError::invalid(format!(
                "window reaches {} bytes before the start of the view",
                -lowest
            )));
        }
        if highest + 1 > self.byte_len as i128 {
            return Err(BindError::Length {
                required: usize::try_from(highest + 1).unwrap_or(usize::MAX),
                actual: self.byte_len,
            });
        }
        Ok(NativePtr::from_raw(self.ptr.wrapping_add(window.offset)))
    }

    fn element_ptr(&self, index: usize) -> Result<(DataType, *mut u8)> {
        let tag = self
            .tag
            .ok_or_else(|| BindError::invalid("untagged view has no element type"))?;
        if index >= self.len() {
            return Err(BindError::invalid(format!(
                "index {index} out of range for view of {} elements",
                self.len()
            )));
        }
        Ok((tag, self.ptr.wrapping_add(index * tag.size())))
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        let (tag, p) = self.element_ptr(index)?;
        Ok(unsafe { tag.read(p) })
    }

    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        let (tag, p) = self.element_ptr(index)?;
        unsafe { tag.write(p, value) };
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self.tag {
            Some(tag) => (0..self.len())
                .map(|i| unsafe { tag.read(self.ptr.wrapping_add(i * tag.size())) })
                .collect(),
            None => self.as_bytes().iter().map(|b| *b as f64).collect(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.byte_len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.byte_len) }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl fmt::Debug for TypedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedView")
            .field("tag", &self.tag.map(DataType::name))
            .field("byte_len", &self.byte_len)
            .field("external", &self.is_external())
            .finish()
    }
}

/// Strided 2D access pattern over a view.
///
/// Element `(x, y)` lives at byte `offset + x * pixel_stride + y * line_stride`.
/// Strides are in bytes and may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub width: usize,
    pub height: usize,
    pub pixel_stride: isize,
    pub line_stride: isize,
    pub offset: usize,
}

impl Window {
    /// Densely packed window of `width` x `height` elements.
    pub fn packed(width: usize, height: usize, elem_size: usize) -> Self {
        Self {
            width,
            height,
            pixel_stride: elem_size as isize,
            line_stride: isize::try_from(elem_size.saturating_mul(width)).unwrap_or(isize::MAX),
            offset: 0,
        }
    }

    /// Lowest and highest byte index touched, the latter including the
    /// trailing bytes of the last element. `None` for an empty window.
    pub fn extent(&self, elem_size: usize) -> Option<(i128, i128)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let (px, ln) = (self.pixel_stride as i128, self.line_stride as i128);
        let (last_x, last_y) = (self.width as i128 - 1, self.height as i128 - 1);
        let pick = |stride: i128, last: i128, low: bool| {
            if (stride < 0) == low { last } else { 0 }
        };
        let base = self.offset as i128;
        let lowest = base
            .saturating_add(pick(px, last_x, true).saturating_mul(px))
            .saturating_add(pick(ln, last_y, true).saturating_mul(ln));
        let highest = base
            .saturating_add(pick(px, last_x, false).saturating_mul(px))
            .saturating_add(pick(ln, last_y, false).saturating_mul(ln))
            .saturating_add(elem_size as i128 - 1);
        Some((lowest, highest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flipped() -> Window {
        Window {
            width: 4,
            height: 4,
            pixel_stride: -2,
            line_stride: 8,
            offset: 100,
        }
    }

    #[test]
    fn extent_with_negative_pixel_stride() {
        assert_eq!(flipped().extent(1), Some((94, 124)));
    }

    #[test]
    fn huge_windows_saturate_instead_of_wrapping() {
        let wide = Window::packed(usize::MAX, 2, 8);
        assert_eq!(wide.line_stride, isize::MAX);
        let view = TypedView::allocate(DataType::Float64, 4).unwrap();
        assert!(matches!(
            view.validate_window(DataType::Float64, &wide),
            Err(BindError::Length { .. })
        ));

        let extreme = Window {
            width: usize::MAX,
            height: usize::MAX,
            pixel_stride: isize::MIN,
            line_stride: isize::MIN,
            offset: 0,
        };
        let (lowest, _) = extreme.extent(1).unwrap();
        assert!(lowest < 0);
        assert!(view.validate_window(DataType::Float64, &extreme).is_err());
    }

    #[test]
    fn short_view_is_rejected() {
        let short = TypedView::allocate(DataType::Byte, 124).unwrap();
        assert_eq!(
            short.validate_window(DataType::Byte, &flipped()),
            Err(BindError::Length {
                required: 125,
                actual: 124
            })
        );
        let exact = TypedView::allocate(DataType::Byte, 125).unwrap();
        let p = exact.validate_window(DataType::Byte, &flipped()).unwrap();
        assert_eq!(p.addr(), exact.as_ptr() as usize + 100);
    }

    #[test]
    fn window_before_start_is_rejected() {
        let view = TypedView::allocate(DataType::Byte, 64).unwrap();
        let window = Window {
            offset: 2,
            ..flipped()
        };
        assert!(matches!(
            view.validate_window(DataType::Byte, &window),
            Err(BindError::InvalidArgument(_))
        ));
    }

    #[test]
    fn tag_round_trip() {
        let view = TypedView::allocate(DataType::Float32, 16).unwrap();
        assert_eq!(view.identify(), Some(DataType::Float32));
        assert_eq!(view.byte_len(), 64);
        assert_eq!(
            view.validate(DataType::Int16, 16),
            Err(BindError::TypeMismatch {
                expected: "Int16",
                found: "Float32"
            })
        );
        assert!(view.validate(DataType::Float32, 16).is_ok());
        assert_eq!(
            view.validate(DataType::Float32, 17),
            Err(BindError::Length {
                required: 17,
                actual: 16
            })
        );
    }

    #[test]
    fn untagged_host_bytes_are_unknown() {
        let view = TypedView::from_host_bytes(HostBuffer::new(vec![1, 2, 3]));
        assert_eq!(view.identify(), None);
        assert_eq!(
            view.validate(DataType::Byte, 1),
            Err(BindError::TypeMismatch {
                expected: "Byte",
                found: "Unknown"
            })
        );
        assert_eq!(view.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn allocation_ceiling() {
        assert!(TypedView::allocate(DataType::Float64, 1usize << 50).is_err());
        assert!(TypedView::allocate(DataType::Byte, usize::MAX).is_err());
    }

    #[test]
    fn overlay_shares_memory() {
        let mut pixels = [0i16; 4];
        let mut view =
            unsafe { TypedView::overlay(DataType::Int16, pixels.as_mut_ptr().cast(), 4) }.unwrap();
        assert!(view.is_external());
        view.set_f64(2, -7.0).unwrap();
        assert_eq!(view.get_f64(2).unwrap(), -7.0);
        assert!(view.get_f64(4).is_err());
        drop(view);
        assert_eq!(pixels, [0, 0, -7, 0]);
    }

    proptest! {
        #[test]
        fn extent_bounds_every_touched_byte(
            width in 1usize..16,
            height in 1usize..16,
            px in -32isize..32,
            ln in -256isize..256,
            offset in 0usize..4096,
            elem in prop::sample::select(vec![1usize, 2, 4, 8]),
        ) {
            let window = Window { width, height, pixel_stride: px, line_stride: ln, offset };
            let (lowest, highest) = window.extent(elem).unwrap();
            let mut seen_low = i128::MAX;
            let mut seen_high = i128::MIN;
            for y in 0..height as i128 {
                for x in 0..width as i128 {
                    let start = offset as i128 + x * px as i128 + y * ln as i128;
                    seen_low = seen_low.min(start);
                    seen_high = seen_high.max(start + elem as i128 - 1);
                }
            }
            prop_assert_eq!(lowest, seen_low);
            prop_assert_eq!(highest, seen_high);
        }
    }
}
