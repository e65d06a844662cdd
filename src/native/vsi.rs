//! Virtual in-memory filesystem.
//!
//! A registered region is a non-owned view over caller memory: the native
//! layer never copies or frees it. Unlinking only forgets the name.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::error::{ErrorNum, report};

/// Names under this prefix are served from registered memory regions.
pub const VSIMEM_ROOT: &str = "/vsimem/";

#[derive(Clone, Copy)]
struct Region {
    addr: usize,
    len: usize,
}

static FILES: Lazy<Mutex<HashMap<String, Region>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Register `len` bytes at `data` as the virtual file `name`.
///
/// Returns false and reports an error if the name is taken or not under
/// [`VSIMEM_ROOT`].
///
/// # Safety
///
/// The region must stay valid and unmodified until [`unlink`] is called
/// for `name`.
pub unsafe fn file_from_mem_buffer(name: &str, data: *const u8, len: usize) -> bool {
    if !name.starts_with(VSIMEM_ROOT) {
        report(
            ErrorNum::IllegalArg,
            format!("{name}: not a virtual memory filename"),
        );
        return false;
    }
    let mut files = FILES.lock();
    if files.contains_key(name) {
        report(ErrorNum::FileIo, format!("{name}: file already exists"));
        return false;
    }
    files.insert(
        name.to_string(),
        Region {
            addr: data as usize,
            len,
        },
    );
    true
}

/// Forget a virtual file. Returns false if it did not exist.
pub fn unlink(name: &str) -> bool {
    FILES.lock().remove(name).is_some()
}

/// Whether a virtual file is currently registered.
pub fn exists(name: &str) -> bool {
    FILES.lock().contains_key(name)
}

/// Copy the content of a virtual file.
///
/// # Safety
///
/// The region registered for `name` must still be valid.
pub(crate) unsafe fn read_file(name: &str) -> Option<Vec<u8>> {
    let region = FILES.lock().get(name).copied()?;
    if region.len == 0 {
        return Some(Vec::new());
    }
    let bytes = unsafe { std::slice::from_raw_parts(region.addr as *const u8, region.len) };
    Some(bytes.to_vec())
}
