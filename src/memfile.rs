//! Memory-backed virtual files.
//!
//! [`Memfiles::get`] exposes a host buffer to the native I/O layer under a
//! `/vsimem/` name derived from the buffer's address, without copying. Two
//! handles over the same memory share one mapping. When the last handle of
//! the buffer is released the mapping is removed and the virtual file
//! unlinked.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{HostBuffer, WeakBuffer};
use crate::config;
use crate::error::{BindError, Result};
use crate::native::error::guarded;
use crate::native::vsi;

/// A registered virtual file.
#[derive(Debug, PartialEq, Eq)]
pub struct Mapping {
    filename: String,
    len: usize,
}

impl Mapping {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Slot {
    mapping: Arc<Mapping>,
    buffer: WeakBuffer,
}

type Registry = Arc<Mutex<HashMap<usize, Slot>>>;

/// Registry of buffer-backed virtual files, keyed by buffer address.
pub struct Memfiles {
    prefix: String,
    slots: Registry,
}

impl Memfiles {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Mapping for `buffer`, created on first use.
    pub fn get(&self, buffer: &HostBuffer) -> Result<Arc<Mapping>> {
        if buffer.is_empty() {
            return Err(BindError::invalid("cannot map an empty buffer"));
        }
        let addr = buffer.addr();
        let mut slots = self.slots.lock();
        match slots.get(&addr) {
            Some(slot) if slot.buffer.is_live() => return Ok(slot.mapping.clone()),
            Some(slot) => {
                vsi::unlink(&slot.mapping.filename);
                slots.remove(&addr);
            }
            None => {}
        }

        let filename = format!("{}/{:x}", self.prefix, addr);
        let registered = guarded(|| unsafe {
            vsi::file_from_mem_buffer(&filename, buffer.as_ptr(), buffer.len())
        })?;
        if !registered {
            return Err(BindError::internal(format!(
                "virtual file {filename} could not be registered"
            )));
        }
        let mapping = Arc::new(Mapping {
            filename,
            len: buffer.len(),
        });
        slots.insert(
            addr,
            Slot {
                mapping: mapping.clone(),
                buffer: buffer.downgrade(),
            },
        );
        debug!(file = %mapping.filename, len = mapping.len, "mapped buffer");

        let registry: Weak<Mutex<HashMap<usize, Slot>>> = Arc::downgrade(&self.slots);
        buffer.on_release(move || {
            if let Some(registry) = registry.upgrade() {
                release(&registry, addr);
            }
        });
        Ok(mapping)
    }

    /// Remove the mapping of `buffer` before the buffer itself is released.
    ///
    /// Returns false if the buffer was not mapped.
    pub fn unmap(&self, buffer: &HostBuffer) -> bool {
        release(&self.slots, buffer.addr())
    }

    pub fn is_mapped(&self, buffer: &HostBuffer) -> bool {
        self.slots.lock().contains_key(&buffer.addr())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn release(registry: &Registry, addr: usize) -> bool {
    let Some(slot) = registry.lock().remove(&addr) else {
        return false;
    };
    vsi::unlink(&slot.mapping.filename);
    debug!(file = %slot.mapping.filename, "unmapped buffer");
    true
}

static MEMFILES: Lazy<Memfiles> = Lazy::new(|| Memfiles::new(config::current().vsimem_prefix.clone()));

/// Process-wide memfile registry.
pub fn memfiles() -> &'static Memfiles {
    &MEMFILES
}
