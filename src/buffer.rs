//! Host byte buffers.
//!
//! A [`HostBuffer`] plays the part of the host runtime's binary buffer
//! object: a fixed block of bytes that several handles can share. Cloning
//! creates a new handle over the same memory. Finalizers registered with
//! [`HostBuffer::on_release`] run once, when the last handle is dropped.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Finalizer = Box<dyn FnOnce() + Send>;

struct BufferData {
    bytes: Box<[u8]>,
    finalizers: Mutex<Vec<Finalizer>>,
}

impl Drop for BufferData {
    fn drop(&mut self) {
        for finalize in self.finalizers.get_mut().drain(..) {
            finalize();
        }
    }
}

/// Shared handle to a block of host memory.
#[derive(Clone)]
pub struct HostBuffer {
    data: Arc<BufferData>,
}

impl HostBuffer {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(BufferData {
                bytes: bytes.into().into_boxed_slice(),
                finalizers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.data.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data.bytes
    }

    /// Start address of the backing memory.
    pub fn addr(&self) -> usize {
        self.data.bytes.as_ptr() as usize
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.data.bytes.as_ptr()
    }

    /// Number of live handles over this memory.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Run `f` once the last handle is released.
    pub fn on_release(&self, f: impl FnOnce() + Send + 'static) {
        self.data.finalizers.lock().push(Box::new(f));
    }

    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer {
            data: Arc::downgrade(&self.data),
        }
    }

    /// Whether two handles share the same memory.
    pub fn same_memory(&self, other: &HostBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

/// Non-rooting reference to a [`HostBuffer`].
#[derive(Clone)]
pub struct WeakBuffer {
    data: Weak<BufferData>,
}

impl WeakBuffer {
    pub fn upgrade(&self) -> Option<HostBuffer> {
        self.data.upgrade().map(|data| HostBuffer { data })
    }

    pub fn is_live(&self) -> bool {
        self.data.strong_count() > 0
    }
}
