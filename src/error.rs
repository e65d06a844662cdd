//! Error handling for the binding layer.
//!
//! [`BindError`] is the Rust-side error every core operation returns. The C
//! surface converts it into a [`GeoError`] carrying a stable [`GeoErrorCode`]
//! and an owned message string.

use std::ffi::CString;
use std::os::raw::c_char;

use crate::native::NativePtr;
use crate::native::error::ErrorNum;
use crate::store::ObjectId;

/// Errors raised by the binding layer.
///
/// The categories are kept apart on purpose: native-library failures carry
/// the library's message verbatim, contract violations are detected before
/// any native call, and lifetime violations mean a wrapper outlived its
/// native object.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    /// The native library reported a failure through its error channel.
    #[error("{message}")]
    Native { code: ErrorNum, message: String },

    /// Wrong argument type, shape or enum string.
    #[error("{0}")]
    InvalidArgument(String),

    /// A typed view's tag does not match the native operation.
    #[error("typed view holds {found} elements, expected {expected}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    /// A typed view is shorter than the operation requires.
    #[error("typed view too small: {actual} available, at least {required} required")]
    Length { required: usize, actual: usize },

    /// The wrapper (or one of its ancestors) has been disposed.
    #[error("{0} object has already been destroyed")]
    ObjectDestroyed(&'static str),

    /// No wrapper is registered for the native handle.
    #[error("no wrapper registered for native handle {0}")]
    NotFound(NativePtr),

    /// A live wrapper is already registered for the native handle.
    #[error("native handle {0} is already registered")]
    AlreadyRegistered(NativePtr),

    /// A job body failed with its own message.
    #[error("{0}")]
    Failed(String),

    /// The calling thread already holds the lock of this resource.
    #[error("resource {0} is already locked by the calling thread")]
    LockReentry(ObjectId),

    /// Internal-consistency failure, fatal to the current call only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BindError {
    /// Build an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        BindError::InvalidArgument(msg.into())
    }

    /// Build an internal-consistency error.
    pub fn internal(msg: impl Into<String>) -> Self {
        BindError::Internal(msg.into())
    }

    /// Whether this error came out of the native library.
    pub fn is_native(&self) -> bool {
        matches!(self, BindError::Native { .. })
    }
}

/// Result alias for binding operations.
pub type Result<T> = std::result::Result<T, BindError>;

/// Error codes for FFI functions.
///
/// These codes are stable and can be matched by host runtimes.
/// Codes 1-9 map native-library failures, 10-19 binding contract
/// violations, 20-29 lifetime and identity failures, 100+ marshalling
/// failures of the C surface itself.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoErrorCode {
    /// No error
    Ok = 0,

    // Native library errors (1-9)
    /// Generic native failure
    Native = 1,
    /// Native file I/O failure
    NativeIo = 2,
    /// Native open failure
    OpenFailed = 3,
    /// Operation not supported by the native library
    NotSupported = 4,
    /// Operation cancelled from a progress callback
    Cancelled = 5,
    /// Job body failed with its own message
    JobFailed = 6,

    // Contract violations (10-19)
    /// Invalid argument
    InvalidArgument = 10,
    /// Typed view element type mismatch
    TypeMismatch = 11,
    /// Typed view too short
    Length = 12,

    // Lifetime and identity errors (20-29)
    /// Object already destroyed
    ObjectDestroyed = 20,
    /// Native handle not registered
    NotFound = 21,
    /// Native handle already registered
    AlreadyRegistered = 22,
    /// Lock re-entry on the same thread
    LockReentry = 23,
    /// Internal consistency error
    Internal = 24,

    // FFI-specific errors (100+)
    /// Null pointer passed
    NullPointer = 100,
    /// Invalid UTF-8 string
    InvalidUtf8 = 101,
    /// JSON parse error
    JsonParse = 102,
    /// Invalid handle
    InvalidHandle = 103,
    /// Unknown error
    Unknown = 255,
}

impl From<&BindError> for GeoErrorCode {
    fn from(e: &BindError) -> Self {
        match e {
            BindError::Native { code, .. } => match code {
                ErrorNum::FileIo => GeoErrorCode::NativeIo,
                ErrorNum::OpenFailed => GeoErrorCode::OpenFailed,
                ErrorNum::NotSupported => GeoErrorCode::NotSupported,
                ErrorNum::UserInterrupt => GeoErrorCode::Cancelled,
                _ => GeoErrorCode::Native,
            },
            BindError::InvalidArgument(_) => GeoErrorCode::InvalidArgument,
            BindError::TypeMismatch { .. } => GeoErrorCode::TypeMismatch,
            BindError::Length { .. } => GeoErrorCode::Length,
            BindError::ObjectDestroyed(_) => GeoErrorCode::ObjectDestroyed,
            BindError::NotFound(_) => GeoErrorCode::NotFound,
            BindError::AlreadyRegistered(_) => GeoErrorCode::AlreadyRegistered,
            BindError::Failed(_) => GeoErrorCode::JobFailed,
            BindError::LockReentry(_) => GeoErrorCode::LockReentry,
            BindError::Internal(_) => GeoErrorCode::Internal,
        }
    }
}

/// Error structure returned via out-parameter.
///
/// # Memory Ownership
///
/// The `message` field is owned by the FFI layer when non-null.
/// Call `geo_error_free()` to release the message memory.
#[repr(C)]
#[derive(Debug)]
pub struct GeoError {
    /// Error code
    pub code: GeoErrorCode,
    /// Error message (NULL if code == Ok)
    pub message: *mut c_char,
}

fn owned_message(msg: impl Into<Vec<u8>>) -> *mut c_char {
    CString::new(msg)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

impl GeoError {
    /// Create a success result (no error).
    pub fn ok() -> Self {
        Self {
            code: GeoErrorCode::Ok,
            message: std::ptr::null_mut(),
        }
    }

    /// Create an error from a binding error.
    pub fn from_bind_error(e: BindError) -> Self {
        Self {
            code: GeoErrorCode::from(&e),
            message: owned_message(e.to_string()),
        }
    }

    /// Create a null pointer error.
    pub fn null_pointer(param: &str) -> Self {
        Self {
            code: GeoErrorCode::NullPointer,
            message: owned_message(format!("null pointer passed for parameter: {param}")),
        }
    }

    /// Create an invalid UTF-8 error.
    pub fn invalid_utf8(context: &str) -> Self {
        Self {
            code: GeoErrorCode::InvalidUtf8,
            message: owned_message(format!("invalid UTF-8 in {context}")),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(e: serde_json::Error) -> Self {
        Self {
            code: GeoErrorCode::JsonParse,
            message: owned_message(format!("JSON parse error: {e}")),
        }
    }

    /// Create a JSON serialization error.
    pub fn json_serialize(e: serde_json::Error) -> Self {
        Self {
            code: GeoErrorCode::JsonParse,
            message: owned_message(format!("JSON serialization error: {e}")),
        }
    }

    /// Create an invalid handle error.
    pub fn invalid_handle() -> Self {
        Self {
            code: GeoErrorCode::InvalidHandle,
            message: owned_message("invalid or null handle"),
        }
    }
}

impl From<BindError> for GeoError {
    fn from(e: BindError) -> Self {
        GeoError::from_bind_error(e)
    }
}

/// Free error message memory.
///
/// Safe to call with NULL error or NULL message.
///
/// # Safety
///
/// The error pointer must be valid or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn geo_error_free(error: *mut GeoError) {
    if error.is_null() {
        return;
    }
    unsafe {
        let err = &mut *error;
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
            err.message = std::ptr::null_mut();
        }
    }
}
