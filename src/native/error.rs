//! Last-error side channel of the native library.
//!
//! Failing native calls record an error number and message in a
//! thread-local slot instead of returning them. The slot must be read
//! immediately after the failing call, before anything else on the same
//! thread touches it. [`guarded`] and friends do exactly that.

use std::cell::RefCell;

use crate::error::{BindError, Result};

use super::NativePtr;

/// Error class numbers reported by the native library.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNum {
    None = 0,
    AppDefined = 1,
    OutOfMemory = 2,
    FileIo = 3,
    OpenFailed = 4,
    IllegalArg = 5,
    NotSupported = 6,
    AssertionFailed = 7,
    NoWriteAccess = 8,
    UserInterrupt = 9,
    ObjectNull = 10,
}

/// Status returned by native calls that do not produce a value.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CplErr {
    None = 0,
    Warning = 2,
    Failure = 3,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorNum, String)>> = const { RefCell::new(None) };
}

/// Record a failure on the calling thread. Used by the native layer only.
pub(crate) fn report(num: ErrorNum, message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((num, message)));
}

/// Record a failure and return [`CplErr::Failure`].
pub(crate) fn fail(num: ErrorNum, message: impl Into<String>) -> CplErr {
    report(num, message);
    CplErr::Failure
}

/// Clear the calling thread's error slot.
pub fn error_reset() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

/// Read and clear the calling thread's error slot.
pub fn take_last_error() -> Option<(ErrorNum, String)> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Scoped guard around one native call site.
///
/// Entering clears the channel; [`ErrorScope::finish`] reads and clears it.
/// Dropping an unfinished scope clears it as well so a stale message never
/// leaks into the next call on this thread.
pub struct ErrorScope {
    finished: bool,
}

impl ErrorScope {
    pub fn enter() -> Self {
        error_reset();
        Self { finished: false }
    }

    pub fn finish(mut self) -> Option<BindError> {
        self.finished = true;
        take_last_error().map(|(code, message)| BindError::Native { code, message })
    }
}

impl Drop for ErrorScope {
    fn drop(&mut self) {
        if !self.finished {
            error_reset();
        }
    }
}

/// Run one native call and convert a reported failure into an error.
pub fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    let scope = ErrorScope::enter();
    let value = f();
    match scope.finish() {
        Some(e) => Err(e),
        None => Ok(value),
    }
}

/// Like [`guarded`] for calls returning a status code.
pub fn guarded_status(f: impl FnOnce() -> CplErr) -> Result<()> {
    match guarded(f)? {
        CplErr::Failure => Err(unreported()),
        CplErr::None | CplErr::Warning => Ok(()),
    }
}

/// Like [`guarded`] for calls returning a handle, where null means failure.
pub fn guarded_ptr(f: impl FnOnce() -> NativePtr) -> Result<NativePtr> {
    let ptr = guarded(f)?;
    if ptr.is_null() {
        return Err(unreported());
    }
    Ok(ptr)
}

/// Like [`guarded`] for calls returning an optional value.
pub fn guarded_opt<T>(f: impl FnOnce() -> Option<T>) -> Result<T> {
    guarded(f)?.ok_or_else(unreported)
}

fn unreported() -> BindError {
    BindError::Native {
        code: ErrorNum::AppDefined,
        message: "native call failed without reporting an error".into(),
    }
}
