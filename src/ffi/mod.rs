//! C FFI for jsbridge.
//!
//! This module exposes engines, contexts and compiled scripts to a managed
//! host through C calling conventions. Engines are opaque pointers; contexts,
//! scripts and handles are plain integers.
//!
//! # Values
//!
//! Every operation returns a [`JsBridgeValue`] by value. Failures never fault:
//! they come back as error-tagged values whose `kind` is one of the
//! [`ErrorKind`](crate::ErrorKind) codes.
//!
//! # Strings
//!
//! All text is UTF-16. Inbound strings are copied; string arguments are
//! NUL-terminated, and string values use `length` (negative means
//! NUL-terminated). Outbound strings are NUL-terminated and owned by the
//! value.
//!
//! # Thread Safety
//!
//! An engine may be used from several threads; operations on one engine are
//! serialized by its runtime lock.
//!
//! # Memory Management
//!
//! - `JsBridgeEngine`: created by `jsbridge_engine_new()`, freed by `jsbridge_engine_free()`
//! - `JsBridgeValue`: returned by value, buffers freed by `jsbridge_value_free()`
//! - Handles: released by `jsbridge_handle_release()` or with their context

extern crate alloc;

mod context;
mod value;

use core::ffi::c_char;

use crate::Engine;

pub use context::*;

// ============================================================================
// Version
// ============================================================================

/// Library version string
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Returns the library version string.
///
/// The returned string is valid for the lifetime of the library.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque engine: one runtime and its contexts.
pub struct JsBridgeEngine {
    pub(crate) engine: Engine,
}

// ============================================================================
// Value Types
// ============================================================================

/// Error payload: an [`ErrorKind`](crate::ErrorKind) code and a UTF-16 message.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JsBridgeError {
    pub kind: i32,
    pub message: *mut u16,
}

/// Payload of a [`JsBridgeValue`]; `tag` selects the live field.
#[repr(C)]
#[derive(Clone, Copy)]
pub union JsBridgePayload {
    pub boolean: bool,
    pub int32: i32,
    pub int64: i64,
    /// Doubles, and dates as milliseconds since the Unix epoch.
    pub number: f64,
    pub string: *mut u16,
    /// Object, array and function handles.
    pub handle: usize,
    pub list: *mut JsBridgeValue,
    pub error: JsBridgeError,
}

/// A wire value as laid out on the C boundary.
///
/// `tag` is a [`WireTag`](crate::WireTag) code. `length` counts UTF-16 units
/// (without the terminator) for strings and error messages, elements for
/// lists, and is 0 otherwise. `context_id` is set for handles.
#[repr(C)]
pub struct JsBridgeValue {
    pub tag: i32,
    pub length: i32,
    pub context_id: i32,
    pub payload: JsBridgePayload,
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free the buffers owned by a value returned from this library and reset
/// it to null.
///
/// # Safety
/// `value` must be NULL or point to a value returned by a jsbridge function
/// that has not been freed yet. Never pass values the host built itself.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_value_free(value: *mut JsBridgeValue) {
    if let Some(value) = unsafe { value.as_mut() } {
        // SAFETY: the caller guarantees the value came from us
        unsafe { value.free_buffers() };
    }
}
