//! Conversion between [`JsBridgeValue`] and [`WireValue`].

extern crate alloc;

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::{ptr, slice};

use crate::error::BridgeError;
use crate::value::{
    ContextId, ErrorKind, HandleId, WireError, WireHandle, WireTag, WireValue,
};

use super::{JsBridgeError, JsBridgePayload, JsBridgeValue};

/// Longest string accepted when scanning for a NUL terminator.
const MAX_SCAN: usize = i32::MAX as usize;

// ============================================================================
// Outbound
// ============================================================================

impl JsBridgeValue {
    pub(crate) fn null() -> Self {
        Self {
            tag: WireTag::Null as i32,
            length: 0,
            context_id: 0,
            payload: JsBridgePayload { int64: 0 },
        }
    }

    fn scalar(tag: WireTag, payload: JsBridgePayload) -> Self {
        Self {
            tag: tag as i32,
            length: 0,
            context_id: 0,
            payload,
        }
    }

    fn handle(tag: WireTag, handle: WireHandle) -> Self {
        Self {
            tag: tag as i32,
            length: 0,
            context_id: handle.context.0,
            payload: JsBridgePayload {
                handle: handle.id.0,
            },
        }
    }

    /// Build an owned value for the host. String buffers are freed with
    /// `jsbridge_value_free`.
    pub(crate) fn from_wire(value: WireValue) -> Self {
        match value {
            WireValue::Null => Self::null(),
            WireValue::Boolean(b) => Self::scalar(WireTag::Boolean, JsBridgePayload { boolean: b }),
            WireValue::Int32(n) => Self::scalar(WireTag::Int32, JsBridgePayload { int32: n }),
            WireValue::Int64(n) => Self::scalar(WireTag::Int64, JsBridgePayload { int64: n }),
            WireValue::Double(n) => Self::scalar(WireTag::Double, JsBridgePayload { number: n }),
            WireValue::Date(ms) => Self::scalar(WireTag::Date, JsBridgePayload { number: ms }),
            WireValue::String(s) => {
                let (string, length) = alloc_utf16(&s);
                Self {
                    tag: WireTag::String as i32,
                    length,
                    context_id: 0,
                    payload: JsBridgePayload { string },
                }
            }
            WireValue::Object(h) => Self::handle(WireTag::Object, h),
            WireValue::Array(h) => Self::handle(WireTag::Array, h),
            WireValue::Function(h) => Self::handle(WireTag::Function, h),
            WireValue::Error(error) => {
                let (message, length) = alloc_utf16(&error.message);
                Self {
                    tag: WireTag::Error as i32,
                    length,
                    context_id: 0,
                    payload: JsBridgePayload {
                        error: JsBridgeError {
                            kind: error.kind.code(),
                            message,
                        },
                    },
                }
            }
        }
    }

    pub(crate) fn from_result(result: Result<WireValue, BridgeError>) -> Self {
        Self::from_wire(result.unwrap_or_else(BridgeError::into_wire))
    }

    pub(crate) fn usage(message: &str) -> Self {
        Self::from_wire(WireValue::error(ErrorKind::Usage, message))
    }

    /// Release the buffers of a value built by [`JsBridgeValue::from_wire`]
    /// and reset it to null.
    ///
    /// # Safety
    /// `self` must have been produced by this library and not freed yet.
    pub(crate) unsafe fn free_buffers(&mut self) {
        match WireTag::from_code(self.tag) {
            // SAFETY: the tag says which payload is live; the buffer was
            // allocated by `alloc_utf16` with `length + 1` units.
            Some(WireTag::String) => unsafe { free_utf16(self.payload.string, self.length) },
            Some(WireTag::Error) => unsafe { free_utf16(self.payload.error.message, self.length) },
            _ => {}
        }
        *self = Self::null();
    }
}

/// Copy `s` into a NUL-terminated UTF-16 buffer owned by the host.
fn alloc_utf16(s: &str) -> (*mut u16, i32) {
    let mut units: Vec<u16> = s.encode_utf16().collect();
    // Lengths travel as i32
    units.truncate(MAX_SCAN);
    let length = units.len() as i32;
    units.push(0);
    let buffer = Box::into_raw(units.into_boxed_slice());
    (buffer.cast::<u16>(), length)
}

/// # Safety
/// `buffer` must come from [`alloc_utf16`] with the same `length`, or be NULL.
unsafe fn free_utf16(buffer: *mut u16, length: i32) {
    if buffer.is_null() || length < 0 {
        return;
    }
    let units = length as usize + 1;
    // SAFETY: reconstructs the boxed slice handed out by `alloc_utf16`
    unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buffer, units))) };
}

// ============================================================================
// Inbound
// ============================================================================

/// Read a UTF-16 string from the host.
///
/// A negative `length` means the string is NUL-terminated. Unpaired
/// surrogates are replaced with U+FFFD.
///
/// # Safety
/// `s` must point to `length` readable units, or to a NUL-terminated string
/// when `length` is negative.
pub(crate) unsafe fn read_utf16(s: *const u16, length: i32) -> Result<String, BridgeError> {
    if s.is_null() {
        if length <= 0 {
            return Ok(String::new());
        }
        return Err(BridgeError::UnsupportedValue("NULL string buffer".into()));
    }
    let length = if length < 0 {
        // SAFETY: caller guarantees a terminator exists
        unsafe { utf16_len(s) }
    } else {
        length as usize
    };
    // SAFETY: caller guarantees `length` readable units
    let units = unsafe { slice::from_raw_parts(s, length) };
    Ok(String::from_utf16_lossy(units))
}

/// Read a required NUL-terminated UTF-16 argument.
///
/// # Safety
/// `s` must be NULL or a NUL-terminated UTF-16 string.
pub(crate) unsafe fn utf16_arg(s: *const u16, what: &str) -> Result<String, BridgeError> {
    if s.is_null() {
        return Err(BridgeError::UnsupportedValue(format!("NULL {what}")));
    }
    // SAFETY: forwarded from the caller
    unsafe { read_utf16(s, -1) }
}

/// Read an optional NUL-terminated UTF-16 argument.
///
/// # Safety
/// `s` must be NULL or a NUL-terminated UTF-16 string.
pub(crate) unsafe fn utf16_opt(s: *const u16) -> Result<Option<String>, BridgeError> {
    if s.is_null() {
        return Ok(None);
    }
    // SAFETY: forwarded from the caller
    unsafe { read_utf16(s, -1) }.map(Some)
}

unsafe fn utf16_len(s: *const u16) -> usize {
    let mut len = 0;
    // SAFETY: stops at the terminator the caller promised
    while len < MAX_SCAN && unsafe { *s.add(len) } != 0 {
        len += 1;
    }
    len
}

impl JsBridgeValue {
    /// Copy a host value into a [`WireValue`].
    ///
    /// # Safety
    /// Pointers in the payload selected by `tag` must be valid for `length`.
    pub(crate) unsafe fn to_wire(&self) -> Result<WireValue, BridgeError> {
        let Some(tag) = WireTag::from_code(self.tag) else {
            return Err(BridgeError::UnsupportedValue(format!("tag {}", self.tag)));
        };
        let handle = || unsafe {
            WireHandle::new(HandleId(self.payload.handle), ContextId(self.context_id))
        };
        // SAFETY: the tag says which payload field is live
        Ok(unsafe {
            match tag {
                WireTag::Null => WireValue::Null,
                WireTag::Boolean => WireValue::Boolean(self.payload.boolean),
                WireTag::Int32 => WireValue::Int32(self.payload.int32),
                WireTag::Int64 => WireValue::Int64(self.payload.int64),
                WireTag::Double => WireValue::Double(self.payload.number),
                WireTag::Date => WireValue::Date(self.payload.number),
                WireTag::String => WireValue::String(read_utf16(self.payload.string, self.length)?),
                WireTag::Object => WireValue::Object(handle()),
                WireTag::Array => WireValue::Array(handle()),
                WireTag::Function => WireValue::Function(handle()),
                WireTag::Error => {
                    let error = self.payload.error;
                    WireValue::Error(WireError {
                        kind: ErrorKind::from_code(error.kind).unwrap_or(ErrorKind::Generic),
                        message: read_utf16(error.message, self.length)?,
                    })
                }
                WireTag::List => {
                    return Err(BridgeError::UnsupportedValue(
                        "a list is only valid as an argument list".into(),
                    ));
                }
            }
        })
    }
}

/// Read a host value behind a pointer.
///
/// # Safety
/// `value` must be NULL or point to a valid [`JsBridgeValue`].
pub(crate) unsafe fn value_arg(value: *const JsBridgeValue) -> Result<WireValue, BridgeError> {
    match unsafe { value.as_ref() } {
        Some(v) => unsafe { v.to_wire() },
        None => Err(BridgeError::UnsupportedValue("NULL value".into())),
    }
}

/// Read a handle argument: an object, array or function value.
///
/// # Safety
/// As [`value_arg`].
pub(crate) unsafe fn handle_arg(value: *const JsBridgeValue) -> Result<WireHandle, BridgeError> {
    let value = unsafe { value_arg(value) }?;
    value.as_handle().copied().ok_or_else(|| {
        BridgeError::UnsupportedValue(format!("expected a handle, got {:?}", value.tag()))
    })
}

/// Read an optional receiver: NULL or a null-tagged value means none.
///
/// # Safety
/// As [`value_arg`].
pub(crate) unsafe fn receiver_arg(
    value: *const JsBridgeValue,
) -> Result<Option<WireHandle>, BridgeError> {
    if value.is_null() {
        return Ok(None);
    }
    match unsafe { value_arg(value) }? {
        WireValue::Null => Ok(None),
        other => other.as_handle().copied().map(Some).ok_or_else(|| {
            BridgeError::UnsupportedValue(format!("expected a handle, got {:?}", other.tag()))
        }),
    }
}

/// Read an argument list: NULL, or a list-tagged value whose payload points
/// to `length` values.
///
/// # Safety
/// `args` must be NULL or point to a valid list value.
pub(crate) unsafe fn args_arg(args: *const JsBridgeValue) -> Result<Vec<WireValue>, BridgeError> {
    let Some(list) = (unsafe { args.as_ref() }) else {
        return Ok(Vec::new());
    };
    if list.tag != WireTag::List as i32 {
        return Err(BridgeError::UnsupportedValue(format!(
            "arguments must be a list, got tag {}",
            list.tag
        )));
    }
    if list.length < 0 {
        return Err(BridgeError::UnsupportedValue("negative argument count".into()));
    }
    // SAFETY: a list-tagged value carries its element pointer
    let items = unsafe { list.payload.list };
    if items.is_null() {
        return if list.length == 0 {
            Ok(Vec::new())
        } else {
            Err(BridgeError::UnsupportedValue("NULL argument list".into()))
        };
    }
    // SAFETY: caller guarantees `length` elements
    let items = unsafe { slice::from_raw_parts(items, list.length as usize) };
    items.iter().map(|item| unsafe { item.to_wire() }).collect()
}
