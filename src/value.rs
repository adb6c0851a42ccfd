//! Wire values: the flat tagged union exchanged with the host.
//!
//! A [`WireValue`] carries exactly one payload, selected by its variant.
//! Scalars are carried by value; objects, arrays and functions are carried
//! as [`WireHandle`]s that only make sense inside the context that produced
//! them.

use core::fmt;

use serde::Serialize;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier of an execution context, unique within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContextId(pub i32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a retained object, array or function, unique within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HandleId(pub usize);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Identifier of a compiled script, unique within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScriptId(pub usize);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script {}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handles
// ═══════════════════════════════════════════════════════════════════════════════

/// What kind of engine value a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Object,
    Array,
    Function,
}

impl HandleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandleKind::Object => "object",
            HandleKind::Array => "array",
            HandleKind::Function => "function",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a retained engine value, paired with its owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WireHandle {
    pub id: HandleId,
    pub context: ContextId,
}

impl WireHandle {
    pub fn new(id: HandleId, context: ContextId) -> Self {
        Self { id, context }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Category of an error-tagged wire value.
///
/// The numeric values are part of the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Failure reported by the engine or the binding layer itself.
    Generic = 0,
    /// A value thrown by running script.
    ScriptThrown = 1,
    /// Malformed source text.
    Compilation = 2,
    /// The host asked for something impossible (non-callable, wrong handle kind, ...).
    Usage = 3,
    /// The handle was released or never existed.
    StaleHandle = 4,
    /// The target context is gone.
    ContextDisposed = 5,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorKind::Generic,
            1 => ErrorKind::ScriptThrown,
            2 => ErrorKind::Compilation,
            3 => ErrorKind::Usage,
            4 => ErrorKind::StaleHandle,
            5 => ErrorKind::ContextDisposed,
            _ => return None,
        })
    }
}

/// Payload of an error-tagged wire value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WireValue
// ═══════════════════════════════════════════════════════════════════════════════

/// Numeric tag of a wire value as it appears on the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireTag {
    Null = 1,
    Boolean = 2,
    Int32 = 3,
    Double = 4,
    String = 5,
    Date = 6,
    Int64 = 7,
    List = 10,
    Error = 11,
    Object = 14,
    Function = 17,
    Array = 18,
}

impl WireTag {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => WireTag::Null,
            2 => WireTag::Boolean,
            3 => WireTag::Int32,
            4 => WireTag::Double,
            5 => WireTag::String,
            6 => WireTag::Date,
            7 => WireTag::Int64,
            10 => WireTag::List,
            11 => WireTag::Error,
            14 => WireTag::Object,
            17 => WireTag::Function,
            18 => WireTag::Array,
            _ => return None,
        })
    }
}

/// A value crossing the host boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    /// `null`, and also `undefined`.
    Null,
    Boolean(bool),
    Int32(i32),
    /// Wide integers from explicit sources such as `BigInt`.
    Int64(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch, UTC.
    Date(f64),
    String(String),
    Object(WireHandle),
    Array(WireHandle),
    Function(WireHandle),
    Error(WireError),
}

impl WireValue {
    pub fn tag(&self) -> WireTag {
        match self {
            WireValue::Null => WireTag::Null,
            WireValue::Boolean(_) => WireTag::Boolean,
            WireValue::Int32(_) => WireTag::Int32,
            WireValue::Int64(_) => WireTag::Int64,
            WireValue::Double(_) => WireTag::Double,
            WireValue::Date(_) => WireTag::Date,
            WireValue::String(_) => WireTag::String,
            WireValue::Object(_) => WireTag::Object,
            WireValue::Array(_) => WireTag::Array,
            WireValue::Function(_) => WireTag::Function,
            WireValue::Error(_) => WireTag::Error,
        }
    }

    /// Build an error-tagged value.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        WireValue::Error(WireError {
            kind,
            message: message.into(),
        })
    }

    /// Build a handle-tagged value of the given kind.
    pub fn from_handle(kind: HandleKind, handle: WireHandle) -> Self {
        match kind {
            HandleKind::Object => WireValue::Object(handle),
            HandleKind::Array => WireValue::Array(handle),
            HandleKind::Function => WireValue::Function(handle),
        }
    }

    /// Pick the compact integer tag when the number allows it.
    ///
    /// Integral values in `[-2^31, 2^31)` become `Int32`; everything else,
    /// including `-0`, NaN and infinities, stays `Double`.
    pub fn from_number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= f64::from(i32::MIN)
            && n <= f64::from(i32::MAX)
            && !(n == 0.0 && n.is_sign_negative())
        {
            WireValue::Int32(n as i32)
        } else {
            WireValue::Double(n)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WireValue::Error(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            WireValue::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Int32(n) => Some(f64::from(*n)),
            WireValue::Int64(n) => Some(*n as f64),
            WireValue::Double(n) | WireValue::Date(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The handle of an object, array or function value.
    pub fn as_handle(&self) -> Option<&WireHandle> {
        match self {
            WireValue::Object(h) | WireValue::Array(h) | WireValue::Function(h) => Some(h),
            _ => None,
        }
    }

    pub fn handle_kind(&self) -> Option<HandleKind> {
        match self {
            WireValue::Object(_) => Some(HandleKind::Object),
            WireValue::Array(_) => Some(HandleKind::Array),
            WireValue::Function(_) => Some(HandleKind::Function),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&WireError> {
        match self {
            WireValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Context that owns the payload, for handle-carrying variants.
    pub fn context(&self) -> Option<ContextId> {
        self.as_handle().map(|h| h.context)
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Boolean(b)
    }
}

impl From<i32> for WireValue {
    fn from(n: i32) -> Self {
        WireValue::Int32(n)
    }
}

impl From<i64> for WireValue {
    fn from(n: i64) -> Self {
        WireValue::Int64(n)
    }
}

impl From<f64> for WireValue {
    fn from(n: f64) -> Self {
        WireValue::Double(n)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::String(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::String(s)
    }
}

impl From<WireError> for WireValue {
    fn from(e: WireError) -> Self {
        WireValue::Error(e)
    }
}
