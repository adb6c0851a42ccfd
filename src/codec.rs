//! Tagged value codec.
//!
//! Converts engine values into [`WireValue`]s and back. The engine gives no
//! static type information, so [`Marshaller::from_native`] dispatches on the
//! runtime type reported by the engine. Non-scalar values are parked in the
//! context's [`HandleTable`] and cross the boundary as handles.

use rquickjs::function::This;
use rquickjs::{Coerced, Ctx, Exception, Function, Object, Persistent, Type, Value, qjs};
use tracing::debug;

use crate::error::BridgeError;
use crate::handles::HandleTable;
use crate::value::{ContextId, ErrorKind, HandleId, HandleKind, WireHandle, WireValue};

/// Built-ins the codec calls, captured when a context is wrapped so that
/// later script cannot replace them.
pub struct Intrinsics {
    date_get_time: Option<Persistent<Function<'static>>>,
}

// SAFETY: same reasoning as for `HandleTable`; the holder is only cloned and
// dropped while the runtime lock is held.
unsafe impl Send for Intrinsics {}

impl Intrinsics {
    /// Capture from the current globals of `ctx`.
    ///
    /// A context without a usable `Date.prototype.getTime` has no date
    /// support; dates reaching the codec are then reported as unsupported.
    pub fn capture(ctx: &Ctx<'_>) -> Self {
        let get_time = ctx
            .globals()
            .get::<_, Object>("Date")
            .and_then(|date| date.get::<_, Object>("prototype"))
            .and_then(|prototype| prototype.get::<_, Function>("getTime"));
        let date_get_time = match get_time {
            Ok(get_time) => Some(Persistent::save(ctx, get_time)),
            Err(e) => {
                if e.is_exception() {
                    let _ = ctx.catch();
                }
                debug!(error = %e, "Date.prototype.getTime unavailable");
                None
            }
        };
        Self { date_get_time }
    }
}

/// Conversion state for a single operation on a single context.
///
/// Lives only while the runtime lock is held and the context is entered.
pub struct Marshaller<'a, 'js> {
    ctx: Ctx<'js>,
    context: ContextId,
    handles: &'a mut HandleTable,
    intrinsics: &'a Intrinsics,
}

impl<'a, 'js> Marshaller<'a, 'js> {
    pub fn new(ctx: Ctx<'js>, handles: &'a mut HandleTable, intrinsics: &'a Intrinsics) -> Self {
        let context = handles.context();
        Self {
            ctx,
            context,
            handles,
            intrinsics,
        }
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn handles(&mut self) -> &mut HandleTable {
        self.handles
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Wire -> engine
    // ═══════════════════════════════════════════════════════════════════════════

    /// Build the engine value described by `value`.
    ///
    /// Handles are resolved against this context; a handle from another
    /// context, a released handle, or a handle whose tag disagrees with the
    /// retained value's kind is rejected.
    pub fn to_native(&self, value: &WireValue) -> Result<Value<'js>, BridgeError> {
        let ctx = self.ctx.clone();
        Ok(match value {
            WireValue::Null => Value::new_null(ctx),
            WireValue::Boolean(b) => Value::new_bool(ctx, *b),
            WireValue::Int32(n) => Value::new_int(ctx, *n),
            WireValue::Int64(n) => Value::new_number(ctx, *n as f64),
            WireValue::Double(n) => Value::new_float(ctx, *n),
            WireValue::Date(ms) => self.new_date(*ms)?,
            WireValue::String(s) => rquickjs::String::from_str(ctx, s)?.into_value(),
            WireValue::Object(handle) | WireValue::Array(handle) | WireValue::Function(handle) => {
                let (native, kind) = self.handles.resolve(&self.ctx, handle)?;
                let expected = value.handle_kind().unwrap_or(kind);
                if expected != kind {
                    return Err(BridgeError::WrongHandleKind {
                        handle: handle.id,
                        expected,
                        actual: kind,
                    });
                }
                native
            }
            WireValue::Error(error) => Exception::from_message(ctx, &error.message)?
                .into_object()
                .into_value(),
        })
    }

    /// Resolve a handle of any kind to its value.
    pub fn resolve(&self, handle: &WireHandle) -> Result<Value<'js>, BridgeError> {
        self.handles.resolve(&self.ctx, handle).map(|(value, _)| value)
    }

    /// Resolve a handle whose value is used as an object (arrays and
    /// functions included).
    pub fn resolve_object(&self, handle: &WireHandle) -> Result<Object<'js>, BridgeError> {
        self.resolve(handle)?.into_object().ok_or_else(|| {
            BridgeError::UnsupportedValue(format!("handle {} is not an object", handle.id))
        })
    }

    fn new_date(&self, ms: f64) -> Result<Value<'js>, BridgeError> {
        // SAFETY: the runtime is locked while `ctx` exists, and JS_NewDate
        // returns an owned value whose reference passes to `Value`.
        let value = unsafe {
            Value::from_raw(
                self.ctx.clone(),
                qjs::JS_NewDate(self.ctx.as_raw().as_ptr(), ms),
            )
        };
        if value.is_exception() {
            return Err(self.lift(rquickjs::Error::Exception, ErrorKind::Generic));
        }
        Ok(value)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Engine -> wire
    // ═══════════════════════════════════════════════════════════════════════════

    /// Describe `value` as a wire value, retaining it if it is not a scalar.
    ///
    /// `owner` is the handle of the object `value` was read from, when there
    /// is one; it is recorded in the handle table's bookkeeping.
    pub fn from_native(
        &mut self,
        value: Value<'js>,
        owner: Option<HandleId>,
    ) -> Result<WireValue, BridgeError> {
        Ok(match value.type_of() {
            Type::Uninitialized | Type::Undefined | Type::Null => WireValue::Null,
            Type::Bool => WireValue::Boolean(value.get::<bool>()?),
            Type::Int => WireValue::Int32(value.get::<i32>()?),
            Type::Float => WireValue::from_number(value.get::<f64>()?),
            Type::String => WireValue::String(value.get::<String>()?),
            Type::BigInt => self.big_int(&value)?,
            Type::Array => self.retain(value, HandleKind::Array, owner),
            Type::Function | Type::Constructor => self.retain(value, HandleKind::Function, owner),
            Type::Object | Type::Exception | Type::Promise => {
                if is_date(&value) {
                    WireValue::Date(self.date_time(&value)?)
                } else {
                    self.retain(value, HandleKind::Object, owner)
                }
            }
            other @ (Type::Symbol | Type::Module | Type::Unknown) => {
                return Err(BridgeError::UnsupportedValue(other.as_str().to_string()));
            }
        })
    }

    /// `Int64` when the value fits, otherwise the nearest `Double`.
    fn big_int(&self, value: &Value<'js>) -> Result<WireValue, BridgeError> {
        // ToString of a bigint primitive never runs script
        let digits = value
            .get::<Coerced<String>>()
            .map_err(|e| self.lift(e, ErrorKind::Generic))?
            .0;
        if let Ok(n) = digits.parse::<i64>() {
            return Ok(WireValue::Int64(n));
        }
        digits
            .parse::<f64>()
            .map(WireValue::Double)
            .map_err(|_| BridgeError::UnsupportedValue(format!("bigint {digits}")))
    }

    /// The internal time value of a Date, read through the captured
    /// `getTime` so that an overridden `valueOf` is never consulted.
    fn date_time(&self, value: &Value<'js>) -> Result<f64, BridgeError> {
        let get_time = self
            .intrinsics
            .date_get_time
            .clone()
            .ok_or_else(|| BridgeError::UnsupportedValue("date".to_string()))?
            .restore(&self.ctx)?;
        get_time
            .call((This(value.clone()),))
            .map_err(|e| self.lift(e, ErrorKind::ScriptThrown))
    }

    /// Like [`Marshaller::from_native`], folding failures into an error value.
    pub fn wire(&mut self, value: Value<'js>, owner: Option<HandleId>) -> WireValue {
        self.from_native(value, owner)
            .unwrap_or_else(BridgeError::into_wire)
    }

    fn retain(&mut self, value: Value<'js>, kind: HandleKind, owner: Option<HandleId>) -> WireValue {
        let handle = self.handles.retain(&self.ctx, value, kind, owner);
        WireValue::from_handle(kind, handle)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Errors
    // ═══════════════════════════════════════════════════════════════════════════

    /// Turn an engine error raised during this operation into a bridge error.
    pub fn lift(&self, error: rquickjs::Error, kind: ErrorKind) -> BridgeError {
        lift(&self.ctx, self.context, error, kind)
    }

    /// Fold an engine error straight into an error-tagged wire value.
    pub fn lift_wire(&self, error: rquickjs::Error, kind: ErrorKind) -> WireValue {
        self.lift(error, kind).into_wire()
    }
}

/// Turn an engine error raised in `ctx` into a bridge error.
///
/// A pending exception is consumed here. `kind` decides whether it is
/// reported as a compilation failure or as a script-thrown value.
pub fn lift(
    ctx: &Ctx<'_>,
    context: ContextId,
    error: rquickjs::Error,
    kind: ErrorKind,
) -> BridgeError {
    if !error.is_exception() {
        return BridgeError::Engine(error);
    }
    let message = caught_message(ctx, context);
    match kind {
        ErrorKind::Compilation => BridgeError::Compilation { message },
        _ => BridgeError::Thrown { message },
    }
}

fn caught_message(ctx: &Ctx<'_>, context: ContextId) -> String {
    let thrown = ctx.catch();

    if let Some(exception) = thrown.as_exception() {
        if let Some(stack) = exception.stack() {
            debug!(context = %context, %stack, "exception stack");
        }
    }

    if let Some(s) = thrown.as_string() {
        if let Ok(s) = s.to_string() {
            return s;
        }
    }

    match thrown.get::<Coerced<String>>() {
        Ok(s) => s.0,
        Err(_) => {
            // toString itself threw; drop that exception too
            let _ = ctx.catch();
            "exception".to_string()
        }
    }
}

/// Whether `value` is a native Date object.
fn is_date(value: &Value<'_>) -> bool {
    // SAFETY: JS_IsDate only inspects the tag and class id of the value.
    unsafe { qjs::JS_IsDate(value.as_raw()) }
}
