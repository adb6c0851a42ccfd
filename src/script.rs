//! Script compilation and execution.
//!
//! Source text is compiled without being run so that syntax errors can be
//! told apart from exceptions thrown by the script itself. Precompiled
//! scripts are kept as serialized bytecode: bytecode is bound to the realm it
//! was loaded into, so each run loads a fresh copy into the target context.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::slice;
use std::sync::Arc;

use rquickjs::{Ctx, Value, qjs};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::codec::lift;
use crate::error::BridgeError;
use crate::value::{ContextId, ErrorKind, ScriptId};

/// A compiled script, ready to run in any context of the engine that built it.
#[derive(Debug)]
pub struct Script {
    id: ScriptId,
    name: String,
    bytecode: Vec<u8>,
}

impl Script {
    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytecode_len(&self) -> usize {
        self.bytecode.len()
    }
}

/// Engine-wide registry of compiled scripts.
#[derive(Debug)]
pub struct ScriptTable {
    scripts: FxHashMap<ScriptId, Arc<Script>>,
    next_id: usize,
}

impl Default for ScriptTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptTable {
    pub fn new() -> Self {
        Self {
            scripts: FxHashMap::default(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, name: &str, bytecode: Vec<u8>) -> ScriptId {
        let id = ScriptId(self.next_id);
        self.next_id += 1;
        self.scripts.insert(
            id,
            Arc::new(Script {
                id,
                name: name.to_string(),
                bytecode,
            }),
        );
        id
    }

    pub fn get(&self, id: ScriptId) -> Result<Arc<Script>, BridgeError> {
        self.scripts
            .get(&id)
            .cloned()
            .ok_or(BridgeError::UnknownScript(id))
    }

    pub fn remove(&mut self, id: ScriptId) -> Result<(), BridgeError> {
        self.scripts
            .remove(&id)
            .map(|_| ())
            .ok_or(BridgeError::UnknownScript(id))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Compile / run
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile `source` as a global, non-strict script without running it.
///
/// Returns the engine's function bytecode object. Syntax errors come back as
/// [`BridgeError::Compilation`].
pub fn compile<'js>(
    ctx: &Ctx<'js>,
    context: ContextId,
    source: &str,
    name: &str,
) -> Result<Value<'js>, BridgeError> {
    let len = source.len();
    let mut input = Vec::with_capacity(len + 1);
    input.extend_from_slice(source.as_bytes());
    input.push(0);
    let file_name = file_name(name);

    // SAFETY: `input` is NUL terminated past `len` bytes, both buffers outlive
    // the call, and the returned value is owned by us.
    let compiled = unsafe {
        let raw = qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            input.as_ptr().cast(),
            len as _,
            file_name.as_ptr(),
            (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as i32,
        );
        Value::from_raw(ctx.clone(), raw)
    };
    if compiled.is_exception() {
        return Err(lift(
            ctx,
            context,
            rquickjs::Error::Exception,
            ErrorKind::Compilation,
        ));
    }
    Ok(compiled)
}

/// Resource names end at the first NUL; the rest cannot reach the engine.
fn file_name(name: &str) -> CString {
    let name = match name.split_once('\0') {
        Some((head, _)) => {
            debug!(name = head, "resource name truncated at NUL");
            head
        }
        None => name,
    };
    CString::new(name).unwrap_or_default()
}

/// Run function bytecode produced by [`compile`] or [`load`] in `ctx`.
///
/// Exceptions thrown while running come back as [`BridgeError::Thrown`].
pub fn run<'js>(
    ctx: &Ctx<'js>,
    context: ContextId,
    compiled: &Value<'js>,
) -> Result<Value<'js>, BridgeError> {
    let ptr = ctx.as_raw().as_ptr();
    // SAFETY: JS_EvalFunction consumes its argument, so it gets its own
    // reference; the result is owned by us.
    let result = unsafe {
        let raw = qjs::JS_EvalFunction(ptr, qjs::JS_DupValue(ptr, compiled.as_raw()));
        Value::from_raw(ctx.clone(), raw)
    };
    if result.is_exception() {
        return Err(lift(
            ctx,
            context,
            rquickjs::Error::Exception,
            ErrorKind::ScriptThrown,
        ));
    }
    Ok(result)
}

/// Compile and immediately run `source`.
pub fn evaluate<'js>(
    ctx: &Ctx<'js>,
    context: ContextId,
    source: &str,
    name: &str,
) -> Result<Value<'js>, BridgeError> {
    let compiled = compile(ctx, context, source, name)?;
    run(ctx, context, &compiled)
}

/// Serialize compiled bytecode so it can be loaded into other contexts.
pub fn write_bytecode(
    ctx: &Ctx<'_>,
    context: ContextId,
    compiled: &Value<'_>,
) -> Result<Vec<u8>, BridgeError> {
    let mut len = MaybeUninit::uninit();
    // SAFETY: on success the engine hands back a buffer of `len` bytes that
    // we copy out and free with the engine's allocator.
    unsafe {
        let buf = qjs::JS_WriteObject(
            ctx.as_raw().as_ptr(),
            len.as_mut_ptr(),
            compiled.as_raw(),
            qjs::JS_WRITE_OBJ_BYTECODE as i32,
        );
        if buf.is_null() {
            return Err(lift(
                ctx,
                context,
                rquickjs::Error::Exception,
                ErrorKind::Generic,
            ));
        }
        let len = len.assume_init();
        let bytes = slice::from_raw_parts(buf, len as _).to_vec();
        qjs::js_free(ctx.as_raw().as_ptr(), buf.cast());
        Ok(bytes)
    }
}

/// Load bytecode written by [`write_bytecode`] into `ctx`.
pub fn load<'js>(
    ctx: &Ctx<'js>,
    context: ContextId,
    bytecode: &[u8],
) -> Result<Value<'js>, BridgeError> {
    // SAFETY: the bytes were produced by `write_bytecode` on the same engine
    // build; the returned value is owned by us.
    let loaded = unsafe {
        let raw = qjs::JS_ReadObject(
            ctx.as_raw().as_ptr(),
            bytecode.as_ptr(),
            bytecode.len() as _,
            qjs::JS_READ_OBJ_BYTECODE as i32,
        );
        Value::from_raw(ctx.clone(), raw)
    };
    if loaded.is_exception() {
        return Err(lift(
            ctx,
            context,
            rquickjs::Error::Exception,
            ErrorKind::Generic,
        ));
    }
    Ok(loaded)
}

/// Run a precompiled script in `ctx`.
pub fn run_script<'js>(
    ctx: &Ctx<'js>,
    context: ContextId,
    script: &Script,
) -> Result<Value<'js>, BridgeError> {
    debug!(context = %context, script = %script.id, name = %script.name, "running script");
    let loaded = load(ctx, context, &script.bytecode)?;
    run(ctx, context, &loaded)
}
