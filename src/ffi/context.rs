//! Engine, context and script lifecycle, plus the context operations.

extern crate alloc;

use alloc::boxed::Box;
use core::ptr::{self, NonNull};

use rquickjs::{Context, qjs};
use tracing::debug;

use crate::error::BridgeError;
use crate::value::{ContextId, ScriptId, WireValue};
use crate::{Engine, EngineConfig, ExecutionContext};

use super::value::{args_arg, handle_arg, receiver_arg, utf16_arg, utf16_opt, value_arg};
use super::{JsBridgeEngine, JsBridgeValue};

fn engine_ref<'a>(engine: *const JsBridgeEngine) -> Option<&'a Engine> {
    unsafe { engine.as_ref() }.map(|e| &e.engine)
}

/// Run `f` against a live context, folding every failure into an error value.
fn with_context(
    engine: *const JsBridgeEngine,
    context_id: i32,
    f: impl FnOnce(&ExecutionContext) -> Result<WireValue, BridgeError>,
) -> JsBridgeValue {
    let Some(engine) = engine_ref(engine) else {
        return JsBridgeValue::usage("NULL engine");
    };
    let result = engine
        .context(ContextId(context_id))
        .and_then(|context| f(&context));
    JsBridgeValue::from_result(result)
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Create an engine with default configuration.
///
/// Returns NULL if the runtime could not be created.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_engine_new() -> *mut JsBridgeEngine {
    match Engine::new() {
        Ok(engine) => Box::into_raw(Box::new(JsBridgeEngine { engine })),
        Err(e) => {
            debug!(error = %e, "engine creation failed");
            ptr::null_mut()
        }
    }
}

/// Create an engine from a JSON configuration document (UTF-16, NUL-terminated).
///
/// Returns NULL if the configuration is invalid or the runtime could not be
/// created.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_engine_new_with_config(config: *const u16) -> *mut JsBridgeEngine {
    let engine = unsafe { utf16_arg(config, "configuration") }
        .and_then(|json| EngineConfig::from_json(&json))
        .and_then(Engine::with_config);
    match engine {
        Ok(engine) => Box::into_raw(Box::new(JsBridgeEngine { engine })),
        Err(e) => {
            debug!(error = %e, "engine creation failed");
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// Disposes every context it owns, which releases all their handles.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_engine_free(engine: *mut JsBridgeEngine) {
    if !engine.is_null() {
        unsafe {
            drop(Box::from_raw(engine));
        }
    }
}

// ============================================================================
// Context Lifecycle
// ============================================================================

/// Create a context. Returns its id, or 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_context_new(engine: *const JsBridgeEngine) -> i32 {
    let Some(engine) = engine_ref(engine) else {
        return 0;
    };
    engine.create_context().map_or(0, |context| context.id().0)
}

/// Wrap an existing native context created on this engine's runtime.
///
/// The engine takes its own reference to `native`; the caller keeps theirs.
/// Returns the new context id, or 0 if `native` is NULL or belongs to
/// another runtime.
///
/// # Safety
/// `native` must be NULL or a live QuickJS context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_context_adopt(
    engine: *const JsBridgeEngine,
    native: *mut qjs::JSContext,
) -> i32 {
    let Some(engine) = engine_ref(engine) else {
        return 0;
    };
    let Some(native) = NonNull::new(native) else {
        return 0;
    };
    // SAFETY: `native` is a live context per the caller
    if unsafe { qjs::JS_GetRuntime(native.as_ptr()) } != engine.runtime_ptr() {
        return 0;
    }
    // SAFETY: same runtime, and the duplicated reference is ours to drop
    let context = unsafe {
        let owned = qjs::JS_DupContext(native.as_ptr());
        match NonNull::new(owned) {
            Some(owned) => Context::from_raw(owned, engine.runtime().clone()),
            None => return 0,
        }
    };
    engine.adopt_context(context).map_or(0, |context| context.id().0)
}

/// Dispose a context and every handle it owns.
///
/// Returns null, or an error value if the id is unknown or already disposed.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_context_free(engine: *const JsBridgeEngine, context_id: i32) -> JsBridgeValue {
    let Some(engine) = engine_ref(engine) else {
        return JsBridgeValue::usage("NULL engine");
    };
    JsBridgeValue::from_result(
        engine
            .dispose_context(ContextId(context_id))
            .map(|()| WireValue::Null),
    )
}

// ============================================================================
// Scripts
// ============================================================================

/// Compile a script for later use with `jsbridge_execute_script`.
///
/// On success writes the script id to `out_script` and returns null; on
/// failure returns an error value (kind `Compilation` for syntax errors).
/// `name` may be NULL.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_script_compile(
    engine: *const JsBridgeEngine,
    source: *const u16,
    name: *const u16,
    out_script: *mut usize,
) -> JsBridgeValue {
    let Some(engine) = engine_ref(engine) else {
        return JsBridgeValue::usage("NULL engine");
    };
    let result = (|| -> Result<WireValue, BridgeError> {
        let source = unsafe { utf16_arg(source, "source") }?;
        let name = unsafe { utf16_opt(name) }?;
        let id = engine.compile(&source, name.as_deref())?;
        if let Some(out) = unsafe { out_script.as_mut() } {
            *out = id.0;
        }
        Ok(WireValue::Null)
    })();
    JsBridgeValue::from_result(result)
}

/// Dispose a compiled script.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_script_free(engine: *const JsBridgeEngine, script: usize) -> JsBridgeValue {
    let Some(engine) = engine_ref(engine) else {
        return JsBridgeValue::usage("NULL engine");
    };
    JsBridgeValue::from_result(engine.dispose_script(ScriptId(script)).map(|()| WireValue::Null))
}

// ============================================================================
// Execution
// ============================================================================

/// Compile and run `source` in a context. `resource_name` may be NULL.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_execute(
    engine: *const JsBridgeEngine,
    context_id: i32,
    source: *const u16,
    resource_name: *const u16,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let source = unsafe { utf16_arg(source, "source") }?;
        let name = unsafe { utf16_opt(resource_name) }?;
        Ok(context.execute(&source, name.as_deref()))
    })
}

/// Run a compiled script in a context.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_execute_script(
    engine: *const JsBridgeEngine,
    context_id: i32,
    script: usize,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        Ok(context.execute_compiled(ScriptId(script)))
    })
}

// ============================================================================
// Globals
// ============================================================================

/// Set a global variable. Returns null on success.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_global(
    engine: *const JsBridgeEngine,
    context_id: i32,
    name: *const u16,
    value: *const JsBridgeValue,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let name = unsafe { utf16_arg(name, "name") }?;
        let value = unsafe { value_arg(value) }?;
        Ok(context.set_global(&name, &value))
    })
}

/// Read a global variable.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_get_global(
    engine: *const JsBridgeEngine,
    context_id: i32,
    name: *const u16,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let name = unsafe { utf16_arg(name, "name") }?;
        Ok(context.get_global(&name))
    })
}

/// Get the global object as an object handle.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_global_object(engine: *const JsBridgeEngine, context_id: i32) -> JsBridgeValue {
    with_context(engine, context_id, |context| Ok(context.global_object()))
}

// ============================================================================
// Properties
// ============================================================================

/// Enumerable property names of an object, as an array handle.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_property_names(
    engine: *const JsBridgeEngine,
    context_id: i32,
    object: *const JsBridgeValue,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let object = unsafe { handle_arg(object) }?;
        Ok(context.property_names(&object))
    })
}

/// Read a property of an object.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_get_property(
    engine: *const JsBridgeEngine,
    context_id: i32,
    object: *const JsBridgeValue,
    name: *const u16,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let object = unsafe { handle_arg(object) }?;
        let name = unsafe { utf16_arg(name, "name") }?;
        Ok(context.get_property(&object, &name))
    })
}

/// Write a property of an object. Returns null on success.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_property(
    engine: *const JsBridgeEngine,
    context_id: i32,
    object: *const JsBridgeValue,
    name: *const u16,
    value: *const JsBridgeValue,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let object = unsafe { handle_arg(object) }?;
        let name = unsafe { utf16_arg(name, "name") }?;
        let value = unsafe { value_arg(value) }?;
        Ok(context.set_property(&object, &name, &value))
    })
}

// ============================================================================
// Calls
// ============================================================================

/// Call a function handle.
///
/// `this` may be NULL (or null-tagged) to call with the global object as
/// receiver. `args` is NULL or a list-tagged value.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_invoke_function(
    engine: *const JsBridgeEngine,
    context_id: i32,
    function: *const JsBridgeValue,
    this: *const JsBridgeValue,
    args: *const JsBridgeValue,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let function = unsafe { handle_arg(function) }?;
        let this = unsafe { receiver_arg(this) }?;
        let args = unsafe { args_arg(args) }?;
        Ok(context.invoke_function(&function, this.as_ref(), &args))
    })
}

/// Call a method of an object by name.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_invoke_method(
    engine: *const JsBridgeEngine,
    context_id: i32,
    object: *const JsBridgeValue,
    name: *const u16,
    args: *const JsBridgeValue,
) -> JsBridgeValue {
    with_context(engine, context_id, |context| {
        let object = unsafe { handle_arg(object) }?;
        let name = unsafe { utf16_arg(name, "name") }?;
        let args = unsafe { args_arg(args) }?;
        Ok(context.invoke_method(&object, &name, &args))
    })
}

// ============================================================================
// Handles
// ============================================================================

/// Release one host reference to an object, array or function handle.
///
/// Returns a boolean: true once the last reference is gone.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_handle_release(
    engine: *const JsBridgeEngine,
    handle: *const JsBridgeValue,
) -> JsBridgeValue {
    let Some(engine) = engine_ref(engine) else {
        return JsBridgeValue::usage("NULL engine");
    };
    let result = unsafe { handle_arg(handle) }
        .and_then(|handle| engine.release(&handle))
        .map(WireValue::Boolean);
    JsBridgeValue::from_result(result)
}
