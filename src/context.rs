//! Execution contexts.
//!
//! An [`ExecutionContext`] owns one engine global scope plus the handle table
//! for values it has handed to the host. Every operation takes the context's
//! own lock, then the runtime lock (`Context::with`, which also enters the
//! context), does its work and converts the result through the codec. The
//! closure scope of `with` guarantees the runtime is released and the context
//! exited on every path, including errors.
//!
//! Operations never return `Result`: failures come back as error-tagged
//! [`WireValue`]s.

use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use parking_lot::{Mutex, RwLock};
use rquickjs::function::Args;
use rquickjs::{Array, Ctx, Filter, Function, Value, qjs};
use tracing::{debug, trace, warn};

use crate::codec::{Intrinsics, Marshaller, lift};
use crate::config::EngineConfig;
use crate::error::BridgeError;
use crate::handles::{HandleInfo, HandleTable};
use crate::script::{self, ScriptTable};
use crate::value::{ContextId, ErrorKind, HandleId, ScriptId, WireHandle, WireValue};

const PROPERTY_NOT_CALLABLE: &str = "property not found or isn't a function";

/// Lifecycle state of an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Accepts operations.
    Active,
    /// Terminal; every operation fails with a context-disposed error.
    Disposed,
}

/// Execution deadline shared by every context of an engine.
///
/// The runtime's interrupt handler polls it while script runs. It is only
/// armed and disarmed with the runtime locked.
#[derive(Debug, Default)]
pub(crate) struct Deadline(Mutex<Option<Instant>>);

impl Deadline {
    fn arm(&self, timeout: Option<Duration>) {
        *self.0.lock() = timeout.map(|t| Instant::now() + t);
    }

    fn disarm(&self) {
        *self.0.lock() = None;
    }

    pub(crate) fn expired(&self) -> bool {
        let deadline = *self.0.lock();
        deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

struct Live {
    context: rquickjs::Context,
    handles: HandleTable,
    intrinsics: Intrinsics,
}

/// One isolated global scope inside an [`Engine`](crate::Engine).
pub struct ExecutionContext {
    id: ContextId,
    live: Mutex<Option<Live>>,
    scripts: Arc<RwLock<ScriptTable>>,
    config: Arc<EngineConfig>,
    deadline: Arc<Deadline>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ExecutionContext {
    pub(crate) fn new(
        id: ContextId,
        context: rquickjs::Context,
        scripts: Arc<RwLock<ScriptTable>>,
        config: Arc<EngineConfig>,
        deadline: Arc<Deadline>,
    ) -> Self {
        let intrinsics = context.with(|ctx| Intrinsics::capture(&ctx));
        Self {
            id,
            live: Mutex::new(Some(Live {
                context,
                handles: HandleTable::new(id),
                intrinsics,
            })),
            scripts,
            config,
            deadline,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        if self.live.lock().is_some() {
            ContextState::Active
        } else {
            ContextState::Disposed
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Script execution
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compile and run `source` against this context's global scope.
    ///
    /// `resource_name` tags the script in stack traces; scripts without one
    /// use the engine's default name.
    pub fn execute(&self, source: &str, resource_name: Option<&str>) -> WireValue {
        let name = resource_name.unwrap_or(self.config.default_resource_name.as_str());
        self.run_script("execute", |m| {
            let value = script::evaluate(m.ctx(), m.context(), source, name)?;
            m.from_native(value, None)
        })
    }

    /// Run a script previously compiled with [`Engine::compile`](crate::Engine::compile).
    pub fn execute_compiled(&self, id: ScriptId) -> WireValue {
        let compiled = match self.scripts.read().get(id) {
            Ok(compiled) => compiled,
            Err(e) => return e.into_wire(),
        };
        self.run_script("execute_compiled", |m| {
            let value = script::run_script(m.ctx(), m.context(), &compiled)?;
            m.from_native(value, None)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Globals
    // ═══════════════════════════════════════════════════════════════════════════

    /// Define or overwrite a property of the global object.
    ///
    /// Returns null on success. A set the engine refuses is logged and also
    /// returns null, unless the engine was configured with
    /// `report_failed_sets`.
    pub fn set_global(&self, name: &str, value: &WireValue) -> WireValue {
        self.run("set_global", |m| {
            let native = m.to_native(value)?;
            let result = m.ctx().globals().set(name, native);
            self.settle_set(m, name, result)
        })
    }

    /// Read a property of the global object. Missing names read as null.
    pub fn get_global(&self, name: &str) -> WireValue {
        self.run("get_global", |m| {
            let value: Value = m
                .ctx()
                .globals()
                .get(name)
                .map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
            m.from_native(value, None)
        })
    }

    /// The global object itself, as an object handle.
    pub fn global_object(&self) -> WireValue {
        self.run("global_object", |m| {
            let globals = m.ctx().globals();
            m.from_native(globals.into_value(), None)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Properties
    // ═══════════════════════════════════════════════════════════════════════════

    /// Enumerable string-keyed property names of `object`, own first, then
    /// inherited, as an array handle.
    pub fn property_names(&self, object: &WireHandle) -> WireValue {
        self.run("property_names", |m| {
            let target = m.resolve_object(object)?;

            // Every name seen so far, enumerable or not, shadows the same
            // name further up the chain
            let mut seen = FxHashSet::default();
            let mut names = IndexSet::new();
            let mut current = Some(target);
            while let Some(obj) = current {
                let enumerable = obj
                    .keys::<String>()
                    .collect::<rquickjs::Result<FxHashSet<String>>>()
                    .map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
                for key in obj.own_keys::<String>(Filter::new().string()) {
                    let key = key.map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    if enumerable.contains(&key) {
                        names.insert(key);
                    }
                }
                current = obj.get_prototype();
            }

            let array = Array::new(m.ctx().clone())?;
            for (index, name) in names.into_iter().enumerate() {
                array.set(index, name)?;
            }
            m.from_native(array.into_value(), None)
        })
    }

    /// Read `name` from `object`. Handles produced here record `object` as
    /// their owner.
    pub fn get_property(&self, object: &WireHandle, name: &str) -> WireValue {
        self.run("get_property", |m| {
            let target = m.resolve_object(object)?;
            let value: Value = target
                .get(name)
                .map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
            m.from_native(value, Some(object.id))
        })
    }

    /// Write `name` on `object`; same reporting rules as [`ExecutionContext::set_global`].
    pub fn set_property(&self, object: &WireHandle, name: &str, value: &WireValue) -> WireValue {
        self.run("set_property", |m| {
            let target = m.resolve_object(object)?;
            let native = m.to_native(value)?;
            let result = target.set(name, native);
            self.settle_set(m, name, result)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Call the function behind `function`.
    ///
    /// Without `this` the global object is the receiver.
    pub fn invoke_function(
        &self,
        function: &WireHandle,
        this: Option<&WireHandle>,
        args: &[WireValue],
    ) -> WireValue {
        self.run_script("invoke_function", |m| {
            let callee = m
                .resolve(function)?
                .into_function()
                .ok_or_else(|| {
                    BridgeError::NotCallable(format!("handle {} is not a function", function.id))
                })?;
            let receiver = match this {
                Some(this) => m.resolve(this)?,
                None => m.ctx().globals().into_value(),
            };
            call(m, callee, receiver, args, None)
        })
    }

    /// Look up `name` on `object` and call it with `object` as receiver.
    pub fn invoke_method(&self, object: &WireHandle, name: &str, args: &[WireValue]) -> WireValue {
        self.run_script("invoke_method", |m| {
            let target = m.resolve_object(object)?;
            let property: Value = target
                .get(name)
                .map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
            let callee = property
                .into_function()
                .ok_or_else(|| BridgeError::NotCallable(PROPERTY_NOT_CALLABLE.to_string()))?;
            call(m, callee, target.into_value(), args, Some(object.id))
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Handles
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drop one host reference to `handle`.
    ///
    /// Returns `true` once the last reference is gone and the value is
    /// collectible again.
    pub fn release(&self, handle: &WireHandle) -> Result<bool, BridgeError> {
        self.with_live(|live| {
            let Live { context, handles, .. } = live;
            context.with(|_| handles.release(handle))
        })
    }

    /// Number of live handles; zero once disposed.
    pub fn handle_count(&self) -> usize {
        self.live
            .lock()
            .as_ref()
            .map_or(0, |live| live.handles.len())
    }

    pub fn handle_info(&self, id: HandleId) -> Option<HandleInfo> {
        self.live
            .lock()
            .as_ref()
            .and_then(|live| live.handles.info(id))
    }

    /// Pass `value` into the engine and straight back out again.
    pub fn marshal(&self, value: &WireValue) -> WireValue {
        self.run("marshal", |m| {
            let native = m.to_native(value)?;
            m.from_native(native, None)
        })
    }

    /// Run `f` with this context entered.
    ///
    /// Gives Rust callers direct access to the engine for things the wire
    /// surface does not cover.
    pub fn with<R>(&self, f: impl for<'js> FnOnce(Ctx<'js>) -> R) -> Result<R, BridgeError> {
        self.with_live(|live| Ok(live.context.with(f)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Disposal
    // ═══════════════════════════════════════════════════════════════════════════

    /// Release every handle and the global scope.
    ///
    /// Returns `false` if the context was already disposed.
    pub fn dispose(&self) -> bool {
        let Some(live) = self.live.lock().take() else {
            return false;
        };
        let Live {
            context,
            mut handles,
            intrinsics,
        } = live;

        // Holders must go while the runtime is locked, the context itself
        // only once it is unlocked again.
        let released = context.with(|_| {
            drop(intrinsics);
            handles.clear()
        });
        drop(handles);
        drop(context);

        if released > 0 {
            warn!(context = %self.id, handles = released, "context disposed with live handles");
        }
        debug!(context = %self.id, "context disposed");
        true
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Plumbing
    // ═══════════════════════════════════════════════════════════════════════════

    fn with_live<R>(
        &self,
        f: impl FnOnce(&mut Live) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        let mut guard = self.live.lock();
        match guard.as_mut() {
            Some(live) => f(live),
            None => Err(BridgeError::ContextDisposed(self.id)),
        }
    }

    fn run<F>(&self, op: &'static str, f: F) -> WireValue
    where
        F: for<'a, 'js> FnOnce(&mut Marshaller<'a, 'js>) -> Result<WireValue, BridgeError>,
    {
        trace!(context = %self.id, op, "operation");
        self.with_live(|live| {
            let Live {
                context,
                handles,
                intrinsics,
            } = live;
            context.with(|ctx| f(&mut Marshaller::new(ctx, handles, intrinsics)))
        })
        .unwrap_or_else(BridgeError::into_wire)
    }

    /// Like [`ExecutionContext::run`] for operations that run script: the
    /// execution deadline is armed, and queued promise jobs are drained before
    /// the runtime is unlocked.
    fn run_script<F>(&self, op: &'static str, f: F) -> WireValue
    where
        F: for<'a, 'js> FnOnce(&mut Marshaller<'a, 'js>) -> Result<WireValue, BridgeError>,
    {
        trace!(context = %self.id, op, "operation");
        self.with_live(|live| {
            let Live {
                context,
                handles,
                intrinsics,
            } = live;
            context.with(|ctx| {
                // Armed under the runtime lock, so concurrent operations on
                // other contexts cannot move the deadline
                self.deadline.arm(self.config.timeout());
                let result = f(&mut Marshaller::new(ctx.clone(), handles, intrinsics));
                self.drain_jobs(&ctx);
                self.deadline.disarm();
                result
            })
        })
        .unwrap_or_else(BridgeError::into_wire)
    }

    /// Run queued promise jobs until the queue is empty. Jobs may belong to
    /// any context of the runtime.
    fn drain_jobs(&self, ctx: &Ctx<'_>) {
        // SAFETY: `ctx` is live and the runtime is locked for its lifetime
        let runtime = unsafe { qjs::JS_GetRuntime(ctx.as_raw().as_ptr()) };
        loop {
            let mut job_ctx = ptr::null_mut();
            // SAFETY: as above
            let status = unsafe { qjs::JS_ExecutePendingJob(runtime, &mut job_ctx) };
            if status == 0 {
                break;
            }
            if status > 0 {
                continue;
            }
            if let Some(job_ctx) = NonNull::new(job_ctx) {
                // SAFETY: same runtime, still locked; `from_raw` takes its own reference
                let job_ctx = unsafe { Ctx::from_raw(job_ctx) };
                let error = lift(&job_ctx, self.id, rquickjs::Error::Exception, ErrorKind::ScriptThrown);
                warn!(context = %self.id, %error, "pending job threw");
            }
        }
    }

    fn settle_set(
        &self,
        m: &Marshaller<'_, '_>,
        name: &str,
        result: rquickjs::Result<()>,
    ) -> Result<WireValue, BridgeError> {
        let Err(e) = result else {
            return Ok(WireValue::Null);
        };
        let error = m.lift(e, ErrorKind::ScriptThrown);
        if self.config.report_failed_sets {
            return Err(error);
        }
        warn!(context = %self.id, property = name, %error, "set failed");
        Ok(WireValue::Null)
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn call<'js>(
    m: &mut Marshaller<'_, 'js>,
    callee: Function<'js>,
    receiver: Value<'js>,
    args: &[WireValue],
    owner: Option<HandleId>,
) -> Result<WireValue, BridgeError> {
    let mut call_args = Args::new(m.ctx().clone(), args.len());
    call_args.this(receiver)?;
    for arg in args {
        call_args.push_arg(m.to_native(arg)?)?;
    }
    let result: Value = callee
        .call_arg(call_args)
        .map_err(|e| m.lift(e, ErrorKind::ScriptThrown))?;
    m.from_native(result, owner)
}
