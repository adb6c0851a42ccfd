//! The engine: one runtime and the contexts created on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rquickjs::{Context, Runtime, qjs};
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::{Deadline, ExecutionContext};
use crate::error::BridgeError;
use crate::script::{self, ScriptTable};
use crate::value::{ContextId, ScriptId, WireHandle};

/// Id the private compilation context reports in diagnostics.
const COMPILER: ContextId = ContextId(0);

/// Owner of an engine runtime and of every [`ExecutionContext`] on it.
///
/// Dropping the engine disposes all of its contexts and compiled scripts.
///
/// ```
/// use jsbridge::{Engine, WireValue};
///
/// let engine = Engine::new().unwrap();
/// let context = engine.create_context().unwrap();
/// assert_eq!(context.execute("1 + 2", None), WireValue::Int32(3));
/// ```
pub struct Engine {
    contexts: Mutex<IndexMap<ContextId, Arc<ExecutionContext>>>,
    scripts: Arc<RwLock<ScriptTable>>,
    next_context: AtomicI32,
    config: Arc<EngineConfig>,
    deadline: Arc<Deadline>,
    compiler: Context,
    runtime: Runtime,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("contexts", &self.context_ids())
            .field("scripts", &self.scripts.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, BridgeError> {
        let runtime = Runtime::new()?;
        config.apply(&runtime);

        let deadline = Arc::new(Deadline::default());
        if config.timeout_ms.is_some() {
            let deadline = Arc::clone(&deadline);
            runtime.set_interrupt_handler(Some(Box::new(move || deadline.expired())));
        }

        let compiler = Context::full(&runtime)?;
        debug!("engine created");

        Ok(Self {
            contexts: Mutex::new(IndexMap::new()),
            scripts: Arc::new(RwLock::new(ScriptTable::new())),
            next_context: AtomicI32::new(1),
            config: Arc::new(config),
            deadline,
            compiler,
            runtime,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying runtime, e.g. for building contexts to [`adopt`](Engine::adopt_context).
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn runtime_ptr(&self) -> *mut qjs::JSRuntime {
        self.compiler.get_runtime_ptr()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Contexts
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a fresh context with the full set of standard globals.
    pub fn create_context(&self) -> Result<Arc<ExecutionContext>, BridgeError> {
        let context = Context::full(&self.runtime)?;
        Ok(self.register(context))
    }

    /// Wrap a native context created on this engine's runtime.
    pub fn adopt_context(&self, context: Context) -> Result<Arc<ExecutionContext>, BridgeError> {
        if context.get_runtime_ptr() != self.runtime_ptr() {
            return Err(BridgeError::ForeignRuntime);
        }
        Ok(self.register(context))
    }

    fn register(&self, context: Context) -> Arc<ExecutionContext> {
        let id = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        let context = Arc::new(ExecutionContext::new(
            id,
            context,
            Arc::clone(&self.scripts),
            Arc::clone(&self.config),
            Arc::clone(&self.deadline),
        ));
        self.contexts.lock().insert(id, Arc::clone(&context));
        debug!(context = %id, "context created");
        context
    }

    /// Look up a live context.
    pub fn context(&self, id: ContextId) -> Result<Arc<ExecutionContext>, BridgeError> {
        if let Some(context) = self.contexts.lock().get(&id) {
            return Ok(Arc::clone(context));
        }
        Err(self.missing(id))
    }

    /// Dispose a context, releasing all of its handles.
    ///
    /// Outstanding `Arc`s to the context stay valid but every operation on
    /// them fails with a context-disposed error.
    pub fn dispose_context(&self, id: ContextId) -> Result<(), BridgeError> {
        let context = self.contexts.lock().shift_remove(&id);
        match context {
            Some(context) => {
                context.dispose();
                Ok(())
            }
            None => Err(self.missing(id)),
        }
    }

    /// Ids of live contexts in creation order.
    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.lock().keys().copied().collect()
    }

    fn missing(&self, id: ContextId) -> BridgeError {
        // Ids are never reused, so anything below the counter was disposed
        if id.0 > 0 && id.0 < self.next_context.load(Ordering::Relaxed) {
            BridgeError::ContextDisposed(id)
        } else {
            BridgeError::UnknownContext(id)
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Scripts
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compile `source` once for running in any context of this engine.
    pub fn compile(&self, source: &str, name: Option<&str>) -> Result<ScriptId, BridgeError> {
        let name = name.unwrap_or(self.config.default_resource_name.as_str());
        let bytecode = self.compiler.with(|ctx| {
            let compiled = script::compile(&ctx, COMPILER, source, name)?;
            script::write_bytecode(&ctx, COMPILER, &compiled)
        })?;
        let size = bytecode.len();
        let id = self.scripts.write().insert(name, bytecode);
        debug!(script = %id, name, size, "script compiled");
        Ok(id)
    }

    pub fn dispose_script(&self, id: ScriptId) -> Result<(), BridgeError> {
        self.scripts.write().remove(id)?;
        debug!(script = %id, "script disposed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Handles and memory
    // ═══════════════════════════════════════════════════════════════════════════

    /// Release a handle in whichever context owns it.
    pub fn release(&self, handle: &WireHandle) -> Result<bool, BridgeError> {
        self.context(handle.context)?.release(handle)
    }

    /// Force a collection cycle.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }

    /// Dispose every context. Also done on drop.
    pub fn dispose(&self) {
        let contexts: Vec<_> = self.contexts.lock().drain(..).collect();
        for (_, context) in contexts {
            context.dispose();
        }
        self.scripts.write().clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
        debug!("engine disposed");
    }
}
