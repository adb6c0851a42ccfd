//! Keep-alive table for engine values held by the host.
//!
//! Every object, array or function that crosses into host space is wrapped in
//! a [`Persistent`] holder and stored under a [`HandleId`]. The holder keeps
//! the engine's collector away from the value until the host releases it.
//!
//! The table must only be touched while the engine runtime is locked, i.e.
//! from inside `Context::with`. That includes dropping entries: releasing a
//! holder decrements an engine reference count.

use rquickjs::{Ctx, Persistent, Value, qjs};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::BridgeError;
use crate::value::{ContextId, HandleId, HandleKind, WireHandle};

/// Snapshot of a live handle's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    pub kind: HandleKind,
    /// Outstanding host references; the holder is dropped when this reaches zero.
    pub refs: u32,
    /// Handle of the object this value was read from, if any.
    pub owner: Option<HandleId>,
}

struct Entry {
    value: Persistent<Value<'static>>,
    kind: HandleKind,
    refs: u32,
    owner: Option<HandleId>,
    identity: usize,
}

/// Per-context registry of retained engine values.
pub struct HandleTable {
    context: ContextId,
    entries: FxHashMap<HandleId, Entry>,
    /// Engine object address -> handle, so the same object maps to one id.
    identities: FxHashMap<usize, HandleId>,
    next_id: usize,
}

// SAFETY: the persistent holders reference the engine runtime, which is
// `Send + Sync` with rquickjs' `parallel` feature. Entries are created,
// cloned and dropped only while the runtime lock is held (inside
// `Context::with`), so moving the table between threads never lets two
// threads touch engine reference counts at once.
unsafe impl Send for HandleTable {}

impl HandleTable {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            entries: FxHashMap::default(),
            identities: FxHashMap::default(),
            // 0 is reserved as "no handle" on the C boundary
            next_id: 1,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retain `value` and return its handle.
    ///
    /// An object that already has a live handle gets the same id back, with
    /// its reference count bumped. `value` must be an engine object.
    pub fn retain<'js>(
        &mut self,
        ctx: &Ctx<'js>,
        value: Value<'js>,
        kind: HandleKind,
        owner: Option<HandleId>,
    ) -> WireHandle {
        let identity = identity_of(&value);

        if let Some(id) = self.identities.get(&identity).copied() {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.refs = entry.refs.saturating_add(1);
                if entry.owner.is_none() {
                    entry.owner = owner;
                }
                trace!(context = %self.context, handle = %id, refs = entry.refs, "handle reused");
                return WireHandle::new(id, self.context);
            }
        }

        let id = HandleId(self.next_id);
        self.next_id += 1;

        self.entries.insert(
            id,
            Entry {
                value: Persistent::save(ctx, value),
                kind,
                refs: 1,
                owner,
                identity,
            },
        );
        self.identities.insert(identity, id);
        trace!(context = %self.context, handle = %id, %kind, "handle retained");

        WireHandle::new(id, self.context)
    }

    /// Produce a scoped reference to the value behind `handle`.
    ///
    /// The returned value borrows the current `ctx` and must not outlive the
    /// operation that asked for it.
    pub fn resolve<'js>(
        &self,
        ctx: &Ctx<'js>,
        handle: &WireHandle,
    ) -> Result<(Value<'js>, HandleKind), BridgeError> {
        let entry = self.entry(handle)?;
        let value = entry.value.clone().restore(ctx)?;
        Ok((value, entry.kind))
    }

    /// Drop one host reference to `handle`.
    ///
    /// Returns `true` when this was the last reference and the holder was
    /// disposed, making the value collectible again.
    pub fn release(&mut self, handle: &WireHandle) -> Result<bool, BridgeError> {
        let refs = {
            let entry = self.entry_mut(handle)?;
            entry.refs = entry.refs.saturating_sub(1);
            entry.refs
        };
        if refs > 0 {
            trace!(context = %self.context, handle = %handle.id, refs, "handle released");
            return Ok(false);
        }

        if let Some(entry) = self.entries.remove(&handle.id) {
            self.identities.remove(&entry.identity);
            drop(entry);
        }
        trace!(context = %self.context, handle = %handle.id, "handle disposed");
        Ok(true)
    }

    /// Dispose every holder at once. Returns how many were live.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.identities.clear();
        count
    }

    pub fn info(&self, id: HandleId) -> Option<HandleInfo> {
        self.entries.get(&id).map(|entry| HandleInfo {
            kind: entry.kind,
            refs: entry.refs,
            owner: entry.owner,
        })
    }

    fn check_context(&self, handle: &WireHandle) -> Result<(), BridgeError> {
        if handle.context != self.context {
            return Err(BridgeError::ForeignHandle {
                handle: handle.id,
                owner: handle.context,
                context: self.context,
            });
        }
        Ok(())
    }

    fn entry(&self, handle: &WireHandle) -> Result<&Entry, BridgeError> {
        self.check_context(handle)?;
        self.entries
            .get(&handle.id)
            .ok_or(BridgeError::StaleHandle {
                handle: handle.id,
                context: self.context,
            })
    }

    fn entry_mut(&mut self, handle: &WireHandle) -> Result<&mut Entry, BridgeError> {
        self.check_context(handle)?;
        let context = self.context;
        self.entries
            .get_mut(&handle.id)
            .ok_or(BridgeError::StaleHandle {
                handle: handle.id,
                context,
            })
    }
}

/// Address of the engine object behind `value`.
///
/// Stable for as long as a holder keeps the object alive.
fn identity_of(value: &Value<'_>) -> usize {
    // SAFETY: only called for object-tagged values, whose payload is a pointer.
    unsafe { qjs::JS_VALUE_GET_PTR(value.as_raw()) as usize }
}
