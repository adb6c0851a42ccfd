//! Error types for the bridge

use thiserror::Error;

use crate::value::{ContextId, ErrorKind, HandleId, HandleKind, ScriptId, WireValue};

/// Everything that can go wrong between the host and the engine.
///
/// Operations on a context never hand these to the host directly: they are
/// folded into error-tagged [`WireValue`]s with [`BridgeError::into_wire`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("context {0} has been disposed")]
    ContextDisposed(ContextId),

    #[error("unknown context {0}")]
    UnknownContext(ContextId),

    #[error("stale handle {handle} in context {context}")]
    StaleHandle { handle: HandleId, context: ContextId },

    #[error("handle {handle} belongs to context {owner}, not {context}")]
    ForeignHandle {
        handle: HandleId,
        owner: ContextId,
        context: ContextId,
    },

    #[error("handle {handle} is {actual}, expected {expected}")]
    WrongHandleKind {
        handle: HandleId,
        expected: HandleKind,
        actual: HandleKind,
    },

    #[error("context belongs to a different runtime")]
    ForeignRuntime,

    #[error("{0}")]
    NotCallable(String),

    #[error("unsupported value type: {0}")]
    UnsupportedValue(String),

    #[error("{message}")]
    Compilation { message: String },

    #[error("{message}")]
    Thrown { message: String },

    #[error("unknown {0}")]
    UnknownScript(ScriptId),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

impl BridgeError {
    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ContextDisposed(_) | BridgeError::UnknownContext(_) => {
                ErrorKind::ContextDisposed
            }
            BridgeError::StaleHandle { .. } => ErrorKind::StaleHandle,
            BridgeError::ForeignHandle { .. }
            | BridgeError::WrongHandleKind { .. }
            | BridgeError::ForeignRuntime
            | BridgeError::NotCallable(_)
            | BridgeError::UnsupportedValue(_)
            | BridgeError::UnknownScript(_)
            | BridgeError::Config(_) => ErrorKind::Usage,
            BridgeError::Compilation { .. } => ErrorKind::Compilation,
            BridgeError::Thrown { .. } => ErrorKind::ScriptThrown,
            BridgeError::Engine(_) => ErrorKind::Generic,
        }
    }

    /// Fold into an error-tagged wire value.
    pub fn into_wire(self) -> WireValue {
        WireValue::error(self.kind(), self.to_string())
    }
}

impl From<BridgeError> for WireValue {
    fn from(e: BridgeError) -> Self {
        e.into_wire()
    }
}
