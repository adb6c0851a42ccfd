//! Embeds a JavaScript engine behind a flat value marshalling layer.
//!
//! An [`Engine`] owns one engine runtime and any number of isolated
//! [`ExecutionContext`]s on it. Values cross between the engine and the host
//! as [`WireValue`]s: scalars are copied, while objects, arrays and functions
//! are kept alive in a per-context handle table and passed around as opaque
//! handles until the host releases them.
//!
//! # Example
//!
//! ```
//! use jsbridge::{Engine, WireValue};
//!
//! let engine = Engine::new().unwrap();
//! let context = engine.create_context().unwrap();
//!
//! let object = context.execute("var x = {a: 1}; x", None);
//! let handle = object.as_handle().unwrap();
//! assert_eq!(context.get_property(handle, "a"), WireValue::Int32(1));
//!
//! context.execute("function add(a, b) { return a + b; }", None);
//! let add = context.get_global("add");
//! let result = context.invoke_function(
//!     add.as_handle().unwrap(),
//!     None,
//!     &[WireValue::Int32(2), WireValue::Int32(3)],
//! );
//! assert_eq!(result, WireValue::Int32(5));
//! ```
//!
//! With the `c-api` feature (on by default) the same surface is exported as
//! `extern "C"` functions; see [`ffi`].

pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handles;
pub mod script;
pub mod value;

#[cfg(feature = "c-api")]
pub mod ffi;

pub use config::EngineConfig;
pub use context::{ContextState, ExecutionContext};
pub use engine::Engine;
pub use error::BridgeError;
pub use handles::HandleInfo;
pub use value::{
    ContextId, ErrorKind, HandleId, HandleKind, ScriptId, WireError, WireHandle, WireTag,
    WireValue,
};

/// The embedded engine crate, for callers using [`Engine::adopt_context`]
/// or [`ExecutionContext::with`].
pub use rquickjs;
