//! Integration tests for the bridge, organized by component
//!
//! These tests drive engines and contexts through the public API.
//!
//! ## Aggressive Test Defaults
//!
//! Test engines use a tiny GC threshold so collections run constantly and
//! handles that are not properly retained get reclaimed early.
//!
//! Override via environment variables:
//!
//! ```bash
//! cargo test                           # Default: aggressive settings
//! GC_THRESHOLD=1048576 cargo test      # Less aggressive GC for faster runs
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod context;

use std::sync::Arc;

use jsbridge::{Engine, EngineConfig, ErrorKind, ExecutionContext, WireError, WireHandle, WireValue};

/// Engine configuration with aggressive defaults for testing.
pub fn test_config() -> EngineConfig {
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    EngineConfig {
        gc_threshold: Some(gc_threshold),
        ..EngineConfig::default()
    }
}

pub fn create_test_engine() -> Engine {
    Engine::with_config(test_config()).expect("engine creation failed")
}

/// Engine plus one fresh context.
pub fn create_test_context() -> (Engine, Arc<ExecutionContext>) {
    let engine = create_test_engine();
    let context = engine.create_context().expect("context creation failed");
    (engine, context)
}

/// Run `source` in a throwaway context and return the wire result.
pub fn eval(source: &str) -> WireValue {
    let (_engine, context) = create_test_context();
    context.execute(source, None)
}

/// The handle carried by an object, array or function value.
pub fn handle(value: &WireValue) -> WireHandle {
    *value
        .as_handle()
        .unwrap_or_else(|| panic!("expected a handle, got {:?}", value))
}

/// The error carried by an error value.
pub fn error(value: &WireValue) -> &WireError {
    value
        .as_error()
        .unwrap_or_else(|| panic!("expected an error, got {:?}", value))
}

/// Check that `value` is an error of `kind` whose message contains `needle`.
pub fn is_error(value: &WireValue, kind: ErrorKind, needle: &str) -> bool {
    match value {
        WireValue::Error(e) => e.kind == kind && e.message.contains(needle),
        _ => false,
    }
}
