#![no_main]

use jsbridge::{Engine, EngineConfig, WireValue};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    if source.len() > 10_000 {
        return;
    }

    // Interrupt runaway loops and cap memory
    let config = EngineConfig {
        memory_limit: Some(64 * 1024 * 1024),
        timeout_ms: Some(100),
        ..EngineConfig::default()
    };
    let Ok(engine) = Engine::with_config(config) else {
        return;
    };
    let Ok(context) = engine.create_context() else {
        return;
    };

    // Any result is fine; handles handed out must stay usable
    let value = context.execute(source, None);
    if let Some(handle) = value.as_handle() {
        let _ = context.property_names(handle);
        let _ = context.marshal(&value);
        let _ = context.release(handle);
    }
    let _ = context.marshal(&WireValue::Null);
});
