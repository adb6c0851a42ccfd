#![no_main]

use std::sync::OnceLock;

use jsbridge::{ContextId, Engine, ErrorKind, HandleId, WireHandle, WireValue};
use libfuzzer_sys::fuzz_target;

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| Engine::new().expect("engine"))
}

/// Decode an arbitrary wire value from the fuzzer's bytes.
fn decode(data: &[u8]) -> WireValue {
    let Some((&tag, rest)) = data.split_first() else {
        return WireValue::Null;
    };
    let mut word = [0u8; 8];
    for (slot, byte) in word.iter_mut().zip(rest) {
        *slot = *byte;
    }
    let n = i64::from_le_bytes(word);
    match tag % 11 {
        0 => WireValue::Null,
        1 => WireValue::Boolean(n & 1 == 1),
        2 => WireValue::Int32(n as i32),
        3 => WireValue::Double(f64::from_bits(n as u64)),
        4 => WireValue::String(String::from_utf8_lossy(rest).into_owned()),
        5 => WireValue::Date(f64::from_bits(n as u64)),
        6 => WireValue::Int64(n),
        7 => WireValue::Object(WireHandle::new(HandleId(n as usize % 8), ContextId((n >> 32) as i32 % 4))),
        8 => WireValue::Array(WireHandle::new(HandleId(n as usize % 8), ContextId(1))),
        9 => WireValue::Function(WireHandle::new(HandleId(n as usize % 8), ContextId(1))),
        _ => WireValue::error(ErrorKind::Generic, String::from_utf8_lossy(rest)),
    }
}

fuzz_target!(|data: &[u8]| {
    let engine = engine();
    let Ok(context) = engine.create_context() else {
        return;
    };
    context.execute("var o = {a: [1, 2], f() { return this.a; }}; o", None);

    // Forged handles must come back as errors, never crash
    let value = decode(data);
    let _ = context.marshal(&value);
    let _ = context.set_global("fuzzed", &value);
    if let Some(handle) = value.as_handle() {
        let _ = context.get_property(handle, "a");
        let _ = context.invoke_method(handle, "f", &[]);
        let _ = context.release(handle);
    }
    let _ = engine.dispose_context(context.id());
});
