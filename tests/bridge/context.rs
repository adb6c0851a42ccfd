//! Tests for the execution context operation surface

use jsbridge::{ContextState, EngineConfig, ErrorKind, HandleKind, WireValue};

use super::{create_test_context, error, eval, handle, is_error, test_config};

// ═══════════════════════════════════════════════════════════════════════════════
// Execute
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_execute_arithmetic() {
    assert_eq!(eval("1+2"), WireValue::Int32(3));
}

#[test]
fn test_execute_undefined_is_null() {
    assert_eq!(eval("undefined"), WireValue::Null);
    assert_eq!(eval("var unused = 1;"), WireValue::Null);
}

#[test]
fn test_execute_string() {
    assert_eq!(eval("'a' + 'b'"), WireValue::String("ab".into()));
}

#[test]
fn test_execute_throw_is_script_thrown() {
    let result = eval("throw new Error('boom')");
    assert!(
        is_error(&result, ErrorKind::ScriptThrown, "boom"),
        "got {:?}",
        result
    );
}

#[test]
fn test_execute_thrown_string_is_verbatim() {
    let result = eval("throw 'plain message'");
    assert_eq!(error(&result).message, "plain message");
    assert_eq!(error(&result).kind, ErrorKind::ScriptThrown);
}

#[test]
fn test_execute_thrown_object_with_broken_to_string() {
    let result = eval("throw { toString() { throw new Error('nested'); } }");
    assert_eq!(error(&result).kind, ErrorKind::ScriptThrown);
    assert_eq!(error(&result).message, "exception");
}

#[test]
fn test_execute_syntax_error_is_compilation() {
    let result = eval("function (");
    assert_eq!(error(&result).kind, ErrorKind::Compilation);
    assert!(!error(&result).message.is_empty());
}

#[test]
fn test_syntax_error_runs_nothing() {
    let (_engine, context) = create_test_context();
    context.execute("var ran = 'before';", None);
    let result = context.execute("ran = 'after'; )", None);
    assert_eq!(error(&result).kind, ErrorKind::Compilation);
    assert_eq!(context.get_global("ran"), WireValue::String("before".into()));
}

#[test]
fn test_exception_does_not_leak_into_next_operation() {
    let (_engine, context) = create_test_context();
    assert!(context.execute("throw new TypeError('first')", None).is_error());
    assert_eq!(context.execute("1 + 1", None), WireValue::Int32(2));
}

#[test]
fn test_execute_resource_name_in_stack() {
    let (_engine, context) = create_test_context();
    let stack = context.execute("new Error('x').stack", Some("named.js"));
    assert!(stack.as_str().unwrap().contains("named.js"), "got {:?}", stack);
}

#[test]
fn test_scripts_share_global_scope() {
    let (_engine, context) = create_test_context();
    context.execute("var counter = 1;", None);
    context.execute("counter += 41;", None);
    assert_eq!(context.execute("counter", None), WireValue::Int32(42));
}

#[test]
fn test_promise_jobs_run_after_execute() {
    let (_engine, context) = create_test_context();
    context.execute(
        "var done = false; Promise.resolve().then(() => { done = true; });",
        None,
    );
    assert_eq!(context.get_global("done"), WireValue::Boolean(true));
}

#[test]
fn test_timeout_interrupts_runaway_script() {
    let engine = jsbridge::Engine::with_config(EngineConfig {
        timeout_ms: Some(50),
        ..test_config()
    })
    .unwrap();
    let context = engine.create_context().unwrap();

    let result = context.execute("for (;;) {}", None);
    assert!(
        is_error(&result, ErrorKind::ScriptThrown, "interrupted"),
        "got {:?}",
        result
    );
    // The context survives the interrupt
    assert_eq!(context.execute("40 + 2", None), WireValue::Int32(42));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Globals
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_set_then_get_global() {
    let (_engine, context) = create_test_context();
    assert_eq!(
        context.set_global("greeting", &WireValue::String("hi".into())),
        WireValue::Null
    );
    assert_eq!(
        context.execute("greeting + '!'", None),
        WireValue::String("hi!".into())
    );
    assert_eq!(context.get_global("greeting"), WireValue::String("hi".into()));
}

#[test]
fn test_get_missing_global_is_null() {
    let (_engine, context) = create_test_context();
    assert_eq!(context.get_global("doesNotExist"), WireValue::Null);
}

#[test]
fn test_get_global_getter_that_throws() {
    let (_engine, context) = create_test_context();
    context.execute(
        "Object.defineProperty(globalThis, 'trap', { get() { throw new Error('no peeking'); } });",
        None,
    );
    let result = context.get_global("trap");
    assert!(is_error(&result, ErrorKind::ScriptThrown, "no peeking"));
}

#[test]
fn test_set_global_date() {
    let (_engine, context) = create_test_context();
    context.set_global("when", &WireValue::Date(86_400_000.0));
    assert_eq!(
        context.execute("when instanceof Date && when.getTime()", None),
        WireValue::Int32(86_400_000)
    );
}

#[test]
fn test_failed_global_set_is_silent_by_default() {
    let (_engine, context) = create_test_context();
    context.execute(
        "Object.defineProperty(globalThis, 'fixed', { value: 1, writable: false });",
        None,
    );
    assert_eq!(context.set_global("fixed", &WireValue::Int32(2)), WireValue::Null);
    assert_eq!(context.get_global("fixed"), WireValue::Int32(1));
}

#[test]
fn test_failed_global_set_is_reported_when_configured() {
    let engine = jsbridge::Engine::with_config(EngineConfig {
        report_failed_sets: true,
        ..test_config()
    })
    .unwrap();
    let context = engine.create_context().unwrap();
    context.execute(
        "Object.defineProperty(globalThis, 'fixed', { value: 1, writable: false });",
        None,
    );
    let result = context.set_global("fixed", &WireValue::Int32(2));
    assert_eq!(error(&result).kind, ErrorKind::ScriptThrown);
    // Successful sets still return null
    assert_eq!(context.set_global("free", &WireValue::Int32(2)), WireValue::Null);
}

#[test]
fn test_global_object_handle() {
    let (_engine, context) = create_test_context();
    context.execute("var marker = 'global';", None);
    let global = context.global_object();
    assert!(matches!(global, WireValue::Object(_)));
    assert_eq!(
        context.get_property(&handle(&global), "marker"),
        WireValue::String("global".into())
    );
    // The same object keeps the same handle
    assert_eq!(context.global_object(), global);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_object_property_lookup() {
    let (_engine, context) = create_test_context();
    let object = context.execute("var x = {a:1}; x", None);
    assert!(matches!(object, WireValue::Object(_)));
    assert_eq!(context.get_property(&handle(&object), "a"), WireValue::Int32(1));
}

#[test]
fn test_missing_property_is_null() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({})", None);
    assert_eq!(context.get_property(&handle(&object), "nope"), WireValue::Null);
}

#[test]
fn test_set_property_is_visible_to_script() {
    let (_engine, context) = create_test_context();
    let object = context.execute("var target = {}; target", None);
    assert_eq!(
        context.set_property(&handle(&object), "added", &WireValue::Double(2.5)),
        WireValue::Null
    );
    assert_eq!(context.execute("target.added * 2", None), WireValue::Int32(5));
}

#[test]
fn test_set_property_on_frozen_object() {
    let (_engine, context) = create_test_context();
    let object = context.execute("Object.freeze({ a: 1 })", None);
    assert_eq!(
        context.set_property(&handle(&object), "a", &WireValue::Int32(2)),
        WireValue::Null
    );
    assert_eq!(context.get_property(&handle(&object), "a"), WireValue::Int32(1));
}

#[test]
fn test_nested_property_records_owner() {
    let (_engine, context) = create_test_context();
    let outer = context.execute("({ inner: { deep: true } })", None);
    let inner = context.get_property(&handle(&outer), "inner");
    let info = context.handle_info(handle(&inner).id).unwrap();
    assert_eq!(info.kind, HandleKind::Object);
    assert_eq!(info.owner, Some(handle(&outer).id));
    assert_eq!(
        context.get_property(&handle(&inner), "deep"),
        WireValue::Boolean(true)
    );
}

#[test]
fn test_property_names_include_inherited() {
    let (_engine, context) = create_test_context();
    let object = context.execute(
        "var base = { a: 1, b: 2 }; var child = Object.create(base); child.own = 3; child.a = 4; child",
        None,
    );
    let names = context.property_names(&handle(&object));
    assert!(matches!(names, WireValue::Array(_)));
    let names = handle(&names);

    assert_eq!(context.get_property(&names, "length"), WireValue::Int32(3));
    assert_eq!(context.get_property(&names, "0"), WireValue::String("own".into()));
    assert_eq!(context.get_property(&names, "1"), WireValue::String("a".into()));
    assert_eq!(context.get_property(&names, "2"), WireValue::String("b".into()));
}

#[test]
fn test_property_names_skip_non_enumerable() {
    let (_engine, context) = create_test_context();
    let object = context.execute(
        "var o = { shown: 1 }; Object.defineProperty(o, 'hidden', { value: 2 }); o",
        None,
    );
    let names = handle(&context.property_names(&handle(&object)));
    assert_eq!(context.get_property(&names, "length"), WireValue::Int32(1));
}

#[test]
fn test_property_names_skip_shadowed_inherited_names() {
    let (_engine, context) = create_test_context();
    let object = context.execute(
        "var o = Object.create({ a: 1, b: 2 }); Object.defineProperty(o, 'a', { value: 3 }); o",
        None,
    );
    let names = handle(&context.property_names(&handle(&object)));
    // Matches for-in: the hidden own `a` hides the inherited one
    assert_eq!(
        context.execute("var seen = []; for (var k in o) seen.push(k); seen.length", None),
        WireValue::Int32(1)
    );
    assert_eq!(context.get_property(&names, "length"), WireValue::Int32(1));
    assert_eq!(context.get_property(&names, "0"), WireValue::String("b".into()));

    let only_hidden = context.execute(
        "var p = Object.create({ a: 1 }); Object.defineProperty(p, 'a', { value: 2 }); p",
        None,
    );
    let names = handle(&context.property_names(&handle(&only_hidden)));
    assert_eq!(context.get_property(&names, "length"), WireValue::Int32(0));
}

#[test]
fn test_property_names_of_array() {
    let (_engine, context) = create_test_context();
    let array = context.execute("['x', 'y']", None);
    assert!(matches!(array, WireValue::Array(_)));
    let names = handle(&context.property_names(&handle(&array)));
    assert_eq!(context.get_property(&names, "1"), WireValue::String("1".into()));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Calls
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_invoke_function_with_arguments() {
    let (_engine, context) = create_test_context();
    context.execute("function f(a,b){return a+b;}", None);
    let f = context.get_global("f");
    assert!(matches!(f, WireValue::Function(_)));

    let result = context.invoke_function(
        &handle(&f),
        None,
        &[WireValue::Int32(2), WireValue::Int32(3)],
    );
    assert_eq!(result, WireValue::Int32(5));
}

#[test]
fn test_invoke_function_defaults_to_global_receiver() {
    let (_engine, context) = create_test_context();
    let f = context.execute("(function () { 'use strict'; return this === globalThis; })", None);
    assert_eq!(
        context.invoke_function(&handle(&f), None, &[]),
        WireValue::Boolean(true)
    );
}

#[test]
fn test_invoke_function_with_receiver() {
    let (_engine, context) = create_test_context();
    let f = context.execute("(function (k) { return this.n * k; })", None);
    let receiver = context.execute("({ n: 6 })", None);
    assert_eq!(
        context.invoke_function(&handle(&f), Some(&handle(&receiver)), &[WireValue::Int32(7)]),
        WireValue::Int32(42)
    );
}

#[test]
fn test_invoke_function_passing_handles() {
    let (_engine, context) = create_test_context();
    let f = context.execute("(function (list) { return list.length; })", None);
    let list = context.execute("[1, 2, 3, 4]", None);
    assert_eq!(
        context.invoke_function(&handle(&f), None, &[list]),
        WireValue::Int32(4)
    );
}

#[test]
fn test_invoke_function_returning_object() {
    let (_engine, context) = create_test_context();
    let make = context.execute("(function () { return { made: 'yes' }; })", None);
    let made = context.invoke_function(&handle(&make), None, &[]);
    assert_eq!(
        context.get_property(&handle(&made), "made"),
        WireValue::String("yes".into())
    );
}

#[test]
fn test_invoke_function_that_throws() {
    let (_engine, context) = create_test_context();
    let f = context.execute("(function () { throw new RangeError('out of range'); })", None);
    let result = context.invoke_function(&handle(&f), None, &[]);
    assert!(is_error(&result, ErrorKind::ScriptThrown, "out of range"));
}

#[test]
fn test_invoke_non_function_is_usage_error() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({})", None);
    let result = context.invoke_function(&handle(&object), None, &[]);
    assert_eq!(error(&result).kind, ErrorKind::Usage);
}

#[test]
fn test_error_argument_becomes_error_object() {
    let (_engine, context) = create_test_context();
    let f = context.execute("(function (e) { return e instanceof Error && e.message; })", None);
    let result = context.invoke_function(
        &handle(&f),
        None,
        &[WireValue::error(ErrorKind::Generic, "from host")],
    );
    assert_eq!(result, WireValue::String("from host".into()));
}

#[test]
fn test_invoke_method() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({ n: 2, times(k) { return this.n * k; } })", None);
    assert_eq!(
        context.invoke_method(&handle(&object), "times", &[WireValue::Int32(21)]),
        WireValue::Int32(42)
    );
}

#[test]
fn test_invoke_missing_method() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({ notAFunction: 1 })", None);

    let result = context.invoke_method(&handle(&object), "missing", &[]);
    assert!(is_error(&result, ErrorKind::Usage, "property not found or isn't a function"));

    let result = context.invoke_method(&handle(&object), "notAFunction", &[]);
    assert!(is_error(&result, ErrorKind::Usage, "isn't a function"));
}

#[test]
fn test_invoke_method_result_owned_by_receiver() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({ child() { return {}; } })", None);
    let child = context.invoke_method(&handle(&object), "child", &[]);
    let info = context.handle_info(handle(&child).id).unwrap();
    assert_eq!(info.owner, Some(handle(&object).id));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handles
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_same_object_same_handle() {
    let (_engine, context) = create_test_context();
    let first = context.execute("var shared = {}; shared", None);
    let second = context.get_global("shared");
    assert_eq!(first, second);
    assert_eq!(context.handle_count(), 1);
    assert_eq!(context.handle_info(handle(&first).id).unwrap().refs, 2);
}

#[test]
fn test_released_handle_is_stale() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({a: 1})", None);
    let h = handle(&object);

    assert!(context.release(&h).unwrap());
    assert_eq!(context.handle_count(), 0);

    let result = context.get_property(&h, "a");
    assert_eq!(error(&result).kind, ErrorKind::StaleHandle);
    let result = context.invoke_method(&h, "toString", &[]);
    assert_eq!(error(&result).kind, ErrorKind::StaleHandle);
    assert!(context.release(&h).is_err());
}

#[test]
fn test_release_needs_every_reference() {
    let (_engine, context) = create_test_context();
    let first = context.execute("var kept = [1]; kept", None);
    context.get_global("kept");
    let h = handle(&first);

    assert!(!context.release(&h).unwrap());
    assert_eq!(context.get_property(&h, "0"), WireValue::Int32(1));
    assert!(context.release(&h).unwrap());
}

#[test]
fn test_handle_survives_collection() {
    let (engine, context) = create_test_context();
    let object = context.execute("({ alive: 'still' })", None);
    engine.run_gc();
    context.execute("var garbage = []; for (var i = 0; i < 1000; i++) garbage.push({ i }); garbage = null;", None);
    engine.run_gc();
    assert_eq!(
        context.get_property(&handle(&object), "alive"),
        WireValue::String("still".into())
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Disposal
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_disposed_context_fails_fast() {
    let (_engine, context) = create_test_context();
    let object = context.execute("({a: 1})", None);
    let f = context.execute("(function () {})", None);

    assert_eq!(context.state(), ContextState::Active);
    assert!(context.dispose());
    assert_eq!(context.state(), ContextState::Disposed);
    assert_eq!(context.handle_count(), 0);

    let results = [
        context.execute("1+2", None),
        context.set_global("x", &WireValue::Null),
        context.get_global("x"),
        context.global_object(),
        context.property_names(&handle(&object)),
        context.get_property(&handle(&object), "a"),
        context.set_property(&handle(&object), "a", &WireValue::Null),
        context.invoke_function(&handle(&f), None, &[]),
        context.invoke_method(&handle(&object), "toString", &[]),
        context.marshal(&WireValue::Int32(1)),
    ];
    for result in &results {
        assert_eq!(error(result).kind, ErrorKind::ContextDisposed, "got {:?}", result);
    }
    assert!(context.release(&handle(&object)).is_err());
    // Disposing twice is a no-op
    assert!(!context.dispose());
}
