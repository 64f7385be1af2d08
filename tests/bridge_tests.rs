//! Integration tests exercising the full bridge: capability registry,
//! marshaler and context together against real scripts.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use luahost::{
    AccessError, BridgeContext, CallOutcome, ContextState, ErrorKind, FileLoader, HostRef, MapKey,
    TypeExports, Value,
};

/// Fresh context with log capture wired up once for the whole suite.
/// Run with `RUST_LOG=luahost=debug` to see bridge activity on failures.
fn context() -> BridgeContext {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
    BridgeContext::new()
}

struct Point {
    x: f64,
    y: f64,
}

fn point_exports() -> Arc<TypeExports> {
    let mut exports = TypeExports::new("Point");
    exports.read_only::<Point, _>("x", "float", |p| Value::Float(p.x));
    exports.read_write::<Point, _, _>(
        "y",
        "float",
        |p| Value::Float(p.y),
        |p, v| {
            p.y = v
                .as_float()
                .ok_or_else(|| AccessError::type_mismatch("float", v.type_name()))?;
            Ok(())
        },
    );
    exports.method::<Point, _>("distance_to", "(Point) -> float", |p, args| {
        let [other] = args else {
            return Err(AccessError::ArityMismatch {
                name: "distance_to".into(),
                expected: 1,
                actual: args.len(),
            });
        };
        let other = other
            .as_host_object()
            .ok_or_else(|| AccessError::type_mismatch("Point", other.type_name()))?;
        let (ox, oy) = other.with::<Point, _>(|o| (o.x, o.y))?;
        Ok(Value::Float(((p.x - ox).powi(2) + (p.y - oy).powi(2)).sqrt()))
    });
    exports.method::<Point, _>("scaled", "(float) -> float", |p, args| {
        let [factor] = args else {
            return Err(AccessError::ArityMismatch {
                name: "scaled".into(),
                expected: 1,
                actual: args.len(),
            });
        };
        let factor = factor
            .as_float()
            .ok_or_else(|| AccessError::type_mismatch("float", factor.type_name()))?;
        Ok(Value::Float(p.x * factor))
    });
    Arc::new(exports)
}

fn point(x: f64, y: f64) -> Rc<RefCell<Point>> {
    Rc::new(RefCell::new(Point { x, y }))
}

// =============================================================================
// Registered property and method access
// =============================================================================

#[test]
fn readable_property_reaches_script() {
    let ctx = context();
    ctx.parse("function run(p) return p.x + 1 end").unwrap();

    let p = point(5.0, 0.0);
    let outcome = ctx
        .call("run", &[Value::HostObject(HostRef::new(&p, point_exports()))])
        .unwrap();
    assert_eq!(outcome, CallOutcome::Completed(Value::Float(6.0)));
}

#[test]
fn writable_property_mutates_host_object() {
    let ctx = context();
    ctx.parse("function move_up(p) p.y = p.y + 2 end").unwrap();

    let p = point(0.0, 1.0);
    ctx.call(
        "move_up",
        &[Value::HostObject(HostRef::new(&p, point_exports()))],
    )
    .unwrap();
    assert_eq!(p.borrow().y, 3.0);
}

#[test]
fn method_call_with_host_object_argument() {
    let ctx = context();
    ctx.parse("function gap(a, b) return a:distance_to(b) end")
        .unwrap();

    let exports = point_exports();
    let a = point(0.0, 0.0);
    let b = point(3.0, 4.0);
    let outcome = ctx
        .call(
            "gap",
            &[
                Value::HostObject(HostRef::new(&a, Arc::clone(&exports))),
                Value::HostObject(HostRef::new(&b, exports)),
            ],
        )
        .unwrap();
    assert_eq!(outcome, CallOutcome::Completed(Value::Float(5.0)));
}

#[test]
fn colon_and_dot_call_conventions_agree() {
    let ctx = context();
    ctx.parse(
        r#"
        function colon(p) return p:scaled(2) end
        function dot_with_self(p) return p.scaled(p, 2) end
        function dot_bare(p) return p.scaled(2) end
        "#,
    )
    .unwrap();

    let exports = point_exports();
    let p = point(4.0, 0.0);
    for name in ["colon", "dot_with_self", "dot_bare"] {
        let outcome = ctx
            .call(
                name,
                &[Value::HostObject(HostRef::new(&p, Arc::clone(&exports)))],
            )
            .unwrap();
        assert_eq!(outcome, CallOutcome::Completed(Value::Float(8.0)), "{name}");
    }
}

#[test]
fn handle_equality_is_instance_identity() {
    let ctx = context();
    ctx.parse("function same(a, b) return a == b end").unwrap();

    let exports = point_exports();
    let p = point(1.0, 1.0);
    let q = point(1.0, 1.0);
    let pa = Value::HostObject(HostRef::new(&p, Arc::clone(&exports)));
    let pb = Value::HostObject(HostRef::new(&p, Arc::clone(&exports)));
    let qa = Value::HostObject(HostRef::new(&q, exports));

    let same = ctx.call("same", &[pa.clone(), pb]).unwrap();
    assert_eq!(same, CallOutcome::Completed(Value::Bool(true)));
    let different = ctx.call("same", &[pa, qa]).unwrap();
    assert_eq!(different, CallOutcome::Completed(Value::Bool(false)));
}

#[test]
fn tostring_names_the_host_type() {
    let ctx = context();
    ctx.parse("function describe(p) return tostring(p) end")
        .unwrap();

    let p = point(0.0, 0.0);
    let outcome = ctx
        .call(
            "describe",
            &[Value::HostObject(HostRef::new(&p, point_exports()))],
        )
        .unwrap();
    let CallOutcome::Completed(Value::Str(text)) = outcome else {
        panic!("expected a string result");
    };
    assert!(text.contains("Point"));
}

// =============================================================================
// Capability denials
// =============================================================================

#[test]
fn write_to_read_only_property_is_denied() {
    let ctx = context();
    ctx.parse("function poke(p) p.x = 10 end").unwrap();

    let p = point(5.0, 0.0);
    let err = ctx
        .call(
            "poke",
            &[Value::HostObject(HostRef::new(&p, point_exports()))],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("not writable"));
    // The host object itself is mutable; only the capability was missing.
    assert_eq!(p.borrow().x, 5.0);
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn unknown_member_is_invalid() {
    let ctx = context();
    ctx.parse("function touch(p) return p.hidden end").unwrap();

    let p = point(0.0, 0.0);
    let err = ctx
        .call(
            "touch",
            &[Value::HostObject(HostRef::new(&p, point_exports()))],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.message().contains("hidden"));
}

#[test]
fn denial_is_catchable_from_script() {
    let ctx = context();
    ctx.parse(
        r#"
        function probe(p)
            local ok, err = pcall(function() return p.hidden end)
            return ok
        end
        "#,
    )
    .unwrap();

    let p = point(0.0, 0.0);
    let outcome = ctx
        .call(
            "probe",
            &[Value::HostObject(HostRef::new(&p, point_exports()))],
        )
        .unwrap();
    assert_eq!(outcome, CallOutcome::Completed(Value::Bool(false)));
}

#[test]
fn dropped_instance_fails_cleanly() {
    let ctx = context();
    ctx.parse("function read(p) return p.x end").unwrap();

    let p = point(1.0, 2.0);
    let handle = HostRef::new(&p, point_exports());
    drop(p);

    let err = ctx.call("read", &[Value::HostObject(handle)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("no longer alive"));
}

#[test]
fn self_referential_method_argument_reports_busy_instance() {
    let ctx = context();
    ctx.parse("function loopback(p) return p:distance_to(p) end")
        .unwrap();

    let p = point(1.0, 1.0);
    let err = ctx
        .call(
            "loopback",
            &[Value::HostObject(HostRef::new(&p, point_exports()))],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("already in use"));
}

#[test]
fn reregistration_updates_capabilities() {
    let ctx = context();
    ctx.parse("function poke(p) p.x = 10 end").unwrap();

    // First registration: x is read-only, writes are denied.
    let mut exports = TypeExports::new("Point");
    exports.read_only::<Point, _>("x", "float", |p| Value::Float(p.x));
    let p = point(5.0, 0.0);
    let err = ctx
        .call(
            "poke",
            &[Value::HostObject(HostRef::new(&p, Arc::new(exports)))],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(p.borrow().x, 5.0);

    // Re-registering the same name replaces the attrs wholesale.
    let mut exports = TypeExports::new("Point");
    exports.read_only::<Point, _>("x", "float", |p| Value::Float(p.x));
    exports.read_write::<Point, _, _>(
        "x",
        "float",
        |p| Value::Float(p.x),
        |p, v| {
            p.x = v
                .as_float()
                .ok_or_else(|| AccessError::type_mismatch("float", v.type_name()))?;
            Ok(())
        },
    );
    ctx.call(
        "poke",
        &[Value::HostObject(HostRef::new(&p, Arc::new(exports)))],
    )
    .unwrap();
    assert_eq!(p.borrow().x, 10.0);
}

// =============================================================================
// Calls and globals
// =============================================================================

#[test]
fn undefined_function_is_invalid_and_leaves_globals_alone() {
    let ctx = context();
    ctx.parse("counter = 7").unwrap();

    let err = ctx.call("missing", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(ctx.get("counter").unwrap(), Value::Integer(7));
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn non_callable_global_is_invalid() {
    let ctx = context();
    ctx.parse("answer = 42").unwrap();

    let err = ctx.call("answer", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.message().contains("not a callable"));
}

#[test]
fn script_runtime_error_is_recoverable() {
    let ctx = context();
    ctx.parse(
        r#"
        function explode() error("kaboom") end
        function fine() return 1 end
        "#,
    )
    .unwrap();

    let err = ctx.call("explode", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("kaboom"));

    // The context stays usable after a recoverable failure.
    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(
        ctx.call("fine", &[]).unwrap(),
        CallOutcome::Completed(Value::Integer(1))
    );
}

#[test]
fn script_error_mentioning_gc_marker_stays_recoverable() {
    let ctx = context();
    ctx.parse(
        r#"
        function boom() error("user message mentioning __gc") end
        function fine() return 1 end
        "#,
    )
    .unwrap();

    // Only the interpreter's own diagnostics classify as fatal; a script
    // raising a look-alike message must not fault its session.
    let err = ctx.call("boom", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(
        ctx.call("fine", &[]).unwrap(),
        CallOutcome::Completed(Value::Integer(1))
    );
}

#[test]
fn syntax_error_keeps_previous_program() {
    let ctx = context();
    ctx.parse("function greet() return 'hi' end").unwrap();

    let err = ctx.parse("function broken(").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(!err.message().is_empty());

    assert_eq!(
        ctx.call("greet", &[]).unwrap(),
        CallOutcome::Completed(Value::Str("hi".into()))
    );
}

#[test]
fn reparsing_augments_without_resetting_globals() {
    let ctx = context();
    ctx.parse("state = 'kept'").unwrap();
    ctx.parse("function read_state() return state end").unwrap();

    assert_eq!(
        ctx.call("read_state", &[]).unwrap(),
        CallOutcome::Completed(Value::Str("kept".into()))
    );
}

#[test]
fn global_round_trip_per_category() {
    let ctx = context();

    let mut mapping = luahost::Map::default();
    mapping.insert(MapKey::Str("kind".into()), Value::Str("demo".into()));
    mapping.insert(MapKey::Integer(2), Value::Bool(true));

    let cases = [
        Value::Bool(true),
        Value::Integer(i64::MAX),
        Value::Float(0.1),
        Value::Str("text".into()),
        Value::Sequence(vec![Value::Integer(1), Value::Str("two".into())]),
        Value::Mapping(mapping),
    ];
    for (index, value) in cases.into_iter().enumerate() {
        let key = format!("slot_{index}");
        ctx.set(key.as_str(), value.clone()).unwrap();
        assert_eq!(ctx.get(key.as_str()).unwrap(), value);
    }

    // Unset globals read back as nil.
    assert_eq!(ctx.get("never_set").unwrap(), Value::Nil);
}

#[test]
fn host_object_round_trips_by_identity() {
    let ctx = context();
    let p = point(9.0, 9.0);
    let handle = HostRef::new(&p, point_exports());

    ctx.set("p", Value::HostObject(handle.clone())).unwrap();
    let fetched = ctx.get("p").unwrap();
    assert_eq!(fetched, Value::HostObject(handle));
}

#[test]
fn script_sees_host_written_globals() {
    let ctx = context();
    ctx.parse("function doubled() return seed * 2 end").unwrap();
    ctx.set("seed", 21_i64).unwrap();

    assert_eq!(
        ctx.call("doubled", &[]).unwrap(),
        CallOutcome::Completed(Value::Integer(42))
    );
}

// =============================================================================
// Yield and resume
// =============================================================================

#[test]
fn yield_surfaces_as_suspension_and_resume_completes() {
    let ctx = context();
    ctx.parse(
        r#"
        function staged(a)
            local b = coroutine.yield(a + 1)
            return b * 2
        end
        "#,
    )
    .unwrap();

    let outcome = ctx.call("staged", &[Value::Integer(4)]).unwrap();
    assert_eq!(outcome, CallOutcome::Yielded(vec![Value::Integer(5)]));

    let finished = ctx.resume(&[Value::Integer(10)]).unwrap();
    assert_eq!(finished, CallOutcome::Completed(Value::Integer(20)));
}

#[test]
fn new_call_abandons_suspended_one() {
    let ctx = context();
    ctx.parse(
        r#"
        function pause() coroutine.yield() end
        function quick() return 0 end
        "#,
    )
    .unwrap();

    let outcome = ctx.call("pause", &[]).unwrap();
    assert!(matches!(outcome, CallOutcome::Yielded(_)));

    ctx.call("quick", &[]).unwrap();
    let err = ctx.resume(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn unmarshalable_yield_abandons_the_call() {
    let ctx = context();
    ctx.parse("function leak() coroutine.yield(function() end) end")
        .unwrap();

    let err = ctx.call("leak", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.message().contains("function"));

    // Nothing is left suspended after the failed yield.
    let err = ctx.resume(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(ctx.state(), ContextState::Ready);
}

// =============================================================================
// Cooperative cancellation
// =============================================================================

#[test]
fn instruction_budget_aborts_runaway_script() {
    let ctx = context();
    ctx.parse(
        r#"
        function spin() while true do end end
        function fine() return 'ok' end
        "#,
    )
    .unwrap();

    ctx.set_instruction_budget(50_000);
    let err = ctx.call("spin", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("instruction budget"));
    assert_eq!(ctx.state(), ContextState::Ready);

    ctx.clear_instruction_budget();
    assert_eq!(
        ctx.call("fine", &[]).unwrap(),
        CallOutcome::Completed(Value::Str("ok".into()))
    );
}

// =============================================================================
// Source loading
// =============================================================================

#[test]
fn parse_from_loader_and_missing_location() {
    let dir = std::env::temp_dir().join("luahost-bridge-test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("lib.lua"), "function loaded() return 3 end").unwrap();

    let ctx = context();
    let loader = FileLoader::with_root(&dir);
    ctx.parse_from(&loader, "lib.lua").unwrap();
    assert_eq!(
        ctx.call("loaded", &[]).unwrap(),
        CallOutcome::Completed(Value::Integer(3))
    );

    let err = ctx.parse_from(&loader, "absent.lua").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.message().contains("absent.lua"));
}
