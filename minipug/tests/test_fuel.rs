use minipug::{Environment, ErrorKind, Evaluator, ScriptEngine};
use serde_json::json;

use similar_asserts::assert_eq;

#[test]
fn test_basic() {
    let mut env = Environment::new();
    env.set_fuel(Some(100));
    assert_eq!(env.fuel(), Some(100));
    assert_eq!(
        env.render_str("each x in [1, 2, 3]\n  p= x", ()).unwrap(),
        "<p>1</p><p>2</p><p>3</p>"
    );

    let err = env
        .render_str("- var i = 0\nwhile i < 1000\n  - i++", ())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfFuel);
}

#[test]
fn test_loop_iterations_consume_fuel() {
    let mut env = Environment::new();
    env.set_fuel(Some(1000));
    let source = "each x in obj\n  | a";
    assert_eq!(
        env.render_str(source, json!({"obj": {"length": 10}})).unwrap(),
        "a".repeat(10)
    );
    let err = env
        .render_str(source, json!({"obj": {"length": 5000}}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfFuel);
    assert_eq!(err.line(), Some(1));

    let mut engine = ScriptEngine::with_fuel(2);
    assert!(engine.track_iteration().is_ok());
    assert!(engine.track_iteration().is_ok());
    assert_eq!(
        engine.track_iteration().unwrap_err().kind(),
        ErrorKind::OutOfFuel
    );
}

#[test]
fn test_fuel_is_per_render() {
    let mut env = Environment::new();
    env.set_fuel(Some(50));
    let tmpl = env.template_from_str("p= a + b").unwrap();
    for _ in 0..20 {
        assert_eq!(tmpl.render(json!({"a": 1, "b": 2})).unwrap(), "<p>3</p>");
    }
}

#[test]
fn test_out_of_fuel_is_never_degraded() {
    let mut env = Environment::new();
    env.set_fuel(Some(30));
    let source = format!("p #{{{}1}}", "1 + ".repeat(40));
    let tmpl = env.template_from_str(&source).unwrap();
    let err = tmpl.render_with_diagnostics(()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfFuel);
}

#[test]
fn test_engine_tracker() {
    let mut engine = ScriptEngine::with_fuel(1000);
    engine.eval("var a = 1 + 2").unwrap();
    let tracker = engine.fuel_tracker().unwrap();
    let consumed = tracker.consumed();
    assert!(consumed > 0);
    assert_eq!(tracker.remaining(), 1000 - consumed);

    engine.set_fuel(None);
    assert!(engine.fuel_tracker().is_none());
}
