use minipug::{ErrorKind, Evaluator, ScriptEngine, Value, ValueKind};
use serde_json::json;

use similar_asserts::assert_eq;

fn eval(source: &str) -> String {
    let mut engine = ScriptEngine::new();
    engine
        .declare_variable("user", Value::from(json!({"name": "Ann", "tags": ["a", "b"]})));
    engine.eval(source).unwrap().to_string()
}

#[test]
fn test_literals_and_operators() {
    assert_eq!(eval("1 + 2 * 3"), "7");
    assert_eq!(eval("(1 + 2) * 3"), "9");
    assert_eq!(eval("7 % 4"), "3");
    assert_eq!(eval("'a' + 1 + 2"), "a12");
    assert_eq!(eval("1 / 0"), "Infinity");
    assert_eq!(eval("0.1 + 0.2 === 0.30000000000000004"), "true");
    assert_eq!(eval("1 == '1'"), "true");
    assert_eq!(eval("1 === '1'"), "false");
    assert_eq!(eval("null ?? 'x'"), "x");
    assert_eq!(eval("0 || 'y'"), "y");
    assert_eq!(eval("'' && 'z'"), "");
    assert_eq!(eval("true ? 'yes' : 'no'"), "yes");
    assert_eq!(eval("typeof user"), "object");
    assert_eq!(eval("[1, [2, 3]]"), "1,2,3");
    assert_eq!(eval("({a: 1})"), "[object Object]");
    assert_eq!(eval("`Hi ${user.name}, ${1 + 1}!`"), "Hi Ann, 2!");
}

#[test]
fn test_members() {
    assert_eq!(eval("user.name"), "Ann");
    assert_eq!(eval("user['name'].length"), "3");
    assert_eq!(eval("user.tags[1]"), "b");
    assert_eq!(eval("user.missing"), "undefined");
    assert_eq!(eval("user.missing?.deep"), "undefined");
}

#[test]
fn test_builtins() {
    assert_eq!(eval("'  Hi  '.trim().toUpperCase()"), "HI");
    assert_eq!(eval("'a,b,c'.split(',').reverse().join('-')"), "c-b-a");
    assert_eq!(eval("'abc'.slice(-2)"), "bc");
    assert_eq!(eval("'5'.padStart(3, '0')"), "005");
    assert_eq!(eval("'aXbX'.replace('X', '_')"), "a_bX");
    assert_eq!(eval("(3.14159).toFixed(2)"), "3.14");
    assert_eq!(eval("(255).toString(16)"), "ff");
    assert_eq!(eval("Math.max(1, 9, 3) + Math.floor(2.7)"), "11");
    assert_eq!(eval("Object.keys(user).join(',')"), "name,tags");
    assert_eq!(eval("Array.isArray(user.tags)"), "true");
    assert_eq!(eval("parseInt('42px') + Number('8')"), "50");
    assert_eq!(eval("isNaN(parseFloat('x'))"), "true");
    assert_eq!(eval("String(12) + Boolean(0)"), "12false");
    assert_eq!(eval("user.tags.includes('b')"), "true");
}

#[cfg(feature = "json")]
#[test]
fn test_json_stringify() {
    assert_eq!(eval("JSON.stringify(user.tags)"), r#"["a","b"]"#);
    assert_eq!(eval("JSON.stringify({n: 1.5})"), r#"{"n":1.5}"#);
}

#[test]
fn test_declarations_and_assignment() {
    let mut engine = ScriptEngine::new();
    engine.eval("var a = 1, b; let c = 'x'").unwrap();
    assert_eq!(engine.get_variable("b").map(Value::kind), Some(ValueKind::Undefined));
    engine.eval("a += 2; c += 'y'; b = [a]").unwrap();
    assert_eq!(engine.eval("a").unwrap(), Value::from(3.0));
    assert_eq!(engine.eval("c").unwrap().to_string(), "xy");
    engine.eval("b.push(4); b[0]++").unwrap();
    assert_eq!(engine.eval("b").unwrap().to_string(), "4,4");
    let obj = engine.eval("var o = {}; o.x = 1; o['y'] = 2; o").unwrap();
    assert_eq!(obj.get_attr("y"), Value::from(2.0));
}

#[test]
fn test_scopes() {
    let mut engine = ScriptEngine::new();
    engine.eval("var total = 0").unwrap();
    for item in [1.0, 2.0, 3.0] {
        engine.push_scope();
        engine.declare_variable("item", Value::from(item));
        engine.eval("total += item").unwrap();
        engine.pop_scope();
    }
    assert_eq!(engine.eval("total").unwrap(), Value::from(6.0));
    assert_eq!(engine.eval("typeof item").unwrap().to_string(), "undefined");
}

#[test]
fn test_errors() {
    let mut engine = ScriptEngine::new();
    for source in ["1 +", "var = 2", "'open", "a b", "obj.(x)"] {
        assert_eq!(
            engine.eval(source).unwrap_err().kind(),
            ErrorKind::EvalSyntax,
            "{source}"
        );
    }
    for source in ["missing", "null.x", "(1)()", "user.name()"] {
        assert_eq!(
            engine.eval(source).unwrap_err().kind(),
            ErrorKind::EvalRuntime,
            "{source}"
        );
    }
}

#[test]
fn test_from_serialize() {
    #[derive(serde::Serialize)]
    struct Point {
        x: i32,
        y: Option<i32>,
    }

    let value = Value::from_serialize(&Point { x: 1, y: None }).unwrap();
    assert_eq!(value.kind(), ValueKind::Object);
    assert_eq!(value.get_attr("x"), Value::from(1.0));
    assert_eq!(value.get_attr("y"), Value::Null);
    assert_eq!(serde_json::to_value(&value).unwrap(), json!({"x": 1, "y": null}));
}
