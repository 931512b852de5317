//! Built-in functions, namespaces and methods of the script engine.
use std::borrow::Cow;
use std::cmp::Ordering;

use crate::error::{Error, ErrorKind};
use crate::script::ast::BinOpKind;
use crate::script::value::{number_to_string, parse_number, Value, ValueMap};

/// Strings longer than this cannot be produced by scripts.
const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// Arrays cannot be grown past this index by assignment.
pub(crate) const MAX_ARRAY_INDEX: usize = 1 << 20;

pub(crate) fn runtime_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::EvalRuntime, msg)
}

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

fn checked_string(s: String) -> Result<Value, Error> {
    if s.len() > MAX_STRING_LEN {
        Err(runtime_error("invalid string length"))
    } else {
        Ok(Value::from(s))
    }
}

fn is_stringish(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.as_number().partial_cmp(&right.as_number()),
    }
}

/// Applies a binary operator.
pub(crate) fn binop(op: BinOpKind, left: &Value, right: &Value) -> Result<Value, Error> {
    Ok(match op {
        BinOpKind::Add if is_stringish(left) || is_stringish(right) => {
            return checked_string(format!("{left}{right}"));
        }
        BinOpKind::Add => Value::Number(left.as_number() + right.as_number()),
        BinOpKind::Sub => Value::Number(left.as_number() - right.as_number()),
        BinOpKind::Mul => Value::Number(left.as_number() * right.as_number()),
        BinOpKind::Div => Value::Number(left.as_number() / right.as_number()),
        BinOpKind::Rem => Value::Number(left.as_number() % right.as_number()),
        BinOpKind::Eq => Value::Bool(left.loose_eq(right)),
        BinOpKind::Ne => Value::Bool(!left.loose_eq(right)),
        BinOpKind::StrictEq => Value::Bool(left.strict_eq(right)),
        BinOpKind::StrictNe => Value::Bool(!left.strict_eq(right)),
        BinOpKind::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinOpKind::Lte => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinOpKind::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinOpKind::Gte => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    })
}

/// Is this one of the global namespace objects?
pub(crate) fn is_namespace(name: &str) -> bool {
    matches!(name, "Math" | "JSON" | "Object" | "Array")
}

/// Is this a global function?
pub(crate) fn is_global_function(name: &str) -> bool {
    matches!(
        name,
        "String" | "Number" | "Boolean" | "parseInt" | "parseFloat" | "isNaN"
    )
}

/// Looks up a constant on a namespace (`Math.PI`).
pub(crate) fn namespace_constant(namespace: &str, name: &str) -> Option<Value> {
    match (namespace, name) {
        ("Math", "PI") => Some(Value::Number(std::f64::consts::PI)),
        ("Math", "E") => Some(Value::Number(std::f64::consts::E)),
        _ => None,
    }
}

/// Calls a function on a namespace object.
pub(crate) fn call_namespace(namespace: &str, name: &str, args: &[Value]) -> Result<Value, Error> {
    let num = |idx| arg(args, idx).as_number();
    Ok(match (namespace, name) {
        ("Math", "floor") => Value::Number(num(0).floor()),
        ("Math", "ceil") => Value::Number(num(0).ceil()),
        ("Math", "round") => Value::Number((num(0) + 0.5).floor()),
        ("Math", "abs") => Value::Number(num(0).abs()),
        ("Math", "sqrt") => Value::Number(num(0).sqrt()),
        ("Math", "pow") => Value::Number(num(0).powf(num(1))),
        ("Math", "min") => Value::Number(args.iter().map(Value::as_number).fold(
            f64::INFINITY,
            |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) },
        )),
        ("Math", "max") => Value::Number(args.iter().map(Value::as_number).fold(
            f64::NEG_INFINITY,
            |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) },
        )),
        ("JSON", "stringify") => return json_stringify(&arg(args, 0), &arg(args, 2)),
        ("Object", "keys") => match arg(args, 0) {
            Value::Object(map) => {
                let keys = map.borrow().keys().map(|k| Value::from(k.as_str())).collect();
                Value::from_array(keys)
            }
            value @ (Value::Array(_) | Value::String(_)) => Value::from_array(
                (0..value.len().unwrap_or(0))
                    .map(|idx| Value::from(idx.to_string()))
                    .collect(),
            ),
            Value::Undefined | Value::Null => {
                return Err(runtime_error("cannot convert undefined or null to object"))
            }
            _ => Value::from_array(Vec::new()),
        },
        ("Array", "isArray") => Value::Bool(matches!(arg(args, 0), Value::Array(_))),
        _ => return Err(runtime_error(format!("{namespace}.{name} is not a function"))),
    })
}

#[cfg(feature = "json")]
fn json_stringify(value: &Value, indent: &Value) -> Result<Value, Error> {
    if value.is_undefined() {
        return Ok(Value::Undefined);
    }
    let rv = if indent.is_true() {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rv {
        Ok(s) => Ok(Value::from(s)),
        Err(err) => Err(runtime_error("unable to stringify value").with_source(err)),
    }
}

#[cfg(not(feature = "json"))]
fn json_stringify(_value: &Value, _indent: &Value) -> Result<Value, Error> {
    Err(runtime_error(
        "JSON.stringify requires the json feature to be enabled",
    ))
}

/// Calls a global function.  Returns `None` if there is no such function.
pub(crate) fn call_global(name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    Some(Ok(match name {
        "String" => match args.first() {
            Some(value) => Value::from(value.to_string()),
            None => Value::from(""),
        },
        "Number" => Value::Number(args.first().map_or(0.0, Value::as_number)),
        "Boolean" => Value::Bool(arg(args, 0).is_true()),
        "parseInt" => {
            let radix = arg(args, 1);
            let radix = if radix.is_undefined() {
                0
            } else {
                radix.as_number() as u32
            };
            Value::Number(parse_int(&arg(args, 0).to_string(), radix))
        }
        "parseFloat" => Value::Number(parse_float(&arg(args, 0).to_string())),
        "isNaN" => Value::Bool(arg(args, 0).as_number().is_nan()),
        _ => return None,
    }))
}

fn split_sign(s: &str) -> (f64, &str) {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('-') {
        (-1.0, rest)
    } else {
        (1.0, s.strip_prefix('+').unwrap_or(s))
    }
}

pub(crate) fn parse_int(s: &str, radix: u32) -> f64 {
    let (sign, mut s) = split_sign(s);
    let mut radix = radix;
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut rv = None;
    for c in s.chars() {
        match c.to_digit(radix) {
            Some(digit) => rv = Some(rv.unwrap_or(0.0) * radix as f64 + digit as f64),
            None => break,
        }
    }
    rv.map_or(f64::NAN, |rv| sign * rv)
}

pub(crate) fn parse_float(s: &str) -> f64 {
    let (sign, s) = split_sign(s);
    if s.starts_with("Infinity") {
        return sign * f64::INFINITY;
    }
    let bytes = s.as_bytes();
    let mut len = bytes.iter().take_while(|c| c.is_ascii_digit()).count();
    if bytes.get(len) == Some(&b'.') {
        len += 1 + bytes[len + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let digits = bytes[exp..].iter().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            len = exp + digits;
        }
    }
    match s[..len].parse::<f64>() {
        Ok(val) if len > 0 && &s[..len] != "." => sign * val,
        _ => f64::NAN,
    }
}

/// Resolves a possibly negative index the way `slice` does.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = value.as_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

/// Clamps an index the way `substring` does.
fn clamped_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = value.as_number();
    if n.is_nan() || n < 0.0 {
        0
    } else {
        n.min(len as f64) as usize
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
        _ => a.strict_eq(b),
    }
}

fn pad(s: &str, args: &[Value], at_start: bool) -> Result<Value, Error> {
    let target = arg(args, 0).as_number();
    let filler = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        other => other.to_string(),
    };
    let len = s.chars().count();
    if target.is_nan() || target <= len as f64 || filler.is_empty() {
        return Ok(Value::from(s));
    }
    if target > MAX_STRING_LEN as f64 {
        return Err(runtime_error("invalid string length"));
    }
    let padding: String = filler.chars().cycle().take(target as usize - len).collect();
    Ok(Value::from(if at_start {
        padding + s
    } else {
        format!("{s}{padding}")
    }))
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    let str_arg = |idx| arg(args, idx).to_string();
    Some(Ok(match name {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "includes" => Value::Bool(s.contains(&str_arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&str_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&str_arg(0))),
        "indexOf" => Value::Number(match s.find(&str_arg(0)) {
            Some(idx) => s[..idx].chars().count() as f64,
            None => -1.0,
        }),
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let (start, end) = if name == "slice" {
                (
                    relative_index(&arg(args, 0), len, 0),
                    relative_index(&arg(args, 1), len, len),
                )
            } else {
                let a = clamped_index(&arg(args, 0), len, 0);
                let b = clamped_index(&arg(args, 1), len, len);
                (a.min(b), a.max(b))
            };
            if start >= end {
                Value::from("")
            } else {
                Value::from(chars[start..end].iter().collect::<String>())
            }
        }
        "split" => {
            let limit = match arg(args, 1) {
                Value::Undefined => usize::MAX,
                limit => limit.as_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::from(s)],
                sep => {
                    let sep = sep.to_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::from_array(parts.into_iter().take(limit).collect())
        }
        "replace" => Value::from(s.replacen(&str_arg(0), &str_arg(1), 1)),
        "repeat" => {
            let count = arg(args, 0).as_number();
            if count < 0.0 || count.is_infinite() {
                return Some(Err(runtime_error("invalid count value")));
            }
            let count = if count.is_nan() { 0 } else { count as usize };
            if s.len().saturating_mul(count) > MAX_STRING_LEN {
                return Some(Err(runtime_error("invalid string length")));
            }
            Value::from(s.repeat(count))
        }
        "padStart" => return Some(pad(s, args, true)),
        "padEnd" => return Some(pad(s, args, false)),
        "charAt" => {
            let idx = arg(args, 0).as_number();
            let idx = if idx.is_nan() { 0.0 } else { idx.trunc() };
            match s.chars().nth(idx as usize) {
                Some(c) if idx >= 0.0 => Value::from(c.to_string()),
                _ => Value::from(""),
            }
        }
        "concat" => {
            let mut rv = s.to_string();
            for value in args {
                rv.push_str(&value.to_string());
            }
            return Some(checked_string(rv));
        }
        "toString" => Value::from(s),
        _ => return None,
    }))
}

fn array_method(this: &Value, name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    let items = match this {
        Value::Array(items) => items,
        _ => return None,
    };
    Some(Ok(match name {
        "join" | "toString" => {
            let sep = match arg(args, 0) {
                Value::Undefined => Cow::Borrowed(","),
                sep if name == "join" => Cow::Owned(sep.to_string()),
                _ => Cow::Borrowed(","),
            };
            let mut rv = String::new();
            for (idx, item) in items.borrow().iter().enumerate() {
                if idx > 0 {
                    rv.push_str(&sep);
                }
                if !item.is_nullish() {
                    rv.push_str(&item.to_string());
                }
            }
            return Some(checked_string(rv));
        }
        "includes" => {
            let needle = arg(args, 0);
            Value::Bool(items.borrow().iter().any(|x| same_value_zero(x, &needle)))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Value::Number(
                items
                    .borrow()
                    .iter()
                    .position(|x| x.strict_eq(&needle))
                    .map_or(-1.0, |idx| idx as f64),
            )
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len();
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Value::from_array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            })
        }
        "concat" => {
            let mut rv = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => rv.extend(other.borrow().iter().cloned()),
                    other => rv.push(other.clone()),
                }
            }
            Value::from_array(rv)
        }
        "push" => {
            let mut items = items.borrow_mut();
            if items.len() + args.len() > MAX_ARRAY_INDEX {
                return Some(Err(runtime_error("invalid array length")));
            }
            items.extend(args.iter().cloned());
            Value::from(items.len())
        }
        "pop" => items.borrow_mut().pop().unwrap_or_default(),
        "reverse" => {
            items.borrow_mut().reverse();
            this.clone()
        }
        _ => return None,
    }))
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    Some(Ok(match name {
        "toFixed" => {
            let digits = arg(args, 0).as_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
                return Some(Err(runtime_error("toFixed() digits argument must be between 0 and 100")));
            }
            if !n.is_finite() || n.abs() >= 1e21 {
                Value::from(number_to_string(n))
            } else {
                // avoids printing a negative zero
                let n = if n == 0.0 { 0.0 } else { n };
                Value::from(format!("{:.*}", digits as usize, n))
            }
        }
        "toString" => match arg(args, 0) {
            Value::Undefined => Value::from(number_to_string(n)),
            radix => {
                let radix = radix.as_number();
                if !(2.0..=36.0).contains(&radix) {
                    return Some(Err(runtime_error("toString() radix must be between 2 and 36")));
                }
                Value::from(integer_to_radix(n, radix as u32))
            }
        },
        _ => return None,
    }))
}

fn integer_to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || n.fract() != 0.0 || !n.is_finite() || n.abs() >= 9007199254740992.0 {
        return number_to_string(n);
    }
    let mut value = n.abs() as u64;
    let mut digits = Vec::new();
    loop {
        digits.push(std::char::from_digit((value % radix as u64) as u32, radix).unwrap_or('0'));
        value /= radix as u64;
        if value == 0 {
            break;
        }
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Calls a method on a value.  Returns `None` if the value has no such
/// method.
pub(crate) fn call_method(this: &Value, name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    match this {
        Value::String(s) => string_method(s, name, args),
        Value::Array(_) => array_method(this, name, args),
        Value::Number(n) => number_method(*n, name, args),
        Value::Bool(b) if name == "toString" => Some(Ok(Value::from(b.to_string()))),
        Value::Object(map) => match name {
            "toString" => Some(Ok(Value::from("[object Object]"))),
            "hasOwnProperty" => Some(Ok(Value::Bool(
                map.borrow().contains_key(&arg(args, 0).to_string()),
            ))),
            _ => None,
        },
        _ => None,
    }
}

/// Builds a fresh object from key/value pairs.
pub(crate) fn make_object(items: Vec<(String, Value)>) -> Value {
    let mut map = ValueMap::new();
    for (key, value) in items {
        map.insert(key, value);
    }
    Value::from_object(map)
}

/// Converts a numeric string key the way the engine indexes arrays.
pub(crate) fn array_index(key: &Value) -> Option<usize> {
    let n = match key {
        Value::Number(n) => *n,
        Value::String(s) => parse_number(s),
        _ => return None,
    };
    if n.fract() == 0.0 && n >= 0.0 && n <= MAX_ARRAY_INDEX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn call(this: Value, name: &str, args: &[Value]) -> Value {
        call_method(&this, name, args).unwrap().unwrap()
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("  42px", 0), 42.0);
        assert_eq!(parse_int("-0x1F", 0), -31.0);
        assert_eq!(parse_int("101", 2), 5.0);
        assert!(parse_int("px", 0).is_nan());
        assert_eq!(parse_float("3.25rem"), 3.25);
        assert_eq!(parse_float(".5"), 0.5);
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("Hello World");
        assert_eq!(call(s.clone(), "slice", &[Value::from(-5i64)]), Value::from("World"));
        assert_eq!(
            call(s.clone(), "substring", &[Value::from(5i64), Value::from(0i64)]),
            Value::from("Hello")
        );
        assert_eq!(call(s.clone(), "indexOf", &[Value::from("o")]), Value::from(4i64));
        assert_eq!(
            call(Value::from("5"), "padStart", &[Value::from(3i64), Value::from("0")]),
            Value::from("005")
        );
        assert_eq!(
            call(s, "split", &[Value::from(" ")]).to_string(),
            "Hello,World"
        );
        assert!(call_method(&Value::from("x"), "nope", &[]).is_none());
    }

    #[test]
    fn test_array_methods() {
        let arr = Value::from(vec![Value::from(1i64), Value::Null, Value::from("x")]);
        assert_eq!(call(arr.clone(), "join", &[Value::from("-")]), Value::from("1--x"));
        assert_eq!(call(arr.clone(), "push", &[Value::from(true)]), Value::from(4i64));
        assert_eq!(call(arr.clone(), "pop", &[]), Value::from(true));
        let reversed = call(arr.clone(), "reverse", &[]);
        assert!(reversed.strict_eq(&arr));
        assert_eq!(arr.to_string(), "x,,1");
    }

    #[test]
    fn test_number_methods() {
        assert_eq!(
            call(Value::from(3.14159), "toFixed", &[Value::from(2i64)]),
            Value::from("3.14")
        );
        assert_eq!(
            call(Value::from(255i64), "toString", &[Value::from(16i64)]),
            Value::from("ff")
        );
    }

    #[test]
    fn test_binop() {
        let add = |a: Value, b: Value| binop(BinOpKind::Add, &a, &b).unwrap();
        assert_eq!(add(Value::from(1i64), Value::from(2i64)), Value::from(3i64));
        assert_eq!(add(Value::from("a"), Value::from(1i64)), Value::from("a1"));
        assert_eq!(
            add(Value::from_array(vec![Value::from(1i64)]), Value::Null),
            Value::from("1null")
        );
        assert_eq!(
            binop(BinOpKind::Lt, &Value::from("a"), &Value::from("b")).unwrap(),
            Value::Bool(true)
        );
    }
}
