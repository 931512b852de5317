use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};

#[cfg(feature = "serde")]
use crate::error::{Error, ErrorKind};

/// The map backing object values, keeping insertion order.
#[cfg(feature = "preserve_order")]
pub type ValueMap = indexmap::IndexMap<String, Value>;

/// The map backing object values, sorted by key.
#[cfg(not(feature = "preserve_order"))]
pub type ValueMap = std::collections::BTreeMap<String, Value>;

/// Nesting beyond this depth is not stringified or serialized.
const MAX_DEPTH: usize = 64;

/// Describes the kind of value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum ValueKind {
    /// The value is undefined
    Undefined,
    /// The value is `null`
    Null,
    /// The value is a bool
    Bool,
    /// The value is a number
    Number,
    /// The value is a string
    String,
    /// The value is an array
    Array,
    /// The value is an object
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        })
    }
}

/// A value produced by an [`Evaluator`](crate::Evaluator).
///
/// Values follow the data model of JavaScript.  Arrays and objects are
/// reference counted and shared on clone, mutating a clone is visible
/// through the original the way it is in JavaScript.  The [`Display`]
/// implementation produces the JavaScript string conversion which is what
/// ends up in the rendered HTML.
///
/// [`Display`]: std::fmt::Display
#[derive(Clone, Default)]
pub enum Value {
    /// The `undefined` value.
    #[default]
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double precision number.
    Number(f64),
    /// An immutable string.
    String(Rc<str>),
    /// A shared, mutable array.
    Array(Rc<RefCell<Vec<Value>>>),
    /// A shared, mutable object.
    Object(Rc<RefCell<ValueMap>>),
}

impl Value {
    /// Creates an array value.
    pub fn from_array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    /// Creates an object value.
    pub fn from_object(map: ValueMap) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Converts a serializable value.
    ///
    /// Maps become objects, sequences become arrays, unit and `None` become
    /// `null`.  Map keys are stringified.
    #[cfg(feature = "serde")]
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Value, Error> {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|err| {
                Error::new(
                    ErrorKind::BadSerialization,
                    "unable to convert value for the script engine",
                )
                .with_source(err)
            })
    }

    /// Returns the kind of the value.
    pub fn kind(&self) -> ValueKind {
        match *self {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Returns the result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match *self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
        }
    }

    /// Is this value `undefined`?
    pub fn is_undefined(&self) -> bool {
        matches!(*self, Value::Undefined)
    }

    /// Is this value `null` or `undefined`?
    pub fn is_nullish(&self) -> bool {
        matches!(*self, Value::Undefined | Value::Null)
    }

    /// JavaScript truthiness.
    pub fn is_true(&self) -> bool {
        match *self {
            Value::Undefined | Value::Null => false,
            Value::Bool(val) => val,
            Value::Number(val) => val != 0.0 && !val.is_nan(),
            Value::String(ref val) => !val.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// If the value is a string, returns it.
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::String(ref s) => Some(s),
            _ => None,
        }
    }

    /// Numeric conversion following `Number(value)`.
    pub fn as_number(&self) -> f64 {
        match *self {
            Value::Undefined | Value::Object(_) => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(val) => val as u8 as f64,
            Value::Number(val) => val,
            Value::String(ref val) => parse_number(val),
            Value::Array(_) => parse_number(&self.to_string()),
        }
    }

    /// Returns the number of items for arrays and the number of characters
    /// for strings.
    pub fn len(&self) -> Option<usize> {
        match *self {
            Value::String(ref s) => Some(s.chars().count()),
            Value::Array(ref items) => Some(items.borrow().len()),
            _ => None,
        }
    }

    /// Looks up a property by name.
    pub fn get_attr(&self, name: &str) -> Value {
        match *self {
            Value::Object(ref map) => map.borrow().get(name).cloned().unwrap_or_default(),
            Value::String(_) | Value::Array(_) if name == "length" => {
                Value::from(self.len().unwrap_or(0) as f64)
            }
            Value::String(_) | Value::Array(_) => match name.parse::<usize>() {
                Ok(idx) => self.get_index(idx),
                Err(_) => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    /// Looks up a property by a computed key.
    pub fn get_item(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::Array(_) | Value::String(_), Value::Number(idx)) => {
                if idx.fract() == 0.0 && *idx >= 0.0 {
                    self.get_index(*idx as usize)
                } else {
                    Value::Undefined
                }
            }
            _ => self.get_attr(&key.to_string()),
        }
    }

    fn get_index(&self, idx: usize) -> Value {
        match *self {
            Value::Array(ref items) => items.borrow().get(idx).cloned().unwrap_or_default(),
            Value::String(ref s) => s
                .chars()
                .nth(idx)
                .map(|c| Value::from(c.to_string()))
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// The `===` operator.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The `==` operator.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.kind() == b.kind() => a.strict_eq(b),
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Bool(_), _) => Value::Number(self.as_number()).loose_eq(other),
            (_, Value::Bool(_)) => self.loose_eq(&Value::Number(other.as_number())),
            (Value::Number(a), Value::String(_)) => *a == other.as_number(),
            (Value::String(_), Value::Number(b)) => self.as_number() == *b,
            (Value::Array(_) | Value::Object(_), _) => {
                Value::from(self.to_string()).loose_eq(other)
            }
            (_, Value::Array(_) | Value::Object(_)) => {
                self.loose_eq(&Value::from(other.to_string()))
            }
            _ => false,
        }
    }

    fn fmt_js(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match *self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(val) => write!(f, "{val}"),
            Value::Number(val) => f.write_str(&number_to_string(val)),
            Value::String(ref val) => f.write_str(val),
            Value::Array(ref items) => {
                if depth > MAX_DEPTH {
                    return Ok(());
                }
                for (idx, item) in items.borrow().iter().enumerate() {
                    if idx > 0 {
                        ok!(f.write_str(","));
                    }
                    if !item.is_nullish() {
                        ok!(item.fmt_js(f, depth + 1));
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
        }
    }
}

/// Converts a number the way JavaScript's `String(number)` does.
pub(crate) fn number_to_string(val: f64) -> String {
    if val.is_nan() {
        "NaN".into()
    } else if val.is_infinite() {
        let rv = if val > 0.0 { "Infinity" } else { "-Infinity" };
        rv.into()
    } else if val == 0.0 {
        "0".into()
    } else if val.fract() == 0.0 && val.abs() < 1e21 {
        format!("{}", val as i128)
    } else if val.abs() >= 1e21 || val.abs() < 1e-6 {
        let rv = format!("{val:e}");
        match rv.find("e") {
            Some(idx) if !rv[idx + 1..].starts_with('-') => {
                format!("{}e+{}", &rv[..idx], &rv[idx + 1..])
            }
            _ => rv,
        }
    } else {
        format!("{val}")
    }
}

/// Parses a string the way JavaScript's `Number(string)` does.
pub(crate) fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let (sign, unsigned) = match s.as_bytes()[0] {
        b'-' => (-1.0, &s[1..]),
        b'+' => (1.0, &s[1..]),
        _ => (1.0, s),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            return match u64::from_str_radix(digits, radix) {
                Ok(val) => val as f64,
                Err(_) => f64::NAN,
            };
        }
    }
    if !unsigned
        .bytes()
        .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_js(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::String(ref val) => write!(f, "{val:?}"),
            Value::Array(ref items) => match items.try_borrow() {
                Ok(items) => f.debug_list().entries(items.iter()).finish(),
                Err(_) => f.write_str("[...]"),
            },
            Value::Object(ref map) => match map.try_borrow() {
                Ok(map) => f.debug_map().entries(map.iter()).finish(),
                Err(_) => f.write_str("{...}"),
            },
            _ => fmt::Display::fmt(self, f),
        }
    }
}

/// Structural equality, unlike [`Value::strict_eq`] which compares arrays
/// and objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (a, b) => a.strict_eq(b),
        }
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Value {
        Value::Bool(val)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Value {
        Value::Number(val)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Value {
        Value::Number(val as f64)
    }
}

impl From<usize> for Value {
    fn from(val: usize) -> Value {
        Value::Number(val as f64)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Value {
        Value::String(Rc::from(val))
    }
}

impl From<String> for Value {
    fn from(val: String) -> Value {
        Value::String(Rc::from(val))
    }
}

impl From<Vec<Value>> for Value {
    fn from(val: Vec<Value>) -> Value {
        Value::from_array(val)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(val: Option<T>) -> Value {
        match val {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(feature = "serde")]
impl From<serde_json::Value> for Value {
    fn from(val: serde_json::Value) -> Value {
        match val {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(val) => Value::Bool(val),
            serde_json::Value::Number(val) => Value::Number(val.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(val) => Value::from(val),
            serde_json::Value::Array(items) => {
                Value::from_array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::from_object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

struct DepthLimited<'a>(&'a Value, usize);

impl Serialize for DepthLimited<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let DepthLimited(value, depth) = *self;
        if depth > MAX_DEPTH {
            return Err(ser::Error::custom("value is nested too deeply or cyclic"));
        }
        match *value {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(val) => serializer.serialize_bool(val),
            Value::Number(val) if !val.is_finite() => serializer.serialize_unit(),
            Value::Number(val) if val.fract() == 0.0 && val.abs() < 9007199254740992.0 => {
                serializer.serialize_i64(val as i64)
            }
            Value::Number(val) => serializer.serialize_f64(val),
            Value::String(ref val) => serializer.serialize_str(val),
            Value::Array(ref items) => {
                let items = items.borrow();
                let mut seq = ok!(serializer.serialize_seq(Some(items.len())));
                for item in items.iter() {
                    ok!(seq.serialize_element(&DepthLimited(item, depth + 1)));
                }
                seq.end()
            }
            Value::Object(ref map) => {
                let map = map.borrow();
                let mut s = ok!(serializer.serialize_map(Some(map.len())));
                for (key, item) in map.iter() {
                    if !item.is_undefined() {
                        ok!(s.serialize_entry(key, &DepthLimited(item, depth + 1)));
                    }
                }
                s.end()
            }
        }
    }
}

/// Serializes like `JSON.stringify`.  `undefined` becomes `null`, non
/// finite numbers become `null` and object entries holding `undefined` are
/// skipped.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DepthLimited(self, 0).serialize(serializer)
    }
}
