use std::collections::HashMap;
use std::fmt::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::Error;
use crate::script::ast::{Expr, LogicalOpKind, Stmt, UnaryOpKind};
use crate::script::builtins::{self, runtime_error};
use crate::script::fuel::FuelTracker;
use crate::script::parser::parse_program;
use crate::script::value::{Value, ValueMap};
use crate::script::Evaluator;

/// Parsed programs are kept up to this many distinct sources.
const MAX_CACHED_PROGRAMS: usize = 512;

/// Unwraps a chain result or short-circuits an optional chain.
macro_rules! some_chain {
    ($expr:expr) => {
        match $expr {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(err) => return Err(err),
        }
    };
}

/// The default [`Evaluator`].
///
/// Implements a small JavaScript flavoured expression language with
/// variable declarations and assignments.  Variables live in a stack of
/// scopes, the bottom scope holds the globals.
///
/// ```
/// use minipug::{Evaluator, ScriptEngine, Value};
///
/// let mut engine = ScriptEngine::new();
/// engine.declare_variable("name", Value::from("World"));
/// let rv = engine.eval("`Hello ${name.toUpperCase()}!`").unwrap();
/// assert_eq!(rv.to_string(), "Hello WORLD!");
/// ```
pub struct ScriptEngine {
    scopes: Vec<HashMap<String, Value>>,
    fuel: Option<Arc<FuelTracker>>,
    programs: HashMap<String, Rc<[Stmt]>>,
}

impl Default for ScriptEngine {
    fn default() -> ScriptEngine {
        ScriptEngine::new()
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("scopes", &self.scopes.len())
            .field("fuel", &self.fuel)
            .finish()
    }
}

impl ScriptEngine {
    /// Creates an engine without an evaluation budget.
    pub fn new() -> ScriptEngine {
        ScriptEngine {
            scopes: vec![HashMap::new()],
            fuel: None,
            programs: HashMap::new(),
        }
    }

    /// Creates an engine that may evaluate at most `fuel` nodes.
    pub fn with_fuel(fuel: u64) -> ScriptEngine {
        let mut rv = ScriptEngine::new();
        rv.set_fuel(Some(fuel));
        rv
    }

    /// Sets or removes the evaluation budget.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel.map(FuelTracker::new);
    }

    /// Uses a shared fuel tracker.
    pub fn set_fuel_tracker(&mut self, tracker: Option<Arc<FuelTracker>>) {
        self.fuel = tracker;
    }

    /// Returns the fuel tracker if a budget is set.
    pub fn fuel_tracker(&self) -> Option<&Arc<FuelTracker>> {
        self.fuel.as_ref()
    }

    /// Looks up a variable through all scopes.
    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Returns the number of active scopes, including the global scope.
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn compile(&mut self, source: &str) -> Result<Rc<[Stmt]>, Error> {
        if let Some(program) = self.programs.get(source) {
            return Ok(program.clone());
        }
        let program: Rc<[Stmt]> = Rc::from(ok!(parse_program(source)));
        if self.programs.len() >= MAX_CACHED_PROGRAMS {
            self.programs.clear();
        }
        self.programs.insert(source.to_string(), program.clone());
        Ok(program)
    }

    fn set_variable(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.scopes[0].insert(name.to_string(), value);
    }

    fn track(&self) -> Result<(), Error> {
        match self.fuel {
            Some(ref fuel) => fuel.track(),
            None => Ok(()),
        }
    }

    fn run(&mut self, program: &[Stmt]) -> Result<Value, Error> {
        let mut rv = Value::Undefined;
        for stmt in program {
            match stmt {
                Stmt::Declare(decls) => {
                    for (name, value) in decls {
                        let value = match value {
                            Some(expr) => ok!(self.eval_expr(expr)),
                            None => Value::Undefined,
                        };
                        self.declare_variable(name, value);
                    }
                }
                Stmt::Expr(expr) => rv = ok!(self.eval_expr(expr)),
            }
        }
        Ok(rv)
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, Error> {
        if let Expr::GetAttr { .. } | Expr::GetItem { .. } | Expr::Call { .. } = expr {
            return Ok(ok!(self.eval_chain(expr)).unwrap_or_default());
        }
        ok!(self.track());
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Var(name) => match self.get_variable(name) {
                Some(value) => Ok(value.clone()),
                None if builtins::is_namespace(name) || builtins::is_global_function(name) => {
                    Err(runtime_error(format!("{name} can only be called")))
                }
                None => Err(runtime_error(format!("{name} is not defined"))),
            },
            Expr::Template(parts) => {
                let mut rv = String::new();
                for part in parts {
                    let value = ok!(self.eval_expr(part));
                    write!(rv, "{value}").ok();
                }
                Ok(Value::from(rv))
            }
            Expr::Array(items) => {
                let mut rv = Vec::with_capacity(items.len());
                for item in items {
                    rv.push(ok!(self.eval_expr(item)));
                }
                Ok(Value::from_array(rv))
            }
            Expr::Object(items) => {
                let mut rv = ValueMap::new();
                for (key, value) in items {
                    let value = ok!(self.eval_expr(value));
                    rv.insert(key.clone(), value);
                }
                Ok(Value::from_object(rv))
            }
            Expr::UnaryOp { op, expr } => self.eval_unary(*op, expr),
            Expr::BinOp { op, left, right } => {
                let left = ok!(self.eval_expr(left));
                let right = ok!(self.eval_expr(right));
                builtins::binop(*op, &left, &right)
            }
            Expr::LogicalOp { op, left, right } => {
                let left = ok!(self.eval_expr(left));
                let short_circuit = match op {
                    LogicalOpKind::And => !left.is_true(),
                    LogicalOpKind::Or => left.is_true(),
                    LogicalOpKind::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval_expr(right)
                }
            }
            Expr::IfExpr {
                test,
                true_expr,
                false_expr,
            } => {
                if ok!(self.eval_expr(test)).is_true() {
                    self.eval_expr(true_expr)
                } else {
                    self.eval_expr(false_expr)
                }
            }
            Expr::Assign { target, op, value } => {
                let value = match op {
                    Some(op) => {
                        let current = ok!(self.eval_expr(target));
                        let rhs = ok!(self.eval_expr(value));
                        ok!(builtins::binop(*op, &current, &rhs))
                    }
                    None => ok!(self.eval_expr(value)),
                };
                ok!(self.assign(target, value.clone()));
                Ok(value)
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = ok!(self.eval_expr(target)).as_number();
                let new = old + delta;
                ok!(self.assign(target, Value::Number(new)));
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::GetAttr { .. } | Expr::GetItem { .. } | Expr::Call { .. } => unreachable!(),
        }
    }

    fn eval_unary(&mut self, op: UnaryOpKind, expr: &Expr) -> Result<Value, Error> {
        if op == UnaryOpKind::TypeOf {
            if let Expr::Var(name) = expr {
                if self.get_variable(name).is_none() {
                    return Ok(Value::from(if builtins::is_namespace(name) {
                        "object"
                    } else if builtins::is_global_function(name) {
                        "function"
                    } else {
                        "undefined"
                    }));
                }
            }
        }
        let value = ok!(self.eval_expr(expr));
        Ok(match op {
            UnaryOpKind::Not => Value::Bool(!value.is_true()),
            UnaryOpKind::Neg => Value::Number(-value.as_number()),
            UnaryOpKind::Plus => Value::Number(value.as_number()),
            UnaryOpKind::TypeOf => Value::from(value.type_of()),
        })
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, Error> {
        let mut rv = Vec::with_capacity(args.len());
        for arg in args {
            rv.push(ok!(self.eval_expr(arg)));
        }
        Ok(rv)
    }

    /// Returns the namespace a member expression refers to, unless a
    /// variable of that name shadows it.
    fn namespace_of<'e>(&self, expr: &'e Expr) -> Option<&'e str> {
        match expr {
            Expr::Var(name) if builtins::is_namespace(name) && self.get_variable(name).is_none() => {
                Some(name.as_str())
            }
            _ => None,
        }
    }

    /// Evaluates member accesses and calls.  `None` means an optional
    /// chain short-circuited.
    fn eval_chain(&mut self, expr: &Expr) -> Result<Option<Value>, Error> {
        match expr {
            Expr::GetAttr {
                expr: inner,
                name,
                optional,
            } => {
                ok!(self.track());
                if let Some(ns) = self.namespace_of(inner) {
                    return match builtins::namespace_constant(ns, name) {
                        Some(value) => Ok(Some(value)),
                        None => Err(runtime_error(format!("{ns}.{name} can only be called"))),
                    };
                }
                let value = some_chain!(self.eval_chain(inner));
                if value.is_nullish() {
                    return if *optional {
                        Ok(None)
                    } else {
                        Err(runtime_error(format!(
                            "cannot read properties of {value} (reading '{name}')"
                        )))
                    };
                }
                Ok(Some(value.get_attr(name)))
            }
            Expr::GetItem {
                expr: inner,
                subscript,
                optional,
            } => {
                ok!(self.track());
                let value = some_chain!(self.eval_chain(inner));
                if value.is_nullish() {
                    if *optional {
                        return Ok(None);
                    }
                    let key = ok!(self.eval_expr(subscript));
                    return Err(runtime_error(format!(
                        "cannot read properties of {value} (reading '{key}')"
                    )));
                }
                let key = ok!(self.eval_expr(subscript));
                Ok(Some(value.get_item(&key)))
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                ok!(self.track());
                self.eval_call(callee, args, *optional)
            }
            _ => self.eval_expr(expr).map(Some),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        optional: bool,
    ) -> Result<Option<Value>, Error> {
        match callee {
            Expr::GetAttr {
                expr: inner,
                name,
                optional: optional_member,
            } => {
                if let Some(ns) = self.namespace_of(inner) {
                    let args = ok!(self.eval_args(args));
                    return builtins::call_namespace(ns, name, &args).map(Some);
                }
                let this = some_chain!(self.eval_chain(inner));
                if this.is_nullish() {
                    return if *optional_member {
                        Ok(None)
                    } else {
                        Err(runtime_error(format!(
                            "cannot read properties of {this} (reading '{name}')"
                        )))
                    };
                }
                let args = ok!(self.eval_args(args));
                match builtins::call_method(&this, name, &args) {
                    Some(rv) => rv.map(Some),
                    None if optional => Ok(None),
                    None => Err(runtime_error(format!(
                        "{name} is not a function on {}",
                        this.kind()
                    ))),
                }
            }
            Expr::Var(name) if self.get_variable(name).is_none() => {
                let args = ok!(self.eval_args(args));
                match builtins::call_global(name, &args) {
                    Some(rv) => rv.map(Some),
                    None if optional => Ok(None),
                    None => Err(runtime_error(format!("{name} is not defined"))),
                }
            }
            _ => {
                let value = some_chain!(self.eval_chain(callee));
                if optional && value.is_nullish() {
                    return Ok(None);
                }
                Err(runtime_error(format!(
                    "{} is not a function",
                    value.type_of()
                )))
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), Error> {
        match target {
            Expr::Var(name) => {
                self.set_variable(name, value);
                Ok(())
            }
            Expr::GetAttr { expr, name, .. } => {
                let this = ok!(self.eval_expr(expr));
                set_item(&this, &Value::from(name.as_str()), value)
            }
            Expr::GetItem {
                expr, subscript, ..
            } => {
                let this = ok!(self.eval_expr(expr));
                let key = ok!(self.eval_expr(subscript));
                set_item(&this, &key, value)
            }
            _ => Err(runtime_error("invalid assignment target")),
        }
    }
}

fn set_item(this: &Value, key: &Value, value: Value) -> Result<(), Error> {
    match this {
        Value::Object(map) => {
            map.borrow_mut().insert(key.to_string(), value);
        }
        Value::Array(items) => {
            if let Some(idx) = builtins::array_index(key) {
                let mut items = items.borrow_mut();
                if idx >= items.len() {
                    items.resize(idx + 1, Value::Undefined);
                }
                items[idx] = value;
            }
        }
        Value::Undefined | Value::Null => {
            return Err(runtime_error(format!(
                "cannot set properties of {this} (setting '{key}')"
            )));
        }
        _ => {}
    }
    Ok(())
}

impl Evaluator for ScriptEngine {
    fn eval(&mut self, source: &str) -> Result<Value, Error> {
        let program = ok!(self.compile(source));
        self.run(&program)
    }

    fn declare_variable(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn track_iteration(&mut self) -> Result<(), Error> {
        self.track()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorKind;

    use similar_asserts::assert_eq;

    fn eval(engine: &mut ScriptEngine, source: &str) -> String {
        engine.eval(source).unwrap().to_string()
    }

    #[test]
    fn test_scoping() {
        let mut engine = ScriptEngine::new();
        engine.declare_variable("x", Value::from(1i64));
        engine.push_scope();
        engine.declare_variable("x", Value::from(2i64));
        assert_eq!(eval(&mut engine, "x"), "2");
        eval(&mut engine, "x = 3; y = 4");
        engine.pop_scope();
        assert_eq!(eval(&mut engine, "x"), "1");
        assert_eq!(eval(&mut engine, "y"), "4");
        engine.pop_scope();
        assert_eq!(engine.scope_depth(), 1);
    }

    #[test]
    fn test_optional_chaining() {
        let mut engine = ScriptEngine::new();
        assert_eq!(eval(&mut engine, "var a = null; a?.b.c"), "undefined");
        assert_eq!(eval(&mut engine, "a ?? 'fallback'"), "fallback");
        let err = engine.eval("a.b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvalRuntime);
    }

    #[test]
    fn test_namespaces_can_be_shadowed() {
        let mut engine = ScriptEngine::new();
        assert_eq!(eval(&mut engine, "Math.max(1, 5, 3)"), "5");
        assert_eq!(eval(&mut engine, "var Math = {max: 2}; Math.max"), "2");
    }

    #[test]
    fn test_runtime_errors() {
        let mut engine = ScriptEngine::new();
        for source in ["nope", "nope()", "'x'.nope()", "var n = 1; n()", "undefined.x = 1"] {
            assert_eq!(
                engine.eval(source).unwrap_err().kind(),
                ErrorKind::EvalRuntime,
                "{source}"
            );
        }
        assert_eq!(eval(&mut engine, "typeof nope"), "undefined");
    }

    #[test]
    fn test_fuel() {
        let mut engine = ScriptEngine::with_fuel(10);
        assert_eq!(eval(&mut engine, "1 + 2"), "3");
        let err = engine.eval("[1, 2, 3, 4, 5, 6, 7, 8, 9]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfFuel);
    }
}
