//! The embedded expression language.
//!
//! Templates delegate every expression to an [`Evaluator`].  The crate ships
//! [`ScriptEngine`], an interpreter for a small JavaScript flavoured
//! expression language, but hosts can plug in their own implementation.
use crate::error::Error;

mod ast;
mod builtins;
mod engine;
mod fuel;
mod lexer;
mod parser;
mod value;

pub use self::engine::ScriptEngine;
pub use self::fuel::FuelTracker;
pub use self::value::{Value, ValueKind, ValueMap};

/// Evaluates expressions on behalf of the code generator.
///
/// The generator evaluates the source text of interpolations, attribute
/// values, conditions, loop iterables, case subjects, mixin arguments and
/// code lines through this trait.  Loop items and mixin arguments are
/// handed back through [`declare_variable`](Self::declare_variable)
/// unchanged.
///
/// Every loop iteration and every mixin call runs between a
/// [`push_scope`](Self::push_scope) and a matching
/// [`pop_scope`](Self::pop_scope).
pub trait Evaluator {
    /// Evaluates a snippet and returns the value of its last expression.
    fn eval(&mut self, source: &str) -> Result<Value, Error>;

    /// Declares a variable in the innermost scope.
    fn declare_variable(&mut self, name: &str, value: Value);

    /// Opens a new scope.
    fn push_scope(&mut self);

    /// Closes the innermost scope.
    fn pop_scope(&mut self);

    /// Charges one iteration of an `each` or `while` loop.
    ///
    /// Loop bodies may render without evaluating anything, so budgeted
    /// evaluators should count iterations here.  The default does nothing.
    fn track_iteration(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
