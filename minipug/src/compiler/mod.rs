#![allow(missing_docs)]
//! The internals of the template compiler.
pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod tokens;
