//! MiniPug is an HTML template engine for Rust with an indentation based
//! syntax in the spirit of [Pug](https://pugjs.org/).
//!
//! Nesting is expressed with indentation instead of closing tags, classes
//! and ids have CSS-like shorthands, and expressions are evaluated by an
//! embedded expression language:
//!
//! ```pug
//! doctype html
//! html
//!   body
//!     h1.title Hello #{name}!
//!     ul#items
//!       each item, idx in items
//!         li(class=idx == 0 ? 'first' : null)= item
//!       else
//!         li nothing here
//! ```
//!
//! # Template Usage
//!
//! To use MiniPug one creates an [`Environment`], parses templates with it
//! and renders them with any serde serializable context:
//!
//! ```
//! use minipug::Environment;
//! use serde_json::json;
//!
//! let env = Environment::new();
//! let tmpl = env.template_from_str("p.greeting Hello #{name}!").unwrap();
//! let rv = tmpl.render(json!({"name": "John"})).unwrap();
//! assert_eq!(rv, "<p class=\"greeting\">Hello John!</p>");
//! ```
//!
//! Templates loaded with [`Environment::template_from_path`] resolve
//! `include` and `extends` relative to their own file.  Hosts that do not
//! want to touch the filesystem can install a load function with
//! [`Environment::set_loader`].
//!
//! # Language
//!
//! * Tags: `div`, `a.button#main(href="/")`, `.box` (an implied `div`),
//!   `img/` (self closing), `p: span nested` (block expansion).
//! * Text: inline after a tag, piped lines (`| text`) and text blocks
//!   (`p.` followed by indented lines).  `#{expr}` interpolates escaped,
//!   `!{expr}` unescaped.
//! * Code: `- var x = 1` runs, `= expr` outputs escaped, `!= expr` raw.
//! * Control flow: `if`/`else if`/`else`, `unless`, `each x, i in xs`
//!   with an optional `else`, `while`, and `case`/`when`/`default`.
//! * Mixins: `mixin card(title, ...rest)` and `+card('Hi')(class="x")`,
//!   with `block` inside the mixin rendering the call's body.
//! * Composition: `include path`, `extends layout` together with
//!   `block name`, `block append name` and `block prepend name`.
//! * Comments: `// shown` (when enabled) and `//- hidden`.
//!
//! # Expressions
//!
//! Expressions are evaluated through the [`Evaluator`] trait.  The default
//! implementation is [`ScriptEngine`], an interpreter for a small
//! JavaScript flavoured expression language with declarations, member
//! access, template literals and a set of built-in methods.  Hosts can
//! implement the trait to plug in their own engine and render with
//! [`Template::render_with`].
//!
//! Failed evaluations in interpolations, attributes, conditions, loops,
//! `case` subjects and mixin arguments do not abort a render.  They are
//! logged through the [`log`](https://docs.rs/log) facade and collected as
//! diagnostics ([`Template::render_with_diagnostics`]).
//!
//! # Resource Limits
//!
//! Template files are size limited and include and extends cycles are
//! detected.  Render depth ([`Environment::set_recursion_limit`]) and loop
//! iterations ([`Environment::set_max_loop_iterations`]) are bounded, and
//! the script engine can be given fuel ([`Environment::set_fuel`]) to
//! bound the work a single render can do.
//!
//! # Caching
//!
//! With a [`TemplateCache`] installed ([`Environment::set_cache`]) the
//! rendered output of includes that do not depend on the evaluator is
//! stored, keyed by path and validated by a hash of the included source.
//!
//! # Optional Features
//!
//! - `serde`: enables [`Template::render`] with serde contexts and
//!   [`Value::from_serialize`].  Enabled by default.
//! - `json`: enables `JSON.stringify` in the script engine.  Enabled by
//!   default.
//! - `preserve_order`: script engine objects keep insertion order.
//! - `stacker`: grows the stack on demand while rendering so that much
//!   higher recursion limits can be used safely.
//! - `unstable_machinery`: exposes the tokenizer.
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::needless_borrowed_reference)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

#[macro_use]
mod macros;

mod cache;
mod compiler;
mod environment;
mod error;
mod loader;
mod script;
mod template;
mod utils;

pub use self::cache::{content_hash, CacheEntry, CacheStats, TemplateCache};
pub use self::compiler::ast;
pub use self::compiler::parser::parse;
pub use self::environment::{Environment, DEFAULT_MAX_LOOP_ITERATIONS, DEFAULT_RECURSION_LIMIT};
pub use self::error::{Error, ErrorKind};
pub use self::loader::{memory_loader, DEFAULT_MAX_TEMPLATE_SIZE};
pub use self::script::{Evaluator, FuelTracker, ScriptEngine, Value, ValueKind, ValueMap};
pub use self::template::Template;
pub use self::utils::HtmlEscape;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// This module gives access to the low level machinery.
///
/// This module is only provided by the `unstable_machinery` feature and does not
/// have a stable interface.  It mostly exists for internal testing purposes and
/// for debugging.
#[cfg(feature = "unstable_machinery")]
#[cfg_attr(docsrs, doc(cfg(feature = "unstable_machinery")))]
pub mod machinery {
    #![allow(missing_docs)]
    pub use crate::compiler::lexer::{tokenize, Tokenizer};
    pub use crate::compiler::tokens::{CodeKind, Keyword, Span, Token};
}
