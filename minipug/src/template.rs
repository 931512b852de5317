use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compiler::ast::Ast;
use crate::compiler::codegen::Generator;
use crate::compiler::parser::parse;
use crate::environment::Environment;
use crate::error::Error;
use crate::script::Evaluator;

#[cfg(feature = "serde")]
use crate::{error::ErrorKind, script::Value};

/// Represents a parsed template.
///
/// Templates are created through the [`Environment`] and keep a reference
/// to it.  Parsing happens once, rendering can be repeated any number of
/// times with different contexts.
///
/// To render the [`render`](Template::render) method can be used.
#[derive(Clone)]
pub struct Template<'env> {
    env: &'env Environment,
    ast: Arc<Ast>,
    source: Arc<str>,
    name: Option<String>,
    path: Option<PathBuf>,
    dir: PathBuf,
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("nodes", &self.ast.len())
            .finish()
    }
}

impl<'env> Template<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        source: Arc<str>,
        name: Option<&str>,
        path: Option<&Path>,
        dir: &Path,
    ) -> Result<Template<'env>, Error> {
        let ast = match parse(&source) {
            Ok(ast) => ast,
            Err(mut err) => {
                if let Some(name) = name {
                    err.set_name(name);
                }
                err.set_template_source(&source);
                return Err(err);
            }
        };
        Ok(Template {
            env,
            ast: Arc::new(ast),
            source,
            name: name.map(Into::into),
            path: path.map(Path::to_path_buf),
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the name of the template, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the source code of the template.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the parsed tree.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Renders the template into a string.
    ///
    /// The context can be any value that serializes to a map.  A fresh
    /// [`ScriptEngine`](crate::ScriptEngine) is created for the render
    /// (with the fuel of the environment) and every top level key of the
    /// context is declared as a variable.  `()` renders without variables.
    ///
    /// ```
    /// # use minipug::Environment;
    /// # use serde_json::json;
    /// let env = Environment::new();
    /// let tmpl = env.template_from_str("ul\n  each item in items\n    li= item").unwrap();
    /// let rv = tmpl.render(json!({"items": ["a", "b"]})).unwrap();
    /// assert_eq!(rv, "<ul><li>a</li><li>b</li></ul>");
    /// ```
    #[cfg(feature = "serde")]
    pub fn render<S: serde::Serialize>(&self, ctx: S) -> Result<String, Error> {
        self.render_with_diagnostics(ctx).map(|x| x.0)
    }

    /// Like [`render`](Self::render) but also returns the diagnostics.
    ///
    /// Failed evaluations in interpolations, attributes, conditions, loops,
    /// `case` subjects and mixin arguments do not abort the render.  They
    /// are logged and returned here, each with the location of the node.
    #[cfg(feature = "serde")]
    pub fn render_with_diagnostics<S: serde::Serialize>(
        &self,
        ctx: S,
    ) -> Result<(String, Vec<Error>), Error> {
        // keep the generic part small, the rest is shared
        self._render(Value::from_serialize(&ctx))
    }

    #[cfg(feature = "serde")]
    fn _render(&self, ctx: Result<Value, Error>) -> Result<(String, Vec<Error>), Error> {
        let mut engine = self.env.new_engine();
        match ok!(ctx) {
            Value::Object(map) => {
                for (key, value) in map.borrow().iter() {
                    engine.declare_variable(key, value.clone());
                }
            }
            Value::Undefined | Value::Null => {}
            other => {
                return Err(Error::new(
                    ErrorKind::BadSerialization,
                    format!("context must be a map, got {}", other.kind()),
                ))
            }
        }
        self.render_with_evaluator(&mut engine)
    }

    /// Renders the template against a host provided evaluator.
    ///
    /// The evaluator keeps whatever state the render leaves behind, which
    /// makes it possible to inspect variables afterwards.
    ///
    /// ```
    /// # use minipug::{Environment, ScriptEngine, Value};
    /// let env = Environment::new();
    /// let tmpl = env.template_from_str("- var seen = 0\neach x in [1, 2, 3]\n  - seen += x").unwrap();
    /// let mut engine = ScriptEngine::new();
    /// tmpl.render_with(&mut engine).unwrap();
    /// assert_eq!(engine.get_variable("seen"), Some(&Value::from(6.0)));
    /// ```
    pub fn render_with(&self, eval: &mut dyn Evaluator) -> Result<String, Error> {
        self.render_with_evaluator(eval).map(|x| x.0)
    }

    /// Like [`render_with`](Self::render_with) but also returns the
    /// diagnostics.
    pub fn render_with_evaluator(
        &self,
        eval: &mut dyn Evaluator,
    ) -> Result<(String, Vec<Error>), Error> {
        let mut gen = Generator::new(self.env, eval);
        ok!(gen.render_template(
            self.ast.clone(),
            self.source.clone(),
            self.name.as_deref(),
            self.path.as_deref(),
            &self.dir,
        ));
        Ok(gen.finish())
    }
}
