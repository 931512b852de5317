use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::TemplateCache;
use crate::error::{Error, ErrorKind};
use crate::loader::Loader;
use crate::script::ScriptEngine;
use crate::template::Template;

/// The default bound for `while` and `each` loops.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 10_000;

/// The default bound for how deeply a render may nest.
pub const DEFAULT_RECURSION_LIMIT: usize = 250;

/// An abstraction that holds the engine configuration.
///
/// The environment decides where included and extended templates are
/// loaded from, how much evaluation work a render may do and whether
/// rendered includes are cached.  It is cheap to clone and can be shared
/// between threads; the cache is shared between clones.
///
/// ```
/// use minipug::Environment;
///
/// let env = Environment::new();
/// let tmpl = env.template_from_str("p Hello #{name}!").unwrap();
/// assert_eq!(
///     tmpl.render(serde_json::json!({"name": "World"})).unwrap(),
///     "<p>Hello World!</p>"
/// );
/// ```
#[derive(Clone)]
pub struct Environment {
    pub(crate) loader: Loader,
    pub(crate) include_comments: bool,
    pub(crate) max_loop_iterations: usize,
    pub(crate) recursion_limit: usize,
    pub(crate) fuel: Option<u64>,
    pub(crate) cache: Option<Arc<Mutex<TemplateCache>>>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("loader", &self.loader)
            .field("include_comments", &self.include_comments)
            .field("max_loop_iterations", &self.max_loop_iterations)
            .field("recursion_limit", &self.recursion_limit)
            .field("fuel", &self.fuel)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl Environment {
    /// Creates a new environment with sensible defaults.
    ///
    /// Templates are loaded relative to the current working directory,
    /// comments are not emitted, there is no fuel limit and no cache.
    pub fn new() -> Environment {
        Environment {
            loader: Loader::default(),
            include_comments: false,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            fuel: None,
            cache: None,
        }
    }

    /// Sets the directory templates without a file of their own resolve
    /// includes against.  Absolute references (`include /nav`) always
    /// start here.
    pub fn set_base_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.loader.set_base_path(path);
    }

    /// Returns the base path.
    pub fn base_path(&self) -> &Path {
        self.loader.base_path()
    }

    /// Enables or disables the output of buffered `//` comments.
    pub fn set_include_comments(&mut self, yes: bool) {
        self.include_comments = yes;
    }

    /// Sets the size limit in bytes for a single template file.
    ///
    /// Defaults to 10 MiB.
    pub fn set_max_template_size(&mut self, size: u64) {
        self.loader.set_max_template_size(size);
    }

    /// Limits how often the body of a `while` or `each` loop may run.
    ///
    /// An `each` over something longer than this fails up front with
    /// [`ErrorKind::LoopLimitExceeded`].
    pub fn set_max_loop_iterations(&mut self, limit: usize) {
        self.max_loop_iterations = limit;
    }

    /// Sets how deeply a render may nest.
    ///
    /// Every rendered node counts one level for as long as its children
    /// render, mixin calls, includes and extends count ten.  Going deeper
    /// fails with [`ErrorKind::RecursionLimitExceeded`].  Without the
    /// `stacker` feature raising this far above the default risks
    /// overflowing the stack.
    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit;
    }

    /// Returns the recursion limit.
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Sets the fuel of engines created by [`Template::render`].
    ///
    /// Every evaluated expression node consumes one unit of fuel.  Once
    /// exhausted the render fails with [`ErrorKind::OutOfFuel`].
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    /// Returns the configured fuel.
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Installs a cache for rendered includes.
    pub fn set_cache(&mut self, cache: TemplateCache) {
        self.cache = Some(Arc::new(Mutex::new(cache)));
    }

    /// Returns the include cache if one was installed.
    pub fn cache(&self) -> Option<&Arc<Mutex<TemplateCache>>> {
        self.cache.as_ref()
    }

    /// Replaces the filesystem with a custom load function.
    ///
    /// The function is invoked with already resolved paths and returns
    /// `Ok(None)` if a template does not exist.  The size limit is still
    /// applied to what it returns.
    ///
    /// ```
    /// # use minipug::{Environment, ErrorKind};
    /// # use std::path::Path;
    /// let mut env = Environment::new();
    /// env.set_base_path("/views");
    /// env.set_loader(|path: &Path| {
    ///     Ok(match path.to_str() {
    ///         Some("/views/header.pug") => Some("h1 Welcome".into()),
    ///         _ => None,
    ///     })
    /// });
    /// let rv = env.render_str("include header", ()).unwrap();
    /// assert_eq!(rv, "<h1>Welcome</h1>");
    /// ```
    pub fn set_loader<F>(&mut self, f: F)
    where
        F: Fn(&Path) -> Result<Option<String>, Error> + Send + Sync + 'static,
    {
        self.loader.set_load_func(f);
    }

    /// Parses a template from a string.
    ///
    /// Includes are resolved against the base path.
    pub fn template_from_str(&self, source: &str) -> Result<Template<'_>, Error> {
        Template::new(self, source.into(), None, None, self.base_path())
    }

    /// Parses a template from a string and gives it a name.
    ///
    /// The name shows up in error messages.
    pub fn template_from_named_str(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Template<'_>, Error> {
        Template::new(self, source.into(), Some(name), None, self.base_path())
    }

    /// Loads and parses a template file.
    ///
    /// Relative paths are resolved against the base path and a missing
    /// extension defaults to `.pug`.  Includes are resolved against the
    /// directory of the file.
    pub fn template_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Template<'_>, Error> {
        let path = path.as_ref();
        let resolved = self.loader.resolve_entry(path);
        let source = match ok!(self.loader.load(&resolved)) {
            Some(source) => source,
            None => {
                return Err(Error::new(
                    ErrorKind::TemplateNotFound,
                    format!("{} (resolved to {})", path.display(), resolved.display()),
                ))
            }
        };
        log::debug!("loaded template {}", resolved.display());
        let name = resolved.display().to_string();
        let dir = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
        Template::new(self, source.into(), Some(&name), Some(&resolved), &dir)
    }

    /// Parses and renders a template in one go.
    #[cfg(feature = "serde")]
    pub fn render_str<S: serde::Serialize>(&self, source: &str, ctx: S) -> Result<String, Error> {
        ok!(self.template_from_str(source)).render(ctx)
    }

    /// Creates a script engine configured with this environment's fuel.
    pub fn new_engine(&self) -> ScriptEngine {
        let mut engine = ScriptEngine::new();
        engine.set_fuel(self.fuel);
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_environment_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Environment>();
    }

    #[test]
    fn test_template_from_missing_path() {
        let mut env = Environment::new();
        env.set_loader(|_| Ok(None));
        let err = env.template_from_path("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
        assert!(err.to_string().contains("missing.pug"));
    }
}
