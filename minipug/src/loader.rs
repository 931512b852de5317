use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

/// The default upper bound for the size of a single template file.
pub const DEFAULT_MAX_TEMPLATE_SIZE: u64 = 10 * 1024 * 1024;

type LoadFunc = dyn Fn(&Path) -> Result<Option<String>, Error> + Send + Sync;

/// Resolves and reads templates referenced by `include` and `extends`.
#[derive(Clone)]
pub(crate) struct Loader {
    base_path: PathBuf,
    max_template_size: u64,
    load_func: Option<Arc<LoadFunc>>,
}

impl Default for Loader {
    fn default() -> Loader {
        Loader {
            base_path: PathBuf::from("."),
            max_template_size: DEFAULT_MAX_TEMPLATE_SIZE,
            load_func: None,
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("base_path", &self.base_path)
            .field("max_template_size", &self.max_template_size)
            .field("custom", &self.load_func.is_some())
            .finish()
    }
}

impl Loader {
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn set_base_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.base_path = path.into();
    }

    pub fn set_max_template_size(&mut self, size: u64) {
        self.max_template_size = size;
    }

    pub fn set_load_func<F>(&mut self, f: F)
    where
        F: Fn(&Path) -> Result<Option<String>, Error> + Send + Sync + 'static,
    {
        self.load_func = Some(Arc::new(f));
    }

    /// Resolves a template reference.
    ///
    /// Absolute references (`/layout`) start at the base path, everything
    /// else is relative to the directory of the referencing template.  A
    /// reference without extension gets `.pug` appended.
    pub fn resolve(&self, current_dir: &Path, name: &str) -> PathBuf {
        with_default_extension(match name.strip_prefix('/') {
            Some(rest) => self.base_path.join(rest),
            None => current_dir.join(name),
        })
    }

    /// Resolves a path handed in by the host.
    ///
    /// Relative paths start at the base path, absolute paths are kept.
    pub fn resolve_entry(&self, path: &Path) -> PathBuf {
        with_default_extension(self.base_path.join(path))
    }

    /// Loads a template, `None` if it does not exist.
    pub fn load(&self, path: &Path) -> Result<Option<String>, Error> {
        let rv = match self.load_func {
            Some(ref func) => ok!(func(path)),
            None => ok!(self.load_from_disk(path)),
        };
        match rv {
            Some(source) if source.len() as u64 > self.max_template_size => {
                Err(self.too_large(path))
            }
            rv => Ok(rv),
        }
    }

    fn load_from_disk(&self, path: &Path) -> Result<Option<String>, Error> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return Ok(None),
            Ok(meta) if meta.len() > self.max_template_size => {
                return Err(self.too_large(path));
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(path, err)),
        }
        match fs::read_to_string(path) {
            Ok(source) => Ok(Some(source)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }

    fn too_large(&self, path: &Path) -> Error {
        Error::new(
            ErrorKind::TemplateTooLarge,
            format!(
                "{} exceeds the limit of {} bytes",
                path.display(),
                self.max_template_size
            ),
        )
    }
}

fn io_error(path: &Path, err: io::Error) -> Error {
    Error::new(
        ErrorKind::Io,
        format!("could not read template {}", path.display()),
    )
    .with_source(err)
}

fn with_default_extension(mut path: PathBuf) -> PathBuf {
    if path.extension().is_none() {
        path.set_extension("pug");
    }
    normalize(&path)
}

/// Lexically removes `.` and `..` segments.
///
/// `..` never climbs above the root of an absolute path; for relative
/// paths leading `..` segments are kept.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut rv = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match rv.components().next_back() {
                Some(Component::Normal(_)) => {
                    rv.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => rv.push(".."),
            },
            other => rv.push(other.as_os_str()),
        }
    }
    if rv.as_os_str().is_empty() {
        rv.push(".");
    }
    rv
}

/// Helper to load templates from an in-memory map.
///
/// Useful for tests and for embedding templates into a binary.  Paths
/// are looked up after normalization, so `./views/a.pug` and
/// `views/a.pug` are the same template.
///
/// ```
/// # use minipug::{Environment, memory_loader};
/// let mut env = Environment::new();
/// env.set_loader(memory_loader([("views/footer.pug", "footer bye")]));
/// ```
pub fn memory_loader<I, K, V>(
    templates: I,
) -> impl Fn(&Path) -> Result<Option<String>, Error> + Send + Sync + 'static
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<Path>,
    V: Into<String>,
{
    let templates: Vec<(PathBuf, String)> = templates
        .into_iter()
        .map(|(path, source)| (normalize(path.as_ref()), source.into()))
        .collect();
    move |path: &Path| {
        let path = normalize(path);
        Ok(templates
            .iter()
            .find(|(candidate, _)| *candidate == path)
            .map(|(_, source)| source.clone()))
    }
}
