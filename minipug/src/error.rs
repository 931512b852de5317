use std::borrow::Cow;
use std::fmt;

/// Represents template errors.
///
/// Errors carry an [`ErrorKind`], an optional detail message and, where
/// known, the name of the template together with the line and column the
/// problem was found at.  If the template source is known the error can be
/// displayed with the alternative formatting (``format!("{:#}", err)``)
/// which renders the offending lines.
///
/// # Example
///
/// ```rust
/// # let env = minipug::Environment::new();
/// match env.render_str("p Hello #{name}", serde_json::json!({"name": "World"})) {
///     Ok(result) => println!("{}", result),
///     Err(err) => {
///         eprintln!("Could not render template:");
///         eprintln!("  {:#}", err);
///     }
/// }
/// ```
pub struct Error {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
    name: Option<String>,
    lineno: usize,
    column: usize,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    template_source: Option<String>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("detail", &self.detail)
            .field("name", &self.name)
            .field("lineno", &self.lineno)
            .field("column", &self.column)
            .field("source", &self.source)
            .finish()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }
}

impl Eq for Error {}

/// An enum describing the error kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A character that cannot start any token.
    UnexpectedCharacter,
    /// Tabs in indentation or a dedent to an unknown level.
    InvalidIndentation,
    /// A string literal without closing quote.
    UnterminatedString,
    /// A `#{` or `!{` without closing brace.
    UnterminatedInterpolation,
    /// A bad backslash escape inside a string literal.
    BadEscape,
    /// The parser encountered a token it cannot use here.
    UnexpectedToken,
    /// The parser required a specific token that is missing.
    ExpectedToken,
    /// A `doctype` that is not the first statement.
    DoctypeNotFirst,
    /// A call to a mixin that was never defined.
    MixinNotFound,
    /// An included file does not exist.
    IncludeNotFound,
    /// An included file failed to lex or parse.
    IncludeParseError,
    /// The parent of an `extends` does not exist.
    ExtendsNotFound,
    /// The parent of an `extends` failed to lex or parse.
    ExtendsParseError,
    /// An include or extends chain that loops back onto itself.
    RecursiveInclude,
    /// A top level template could not be found.
    TemplateNotFound,
    /// A template exceeded the configured size limit.
    TemplateTooLarge,
    /// The evaluator rejected the syntax of an expression.
    EvalSyntax,
    /// The evaluator failed while running an expression.
    EvalRuntime,
    /// The evaluator ran out of fuel.
    OutOfFuel,
    /// A `while` loop exceeded the iteration limit.
    LoopLimitExceeded,
    /// Mixins or templates nested too deeply.
    RecursionLimitExceeded,
    /// A value could not be converted into the engine's value model.
    BadSerialization,
    /// An I/O error while loading templates.
    Io,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::UnexpectedCharacter => "unexpected character",
            ErrorKind::InvalidIndentation => "invalid indentation",
            ErrorKind::UnterminatedString => "unterminated string",
            ErrorKind::UnterminatedInterpolation => "unterminated interpolation",
            ErrorKind::BadEscape => "bad string escape",
            ErrorKind::UnexpectedToken => "unexpected token",
            ErrorKind::ExpectedToken => "expected token",
            ErrorKind::DoctypeNotFirst => "doctype must be the first statement",
            ErrorKind::MixinNotFound => "mixin not found",
            ErrorKind::IncludeNotFound => "included template not found",
            ErrorKind::IncludeParseError => "included template failed to parse",
            ErrorKind::ExtendsNotFound => "parent template not found",
            ErrorKind::ExtendsParseError => "parent template failed to parse",
            ErrorKind::RecursiveInclude => "recursive include or extends",
            ErrorKind::TemplateNotFound => "template not found",
            ErrorKind::TemplateTooLarge => "template too large",
            ErrorKind::EvalSyntax => "expression syntax error",
            ErrorKind::EvalRuntime => "expression evaluation failed",
            ErrorKind::OutOfFuel => "engine ran out of fuel",
            ErrorKind::LoopLimitExceeded => "loop iteration limit exceeded",
            ErrorKind::RecursionLimitExceeded => "recursion limit exceeded",
            ErrorKind::BadSerialization => "could not serialize to internal format",
            ErrorKind::Io => "i/o error",
        }
    }

    /// Returns `true` for lexer and parser failures.
    pub fn is_syntax_error(self) -> bool {
        matches!(
            self,
            ErrorKind::UnexpectedCharacter
                | ErrorKind::InvalidIndentation
                | ErrorKind::UnterminatedString
                | ErrorKind::UnterminatedInterpolation
                | ErrorKind::BadEscape
                | ErrorKind::UnexpectedToken
                | ErrorKind::ExpectedToken
                | ErrorKind::DoctypeNotFirst
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.detail {
            ok!(write!(f, "{}: {}", self.kind, detail));
        } else {
            ok!(write!(f, "{}", self.kind));
        }
        match (self.name.as_deref(), self.lineno) {
            (_, 0) => {}
            (Some(name), line) => ok!(write!(f, " (in {}:{}:{})", name, line, self.column)),
            (None, line) => ok!(write!(f, " (at line {}, column {})", line, self.column)),
        }
        if f.alternate() {
            if let Some(source) = self.template_source() {
                ok!(writeln!(f));
                ok!(writeln!(f, "{:-^1$}", " Template Source ", 74));
                let lines: Vec<_> = source.lines().enumerate().collect();
                let idx = self.lineno.max(1) - 1;
                let skip = idx.saturating_sub(3);
                let pre = lines.iter().skip(skip).take(3.min(idx));
                let post = lines.iter().skip(idx + 1).take(3);
                for (idx, line) in pre {
                    ok!(writeln!(f, "{:>4} | {}", idx + 1, line));
                }
                if let Some((_, line)) = lines.get(idx) {
                    ok!(writeln!(f, "{:>4} > {}", idx + 1, line));
                    if self.column > 0 {
                        ok!(writeln!(f, "       {:>1$}", "^", self.column));
                    }
                }
                for (idx, line) in post {
                    ok!(writeln!(f, "{:>4} | {}", idx + 1, line));
                }
                ok!(write!(f, "{:-^1$}", "", 74));
            }
        }
        Ok(())
    }
}

impl Error {
    /// Creates a new error with kind and detail.
    pub fn new<D: Into<Cow<'static, str>>>(kind: ErrorKind, detail: D) -> Error {
        Error {
            detail: Some(detail.into()),
            ..Error::from(kind)
        }
    }

    /// Sets the line and column unless a location is already known.
    pub(crate) fn set_position(&mut self, lineno: usize, column: usize) {
        if self.lineno == 0 {
            self.lineno = lineno;
            self.column = column;
        }
    }

    /// Sets the template name unless one is already known.
    pub(crate) fn set_name(&mut self, name: &str) {
        if self.name.is_none() {
            self.name = Some(name.into());
        }
    }

    /// Attaches the template source for the alternative display.
    pub(crate) fn set_template_source(&mut self, source: &str) {
        if self.template_source.is_none() && self.lineno > 0 {
            self.template_source = Some(source.into());
        }
    }

    pub(crate) fn with_position(mut self, lineno: usize, column: usize) -> Self {
        self.set_position(lineno, column);
        self
    }

    /// Attaches another error as source to this error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error detail
    ///
    /// The detail is an error message that provides further details about
    /// the error kind.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the name of the template the error happened in.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the 1-indexed line.
    pub fn line(&self) -> Option<usize> {
        (self.lineno > 0).then_some(self.lineno)
    }

    /// Returns the 1-indexed column.
    pub fn column(&self) -> Option<usize> {
        (self.lineno > 0).then_some(self.column)
    }

    /// Returns the template source if it was attached.
    pub fn template_source(&self) -> Option<&str> {
        self.template_source.as_deref()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            detail: None,
            name: None,
            lineno: 0,
            column: 0,
            source: None,
            template_source: None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, "could not read template").with_source(err)
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Error::new(ErrorKind::BadSerialization, msg.to_string())
    }
}
