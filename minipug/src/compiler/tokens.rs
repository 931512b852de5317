use std::borrow::Cow;
use std::fmt;

/// Statement keywords.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Unless,
    Each,
    For,
    In,
    While,
    Case,
    When,
    Default,
    Mixin,
    Include,
    Extends,
    Block,
    Append,
    Prepend,
    Doctype,
}

impl Keyword {
    /// Looks up a keyword at the start of a statement.
    ///
    /// `in` is deliberately missing as it is only a keyword inside of an
    /// `each` header.
    pub fn from_statement_word(word: &str) -> Option<Keyword> {
        Some(match word {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "unless" => Keyword::Unless,
            "each" => Keyword::Each,
            "for" => Keyword::For,
            "while" => Keyword::While,
            "case" => Keyword::Case,
            "when" => Keyword::When,
            "default" => Keyword::Default,
            "mixin" => Keyword::Mixin,
            "include" => Keyword::Include,
            "extends" => Keyword::Extends,
            "block" => Keyword::Block,
            "append" => Keyword::Append,
            "prepend" => Keyword::Prepend,
            "doctype" => Keyword::Doctype,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Unless => "unless",
            Keyword::Each => "each",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::While => "while",
            Keyword::Case => "case",
            Keyword::When => "when",
            Keyword::Default => "default",
            Keyword::Mixin => "mixin",
            Keyword::Include => "include",
            Keyword::Extends => "extends",
            Keyword::Block => "block",
            Keyword::Append => "append",
            Keyword::Prepend => "prepend",
            Keyword::Doctype => "doctype",
        }
    }
}

/// The flavor of a code marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodeKind {
    /// `- code`
    Unbuffered,
    /// `= code`
    Buffered,
    /// `!= code`
    Unescaped,
}

/// Represents a token in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// A tag, mixin, attribute or binding name.
    Ident(&'a str),
    /// A statement keyword.
    Keyword(Keyword),
    /// A `.name` class shorthand.
    Class(&'a str),
    /// A `#name` id shorthand.
    Id(&'a str),
    /// A borrowed string.
    Str(&'a str),
    /// An allocated string (had escapes).
    String(String),
    /// A number literal, kept as written.
    Number(&'a str),
    /// `true` or `false` as attribute value.
    Bool(bool),
    /// A raw expression captured verbatim for the evaluator.
    Expr(&'a str),
    /// A run of literal text.
    Text(&'a str),
    /// `#{expr}` or `!{expr}`.
    Interpolation { expr: &'a str, unescaped: bool },
    /// `//` or `//-` comments.
    Comment {
        content: Cow<'a, str>,
        buffered: bool,
    },
    /// `-`, `=` or `!=` code marker.
    Code(CodeKind),
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `,`
    Comma,
    /// `:` for block expansion and include filters.
    Colon,
    /// `|` piped text.
    Pipe,
    /// `.` at the end of a tag opens a text block.
    Dot,
    /// `/` self-closing marker.
    Slash,
    /// `...` rest parameter.
    Ellipsis,
    /// `+` mixin call.
    Plus,
    /// `=` in attributes.
    Assign,
    /// `!=` in attributes.
    NotEqual,
    /// Indentation increased.
    Indent,
    /// Indentation decreased by one level.
    Outdent,
    /// End of a statement line.
    Newline,
    /// End of input, repeated forever.
    Eof,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(_) => f.write_str("identifier"),
            Token::Keyword(kw) => write!(f, "keyword `{}`", kw.as_str()),
            Token::Class(_) => f.write_str("class shorthand"),
            Token::Id(_) => f.write_str("id shorthand"),
            Token::Str(_) | Token::String(_) => f.write_str("string"),
            Token::Number(_) => f.write_str("number"),
            Token::Bool(_) => f.write_str("boolean"),
            Token::Expr(_) => f.write_str("expression"),
            Token::Text(_) => f.write_str("text"),
            Token::Interpolation { .. } => f.write_str("interpolation"),
            Token::Comment { .. } => f.write_str("comment"),
            Token::Code(_) => f.write_str("code"),
            Token::ParenOpen => f.write_str("`(`"),
            Token::ParenClose => f.write_str("`)`"),
            Token::Comma => f.write_str("`,`"),
            Token::Colon => f.write_str("`:`"),
            Token::Pipe => f.write_str("`|`"),
            Token::Dot => f.write_str("`.`"),
            Token::Slash => f.write_str("`/`"),
            Token::Ellipsis => f.write_str("`...`"),
            Token::Plus => f.write_str("`+`"),
            Token::Assign => f.write_str("`=`"),
            Token::NotEqual => f.write_str("`!=`"),
            Token::Indent => f.write_str("indent"),
            Token::Outdent => f.write_str("outdent"),
            Token::Newline => f.write_str("end of line"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// Token position information.
///
/// Lines and columns are 1-indexed, the offset is in bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub col: u32,
    pub offset: u32,
}

impl Default for Span {
    fn default() -> Span {
        Span {
            line: 1,
            col: 1,
            offset: 0,
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " @ {}:{}", self.line, self.col)
    }
}
