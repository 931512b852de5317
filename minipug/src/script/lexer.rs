use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, ErrorKind};
use crate::utils::{find_string_end, unescape};

/// Represents a token in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// An identifier or keyword.
    Ident(&'a str),
    /// A number literal.
    Number(f64),
    /// A string literal with escapes resolved.
    Str(Cow<'a, str>),
    /// The raw body of a template literal.
    Template(&'a str),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `!`
    Bang,
    /// `=`
    Assign,
    /// `+=`
    PlusAssign,
    /// `-=`
    MinusAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
    /// `++`
    Increment,
    /// `--`
    Decrement,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Nullish,
    /// `?`
    Question,
    /// `?.`
    OptionalChain,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `;`
    Semicolon,
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `[`
    BracketOpen,
    /// `]`
    BracketClose,
    /// `{`
    BraceOpen,
    /// `}`
    BraceClose,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "`{name}`"),
            Token::Number(_) => f.write_str("number"),
            Token::Str(_) => f.write_str("string"),
            Token::Template(_) => f.write_str("template literal"),
            other => {
                let op = match other {
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Mul => "*",
                    Token::Div => "/",
                    Token::Mod => "%",
                    Token::Bang => "!",
                    Token::Assign => "=",
                    Token::PlusAssign => "+=",
                    Token::MinusAssign => "-=",
                    Token::MulAssign => "*=",
                    Token::DivAssign => "/=",
                    Token::Increment => "++",
                    Token::Decrement => "--",
                    Token::Eq => "==",
                    Token::Ne => "!=",
                    Token::StrictEq => "===",
                    Token::StrictNe => "!==",
                    Token::Lt => "<",
                    Token::Lte => "<=",
                    Token::Gt => ">",
                    Token::Gte => ">=",
                    Token::And => "&&",
                    Token::Or => "||",
                    Token::Nullish => "??",
                    Token::Question => "?",
                    Token::OptionalChain => "?.",
                    Token::Colon => ":",
                    Token::Comma => ",",
                    Token::Dot => ".",
                    Token::Semicolon => ";",
                    Token::ParenOpen => "(",
                    Token::ParenClose => ")",
                    Token::BracketOpen => "[",
                    Token::BracketClose => "]",
                    Token::BraceOpen => "{",
                    Token::BraceClose => "}",
                    _ => unreachable!(),
                };
                write!(f, "`{op}`")
            }
        }
    }
}

fn syntax_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::EvalSyntax, msg)
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

fn lex_identifier(s: &str) -> usize {
    s.char_indices()
        .find(|&(idx, c)| {
            if idx == 0 {
                !is_ident_start(c)
            } else {
                !is_ident_continue(c)
            }
        })
        .map_or(s.len(), |(idx, _)| idx)
}

fn lex_number(s: &str) -> Result<(usize, f64), Error> {
    let bytes = s.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B') {
        let radix = match bytes[1] {
            b'x' | b'X' => 16,
            b'o' | b'O' => 8,
            _ => 2,
        };
        let len = 2 + bytes[2..]
            .iter()
            .take_while(|c| (**c as char).is_digit(radix))
            .count();
        return match u64::from_str_radix(&s[2..len], radix) {
            Ok(val) => Ok((len, val as f64)),
            Err(_) => Err(syntax_error("invalid number literal")),
        };
    }

    let mut len = bytes.iter().take_while(|c| c.is_ascii_digit()).count();
    if bytes.get(len) == Some(&b'.') {
        len += 1;
        len += bytes[len..].iter().take_while(|c| c.is_ascii_digit()).count();
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let digits = bytes[exp..].iter().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            len = exp + digits;
        }
    }
    if bytes.get(len).map_or(false, |&c| is_ident_start(c as char)) {
        return Err(syntax_error("identifier directly after number"));
    }
    match s[..len].parse() {
        Ok(val) => Ok((len, val)),
        Err(_) => Err(syntax_error("invalid number literal")),
    }
}

/// Finds the closing backtick of a template literal starting at `bytes[0]`.
fn find_template_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut idx = 1;
    while let Some(&c) = bytes.get(idx) {
        match c {
            b'\\' => idx += 1,
            b'`' => return Some(idx),
            b'$' if bytes.get(idx + 1) == Some(&b'{') => {
                idx += 2 + some!(crate::utils::find_closing_brace(&s[idx + 2..]));
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Splits an expression into tokens.
///
/// Each token is returned together with its byte offset.
pub fn tokenize(source: &str) -> Result<Vec<(Token<'_>, usize)>, Error> {
    let mut tokens = Vec::new();
    let mut rest = source;

    macro_rules! op {
        ($len:expr, $tok:expr) => {{
            tokens.push(($tok, source.len() - rest.len()));
            rest = &rest[$len..];
            continue;
        }};
    }

    loop {
        rest = rest.trim_start();
        let offset = source.len() - rest.len();
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };
        let bytes = rest.as_bytes();
        let next = bytes.get(1).copied();
        let next2 = bytes.get(2).copied();

        match (bytes[0], next, next2) {
            (b'=', Some(b'='), Some(b'=')) => op!(3, Token::StrictEq),
            (b'!', Some(b'='), Some(b'=')) => op!(3, Token::StrictNe),
            (b'=', Some(b'='), _) => op!(2, Token::Eq),
            (b'!', Some(b'='), _) => op!(2, Token::Ne),
            (b'<', Some(b'='), _) => op!(2, Token::Lte),
            (b'>', Some(b'='), _) => op!(2, Token::Gte),
            (b'&', Some(b'&'), _) => op!(2, Token::And),
            (b'|', Some(b'|'), _) => op!(2, Token::Or),
            (b'?', Some(b'?'), _) => op!(2, Token::Nullish),
            (b'?', Some(b'.'), d) if !d.map_or(false, |d| d.is_ascii_digit()) => {
                op!(2, Token::OptionalChain)
            }
            (b'+', Some(b'+'), _) => op!(2, Token::Increment),
            (b'-', Some(b'-'), _) => op!(2, Token::Decrement),
            (b'+', Some(b'='), _) => op!(2, Token::PlusAssign),
            (b'-', Some(b'='), _) => op!(2, Token::MinusAssign),
            (b'*', Some(b'='), _) => op!(2, Token::MulAssign),
            (b'/', Some(b'='), _) => op!(2, Token::DivAssign),
            (b'+', ..) => op!(1, Token::Plus),
            (b'-', ..) => op!(1, Token::Minus),
            (b'*', ..) => op!(1, Token::Mul),
            (b'/', ..) => op!(1, Token::Div),
            (b'%', ..) => op!(1, Token::Mod),
            (b'!', ..) => op!(1, Token::Bang),
            (b'=', ..) => op!(1, Token::Assign),
            (b'<', ..) => op!(1, Token::Lt),
            (b'>', ..) => op!(1, Token::Gt),
            (b'?', ..) => op!(1, Token::Question),
            (b':', ..) => op!(1, Token::Colon),
            (b',', ..) => op!(1, Token::Comma),
            (b';', ..) => op!(1, Token::Semicolon),
            (b'(', ..) => op!(1, Token::ParenOpen),
            (b')', ..) => op!(1, Token::ParenClose),
            (b'[', ..) => op!(1, Token::BracketOpen),
            (b']', ..) => op!(1, Token::BracketClose),
            (b'{', ..) => op!(1, Token::BraceOpen),
            (b'}', ..) => op!(1, Token::BraceClose),
            (b'.', Some(d), _) if d.is_ascii_digit() => {}
            (b'.', ..) => op!(1, Token::Dot),
            (b'"' | b'\'', ..) => {
                let end = match find_string_end(bytes) {
                    Some(end) => end,
                    None => return Err(syntax_error("unterminated string literal")),
                };
                let body = &rest[1..end];
                let value = if body.contains('\\') {
                    Cow::Owned(ok!(unescape(body).map_err(|_| {
                        syntax_error("invalid escape sequence in string literal")
                    })))
                } else {
                    Cow::Borrowed(body)
                };
                op!(end + 1, Token::Str(value));
            }
            (b'`', ..) => {
                let end = match find_template_end(rest) {
                    Some(end) => end,
                    None => return Err(syntax_error("unterminated template literal")),
                };
                op!(end + 1, Token::Template(&rest[1..end]));
            }
            _ => {}
        }

        if c.is_ascii_digit() || c == '.' {
            let (len, value) = ok!(lex_number(rest));
            tokens.push((Token::Number(value), offset));
            rest = &rest[len..];
        } else if is_ident_start(c) {
            let len = lex_identifier(rest);
            tokens.push((Token::Ident(&rest[..len]), offset));
            rest = &rest[len..];
        } else {
            return Err(syntax_error(format!("unexpected character `{c}`")));
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn kinds(source: &str) -> Vec<Token<'_>> {
        tokenize(source).unwrap().into_iter().map(|x| x.0).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a === b !== c ?? d?.e ?.5"),
            vec![
                Token::Ident("a"),
                Token::StrictEq,
                Token::Ident("b"),
                Token::StrictNe,
                Token::Ident("c"),
                Token::Nullish,
                Token::Ident("d"),
                Token::OptionalChain,
                Token::Ident("e"),
                Token::Question,
                Token::Number(0.5),
            ]
        );
        assert_eq!(
            kinds("i++ + --j"),
            vec![
                Token::Ident("i"),
                Token::Increment,
                Token::Plus,
                Token::Decrement,
                Token::Ident("j"),
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds(r#"1.5e3 0x10 'a\'b' "c" `x ${y + `z`} w`"#),
            vec![
                Token::Number(1500.0),
                Token::Number(16.0),
                Token::Str(Cow::Borrowed("a'b")),
                Token::Str(Cow::Borrowed("c")),
                Token::Template("x ${y + `z`} w"),
            ]
        );
        assert_eq!(kinds("$$each0")[0], Token::Ident("$$each0"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(tokenize("'abc").unwrap_err().kind(), ErrorKind::EvalSyntax);
        assert_eq!(tokenize("a # b").unwrap_err().kind(), ErrorKind::EvalSyntax);
        assert_eq!(tokenize("3px").unwrap_err().kind(), ErrorKind::EvalSyntax);
    }
}
