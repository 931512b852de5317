use std::char::decode_utf16;
use std::fmt;
use std::iter::once;
use std::str::Chars;

use crate::error::{Error, ErrorKind};

pub fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&x| x == needle)
}

/// Helper to HTML escape a string.
///
/// Escapes `&`, `<`, `>` and `"`.  The same set is used for text content
/// and for attribute values.
pub struct HtmlEscape<'a>(pub &'a str);

impl fmt::Display for HtmlEscape<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        let mut start = 0;

        for (i, b) in s.bytes().enumerate() {
            let replacement = match b {
                b'&' => "&amp;",
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'"' => "&quot;",
                _ => continue,
            };
            // all escaped bytes are ascii so slicing stays on char boundaries
            if start < i {
                ok!(f.write_str(&s[start..i]));
            }
            ok!(f.write_str(replacement));
            start = i + 1;
        }

        if start < s.len() {
            f.write_str(&s[start..])
        } else {
            Ok(())
        }
    }
}

struct Unescaper {
    out: String,
    pending_surrogate: u16,
}

impl Unescaper {
    fn unescape(mut self, s: &str) -> Result<String, Error> {
        let mut char_iter = s.chars();

        while let Some(c) = char_iter.next() {
            if c != '\\' {
                ok!(self.push_char(c));
                continue;
            }
            match char_iter.next() {
                None => return Err(ErrorKind::BadEscape.into()),
                Some('b') => ok!(self.push_char('\x08')),
                Some('f') => ok!(self.push_char('\x0C')),
                Some('n') => ok!(self.push_char('\n')),
                Some('r') => ok!(self.push_char('\r')),
                Some('t') => ok!(self.push_char('\t')),
                Some('v') => ok!(self.push_char('\x0B')),
                Some('0') => ok!(self.push_char('\0')),
                Some('x') => {
                    let val = ok!(parse_hex(&mut char_iter, 2));
                    ok!(self.push_u16(val));
                }
                Some('u') => {
                    let val = ok!(parse_hex(&mut char_iter, 4));
                    ok!(self.push_u16(val));
                }
                // line continuation
                Some('\n') => {}
                // any other escaped character stands for itself
                Some(d) => ok!(self.push_char(d)),
            }
        }

        if self.pending_surrogate != 0 {
            Err(ErrorKind::BadEscape.into())
        } else {
            Ok(self.out)
        }
    }

    fn push_u16(&mut self, c: u16) -> Result<(), Error> {
        match (self.pending_surrogate, (0xD800..=0xDFFF).contains(&c)) {
            (0, false) => match decode_utf16(once(c)).next() {
                Some(Ok(c)) => self.out.push(c),
                _ => return Err(ErrorKind::BadEscape.into()),
            },
            (_, false) => return Err(ErrorKind::BadEscape.into()),
            (0, true) => self.pending_surrogate = c,
            (prev, true) => match decode_utf16(once(prev).chain(once(c))).next() {
                Some(Ok(c)) => {
                    self.out.push(c);
                    self.pending_surrogate = 0;
                }
                _ => return Err(ErrorKind::BadEscape.into()),
            },
        }
        Ok(())
    }

    fn push_char(&mut self, c: char) -> Result<(), Error> {
        if self.pending_surrogate != 0 {
            Err(ErrorKind::BadEscape.into())
        } else {
            self.out.push(c);
            Ok(())
        }
    }
}

fn parse_hex(chars: &mut Chars, digits: usize) -> Result<u16, Error> {
    let hexnum = chars.take(digits).collect::<String>();
    if hexnum.len() != digits {
        return Err(ErrorKind::BadEscape.into());
    }
    u16::from_str_radix(&hexnum, 16).map_err(|_| ErrorKind::BadEscape.into())
}

/// Un-escape the body of a quoted string literal.
///
/// Follows the rules of JavaScript string literals: the usual control
/// escapes, `\xHH`, `\uHHHH` (surrogate pairs are joined), and any other
/// escaped character standing for itself.
pub fn unescape(s: &str) -> Result<String, Error> {
    Unescaper {
        out: String::with_capacity(s.len()),
        pending_surrogate: 0,
    }
    .unescape(s)
}

/// Finds the end of a quoted string starting at `bytes[0]`.
///
/// Returns the index of the closing quote.
pub fn find_string_end(bytes: &[u8]) -> Option<usize> {
    let delim = *some!(bytes.first());
    let mut escaped = false;
    for (idx, &c) in bytes.iter().enumerate().skip(1) {
        match (escaped, c) {
            (true, _) => escaped = false,
            (false, b'\\') => escaped = true,
            (false, c) if c == delim => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Finds the `}` closing a brace that was opened just before `s`.
///
/// Nested braces and quoted strings are skipped.
pub fn find_closing_brace(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0;
    while let Some(&c) = bytes.get(idx) {
        match c {
            b'"' | b'\'' | b'`' => {
                idx += some!(find_string_end(&bytes[idx..]));
            }
            b'{' => depth += 1,
            b'}' if depth == 0 => return Some(idx),
            b'}' => depth -= 1,
            _ => {}
        }
        idx += 1;
    }
    None
}
