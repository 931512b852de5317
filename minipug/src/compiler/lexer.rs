use std::borrow::Cow;
use std::collections::VecDeque;

use crate::compiler::tokens::{CodeKind, Keyword, Span, Token};
use crate::error::{Error, ErrorKind};
use crate::utils::{find_closing_brace, find_string_end, memchr, unescape};

/// Tokenizes indentation sensitive templates.
///
/// The tokenizer works a line at a time: at the start of every line the
/// indentation is compared against the indentation stack and the statement
/// on the line is lexed into a queue of pending tokens which are then
/// handed out one by one.  Attribute lists and argument lists may span
/// multiple lines, text blocks and comment blocks swallow all deeper
/// indented lines that follow them.
pub struct Tokenizer<'s> {
    rest: &'s str,
    current_line: u32,
    current_col: u32,
    current_offset: u32,
    indent_stack: Vec<usize>,
    pending: VecDeque<(Token<'s>, Span)>,
    finished: bool,
}

/// What happens after a statement was lexed.
enum LineEnd {
    /// The caller terminates the line.
    Open,
    /// The statement already emitted the line terminator.
    Closed,
    /// The line is terminated and followed by a text block.
    TextBlock,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ExprStop {
    /// Mixin call arguments: ends at a top level `,` or `)`.
    Argument,
    /// Attribute values: also ends at newlines and whitespace gaps.
    AttributeValue,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn is_shorthand_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'-'
}

/// Tag, mixin and block names may contain dashes.
fn lex_identifier(s: &str) -> usize {
    s.as_bytes()
        .iter()
        .enumerate()
        .take_while(|&(idx, &c)| {
            if idx == 0 {
                is_ident_start(c)
            } else {
                c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'-')
            }
        })
        .count()
}

/// Names that end up in the evaluator must be valid script identifiers.
fn lex_binding_name(s: &str) -> usize {
    s.as_bytes()
        .iter()
        .enumerate()
        .take_while(|&(idx, &c)| {
            if idx == 0 {
                is_ident_start(c)
            } else {
                c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$')
            }
        })
        .count()
}

fn lex_shorthand(s: &str) -> usize {
    s.as_bytes()
        .iter()
        .take_while(|&&c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-'))
        .count()
}

fn attribute_name_len(bytes: &[u8]) -> usize {
    let mut idx = 0;
    while let Some(&c) = bytes.get(idx) {
        match c {
            b' ' | b'\t' | b'\r' | b'\n' | b',' | b'(' | b')' | b'=' | b'"' | b'\'' => break,
            b'!' if bytes.get(idx + 1) == Some(&b'=') => break,
            _ => idx += 1,
        }
    }
    idx
}

fn line_len(s: &str) -> usize {
    memchr(s.as_bytes(), b'\n').unwrap_or(s.len())
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn is_word_end(s: &str) -> bool {
    matches!(
        s.as_bytes().first(),
        None | Some(b' ' | b'\t' | b'\r' | b'\n' | b':')
    )
}

fn number_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let sign = usize::from(bytes.first() == Some(&b'-'));
    let int_len = bytes[sign..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if int_len == 0 {
        return 0;
    }
    let mut len = sign + int_len;
    if bytes.get(len) == Some(&b'.') {
        let frac_len = bytes[len + 1..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if frac_len > 0 {
            len += 1 + frac_len;
        }
    }
    len
}

fn is_number_literal(s: &str) -> bool {
    !s.is_empty() && number_len(s) == s.len()
}

/// Does whitespace between `before` and `after` continue an expression?
fn continues_expression(before: &str, after: &str) -> bool {
    let prev = before.trim_end().bytes().last();
    let next = after.trim_start_matches([' ', '\t']).bytes().next();
    matches!(prev, Some(c) if b"+-*/%<>=!&|?:.".contains(&c))
        || matches!(next, Some(c) if b"+-*/%<>=&|?:.".contains(&c))
}

/// Finds the length of a raw expression.
///
/// Brackets and string literals are skipped as units.  Returns `None`
/// for an unterminated string literal.
fn scan_expr(s: &str, stop: ExprStop) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0;
    while let Some(&c) = bytes.get(idx) {
        match c {
            b'"' | b'\'' | b'`' => {
                idx += some!(find_string_end(&bytes[idx..])) + 1;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            b',' if depth == 0 => break,
            b'\n' | b'\r' if depth == 0 && stop == ExprStop::AttributeValue => break,
            b' ' | b'\t' if depth == 0 && stop == ExprStop::AttributeValue => {
                if !continues_expression(&s[..idx], &s[idx..]) {
                    break;
                }
            }
            _ => {}
        }
        idx += 1;
    }
    Some(idx)
}

impl<'s> Tokenizer<'s> {
    /// Creates a new tokenizer.
    pub fn new(input: &'s str) -> Tokenizer<'s> {
        let rest = input.strip_prefix('\u{feff}').unwrap_or(input);
        Tokenizer {
            rest,
            current_line: 1,
            current_col: 1,
            current_offset: (input.len() - rest.len()) as u32,
            indent_stack: vec![0],
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Produces the next token from the tokenizer.
    ///
    /// Once the input is exhausted [`Token::Eof`] is returned on every call.
    pub fn next_token(&mut self) -> Result<(Token<'s>, Span), Error> {
        loop {
            if let Some(rv) = self.pending.pop_front() {
                return Ok(rv);
            }
            if self.finished {
                return Ok((Token::Eof, self.span(self.loc())));
            }
            if let Err(err) = self.tokenize_line() {
                self.finished = true;
                self.pending.clear();
                return Err(err);
            }
        }
    }

    #[inline]
    fn rest_bytes(&self) -> &'s [u8] {
        self.rest.as_bytes()
    }

    fn advance(&mut self, bytes: usize) -> &'s str {
        let (skipped, new_rest) = self.rest.split_at(bytes);
        for c in skipped.chars() {
            match c {
                '\n' => {
                    self.current_line += 1;
                    self.current_col = 1;
                }
                _ => self.current_col += 1,
            }
        }
        self.current_offset += bytes as u32;
        self.rest = new_rest;
        skipped
    }

    #[inline]
    fn loc(&self) -> (u32, u32, u32) {
        (self.current_line, self.current_col, self.current_offset)
    }

    #[inline]
    fn span(&self, (line, col, offset): (u32, u32, u32)) -> Span {
        Span { line, col, offset }
    }

    #[inline]
    fn push(&mut self, token: Token<'s>, loc: (u32, u32, u32)) {
        let span = self.span(loc);
        self.pending.push_back((token, span));
    }

    fn error<D: Into<Cow<'static, str>>>(&self, kind: ErrorKind, detail: D) -> Error {
        Error::new(kind, detail)
            .with_position(self.current_line as usize, self.current_col as usize)
    }

    fn unexpected_character(&self) -> Error {
        match self.rest.chars().next() {
            Some(c) => self.error(
                ErrorKind::UnexpectedCharacter,
                format!("unexpected character {c:?}"),
            ),
            None => self.error(ErrorKind::UnexpectedCharacter, "unexpected end of input"),
        }
    }

    /// The remainder of the current line without the line terminator.
    fn line_rest(&self) -> &'s str {
        strip_cr(&self.rest[..line_len(self.rest)])
    }

    fn indent_top(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn skip_spaces(&mut self) {
        let skipped = self
            .rest_bytes()
            .iter()
            .take_while(|&&c| c == b' ' || c == b'\t')
            .count();
        self.advance(skipped);
    }

    fn skip_whitespace(&mut self) {
        let skipped = self
            .rest_bytes()
            .iter()
            .take_while(|c| c.is_ascii_whitespace())
            .count();
        self.advance(skipped);
    }

    fn eat_line_break(&mut self) {
        let len = line_len(self.rest);
        self.advance((len + 1).min(self.rest.len()));
    }

    fn tokenize_line(&mut self) -> Result<(), Error> {
        // blank lines never touch the indentation stack
        while !self.rest.is_empty() && self.line_rest().trim().is_empty() {
            self.eat_line_break();
        }
        if self.rest.is_empty() {
            let loc = self.loc();
            while self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                self.push(Token::Outdent, loc);
            }
            self.finished = true;
            return Ok(());
        }

        let indent = ok!(self.measure_indent());
        ok!(self.update_indentation(indent));
        self.advance(indent);

        match ok!(self.lex_statement()) {
            LineEnd::Open => self.finish_line(),
            LineEnd::Closed => Ok(()),
            LineEnd::TextBlock => {
                ok!(self.finish_line());
                self.lex_text_block()
            }
        }
    }

    fn measure_indent(&self) -> Result<usize, Error> {
        let bytes = self.rest_bytes();
        let spaces = bytes.iter().take_while(|&&c| c == b' ').count();
        if bytes.get(spaces) == Some(&b'\t') {
            return Err(Error::new(
                ErrorKind::InvalidIndentation,
                "tabs are not allowed in indentation",
            )
            .with_position(
                self.current_line as usize,
                self.current_col as usize + spaces,
            ));
        }
        Ok(spaces)
    }

    fn update_indentation(&mut self, indent: usize) -> Result<(), Error> {
        let loc = self.loc();
        if indent > self.indent_top() {
            self.indent_stack.push(indent);
            self.push(Token::Indent, loc);
            return Ok(());
        }
        while indent < self.indent_top() {
            self.indent_stack.pop();
            self.push(Token::Outdent, loc);
        }
        if indent != self.indent_top() {
            return Err(self.error(
                ErrorKind::InvalidIndentation,
                format!(
                    "unindent to {} spaces does not match any outer indentation level",
                    indent
                ),
            ));
        }
        Ok(())
    }

    fn finish_line(&mut self) -> Result<(), Error> {
        let tail = self.line_rest();
        if let Some(pos) = tail.bytes().position(|c| c != b' ' && c != b'\t') {
            self.advance(pos);
            return Err(self.unexpected_character());
        }
        self.advance(tail.len());
        let loc = self.loc();
        self.push(Token::Newline, loc);
        self.eat_line_break();
        Ok(())
    }

    /// Counts the deeper indented lines following the current position.
    ///
    /// Returns the number of lines (trailing blank lines excluded) and the
    /// smallest indentation among the non blank ones.
    fn scan_block(&self) -> (usize, usize) {
        let top = self.indent_top();
        let mut rest = self.rest;
        let mut lines = 0;
        let mut count = 0;
        let mut base = usize::MAX;
        while !rest.is_empty() {
            let len = line_len(rest);
            let line = strip_cr(&rest[..len]);
            rest = rest.get(len + 1..).unwrap_or("");
            lines += 1;
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.bytes().take_while(|&c| c == b' ').count();
            if indent <= top {
                break;
            }
            count = lines;
            base = base.min(indent);
        }
        if count == 0 {
            (0, 0)
        } else {
            (count, base)
        }
    }

    fn lex_statement(&mut self) -> Result<LineEnd, Error> {
        let loc = self.loc();
        let bytes = self.rest_bytes();
        match bytes.first().copied() {
            Some(b'|') => {
                self.advance(1);
                self.push(Token::Pipe, loc);
                if self.rest_bytes().first() == Some(&b' ') {
                    self.advance(1);
                }
                ok!(self.lex_text_to_eol());
                Ok(LineEnd::Open)
            }
            // literal html is passed through as piped text
            Some(b'<') => {
                self.push(Token::Pipe, loc);
                ok!(self.lex_text_to_eol());
                Ok(LineEnd::Open)
            }
            Some(b'/') if bytes.get(1) == Some(&b'/') => self.lex_comment(),
            Some(b'-') => self.lex_code(CodeKind::Unbuffered, 1),
            Some(b'=') => self.lex_code(CodeKind::Buffered, 1),
            Some(b'!') if bytes.get(1) == Some(&b'=') => self.lex_code(CodeKind::Unescaped, 2),
            Some(b'+') => {
                self.advance(1);
                self.push(Token::Plus, loc);
                let name_len = lex_identifier(self.rest);
                if name_len == 0 {
                    return Err(self.error(
                        ErrorKind::UnexpectedCharacter,
                        "expected mixin name after `+`",
                    ));
                }
                let name_loc = self.loc();
                let name = self.advance(name_len);
                self.push(Token::Ident(name), name_loc);
                self.lex_tag_tail(true)
            }
            Some(b'.' | b'#') if bytes.get(1).map_or(false, |&c| is_shorthand_start(c)) => {
                self.lex_tag_tail(false)
            }
            Some(c) if is_ident_start(c) => {
                let word_len = lex_identifier(self.rest);
                let keyword = Keyword::from_statement_word(&self.rest[..word_len])
                    .filter(|_| is_word_end(&self.rest[word_len..]));
                let word = self.advance(word_len);
                match keyword {
                    Some(kw) => {
                        self.push(Token::Keyword(kw), loc);
                        self.lex_keyword(kw)
                    }
                    None => {
                        self.push(Token::Ident(word), loc);
                        self.lex_tag_tail(false)
                    }
                }
            }
            Some(_) => Err(self.unexpected_character()),
            None => Ok(LineEnd::Open),
        }
    }

    fn lex_keyword(&mut self, kw: Keyword) -> Result<LineEnd, Error> {
        self.skip_spaces();
        match kw {
            Keyword::If | Keyword::Unless | Keyword::While | Keyword::Case => {
                self.lex_rest_as_expr();
            }
            Keyword::Else => {
                if self.rest.starts_with("if") && is_word_end(&self.rest[2..]) {
                    let loc = self.loc();
                    self.advance(2);
                    self.push(Token::Keyword(Keyword::If), loc);
                    self.skip_spaces();
                    self.lex_rest_as_expr();
                }
            }
            Keyword::Each | Keyword::For => return self.lex_each_header(),
            Keyword::When => return self.lex_when_values(),
            Keyword::Default => {
                if self.rest_bytes().first() == Some(&b':') {
                    return self.lex_block_expansion();
                }
            }
            Keyword::Mixin => return self.lex_mixin_signature(),
            Keyword::Include => {
                if self.rest_bytes().first() == Some(&b':') {
                    let loc = self.loc();
                    self.advance(1);
                    self.push(Token::Colon, loc);
                    let loc = self.loc();
                    let filter = self.advance(lex_identifier(self.rest));
                    self.push(Token::Ident(filter), loc);
                    self.skip_spaces();
                }
                self.lex_rest_as_path();
            }
            Keyword::Extends => self.lex_rest_as_path(),
            Keyword::Block => {
                for (word, kw) in [("append", Keyword::Append), ("prepend", Keyword::Prepend)] {
                    if self.rest.starts_with(word) && is_word_end(&self.rest[word.len()..]) {
                        let loc = self.loc();
                        self.advance(word.len());
                        self.push(Token::Keyword(kw), loc);
                        self.skip_spaces();
                        break;
                    }
                }
                self.lex_name();
            }
            Keyword::Append | Keyword::Prepend => self.lex_name(),
            Keyword::Doctype => {
                let value = self.line_rest().trim_end();
                if !value.is_empty() {
                    let loc = self.loc();
                    self.advance(value.len());
                    self.push(Token::Str(value), loc);
                }
            }
            Keyword::In => {}
        }
        Ok(LineEnd::Open)
    }

    fn lex_name(&mut self) {
        let len = lex_identifier(self.rest);
        if len > 0 {
            let loc = self.loc();
            let name = self.advance(len);
            self.push(Token::Ident(name), loc);
        }
    }

    fn lex_rest_as_expr(&mut self) {
        let expr = self.line_rest().trim_end();
        if !expr.is_empty() {
            let loc = self.loc();
            self.advance(expr.len());
            self.push(Token::Expr(expr), loc);
        }
    }

    fn lex_rest_as_path(&mut self) {
        let raw = self.line_rest().trim_end();
        if raw.is_empty() {
            return;
        }
        let loc = self.loc();
        self.advance(raw.len());
        let bytes = raw.as_bytes();
        let path = match (bytes.first(), bytes.last()) {
            (Some(b'"'), Some(b'"')) | (Some(b'\''), Some(b'\'')) if raw.len() >= 2 => {
                &raw[1..raw.len() - 1]
            }
            _ => raw,
        };
        self.push(Token::Str(path), loc);
    }

    fn lex_code(&mut self, kind: CodeKind, marker_len: usize) -> Result<LineEnd, Error> {
        let loc = self.loc();
        self.advance(marker_len);
        self.push(Token::Code(kind), loc);
        self.skip_spaces();
        self.lex_rest_as_expr();
        Ok(LineEnd::Open)
    }

    fn lex_comment(&mut self) -> Result<LineEnd, Error> {
        let loc = self.loc();
        self.advance(2);
        let buffered = if self.rest_bytes().first() == Some(&b'-') {
            self.advance(1);
            false
        } else {
            true
        };
        let first = self.line_rest();
        self.advance(first.len());
        let newline_loc = self.loc();
        self.eat_line_break();

        let (count, base) = self.scan_block();
        let content = if count == 0 {
            Cow::Borrowed(first)
        } else {
            let mut content = first.to_string();
            for _ in 0..count {
                let line = self.line_rest();
                content.push('\n');
                if !line.trim().is_empty() {
                    content.push_str(&line[base..]);
                }
                self.eat_line_break();
            }
            Cow::Owned(content)
        };
        self.push(Token::Comment { content, buffered }, loc);
        self.push(Token::Newline, newline_loc);
        Ok(LineEnd::Closed)
    }

    fn lex_text_block(&mut self) -> Result<(), Error> {
        let (count, base) = self.scan_block();
        if count == 0 {
            return Ok(());
        }
        let loc = self.loc();
        self.push(Token::Indent, loc);
        for _ in 0..count {
            let line = self.line_rest();
            if line.trim().is_empty() {
                self.advance(line.len());
            } else {
                self.advance(base);
                ok!(self.lex_text_to_eol());
            }
            let loc = self.loc();
            self.push(Token::Newline, loc);
            self.eat_line_break();
        }
        let loc = self.loc();
        self.push(Token::Outdent, loc);
        Ok(())
    }

    fn lex_each_header(&mut self) -> Result<LineEnd, Error> {
        ok!(self.eat_binding_name("expected loop variable name"));
        self.skip_spaces();
        if self.rest_bytes().first() == Some(&b',') {
            let loc = self.loc();
            self.advance(1);
            self.push(Token::Comma, loc);
            self.skip_spaces();
            ok!(self.eat_binding_name("expected index variable name"));
            self.skip_spaces();
        }
        if !(self.rest.starts_with("in") && is_word_end(&self.rest[2..])) {
            return Err(self.error(ErrorKind::ExpectedToken, "expected `in` in loop header"));
        }
        let loc = self.loc();
        self.advance(2);
        self.push(Token::Keyword(Keyword::In), loc);
        self.skip_spaces();
        self.lex_rest_as_expr();
        Ok(LineEnd::Open)
    }

    fn eat_binding_name(&mut self, expected: &'static str) -> Result<(), Error> {
        let len = lex_binding_name(self.rest);
        if len == 0 {
            return Err(self.error(ErrorKind::UnexpectedCharacter, expected));
        }
        let loc = self.loc();
        let name = self.advance(len);
        self.push(Token::Ident(name), loc);
        Ok(())
    }

    fn lex_when_values(&mut self) -> Result<LineEnd, Error> {
        loop {
            self.skip_spaces();
            let loc = self.loc();
            match self.rest_bytes().first().copied() {
                None | Some(b'\n' | b'\r') => return Ok(LineEnd::Open),
                Some(b',') => {
                    self.advance(1);
                    self.push(Token::Comma, loc);
                }
                Some(b':') => return self.lex_block_expansion(),
                Some(b'"' | b'\'') => {
                    let token = ok!(self.eat_string());
                    self.push(token, loc);
                }
                Some(c) if c.is_ascii_digit() || c == b'-' => {
                    let len = number_len(self.rest);
                    if len == 0 {
                        return Err(self.unexpected_character());
                    }
                    let num = self.advance(len);
                    self.push(Token::Number(num), loc);
                }
                Some(c) if is_ident_start(c) => {
                    let word = self.advance(lex_binding_name(self.rest));
                    let token = match word {
                        "true" => Token::Bool(true),
                        "false" => Token::Bool(false),
                        _ => Token::Ident(word),
                    };
                    self.push(token, loc);
                }
                Some(_) => return Err(self.unexpected_character()),
            }
        }
    }

    fn lex_mixin_signature(&mut self) -> Result<LineEnd, Error> {
        let len = lex_identifier(self.rest);
        if len == 0 {
            return Err(self.error(ErrorKind::UnexpectedCharacter, "expected mixin name"));
        }
        let loc = self.loc();
        let name = self.advance(len);
        self.push(Token::Ident(name), loc);
        if self.rest_bytes().first() != Some(&b'(') {
            return Ok(LineEnd::Open);
        }
        let loc = self.loc();
        self.advance(1);
        self.push(Token::ParenOpen, loc);
        loop {
            self.skip_spaces();
            let loc = self.loc();
            let bytes = self.rest_bytes();
            match bytes.first().copied() {
                None | Some(b'\n' | b'\r') => {
                    return Err(self.error(
                        ErrorKind::ExpectedToken,
                        "expected `)` to close mixin parameters",
                    ))
                }
                Some(b')') => {
                    self.advance(1);
                    self.push(Token::ParenClose, loc);
                    return Ok(LineEnd::Open);
                }
                Some(b',') => {
                    self.advance(1);
                    self.push(Token::Comma, loc);
                }
                Some(b'.') if bytes.starts_with(b"...") => {
                    self.advance(3);
                    self.push(Token::Ellipsis, loc);
                }
                Some(c) if is_ident_start(c) => {
                    let name = self.advance(lex_binding_name(self.rest));
                    self.push(Token::Ident(name), loc);
                }
                Some(_) => return Err(self.unexpected_character()),
            }
        }
    }

    fn lex_block_expansion(&mut self) -> Result<LineEnd, Error> {
        let loc = self.loc();
        self.advance(1);
        self.push(Token::Colon, loc);
        self.skip_spaces();
        if self.line_rest().trim().is_empty() {
            return Err(self.error(ErrorKind::ExpectedToken, "expected statement after `:`"));
        }
        self.lex_statement()
    }

    fn lex_tag_tail(&mut self, mixin_call: bool) -> Result<LineEnd, Error> {
        let mut args_allowed = mixin_call;
        loop {
            let loc = self.loc();
            let bytes = self.rest_bytes();
            match bytes.first().copied() {
                Some(c @ (b'.' | b'#')) if bytes.get(1).map_or(false, |&c| is_shorthand_start(c)) => {
                    self.advance(1);
                    let name = self.advance(lex_shorthand(self.rest));
                    self.push(
                        if c == b'.' {
                            Token::Class(name)
                        } else {
                            Token::Id(name)
                        },
                        loc,
                    );
                }
                Some(b'(') if args_allowed => ok!(self.lex_call_args()),
                Some(b'(') => ok!(self.lex_attributes()),
                _ => break,
            }
            args_allowed = false;
        }

        let loc = self.loc();
        let bytes = self.rest_bytes();
        match bytes.first().copied() {
            Some(b'/') => {
                self.advance(1);
                self.push(Token::Slash, loc);
                Ok(LineEnd::Open)
            }
            Some(b'.') => {
                self.advance(1);
                self.push(Token::Dot, loc);
                Ok(LineEnd::TextBlock)
            }
            Some(b'=') => self.lex_code(CodeKind::Buffered, 1),
            Some(b'!') if bytes.get(1) == Some(&b'=') => self.lex_code(CodeKind::Unescaped, 2),
            Some(b':') if matches!(bytes.get(1), Some(b' ' | b'\t')) => self.lex_block_expansion(),
            Some(b' ' | b'\t') => {
                self.advance(1);
                if !self.line_rest().trim().is_empty() {
                    ok!(self.lex_text_to_eol());
                }
                Ok(LineEnd::Open)
            }
            _ => Ok(LineEnd::Open),
        }
    }

    fn lex_call_args(&mut self) -> Result<(), Error> {
        let loc = self.loc();
        self.advance(1);
        self.push(Token::ParenOpen, loc);
        loop {
            self.skip_whitespace();
            let loc = self.loc();
            match self.rest_bytes().first().copied() {
                None => {
                    return Err(self.error(
                        ErrorKind::ExpectedToken,
                        "expected `)` to close argument list",
                    ))
                }
                Some(b')') => {
                    self.advance(1);
                    self.push(Token::ParenClose, loc);
                    return Ok(());
                }
                Some(b',') => {
                    self.advance(1);
                    self.push(Token::Comma, loc);
                }
                Some(_) => {
                    let len = match scan_expr(self.rest, ExprStop::Argument) {
                        Some(0) => return Err(self.unexpected_character()),
                        Some(len) => len,
                        None => {
                            return Err(
                                self.error(ErrorKind::UnterminatedString, "unterminated string")
                            )
                        }
                    };
                    let expr = self.advance(len);
                    self.push(Token::Expr(expr.trim_end()), loc);
                }
            }
        }
    }

    fn lex_attributes(&mut self) -> Result<(), Error> {
        let loc = self.loc();
        self.advance(1);
        self.push(Token::ParenOpen, loc);
        loop {
            self.skip_whitespace();
            let loc = self.loc();
            let bytes = self.rest_bytes();
            match bytes.first().copied() {
                None => {
                    return Err(self.error(
                        ErrorKind::ExpectedToken,
                        "expected `)` to close attribute list",
                    ))
                }
                Some(b')') => {
                    self.advance(1);
                    self.push(Token::ParenClose, loc);
                    return Ok(());
                }
                Some(b',') => {
                    self.advance(1);
                    self.push(Token::Comma, loc);
                    continue;
                }
                Some(b'"' | b'\'') => {
                    let end = match find_string_end(bytes) {
                        Some(end) => end,
                        None => {
                            return Err(
                                self.error(ErrorKind::UnterminatedString, "unterminated string")
                            )
                        }
                    };
                    let quoted = self.advance(end + 1);
                    self.push(Token::Ident(&quoted[1..end]), loc);
                }
                Some(_) => {
                    let len = attribute_name_len(bytes);
                    if len == 0 {
                        return Err(self.unexpected_character());
                    }
                    let name = self.advance(len);
                    self.push(Token::Ident(name), loc);
                }
            }

            self.skip_spaces();
            let loc = self.loc();
            let bytes = self.rest_bytes();
            if bytes.starts_with(b"!=") {
                self.advance(2);
                self.push(Token::NotEqual, loc);
            } else if bytes.first() == Some(&b'=') {
                self.advance(1);
                self.push(Token::Assign, loc);
            } else {
                continue;
            }
            self.skip_spaces();
            ok!(self.lex_attribute_value());
        }
    }

    fn lex_attribute_value(&mut self) -> Result<(), Error> {
        let loc = self.loc();
        let len = match scan_expr(self.rest, ExprStop::AttributeValue) {
            Some(0) => return Err(self.error(ErrorKind::ExpectedToken, "expected attribute value")),
            Some(len) => len,
            None => return Err(self.error(ErrorKind::UnterminatedString, "unterminated string")),
        };
        let value = self.advance(len).trim_end();
        let bytes = value.as_bytes();
        let token = match bytes[0] {
            b'"' | b'\'' if find_string_end(bytes) == Some(bytes.len() - 1) => {
                let inner = &value[1..value.len() - 1];
                if inner.contains('\\') {
                    Token::String(ok!(unescape(inner).map_err(|err| {
                        err.with_position(loc.0 as usize, loc.1 as usize)
                    })))
                } else {
                    Token::Str(inner)
                }
            }
            _ if is_number_literal(value) => Token::Number(value),
            _ if value == "true" => Token::Bool(true),
            _ if value == "false" => Token::Bool(false),
            _ => Token::Expr(value),
        };
        self.push(token, loc);
        Ok(())
    }

    fn eat_string(&mut self) -> Result<Token<'s>, Error> {
        let loc = self.loc();
        let end = match find_string_end(self.rest_bytes()) {
            Some(end) => end,
            None => return Err(self.error(ErrorKind::UnterminatedString, "unterminated string")),
        };
        let s = self.advance(end + 1);
        let inner = &s[1..end];
        if inner.contains('\\') {
            unescape(inner)
                .map(Token::String)
                .map_err(|err| err.with_position(loc.0 as usize, loc.1 as usize))
        } else {
            Ok(Token::Str(inner))
        }
    }

    fn emit_text(&mut self, text: &'s str) {
        if !text.is_empty() {
            let loc = self.loc();
            self.advance(text.len());
            self.push(Token::Text(text), loc);
        }
    }

    /// Splits the rest of the line into text and interpolation tokens.
    fn lex_text_to_eol(&mut self) -> Result<(), Error> {
        let line = self.line_rest();
        let bytes = line.as_bytes();
        let mut start = 0;
        let mut idx = 0;
        while let Some(&c) = bytes.get(idx) {
            match c {
                b'\\' if matches!(bytes.get(idx + 1), Some(b'#' | b'!'))
                    && bytes.get(idx + 2) == Some(&b'{') =>
                {
                    self.emit_text(&line[start..idx]);
                    self.advance(1);
                    start = idx + 1;
                    idx += 3;
                }
                b'#' | b'!' if bytes.get(idx + 1) == Some(&b'{') => {
                    self.emit_text(&line[start..idx]);
                    let close = match find_closing_brace(&line[idx + 2..]) {
                        Some(offset) => idx + 2 + offset,
                        None => {
                            return Err(self.error(
                                ErrorKind::UnterminatedInterpolation,
                                "missing `}` to close interpolation",
                            ))
                        }
                    };
                    let loc = self.loc();
                    self.advance(close + 1 - idx);
                    self.push(
                        Token::Interpolation {
                            expr: line[idx + 2..close].trim(),
                            unescaped: c == b'!',
                        },
                        loc,
                    );
                    idx = close + 1;
                    start = idx;
                }
                _ => idx += 1,
            }
        }
        self.emit_text(&line[start..]);
        Ok(())
    }
}

/// Utility function to quickly tokenize into an iterator.
///
/// The iterator ends after the first [`Token::Eof`] or error.
pub fn tokenize(input: &str) -> impl Iterator<Item = Result<(Token<'_>, Span), Error>> {
    let mut tokenizer = Tokenizer::new(input);
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let rv = tokenizer.next_token();
        done = matches!(rv, Ok((Token::Eof, _)) | Err(_));
        Some(rv)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        tokenize(input)
            .map(|x| x.map(|(tok, _)| tok))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn lex_error(input: &str) -> Error {
        tokenize(input)
            .find_map(|x| x.err())
            .expect("expected a lexer error")
    }

    #[test]
    fn test_nested_tags() {
        assert_eq!(
            tokens("div\n  p Hello\nspan"),
            vec![
                Token::Ident("div"),
                Token::Newline,
                Token::Indent,
                Token::Ident("p"),
                Token::Text("Hello"),
                Token::Newline,
                Token::Outdent,
                Token::Ident("span"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_eof_is_repeated() {
        let mut tokenizer = Tokenizer::new("p");
        let mut last = None;
        for _ in 0..5 {
            last = Some(tokenizer.next_token().unwrap().0);
        }
        assert_eq!(last, Some(Token::Eof));
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        assert_eq!(
            tokens("ul\r\n\r\n    \r\n  li a\r\n"),
            vec![
                Token::Ident("ul"),
                Token::Newline,
                Token::Indent,
                Token::Ident("li"),
                Token::Text("a"),
                Token::Newline,
                Token::Outdent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_indentation_errors() {
        let err = lex_error("div\n\tp");
        assert_eq!(err.kind(), ErrorKind::InvalidIndentation);
        assert_eq!(err.line(), Some(2));

        let err = lex_error("div\n    p\n  span");
        assert_eq!(err.kind(), ErrorKind::InvalidIndentation);
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_shorthands_and_attributes() {
        assert_eq!(
            tokens("a.btn#main(href=\"/x\", title='a\\'b' data-n=42 checked on=true v=user.name)"),
            vec![
                Token::Ident("a"),
                Token::Class("btn"),
                Token::Id("main"),
                Token::ParenOpen,
                Token::Ident("href"),
                Token::Assign,
                Token::Str("/x"),
                Token::Comma,
                Token::Ident("title"),
                Token::Assign,
                Token::String("a'b".into()),
                Token::Ident("data-n"),
                Token::Assign,
                Token::Number("42"),
                Token::Ident("checked"),
                Token::Ident("on"),
                Token::Assign,
                Token::Bool(true),
                Token::Ident("v"),
                Token::Assign,
                Token::Expr("user.name"),
                Token::ParenClose,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_attribute_expressions() {
        assert_eq!(
            tokens("a(href=base + '/' + (page || 'index') class=x ? 'a' : 'b' title!=raw)"),
            vec![
                Token::Ident("a"),
                Token::ParenOpen,
                Token::Ident("href"),
                Token::Assign,
                Token::Expr("base + '/' + (page || 'index')"),
                Token::Ident("class"),
                Token::Assign,
                Token::Expr("x ? 'a' : 'b'"),
                Token::Ident("title"),
                Token::NotEqual,
                Token::Expr("raw"),
                Token::ParenClose,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_multiline_attributes() {
        let toks = tokens("input(\n  type=\"text\"\n  name=\"q\"\n)\np");
        assert_eq!(toks.iter().filter(|x| **x == Token::Assign).count(), 2);
        assert!(!toks.contains(&Token::Indent));
        assert_eq!(toks[toks.len() - 3], Token::Ident("p"));
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(
            tokens("p Hi #{user.name}, !{html} \\#{not} #{ {a: 1}['a'] }"),
            vec![
                Token::Ident("p"),
                Token::Text("Hi "),
                Token::Interpolation {
                    expr: "user.name",
                    unescaped: false
                },
                Token::Text(", "),
                Token::Interpolation {
                    expr: "html",
                    unescaped: true
                },
                Token::Text(" "),
                Token::Text("#{not} "),
                Token::Interpolation {
                    expr: "{a: 1}['a']",
                    unescaped: false
                },
                Token::Newline,
                Token::Eof,
            ]
        );
        let err = lex_error("p #{oops");
        assert_eq!(err.kind(), ErrorKind::UnterminatedInterpolation);
    }

    #[test]
    fn test_code_and_pipes() {
        assert_eq!(
            tokens("- var x = 1\np= x\np!= y\n| text"),
            vec![
                Token::Code(CodeKind::Unbuffered),
                Token::Expr("var x = 1"),
                Token::Newline,
                Token::Ident("p"),
                Token::Code(CodeKind::Buffered),
                Token::Expr("x"),
                Token::Newline,
                Token::Ident("p"),
                Token::Code(CodeKind::Unescaped),
                Token::Expr("y"),
                Token::Newline,
                Token::Pipe,
                Token::Text("text"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            tokens("each item, i in items\nelse if a > 1\nwhen 'a', 2: p x"),
            vec![
                Token::Keyword(Keyword::Each),
                Token::Ident("item"),
                Token::Comma,
                Token::Ident("i"),
                Token::Keyword(Keyword::In),
                Token::Expr("items"),
                Token::Newline,
                Token::Keyword(Keyword::Else),
                Token::Keyword(Keyword::If),
                Token::Expr("a > 1"),
                Token::Newline,
                Token::Keyword(Keyword::When),
                Token::Str("a"),
                Token::Comma,
                Token::Number("2"),
                Token::Colon,
                Token::Ident("p"),
                Token::Text("x"),
                Token::Newline,
                Token::Eof,
            ]
        );
        // keywords only apply at the start of a statement
        assert_eq!(
            tokens("a if")[..2].to_vec(),
            vec![Token::Ident("a"), Token::Text("if")]
        );
    }

    #[test]
    fn test_mixins_and_blocks() {
        assert_eq!(
            tokens("mixin card(title, ...rest)\n+card('x', 1)(class=\"c\")\nblock append scripts"),
            vec![
                Token::Keyword(Keyword::Mixin),
                Token::Ident("card"),
                Token::ParenOpen,
                Token::Ident("title"),
                Token::Comma,
                Token::Ellipsis,
                Token::Ident("rest"),
                Token::ParenClose,
                Token::Newline,
                Token::Plus,
                Token::Ident("card"),
                Token::ParenOpen,
                Token::Expr("'x'"),
                Token::Comma,
                Token::Expr("1"),
                Token::ParenClose,
                Token::ParenOpen,
                Token::Ident("class"),
                Token::Assign,
                Token::Str("c"),
                Token::ParenClose,
                Token::Newline,
                Token::Keyword(Keyword::Block),
                Token::Keyword(Keyword::Append),
                Token::Ident("scripts"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_text_block() {
        assert_eq!(
            tokens("script.\n  if (a) {\n    b()\n  }\np"),
            vec![
                Token::Ident("script"),
                Token::Dot,
                Token::Newline,
                Token::Indent,
                Token::Text("if (a) {"),
                Token::Newline,
                Token::Text("  b()"),
                Token::Newline,
                Token::Text("}"),
                Token::Newline,
                Token::Outdent,
                Token::Ident("p"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comment_block() {
        assert_eq!(
            tokens("// first\n  second\n//- hidden\np"),
            vec![
                Token::Comment {
                    content: Cow::Borrowed(" first\nsecond"),
                    buffered: true
                },
                Token::Newline,
                Token::Comment {
                    content: Cow::Borrowed(" hidden"),
                    buffered: false
                },
                Token::Newline,
                Token::Ident("p"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_include_and_doctype() {
        assert_eq!(
            tokens("doctype html\ninclude:markdown \"docs/intro.md\"\nextends layout"),
            vec![
                Token::Keyword(Keyword::Doctype),
                Token::Str("html"),
                Token::Newline,
                Token::Keyword(Keyword::Include),
                Token::Colon,
                Token::Ident("markdown"),
                Token::Str("docs/intro.md"),
                Token::Newline,
                Token::Keyword(Keyword::Extends),
                Token::Str("layout"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_spans() {
        let spans = tokenize("div\n  p.lead Hi")
            .map(|x| x.unwrap())
            .map(|(tok, span)| (tok, span.line, span.col))
            .collect::<Vec<_>>();
        assert_eq!(spans[3], (Token::Ident("p"), 2, 3));
        assert_eq!(spans[4], (Token::Class("lead"), 2, 4));
        assert_eq!(spans[5], (Token::Text("Hi"), 2, 10));
    }

    #[test]
    fn test_unexpected_characters() {
        assert_eq!(lex_error("p(\n").kind(), ErrorKind::ExpectedToken);
        assert_eq!(lex_error("%p").kind(), ErrorKind::UnexpectedCharacter);
        assert_eq!(lex_error("a(href=\"x)").kind(), ErrorKind::UnterminatedString);
        assert_eq!(lex_error("img/ junk").kind(), ErrorKind::UnexpectedCharacter);
    }
}
