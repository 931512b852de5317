use std::borrow::Cow;
use std::fmt;

use crate::compiler::ast::{self, Ast, AstBuilder, Attribute, BlockMode, NodeId, NodeKind};
use crate::compiler::lexer::Tokenizer;
use crate::compiler::tokens::{CodeKind, Keyword, Span, Token};
use crate::error::{Error, ErrorKind};

const MAX_RECURSION: usize = 150;

fn unexpected<D: fmt::Display>(unexpected: D, expected: &str, span: Span) -> Error {
    Error::new(
        ErrorKind::UnexpectedToken,
        format!("unexpected {unexpected}, expected {expected}"),
    )
    .with_position(span.line as usize, span.col as usize)
}

fn expected<D: fmt::Display>(found: D, expected: &str, span: Span) -> Error {
    Error::new(
        ErrorKind::ExpectedToken,
        format!("expected {expected}, found {found}"),
    )
    .with_position(span.line as usize, span.col as usize)
}

fn syntax_error(kind: ErrorKind, msg: Cow<'static, str>, span: Span) -> Error {
    Error::new(kind, msg).with_position(span.line as usize, span.col as usize)
}

macro_rules! syntax_error {
    ($kind:expr, $span:expr, $msg:expr) => {{
        return Err(syntax_error($kind, Cow::Borrowed($msg), $span));
    }};
    ($kind:expr, $span:expr, $msg:expr, $($tt:tt)*) => {{
        return Err(syntax_error($kind, Cow::Owned(format!($msg, $($tt)*)), $span));
    }};
}

macro_rules! expect_token {
    ($parser:expr, $match:pat, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            (token @ $match, span) => (token, span),
            (token, span) => return Err(expected(token, $expectation, span)),
        }
    }};
    ($parser:expr, $match:pat => $target:expr, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            ($match, span) => ($target, span),
            (token, span) => return Err(expected(token, $expectation, span)),
        }
    }};
}

macro_rules! matches_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(($match, _)) => true,
            _ => false,
        }
    };
}

macro_rules! skip_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(($match, _)) => {
                let _ = $p.stream.next();
                true
            }
            _ => false,
        }
    };
}

macro_rules! with_recursion_guard {
    ($parser:expr, $expr:expr) => {{
        $parser.depth += 1;
        if $parser.depth > MAX_RECURSION {
            syntax_error!(
                ErrorKind::RecursionLimitExceeded,
                $parser.stream.current_span(),
                "template exceeds maximum nesting depth"
            );
        }
        let rv = $expr;
        $parser.depth -= 1;
        rv
    }};
}

struct TokenStream<'a> {
    tokenizer: Tokenizer<'a>,
    current: Option<Result<(Token<'a>, Span), Error>>,
    last_span: Span,
}

impl<'a> TokenStream<'a> {
    /// Tokenize a template
    pub fn new(source: &'a str) -> TokenStream<'a> {
        let mut tokenizer = Tokenizer::new(source);
        let current = Some(tokenizer.next_token());
        TokenStream {
            tokenizer,
            current,
            last_span: Span::default(),
        }
    }

    /// Advance the stream.
    pub fn next(&mut self) -> Result<(Token<'a>, Span), Error> {
        let rv = self.current.take();
        self.current = Some(self.tokenizer.next_token());
        match rv {
            Some(Ok((token, span))) => {
                self.last_span = span;
                Ok((token, span))
            }
            Some(Err(err)) => Err(err),
            None => Err(Error::new(
                ErrorKind::UnexpectedToken,
                "token stream used after an error",
            )),
        }
    }

    /// Look at the current token
    pub fn current(&mut self) -> Result<(&Token<'a>, Span), Error> {
        match self.current {
            Some(Ok(ref tok)) => Ok((&tok.0, tok.1)),
            Some(Err(_)) => match self.current.take() {
                Some(Err(err)) => Err(err),
                _ => unreachable!(),
            },
            None => Err(Error::new(
                ErrorKind::UnexpectedToken,
                "token stream used after an error",
            )),
        }
    }

    /// Returns the current span.
    #[inline(always)]
    pub fn current_span(&self) -> Span {
        if let Some(Ok((_, span))) = self.current {
            span
        } else {
            self.last_span
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    stream: TokenStream<'a>,
    ast: AstBuilder,
    depth: usize,
}

fn token_string(token: &Token) -> Option<String> {
    match token {
        Token::Str(s) => Some(s.to_string()),
        Token::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Adds an attribute, merging literal classes and ids.
fn add_attribute(attributes: &mut Vec<Attribute>, attr: Attribute) {
    if !attr.is_expression && (attr.name == "class" || attr.name == "id") {
        let existing = attributes
            .iter_mut()
            .rev()
            .find(|x| x.name == attr.name)
            .filter(|x| !x.is_expression);
        if let (Some(existing), Some(value)) = (existing, attr.value.as_deref()) {
            match existing.value {
                Some(ref mut old) if attr.name == "class" => {
                    old.push(' ');
                    old.push_str(value);
                }
                _ => existing.value = Some(value.to_string()),
            }
            return;
        }
    }
    attributes.push(attr);
}

fn literal(name: &str, value: &str) -> Attribute {
    Attribute {
        name: name.into(),
        value: Some(value.into()),
        unescaped: false,
        is_expression: false,
    }
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Parser<'a> {
        Parser {
            source,
            stream: TokenStream::new(source),
            ast: AstBuilder::default(),
            depth: 0,
        }
    }

    /// Parses a template.
    pub fn parse(mut self) -> Result<Ast, Error> {
        match self.parse_document() {
            Ok(root) => Ok(self.ast.finish(root)),
            Err(err) => Err(self.attach_location_to_error(err)),
        }
    }

    fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.ast.push(kind, span)
    }

    fn parse_document(&mut self) -> Result<NodeId, Error> {
        ok!(self.skip_newlines());
        let mut doctype = None;
        if skip_token!(self, Token::Keyword(Keyword::Doctype)) {
            let (token, _) = ok!(self.stream.current());
            doctype = Some(match token_string(token) {
                Some(value) => {
                    ok!(self.stream.next());
                    value
                }
                None => "html".into(),
            });
            ok!(self.expect_line_end());
        }

        let mut children = Vec::new();
        loop {
            ok!(self.skip_newlines());
            if matches_token!(self, Token::Eof) {
                break;
            }
            children.push(ok!(self.parse_statement()));
        }
        Ok(self.push(
            NodeKind::Document(ast::Document { children, doctype }),
            Span::default(),
        ))
    }

    fn skip_newlines(&mut self) -> Result<(), Error> {
        while skip_token!(self, Token::Newline) {}
        Ok(())
    }

    fn expect_line_end(&mut self) -> Result<(), Error> {
        match ok!(self.stream.current()) {
            (Token::Newline, _) => {
                ok!(self.stream.next());
                Ok(())
            }
            (Token::Eof, _) => Ok(()),
            (token, span) => Err(unexpected(token, "end of line", span)),
        }
    }

    /// Parses an optional indented block of statements.
    fn parse_block(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut children = Vec::new();
        if !skip_token!(self, Token::Indent) {
            return Ok(children);
        }
        loop {
            ok!(self.skip_newlines());
            match ok!(self.stream.current()) {
                (Token::Outdent, _) => {
                    ok!(self.stream.next());
                    break;
                }
                (Token::Eof, _) => break,
                _ => children.push(ok!(self.parse_statement())),
            }
        }
        Ok(children)
    }

    fn parse_statement(&mut self) -> Result<NodeId, Error> {
        with_recursion_guard!(self, self.parse_statement_unprotected())
    }

    fn parse_statement_unprotected(&mut self) -> Result<NodeId, Error> {
        let (token, span) = ok!(self.stream.current());
        match token {
            Token::Ident(_) | Token::Class(_) | Token::Id(_) => self.parse_tag(),
            Token::Plus => self.parse_mixin_call(),
            Token::Pipe => self.parse_piped_text(),
            Token::Comment { .. } => self.parse_comment(),
            Token::Code(_) => self.parse_code(),
            Token::Keyword(Keyword::If | Keyword::Unless) => self.parse_conditional(),
            Token::Keyword(Keyword::Each | Keyword::For) => self.parse_each(),
            Token::Keyword(Keyword::While) => self.parse_while(),
            Token::Keyword(Keyword::Case) => self.parse_case(),
            Token::Keyword(Keyword::Mixin) => self.parse_mixin_def(),
            Token::Keyword(Keyword::Include) => self.parse_include(),
            Token::Keyword(Keyword::Extends) => self.parse_extends(),
            Token::Keyword(Keyword::Block | Keyword::Append | Keyword::Prepend) => {
                self.parse_named_block()
            }
            Token::Keyword(Keyword::Doctype) => syntax_error!(
                ErrorKind::DoctypeNotFirst,
                span,
                "doctype must be the first statement of a template"
            ),
            Token::Indent => syntax_error!(ErrorKind::UnexpectedToken, span, "unexpected indentation"),
            token => Err(unexpected(token, "statement", span)),
        }
    }

    fn parse_tag(&mut self) -> Result<NodeId, Error> {
        let span = self.stream.current_span();
        let name = match ok!(self.stream.current()) {
            (Token::Ident(name), _) => {
                let name = name.to_string();
                ok!(self.stream.next());
                name
            }
            _ => "div".to_string(),
        };
        let mut attributes = Vec::new();
        ok!(self.parse_tag_head(&mut attributes));

        let mut children = Vec::new();
        let mut self_closing = false;
        match ok!(self.stream.current()) {
            (Token::Slash, _) => {
                ok!(self.stream.next());
                self_closing = true;
                ok!(self.expect_line_end());
            }
            (Token::Dot, _) => {
                ok!(self.stream.next());
                ok!(self.expect_line_end());
                children = ok!(self.parse_text_block());
            }
            (Token::Code(_), _) => {
                children.push(ok!(self.parse_code()));
            }
            (Token::Colon, _) => {
                ok!(self.stream.next());
                children.push(ok!(self.parse_statement()));
            }
            _ => {
                children = ok!(self.parse_inline_text(false));
                ok!(self.expect_line_end());
            }
        }
        children.extend(ok!(self.parse_block()));

        Ok(self.push(
            NodeKind::Tag(ast::Tag {
                name,
                attributes,
                children,
                self_closing,
            }),
            span,
        ))
    }

    /// Parses class and id shorthands and attribute lists.
    fn parse_tag_head(&mut self, attributes: &mut Vec<Attribute>) -> Result<(), Error> {
        loop {
            match ok!(self.stream.current()) {
                (Token::Class(name), _) => {
                    let attr = literal("class", name);
                    ok!(self.stream.next());
                    add_attribute(attributes, attr);
                }
                (Token::Id(name), _) => {
                    let attr = literal("id", name);
                    ok!(self.stream.next());
                    add_attribute(attributes, attr);
                }
                (Token::ParenOpen, _) => {
                    ok!(self.stream.next());
                    ok!(self.parse_attributes(attributes));
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_attributes(&mut self, attributes: &mut Vec<Attribute>) -> Result<(), Error> {
        loop {
            let name = match ok!(self.stream.next()) {
                (Token::ParenClose, _) => return Ok(()),
                (Token::Comma, _) => continue,
                (Token::Ident(name), _) => name.to_string(),
                (token, span) => return Err(unexpected(token, "attribute name", span)),
            };
            let unescaped = match ok!(self.stream.current()) {
                (Token::Assign, _) => false,
                (Token::NotEqual, _) => true,
                _ => {
                    attributes.push(Attribute {
                        name,
                        value: None,
                        unescaped: false,
                        is_expression: false,
                    });
                    continue;
                }
            };
            ok!(self.stream.next());
            let (value, is_expression) = match ok!(self.stream.next()) {
                (Token::Str(s), _) => (s.to_string(), false),
                (Token::String(s), _) => (s, false),
                (Token::Number(n), _) => (n.to_string(), false),
                (Token::Bool(b), _) => (b.to_string(), true),
                (Token::Expr(e), _) => (e.to_string(), true),
                (token, span) => return Err(expected(token, "attribute value", span)),
            };
            add_attribute(
                attributes,
                Attribute {
                    name,
                    value: Some(value),
                    unescaped,
                    is_expression,
                },
            );
        }
    }

    fn flush_text(
        &mut self,
        nodes: &mut Vec<NodeId>,
        text: &mut Option<(String, Span)>,
        raw: bool,
    ) {
        if let Some((content, span)) = text.take() {
            nodes.push(self.push(NodeKind::Text(ast::Text { content, raw }), span));
        }
    }

    /// Parses text and interpolations up to the end of the line.
    fn parse_inline_text(&mut self, raw: bool) -> Result<Vec<NodeId>, Error> {
        let mut nodes = Vec::new();
        let mut text: Option<(String, Span)> = None;
        loop {
            match ok!(self.stream.current()) {
                (Token::Text(t), span) => {
                    match text {
                        Some((ref mut buf, _)) => buf.push_str(t),
                        None => text = Some((t.to_string(), span)),
                    }
                    ok!(self.stream.next());
                }
                (Token::Interpolation { expr, unescaped }, span) => {
                    let node = ast::Interpolation {
                        expr: expr.to_string(),
                        unescaped: *unescaped,
                    };
                    ok!(self.stream.next());
                    self.flush_text(&mut nodes, &mut text, raw);
                    nodes.push(self.push(NodeKind::Interpolation(node), span));
                }
                _ => break,
            }
        }
        self.flush_text(&mut nodes, &mut text, raw);
        Ok(nodes)
    }

    /// Parses the indented lines after `tag.`, lines are joined by newlines.
    fn parse_text_block(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut nodes = Vec::new();
        if !skip_token!(self, Token::Indent) {
            return Ok(nodes);
        }
        let mut text: Option<(String, Span)> = None;
        loop {
            match ok!(self.stream.current()) {
                (Token::Outdent, _) => {
                    ok!(self.stream.next());
                    break;
                }
                (Token::Eof, _) => break,
                (Token::Newline, span) => {
                    ok!(self.stream.next());
                    if !matches_token!(self, Token::Outdent | Token::Eof) {
                        match text {
                            Some((ref mut buf, _)) => buf.push('\n'),
                            None => text = Some(("\n".into(), span)),
                        }
                    }
                }
                (Token::Text(_) | Token::Interpolation { .. }, _) => {
                    for node in ok!(self.parse_inline_text(false)) {
                        match self.ast.kind(node) {
                            NodeKind::Text(t) => match text {
                                Some((ref mut buf, _)) => buf.push_str(&t.content),
                                None => text = Some((t.content.clone(), self.stream.last_span)),
                            },
                            _ => {
                                self.flush_text(&mut nodes, &mut text, false);
                                nodes.push(node);
                            }
                        }
                    }
                }
                (token, span) => return Err(unexpected(token, "text", span)),
            }
        }
        self.flush_text(&mut nodes, &mut text, false);
        Ok(nodes)
    }

    fn parse_piped_text(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Pipe, "`|`");
        let nodes = ok!(self.parse_inline_text(true));
        ok!(self.expect_line_end());
        if nodes.is_empty() {
            return Ok(self.push(
                NodeKind::Text(ast::Text {
                    content: String::new(),
                    raw: true,
                }),
                span,
            ));
        }
        if nodes.len() == 1 && matches!(self.ast.kind(nodes[0]), NodeKind::Text(_)) {
            return Ok(nodes[0]);
        }
        Ok(self.push(
            NodeKind::Tag(ast::Tag {
                name: String::new(),
                attributes: Vec::new(),
                children: nodes,
                self_closing: false,
            }),
            span,
        ))
    }

    fn parse_comment(&mut self) -> Result<NodeId, Error> {
        let (node, span) = expect_token!(
            self,
            Token::Comment { content, buffered } => ast::Comment {
                content: content.into_owned(),
                buffered,
            },
            "comment"
        );
        ok!(self.expect_line_end());
        Ok(self.push(NodeKind::Comment(node), span))
    }

    fn parse_code(&mut self) -> Result<NodeId, Error> {
        let (kind, span) = expect_token!(self, Token::Code(kind) => kind, "code");
        let (code, _) = expect_token!(self, Token::Expr(code) => code.to_string(), "expression");
        ok!(self.expect_line_end());
        Ok(self.push(
            NodeKind::Code(ast::Code {
                code,
                buffered: kind != CodeKind::Unbuffered,
                unescaped: kind == CodeKind::Unescaped,
            }),
            span,
        ))
    }

    fn parse_conditional(&mut self) -> Result<NodeId, Error> {
        let (kw, span) = expect_token!(
            self,
            Token::Keyword(kw @ (Keyword::If | Keyword::Unless)) => kw,
            "`if` or `unless`"
        );
        let (condition, _) =
            expect_token!(self, Token::Expr(e) => e.to_string(), "condition expression");
        ok!(self.expect_line_end());
        let then_branch = ok!(self.parse_block());
        let else_branch = if skip_token!(self, Token::Keyword(Keyword::Else)) {
            if matches_token!(self, Token::Keyword(Keyword::If)) {
                Some(vec![ok!(with_recursion_guard!(
                    self,
                    self.parse_conditional()
                ))])
            } else {
                ok!(self.expect_line_end());
                Some(ok!(self.parse_block()))
            }
        } else {
            None
        };
        Ok(self.push(
            NodeKind::Conditional(ast::Conditional {
                condition,
                then_branch,
                else_branch,
                unless: kw == Keyword::Unless,
            }),
            span,
        ))
    }

    fn parse_each(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(
            self,
            Token::Keyword(Keyword::Each | Keyword::For),
            "`each`"
        );
        let (item, _) = expect_token!(self, Token::Ident(name) => name.to_string(), "loop variable");
        let index = if skip_token!(self, Token::Comma) {
            Some(expect_token!(self, Token::Ident(name) => name.to_string(), "index variable").0)
        } else {
            None
        };
        expect_token!(self, Token::Keyword(Keyword::In), "`in`");
        let (iterable, _) =
            expect_token!(self, Token::Expr(e) => e.to_string(), "iterable expression");
        ok!(self.expect_line_end());
        let body = ok!(self.parse_block());
        let else_branch = if skip_token!(self, Token::Keyword(Keyword::Else)) {
            ok!(self.expect_line_end());
            Some(ok!(self.parse_block()))
        } else {
            None
        };
        Ok(self.push(
            NodeKind::Loop(ast::Loop {
                item,
                index,
                iterable,
                body,
                else_branch,
                is_while: false,
            }),
            span,
        ))
    }

    fn parse_while(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::While), "`while`");
        let (condition, _) =
            expect_token!(self, Token::Expr(e) => e.to_string(), "condition expression");
        ok!(self.expect_line_end());
        let body = ok!(self.parse_block());
        Ok(self.push(
            NodeKind::Loop(ast::Loop {
                item: String::new(),
                index: None,
                iterable: condition,
                body,
                else_branch: None,
                is_while: true,
            }),
            span,
        ))
    }

    fn parse_case(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::Case), "`case`");
        let (subject, _) = expect_token!(self, Token::Expr(e) => e.to_string(), "case expression");
        ok!(self.expect_line_end());

        let mut whens = Vec::new();
        let mut default = None;
        if skip_token!(self, Token::Indent) {
            loop {
                ok!(self.skip_newlines());
                match ok!(self.stream.current()) {
                    (Token::Outdent, _) => {
                        ok!(self.stream.next());
                        break;
                    }
                    (Token::Eof, _) => break,
                    (Token::Keyword(Keyword::When), _) => whens.push(ok!(self.parse_when())),
                    (Token::Keyword(Keyword::Default), span) => {
                        if default.is_some() {
                            syntax_error!(
                                ErrorKind::UnexpectedToken,
                                span,
                                "case has more than one default branch"
                            );
                        }
                        ok!(self.stream.next());
                        default = Some(ok!(self.parse_case_body()));
                    }
                    (token, span) => return Err(unexpected(token, "`when` or `default`", span)),
                }
            }
        }

        Ok(self.push(
            NodeKind::Case(ast::Case {
                subject,
                whens,
                default,
            }),
            span,
        ))
    }

    fn parse_when(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::When), "`when`");
        let mut values = Vec::new();
        loop {
            let value = match ok!(self.stream.current()) {
                (Token::Comma, _) => None,
                (Token::Str(s) | Token::Number(s) | Token::Ident(s), _) => Some(s.to_string()),
                (Token::String(s), _) => Some(s.clone()),
                (Token::Bool(b), _) => Some(b.to_string()),
                _ => break,
            };
            ok!(self.stream.next());
            values.extend(value);
        }
        if values.is_empty() {
            let (token, span) = ok!(self.stream.current());
            return Err(expected(token, "value after `when`", span));
        }
        let body = ok!(self.parse_case_body());
        Ok(self.push(NodeKind::When(ast::When { values, body }), span))
    }

    fn parse_case_body(&mut self) -> Result<Vec<NodeId>, Error> {
        if skip_token!(self, Token::Colon) {
            Ok(vec![ok!(self.parse_statement())])
        } else {
            ok!(self.expect_line_end());
            self.parse_block()
        }
    }

    fn parse_mixin_def(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::Mixin), "`mixin`");
        let (name, _) = expect_token!(self, Token::Ident(name) => name.to_string(), "mixin name");
        let mut params = Vec::new();
        let mut rest = None;
        if skip_token!(self, Token::ParenOpen) {
            loop {
                match ok!(self.stream.next()) {
                    (Token::ParenClose, _) => break,
                    (Token::Comma, _) => {}
                    (Token::Ident(param), span) => {
                        if rest.is_some() {
                            syntax_error!(
                                ErrorKind::UnexpectedToken,
                                span,
                                "rest parameter must be the last parameter"
                            );
                        }
                        params.push(param.to_string());
                    }
                    (Token::Ellipsis, span) => {
                        if rest.is_some() {
                            syntax_error!(
                                ErrorKind::UnexpectedToken,
                                span,
                                "mixin can only have one rest parameter"
                            );
                        }
                        rest = Some(
                            expect_token!(self, Token::Ident(name) => name.to_string(), "rest parameter name").0,
                        );
                    }
                    (token, span) => return Err(unexpected(token, "parameter", span)),
                }
            }
        }
        ok!(self.expect_line_end());
        let body = ok!(self.parse_block());
        Ok(self.push(
            NodeKind::MixinDef(ast::MixinDef {
                name,
                params,
                rest,
                body,
            }),
            span,
        ))
    }

    fn parse_mixin_call(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Plus, "`+`");
        let (name, _) = expect_token!(self, Token::Ident(name) => name.to_string(), "mixin name");
        let mut args = Vec::new();
        if skip_token!(self, Token::ParenOpen) {
            loop {
                match ok!(self.stream.next()) {
                    (Token::ParenClose, _) => break,
                    (Token::Comma, _) => {}
                    (Token::Expr(arg), _) => args.push(arg.to_string()),
                    (token, span) => return Err(unexpected(token, "argument", span)),
                }
            }
        }
        let mut attributes = Vec::new();
        ok!(self.parse_tag_head(&mut attributes));
        ok!(self.expect_line_end());
        let body = if matches_token!(self, Token::Indent) {
            Some(ok!(self.parse_block()))
        } else {
            None
        };
        Ok(self.push(
            NodeKind::MixinCall(ast::MixinCall {
                name,
                args,
                attributes,
                body,
            }),
            span,
        ))
    }

    fn parse_include(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::Include), "`include`");
        let filter = if skip_token!(self, Token::Colon) {
            Some(expect_token!(self, Token::Ident(name) => name.to_string(), "filter name").0)
        } else {
            None
        };
        let (path, _) = expect_token!(self, Token::Str(path) => path.to_string(), "include path");
        ok!(self.expect_line_end());
        Ok(self.push(NodeKind::Include(ast::Include { path, filter }), span))
    }

    fn parse_extends(&mut self) -> Result<NodeId, Error> {
        let (_, span) = expect_token!(self, Token::Keyword(Keyword::Extends), "`extends`");
        let (path, _) = expect_token!(self, Token::Str(path) => path.to_string(), "parent path");
        ok!(self.expect_line_end());
        Ok(self.push(NodeKind::Extends(ast::Extends { path }), span))
    }

    fn parse_named_block(&mut self) -> Result<NodeId, Error> {
        let (kw, span) = expect_token!(self, Token::Keyword(kw) => kw, "`block`");
        let mode = if kw == Keyword::Append || skip_token!(self, Token::Keyword(Keyword::Append)) {
            BlockMode::Append
        } else if kw == Keyword::Prepend || skip_token!(self, Token::Keyword(Keyword::Prepend)) {
            BlockMode::Prepend
        } else {
            BlockMode::Replace
        };
        let name = match ok!(self.stream.current()) {
            (Token::Ident(name), _) => {
                let name = name.to_string();
                ok!(self.stream.next());
                name
            }
            // a bare `block` is the body slot of a mixin
            _ if mode == BlockMode::Replace => String::new(),
            (token, span) => return Err(expected(token, "block name", span)),
        };
        ok!(self.expect_line_end());
        let body = ok!(self.parse_block());
        Ok(self.push(NodeKind::Block(ast::Block { name, mode, body }), span))
    }

    #[inline]
    fn attach_location_to_error(&mut self, mut err: Error) -> Error {
        if err.line().is_none() {
            let span = self.stream.current_span();
            err.set_position(span.line as usize, span.col as usize);
        }
        err.set_template_source(self.source);
        err
    }
}

/// Parses a template into its syntax tree.
pub fn parse(source: &str) -> Result<Ast, Error> {
    Parser::new(source).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn dump(source: &str) -> String {
        format!("{:?}", parse(source).unwrap())
    }

    #[test]
    fn test_class_merging() {
        assert_eq!(
            dump("div.a.b(class=\"c\")#x#y"),
            "Document\n  Tag div class=\"a b c\" id=\"y\"\n"
        );
    }

    #[test]
    fn test_else_if_chain() {
        assert_eq!(
            dump("if a\n  p A\nelse if b\n  p B\nelse\n  p C"),
            "Document\n  If a\n    Tag p\n      Text \"A\"\n  Else\n    If b\n      Tag p\n        Text \"B\"\n    Else\n      Tag p\n        Text \"C\"\n"
        );
    }

    #[test]
    fn test_doctype_position() {
        let ast = parse("doctype\np").unwrap();
        assert_eq!(ast.document().doctype.as_deref(), Some("html"));
        let err = parse("p\ndoctype html").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoctypeNotFirst);
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_recursion_limit() {
        let mut source = String::new();
        for depth in 0..200 {
            source.push_str(&" ".repeat(depth));
            source.push_str("div\n");
        }
        let err = parse(&source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    }
}
