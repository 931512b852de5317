use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, ErrorKind};
use crate::script::ast::{BinOpKind, Expr, LogicalOpKind, Stmt, UnaryOpKind};
use crate::script::lexer::{tokenize, Token};
use crate::script::value::{number_to_string, Value};
use crate::utils::{find_closing_brace, unescape};

const MAX_RECURSION: usize = 150;

const RESERVED: &[&str] = &[
    "var", "let", "const", "function", "return", "new", "this", "if", "else", "for", "while",
    "do", "class", "delete", "void", "in", "instanceof", "typeof",
];

fn syntax_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::EvalSyntax, msg)
}

fn unexpected<D: fmt::Display>(unexpected: D, expected: &str) -> Error {
    syntax_error(format!("unexpected {unexpected}, expected {expected}"))
}

fn unexpected_eof(expected: &str) -> Error {
    unexpected("end of expression", expected)
}

macro_rules! expect_token {
    ($parser:expr, $match:pat, $expectation:expr) => {{
        match $parser.next() {
            Some(token @ $match) => token,
            Some(token) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat => $target:expr, $expectation:expr) => {{
        match $parser.next() {
            Some($match) => $target,
            Some(token) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
}

macro_rules! skip_token {
    ($p:expr, $match:pat) => {
        if matches!($p.peek(), Some($match)) {
            $p.pos += 1;
            true
        } else {
            false
        }
    };
}

macro_rules! with_recursion_guard {
    ($parser:expr, $expr:expr) => {{
        $parser.depth += 1;
        if $parser.depth > MAX_RECURSION {
            return Err(syntax_error("expression nested too deeply"));
        }
        let rv = $expr;
        $parser.depth -= 1;
        rv
    }};
}

macro_rules! binop {
    ($func:ident, $next:ident, { $($tok:pat => $op:expr,)* }) => {
        fn $func(&mut self) -> Result<Expr, Error> {
            let mut left = ok!(self.$next());
            loop {
                let op = match self.peek() {
                    $(Some($tok) => $op,)*
                    _ => break,
                };
                self.pos += 1;
                let right = ok!(self.$next());
                left = Expr::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        }
    };
}

macro_rules! logicalop {
    ($func:ident, $next:ident, { $($tok:pat => $op:expr,)* }) => {
        fn $func(&mut self) -> Result<Expr, Error> {
            let mut left = ok!(self.$next());
            loop {
                let op = match self.peek() {
                    $(Some($tok) => $op,)*
                    _ => break,
                };
                self.pos += 1;
                let right = ok!(self.$next());
                left = Expr::LogicalOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        }
    };
}

fn check_target(expr: &Expr) -> Result<(), Error> {
    match expr {
        Expr::Var(_)
        | Expr::GetAttr {
            optional: false, ..
        }
        | Expr::GetItem {
            optional: false, ..
        } => Ok(()),
        _ => Err(syntax_error("invalid assignment target")),
    }
}

/// Finds the next `${` that is not escaped.
fn find_placeholder(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut idx = 0;
    while let Some(&c) = bytes.get(idx) {
        match c {
            b'\\' => idx += 1,
            b'$' if bytes.get(idx + 1) == Some(&b'{') => return Some(idx),
            _ => {}
        }
        idx += 1;
    }
    None
}

struct Parser<'a> {
    tokens: Vec<(Token<'a>, usize)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<(Token<'a>, usize)>, depth: usize) -> Parser<'a> {
        Parser {
            tokens,
            pos: 0,
            depth,
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|x| &x.0)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let rv = self.tokens.get(self.pos).map(|x| x.0.clone());
        if rv.is_some() {
            self.pos += 1;
        }
        rv
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, Error> {
        let mut stmts = Vec::new();
        loop {
            while skip_token!(self, Token::Semicolon) {}
            if self.peek().is_none() {
                break;
            }
            stmts.push(ok!(self.parse_stmt()));
            match self.peek() {
                None | Some(Token::Semicolon) => {}
                Some(token) => return Err(unexpected(token, "`;` or end of expression")),
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Error> {
        if !skip_token!(self, Token::Ident("var" | "let" | "const")) {
            return Ok(Stmt::Expr(ok!(self.parse_expr())));
        }
        let mut decls = Vec::new();
        loop {
            let name = expect_token!(self, Token::Ident(name) => name, "variable name");
            if RESERVED.contains(&name) {
                return Err(syntax_error(format!("`{name}` is not a valid variable name")));
            }
            let value = if skip_token!(self, Token::Assign) {
                Some(ok!(self.parse_assign()))
            } else {
                None
            };
            decls.push((name.to_string(), value));
            if !skip_token!(self, Token::Comma) {
                break;
            }
        }
        Ok(Stmt::Declare(decls))
    }

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, Error> {
        with_recursion_guard!(self, self.parse_assign_unprotected())
    }

    fn parse_assign_unprotected(&mut self) -> Result<Expr, Error> {
        let left = ok!(self.parse_ifexpr());
        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinOpKind::Add),
            Some(Token::MinusAssign) => Some(BinOpKind::Sub),
            Some(Token::MulAssign) => Some(BinOpKind::Mul),
            Some(Token::DivAssign) => Some(BinOpKind::Div),
            _ => return Ok(left),
        };
        self.pos += 1;
        ok!(check_target(&left));
        let value = ok!(self.parse_assign());
        Ok(Expr::Assign {
            target: Box::new(left),
            op,
            value: Box::new(value),
        })
    }

    fn parse_ifexpr(&mut self) -> Result<Expr, Error> {
        let test = ok!(self.parse_or());
        if !skip_token!(self, Token::Question) {
            return Ok(test);
        }
        let true_expr = ok!(self.parse_assign());
        expect_token!(self, Token::Colon, "`:`");
        let false_expr = ok!(self.parse_assign());
        Ok(Expr::IfExpr {
            test: Box::new(test),
            true_expr: Box::new(true_expr),
            false_expr: Box::new(false_expr),
        })
    }

    logicalop!(parse_or, parse_and, {
        Token::Or => LogicalOpKind::Or,
        Token::Nullish => LogicalOpKind::Nullish,
    });
    logicalop!(parse_and, parse_equality, {
        Token::And => LogicalOpKind::And,
    });
    binop!(parse_equality, parse_relational, {
        Token::Eq => BinOpKind::Eq,
        Token::Ne => BinOpKind::Ne,
        Token::StrictEq => BinOpKind::StrictEq,
        Token::StrictNe => BinOpKind::StrictNe,
    });
    binop!(parse_relational, parse_additive, {
        Token::Lt => BinOpKind::Lt,
        Token::Lte => BinOpKind::Lte,
        Token::Gt => BinOpKind::Gt,
        Token::Gte => BinOpKind::Gte,
    });
    binop!(parse_additive, parse_multiplicative, {
        Token::Plus => BinOpKind::Add,
        Token::Minus => BinOpKind::Sub,
    });
    binop!(parse_multiplicative, parse_unary, {
        Token::Mul => BinOpKind::Mul,
        Token::Div => BinOpKind::Div,
        Token::Mod => BinOpKind::Rem,
    });

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        with_recursion_guard!(self, self.parse_unary_unprotected())
    }

    fn parse_unary_unprotected(&mut self) -> Result<Expr, Error> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOpKind::Not,
            Some(Token::Minus) => UnaryOpKind::Neg,
            Some(Token::Plus) => UnaryOpKind::Plus,
            Some(Token::Ident("typeof")) => UnaryOpKind::TypeOf,
            Some(Token::Increment) => return self.parse_prefix_update(1.0),
            Some(Token::Decrement) => return self.parse_prefix_update(-1.0),
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let expr = ok!(self.parse_unary());
        Ok(Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_prefix_update(&mut self, delta: f64) -> Result<Expr, Error> {
        self.pos += 1;
        let target = ok!(self.parse_unary());
        ok!(check_target(&target));
        Ok(Expr::Update {
            target: Box::new(target),
            delta,
            prefix: true,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let expr = ok!(self.parse_member());
        let delta = match self.peek() {
            Some(Token::Increment) => 1.0,
            Some(Token::Decrement) => -1.0,
            _ => return Ok(expr),
        };
        self.pos += 1;
        ok!(check_target(&expr));
        Ok(Expr::Update {
            target: Box::new(expr),
            delta,
            prefix: false,
        })
    }

    fn parse_member(&mut self) -> Result<Expr, Error> {
        let mut expr = ok!(self.parse_primary());
        loop {
            let optional = skip_token!(self, Token::OptionalChain);
            expr = match self.peek() {
                Some(Token::Dot) if !optional => {
                    self.pos += 1;
                    let name = expect_token!(self, Token::Ident(name) => name, "property name");
                    Expr::GetAttr {
                        expr: Box::new(expr),
                        name: name.to_string(),
                        optional,
                    }
                }
                Some(Token::BracketOpen) => {
                    self.pos += 1;
                    let subscript = ok!(self.parse_expr());
                    expect_token!(self, Token::BracketClose, "`]`");
                    Expr::GetItem {
                        expr: Box::new(expr),
                        subscript: Box::new(subscript),
                        optional,
                    }
                }
                Some(Token::ParenOpen) => {
                    self.pos += 1;
                    Expr::Call {
                        callee: Box::new(expr),
                        args: ok!(self.parse_args()),
                        optional,
                    }
                }
                Some(Token::Ident(name)) if optional => {
                    let name = name.to_string();
                    self.pos += 1;
                    Expr::GetAttr {
                        expr: Box::new(expr),
                        name,
                        optional,
                    }
                }
                Some(token) if optional => return Err(unexpected(token, "property name")),
                None if optional => return Err(unexpected_eof("property name")),
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, Error> {
        let mut args = Vec::new();
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }
            args.push(ok!(self.parse_assign()));
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(unexpected_eof("expression")),
        };
        Ok(match token {
            Token::Ident("true") => Expr::Const(Value::Bool(true)),
            Token::Ident("false") => Expr::Const(Value::Bool(false)),
            Token::Ident("null") => Expr::Const(Value::Null),
            Token::Ident("undefined") => Expr::Const(Value::Undefined),
            Token::Ident("NaN") => Expr::Const(Value::Number(f64::NAN)),
            Token::Ident("Infinity") => Expr::Const(Value::Number(f64::INFINITY)),
            Token::Ident(name) if RESERVED.contains(&name) => {
                return Err(syntax_error(format!("unexpected keyword `{name}`")))
            }
            Token::Ident(name) => Expr::Var(name.to_string()),
            Token::Number(val) => Expr::Const(Value::Number(val)),
            Token::Str(val) => Expr::Const(Value::from(val.into_owned())),
            Token::Template(raw) => ok!(self.parse_template(raw)),
            Token::ParenOpen => {
                let expr = ok!(self.parse_expr());
                expect_token!(self, Token::ParenClose, "`)`");
                expr
            }
            Token::BracketOpen => ok!(self.parse_list()),
            Token::BraceOpen => ok!(self.parse_object()),
            token => return Err(unexpected(token, "expression")),
        })
    }

    fn parse_list(&mut self) -> Result<Expr, Error> {
        let mut items = Vec::new();
        loop {
            if skip_token!(self, Token::BracketClose) {
                break;
            }
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BracketClose) {
                    break;
                }
            }
            items.push(ok!(self.parse_assign()));
        }
        Ok(Expr::Array(items))
    }

    fn parse_object(&mut self) -> Result<Expr, Error> {
        let mut items = Vec::new();
        loop {
            if skip_token!(self, Token::BraceClose) {
                break;
            }
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BraceClose) {
                    break;
                }
            }
            let (key, shorthand) = match self.next() {
                Some(Token::Ident(name)) => (name.to_string(), !RESERVED.contains(&name)),
                Some(Token::Str(s)) => (s.into_owned(), false),
                Some(Token::Number(n)) => (number_to_string(n), false),
                Some(token) => return Err(unexpected(token, "property name")),
                None => return Err(unexpected_eof("property name")),
            };
            let value = if skip_token!(self, Token::Colon) {
                ok!(self.parse_assign())
            } else if shorthand {
                Expr::Var(key.clone())
            } else {
                return Err(match self.peek() {
                    Some(token) => unexpected(token, "`:`"),
                    None => unexpected_eof("`:`"),
                });
            };
            items.push((key, value));
        }
        Ok(Expr::Object(items))
    }

    fn parse_template(&mut self, raw: &str) -> Result<Expr, Error> {
        let mut parts = Vec::new();
        let mut rest = raw;
        loop {
            let (literal, placeholder) = match find_placeholder(rest) {
                Some(idx) => (&rest[..idx], Some(&rest[idx + 2..])),
                None => (rest, None),
            };
            if !literal.is_empty() {
                let literal = ok!(unescape(literal)
                    .map_err(|_| syntax_error("invalid escape sequence in template literal")));
                parts.push(Expr::Const(Value::from(literal)));
            }
            let inner = match placeholder {
                Some(inner) => inner,
                None => break,
            };
            let end = match find_closing_brace(inner) {
                Some(end) => end,
                None => return Err(syntax_error("unterminated template placeholder")),
            };
            let mut sub = Parser::new(ok!(tokenize(&inner[..end])), self.depth);
            let expr = ok!(sub.parse_expr());
            if let Some(token) = sub.peek() {
                return Err(unexpected(token, "`}`"));
            }
            parts.push(expr);
            rest = &inner[end + 1..];
        }
        Ok(Expr::Template(parts))
    }
}

/// Parses a script into statements.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, Error> {
    Parser::new(ok!(tokenize(source)), 0).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(source: &str) -> Expr {
        match parse_program(source).unwrap().pop() {
            Some(Stmt::Expr(expr)) => expr,
            other => panic!("not an expression: {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("a + b * c");
        let Expr::BinOp { op, right, .. } = expr else {
            panic!("expected binop");
        };
        assert_eq!(op, BinOpKind::Add);
        assert!(matches!(
            *right,
            Expr::BinOp {
                op: BinOpKind::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_conditional_is_right_associative() {
        let expr = parse_expr("a ? b : c ? d : e");
        let Expr::IfExpr { false_expr, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*false_expr, Expr::IfExpr { .. }));
    }

    #[test]
    fn test_declarations() {
        let stmts = parse_program("var a = 1, b; a += 2; a").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0], Stmt::Declare(decls) if decls.len() == 2));
    }

    #[test]
    fn test_template_parts() {
        let Expr::Template(parts) = parse_expr("`a ${b} c ${`d${e}`}`") else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 4);
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["a +", "1 = 2", "(a", "var if = 1", "{a: 1", "a b", "a?.+"] {
            let err = parse_program(source).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EvalSyntax, "{source}");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert_eq!(
            parse_program(&source).unwrap_err().kind(),
            ErrorKind::EvalSyntax
        );
    }
}
