#![cfg(feature = "unstable_machinery")]
use minipug::machinery::{tokenize, CodeKind, Keyword, Token};

use similar_asserts::assert_eq;

fn tokens(source: &str) -> Vec<Token<'_>> {
    tokenize(source)
        .map(|x| x.map(|(tok, _)| tok))
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn test_template() {
    let source = "\
doctype html
ul#nav
  each link in links
    li: a(href=link.url)= link.title
";
    assert_eq!(
        tokens(source),
        vec![
            Token::Keyword(Keyword::Doctype),
            Token::Str("html"),
            Token::Newline,
            Token::Ident("ul"),
            Token::Id("nav"),
            Token::Newline,
            Token::Indent,
            Token::Keyword(Keyword::Each),
            Token::Ident("link"),
            Token::Keyword(Keyword::In),
            Token::Expr("links"),
            Token::Newline,
            Token::Indent,
            Token::Ident("li"),
            Token::Colon,
            Token::Ident("a"),
            Token::ParenOpen,
            Token::Ident("href"),
            Token::Assign,
            Token::Expr("link.url"),
            Token::ParenClose,
            Token::Code(CodeKind::Buffered),
            Token::Expr("link.title"),
            Token::Newline,
            Token::Outdent,
            Token::Outdent,
            Token::Eof,
        ]
    );
}

#[test]
fn test_spans_and_errors() {
    let spans: Vec<_> = tokenize("p\n  span #{x}")
        .map(|x| x.unwrap().1)
        .map(|span| (span.line, span.col))
        .collect();
    assert_eq!(
        spans,
        vec![(1, 1), (1, 2), (2, 1), (2, 3), (2, 8), (2, 12), (2, 12), (2, 12)]
    );

    let results: Vec<_> = tokenize("p\n\tq").collect();
    assert!(results.last().unwrap().is_err());
    assert_eq!(results.len(), 3);
}

#[test]
fn test_indentation_is_balanced() {
    let sources = [
        "html\n  body\n    div\n      p deep\n  footer",
        "a\n    b\n        c\n    d\ne",
        "script.\n  x\n    y\np\n  | one\n\n  | two",
        "ul\n  li\n    span\n",
    ];
    for source in sources {
        let mut depth = 0i32;
        for token in tokens(source) {
            match token {
                Token::Indent => depth += 1,
                Token::Outdent => depth -= 1,
                _ => {}
            }
            assert!(depth >= 0, "{source:?}");
        }
        assert_eq!(depth, 0, "{source:?}");
    }
}
