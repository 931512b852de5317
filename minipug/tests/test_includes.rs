use std::error::Error as _;
use std::path::Path;

use minipug::{memory_loader, Environment, ErrorKind};
use serde_json::json;

use similar_asserts::assert_eq;

fn env_with(templates: &[(&'static str, &'static str)]) -> Environment {
    let mut env = Environment::new();
    env.set_base_path("/views");
    env.set_loader(memory_loader(
        templates
            .iter()
            .map(|(path, source)| (Path::new("/views").join(path), *source)),
    ));
    env
}

fn fixtures() -> Environment {
    let mut env = Environment::new();
    env.set_base_path(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/inputs"));
    env
}

#[test]
fn test_include() {
    let env = env_with(&[("header.pug", "h1 Title"), ("style.css", "body { color: red }")]);
    assert_eq!(
        env.render_str("include header\nstyle\n  include style.css\np body", ())
            .unwrap(),
        "<h1>Title</h1><style>body { color: red }</style><p>body</p>"
    );
}

#[test]
fn test_include_shares_scope_and_mixins() {
    let env = env_with(&[
        ("mixins.pug", "mixin hi(n)\n  p Hi #{n} from #{site}"),
        ("partials/row.pug", "include ../mixins\n+hi(who)"),
    ]);
    assert_eq!(
        env.render_str(
            "- var site = 'here'\neach who in ['a', 'b']\n  include partials/row",
            ()
        )
        .unwrap(),
        "<p>Hi a from here</p><p>Hi b from here</p>"
    );
}

#[test]
fn test_include_errors() {
    let env = env_with(&[("broken.pug", "div\n  p(a=\"x)"), ("self.pug", "include self")]);

    let err = env.render_str("p\ninclude missing", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncludeNotFound);
    assert_eq!(err.line(), Some(2));
    assert!(err.to_string().contains("/views/missing.pug"));

    let err = env.render_str("include broken", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncludeParseError);
    let inner = err
        .source()
        .and_then(|x| x.downcast_ref::<minipug::Error>())
        .unwrap();
    assert_eq!(inner.kind(), ErrorKind::UnterminatedString);
    assert_eq!(inner.name(), Some("/views/broken.pug"));

    let err = env.render_str("include self", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursiveInclude);
}

#[test]
fn test_code_errors_in_includes() {
    let env = env_with(&[("widget.pug", "p widget\n- broken()")]);
    let err = env.render_str("div\n  include widget", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvalRuntime);
    assert_eq!(err.name(), Some("/views/widget.pug"));
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.template_source(), Some("p widget\n- broken()"));
}

#[test]
fn test_include_size_limit() {
    let mut env = env_with(&[("big.pug", "p this template is larger than the limit")]);
    env.set_max_template_size(16);
    let err = env.render_str("include big", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateTooLarge);
}

#[test]
fn test_extends() {
    let env = env_with(&[(
        "layout.pug",
        "doctype html\nhtml\n  head\n    block title\n      title Default\n  body\n    block content",
    )]);
    assert_eq!(
        env.render_str("extends layout\nblock content\n  p page", ())
            .unwrap(),
        "<!DOCTYPE html><html><head><title>Default</title></head><body><p>page</p></body></html>"
    );
}

#[test]
fn test_block_layers() {
    let env = env_with(&[
        ("base.pug", "block scripts\n  script a\nblock body\n  p base"),
        (
            "mid.pug",
            "extends base\nblock append scripts\n  script b\nblock body\n  div\n    block inner\n      p mid",
        ),
    ]);
    let source = "extends mid\nblock prepend scripts\n  script c\nblock inner\n  p child";
    assert_eq!(
        env.render_str(source, ()).unwrap(),
        "<script>c</script><script>a</script><script>b</script><div><p>child</p></div>"
    );
}

#[test]
fn test_extends_runs_child_code() {
    let env = env_with(&[("layout.pug", "h1= heading\nblock content")]);
    assert_eq!(
        env.render_str(
            "extends layout\n- var heading = 'Hello'\nblock content\n  p= heading.length",
            ()
        )
        .unwrap(),
        "<h1>Hello</h1><p>5</p>"
    );
}

#[test]
fn test_extends_errors() {
    let env = env_with(&[
        ("a.pug", "extends b"),
        ("b.pug", "extends a"),
        ("bad.pug", "div\n\tp"),
    ]);

    let err = env.render_str("extends nowhere", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtendsNotFound);
    assert_eq!(err.line(), Some(1));

    let err = env.render_str("extends bad", ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtendsParseError);

    let err = env.template_from_path("a").unwrap().render(()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursiveInclude);
}

#[test]
fn test_filesystem_fixtures() {
    let env = fixtures();
    let tmpl = env.template_from_path("page").unwrap();
    assert!(tmpl.name().unwrap().ends_with("page.pug"));
    assert_eq!(
        tmpl.render(json!({"title": "Home"})).unwrap(),
        "<!DOCTYPE html><html><head><title>Home</title></head><body>\
         <nav><a href=\"/\">Home</a></nav><h1>Home</h1><footer>static</footer>\
         </body></html>"
    );
}

#[test]
fn test_filesystem_cycle() {
    let env = fixtures();
    let err = env
        .template_from_path("cycle-a")
        .unwrap()
        .render(())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursiveInclude);
    assert!(err.name().unwrap().ends_with("cycle-b.pug"));
}

#[test]
fn test_filesystem_missing_template() {
    let env = fixtures();
    let err = env.template_from_path("does-not-exist").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}
