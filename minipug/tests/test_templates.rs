use minipug::{Environment, ErrorKind, ScriptEngine, Value};
use serde_json::json;

use similar_asserts::assert_eq;

fn render(source: &str, ctx: serde_json::Value) -> String {
    Environment::new().render_str(source, ctx).unwrap()
}

#[test]
fn test_tags_and_nesting() {
    assert_eq!(
        render("div\n  p Hello\n  p\n    span World\nfooter", json!({})),
        "<div><p>Hello</p><p><span>World</span></p></div><footer></footer>"
    );
    assert_eq!(
        render(".box#main content", json!({})),
        "<div class=\"box\" id=\"main\">content</div>"
    );
    assert_eq!(
        render("ul: li: a(href=\"/\") home", json!({})),
        "<ul><li><a href=\"/\">home</a></li></ul>"
    );
}

#[test]
fn test_class_shorthands_merge() {
    assert_eq!(render("div.a.b", json!({})), "<div class=\"a b\"></div>");
    assert_eq!(
        render("p.lead(class=extra) text", json!({"extra": "big"})),
        "<p class=\"lead big\">text</p>"
    );
    assert_eq!(
        render("p(class=flags)", json!({"flags": {"on": true, "off": false}})),
        "<p class=\"on\"></p>"
    );
}

#[test]
fn test_void_and_self_closing() {
    assert_eq!(render("img\n  p never", json!({})), "<img>");
    assert_eq!(render("hr\nbr", json!({})), "<hr><br>");
    assert_eq!(render("custom/", json!({})), "<custom/>");
    assert_eq!(
        render("doctype xml\nfeed\n  link(href=\"/\")", json!({})),
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?><feed><link href=\"/\"/></feed>"
    );
}

#[test]
fn test_doctypes() {
    assert_eq!(
        render("doctype html\nhtml\n  body", json!({})),
        "<!DOCTYPE html><html><body></body></html>"
    );
    assert_eq!(render("doctype\np", json!({})), "<!DOCTYPE html><p></p>");
}

#[test]
fn test_escaping() {
    let ctx = json!({"content": "<script>"});
    assert_eq!(render("p #{content}", ctx.clone()), "<p>&lt;script&gt;</p>");
    assert_eq!(render("p !{content}", ctx.clone()), "<p><script></p>");
    assert_eq!(render("p= content", ctx.clone()), "<p>&lt;script&gt;</p>");
    assert_eq!(render("p!= content", ctx.clone()), "<p><script></p>");
    assert_eq!(
        render("a(title=content)", ctx.clone()),
        "<a title=\"&lt;script&gt;\"></a>"
    );
    assert_eq!(render("a(title!=content)", ctx), "<a title=\"<script>\"></a>");
}

#[test]
fn test_literal_text_is_verbatim() {
    assert_eq!(render("p a < b & c", json!({})), "<p>a < b & c</p>");
    assert_eq!(render("p \\#{not}", json!({})), "<p>#{not}</p>");
}

#[test]
fn test_attributes() {
    assert_eq!(
        render(
            "input(type=\"checkbox\" checked disabled=off name=name)",
            json!({"off": false, "name": "q"})
        ),
        "<input type=\"checkbox\" checked name=\"q\">"
    );
    assert_eq!(
        render("a(data-id=id, title=missing)", json!({"id": 42})),
        "<a data-id=\"42\"></a>"
    );
}

#[test]
fn test_piped_text_and_text_blocks() {
    assert_eq!(
        render("p\n  | first\n  | second #{n}\n  | third", json!({"n": 2})),
        "<p>first\nsecond 2\nthird</p>"
    );
    assert_eq!(
        render("script.\n  if (a) {\n    b()\n  }", json!({})),
        "<script>if (a) {\n  b()\n}</script>"
    );
}

#[test]
fn test_code() {
    assert_eq!(
        render("- var items = ['a', 'b']\n- items.push('c')\np= items.join('-')", json!({})),
        "<p>a-b-c</p>"
    );
    assert_eq!(render("p= 1 + 2", json!({})), "<p>3</p>");
    assert_eq!(render("p= nothing", json!({"nothing": null})), "<p></p>");
}

#[test]
fn test_code_errors_abort() {
    let env = Environment::new();
    let err = env.render_str("p ok\n- missing()", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvalRuntime);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn test_conditionals() {
    let source = "if user\n  p= user.name\nelse if guest\n  p guest\nelse\n  p nobody";
    assert_eq!(render(source, json!({"user": {"name": "Ann"}})), "<p>Ann</p>");
    assert_eq!(render(source, json!({"user": null, "guest": 1})), "<p>guest</p>");
    assert_eq!(render(source, json!({"user": 0, "guest": ""})), "<p>nobody</p>");
    assert_eq!(
        render("unless admin\n  p restricted", json!({"admin": false})),
        "<p>restricted</p>"
    );
}

#[test]
fn test_failed_condition_is_falsy() {
    let env = Environment::new();
    let tmpl = env
        .template_from_str("if missing.deep\n  p yes\nelse\n  p no")
        .unwrap();
    let (rv, diagnostics) = tmpl.render_with_diagnostics(json!({})).unwrap();
    assert_eq!(rv, "<p>no</p>");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind(), ErrorKind::EvalRuntime);
    assert_eq!(diagnostics[0].line(), Some(1));
}

#[test]
fn test_each() {
    let source = "ul\n  each item, idx in items\n    li= idx + ': ' + item\n  else\n    li none";
    assert_eq!(
        render(source, json!({"items": ["a", "b"]})),
        "<ul><li>0: a</li><li>1: b</li></ul>"
    );
    assert_eq!(render(source, json!({"items": []})), "<ul><li>none</li></ul>");
    assert_eq!(render(source, json!({"items": 42})), "<ul><li>none</li></ul>");
    assert_eq!(
        render("each item in items\nelse\n  p none", json!({"items": []})),
        "<p>none</p>"
    );
}

#[test]
fn test_each_length_rules() {
    let source = "each x in obj\n  | a\nelse\n  | none";
    assert_eq!(render(source, json!({"obj": {"length": 2}})), "aa");
    assert_eq!(render(source, json!({"obj": {"length": 2.5}})), "none");
    assert_eq!(render(source, json!({"obj": {"length": -3}})), "none");
    assert_eq!(render(source, json!({"obj": {"length": "2"}})), "none");

    let mut env = Environment::new();
    env.set_max_loop_iterations(100);
    assert_eq!(
        env.render_str(source, json!({"obj": {"length": 100}})).unwrap(),
        "a".repeat(100)
    );
    for length in [json!(101), json!(1e12), json!(1e300)] {
        let err = env
            .render_str(source, json!({"obj": {"length": length}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoopLimitExceeded);
        assert_eq!(err.line(), Some(1));
    }
}

#[test]
fn test_each_restores_scope() {
    assert_eq!(
        render(
            "- var item = 'outer'\neach item in ['x']\n  p= item\np= item",
            json!({})
        ),
        "<p>x</p><p>outer</p>"
    );
}

#[test]
fn test_while() {
    assert_eq!(
        render("- var i = 0\nwhile i < 3\n  span= i++", json!({})),
        "<span>0</span><span>1</span><span>2</span>"
    );

    let mut env = Environment::new();
    env.set_max_loop_iterations(5);
    let err = env.render_str("while true\n  p x", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoopLimitExceeded);
    assert_eq!(err.line(), Some(1));
}

#[test]
fn test_case() {
    let source = "case x\n  when \"a\"\n    p A\n  when \"b\"\n    p B\n  default\n    p other";
    assert_eq!(render(source, json!({"x": "b"})), "<p>B</p>");
    assert_eq!(render(source, json!({"x": "z"})), "<p>other</p>");
    assert_eq!(
        render("case n\n  when 1, 2: p small\n  when 3: p three", json!({"n": 2})),
        "<p>small</p>"
    );
    assert_eq!(render("case n\n  when 1: p one", json!({"n": 5})), "");
}

#[test]
fn test_mixins() {
    let source = "\
mixin item(name, ...rest)
  li(class=attributes.class)= name + rest.length
ul
  +item('a', 1, 2)(class=\"x\")
  +item('b')";
    assert_eq!(
        render(source, json!({})),
        "<ul><li class=\"x\">a2</li><li>b0</li></ul>"
    );
}

#[test]
fn test_mixin_block() {
    let source = "\
mixin box(title)
  section
    h2= title
    block
+box('Hi')
  p inside
+box('Empty')";
    assert_eq!(
        render(source, json!({})),
        "<section><h2>Hi</h2><p>inside</p></section><section><h2>Empty</h2></section>"
    );
}

#[test]
fn test_mixin_scope_is_popped() {
    let source = "\
- var x = 'outer'
mixin m
  - var x = 'inner'
  p= x
+m
p= x";
    assert_eq!(render(source, json!({})), "<p>inner</p><p>outer</p>");
}

#[test]
fn test_mixin_errors() {
    let env = Environment::new();
    let err = env.render_str("p\n  +nope", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MixinNotFound);
    assert_eq!(err.line(), Some(2));

    let err = env
        .render_str("mixin loop\n  +loop\n+loop", json!({}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
}

#[test]
fn test_recursion_limit() {
    let mut source = String::new();
    for depth in 0..140 {
        source.push_str(&"  ".repeat(depth));
        source.push_str("div\n");
    }
    let mut env = Environment::new();
    assert_eq!(env.recursion_limit(), minipug::DEFAULT_RECURSION_LIMIT);
    let rv = env.render_str(&source, ()).unwrap();
    assert_eq!(rv, format!("{}{}", "<div>".repeat(140), "</div>".repeat(140)));

    env.set_recursion_limit(100);
    let err = env.render_str(&source, ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    assert_eq!(err.line(), Some(101));
}

#[test]
fn test_deep_mixin_recursion_is_bounded() {
    // every call nests another 120 tags
    let mut source = String::from("mixin nest(n)\n");
    for depth in 1..=120 {
        source.push_str(&"  ".repeat(depth));
        source.push_str("div\n");
    }
    source.push_str(&"  ".repeat(121));
    source.push_str("+nest(n + 1)\n+nest(0)");
    let err = Environment::new().render_str(&source, ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
}

#[test]
fn test_comments() {
    assert_eq!(render("// note\n//- secret\np", json!({})), "<p></p>");
    let mut env = Environment::new();
    env.set_include_comments(true);
    assert_eq!(
        env.render_str("// note\n//- secret\np", json!({})).unwrap(),
        "<!-- note--><p></p>"
    );
}

#[test]
fn test_failed_interpolation_is_kept() {
    let env = Environment::new();
    let tmpl = env.template_from_str("p Hi #{user.name}!").unwrap();
    let (rv, diagnostics) = tmpl.render_with_diagnostics(json!({})).unwrap();
    assert_eq!(rv, "<p>Hi #{user.name}!</p>");
    assert_eq!(diagnostics.len(), 1);
}

#[test]
fn test_render_twice_is_identical() {
    let env = Environment::new();
    let tmpl = env
        .template_from_str("each x in xs\n  p= x.toUpperCase()")
        .unwrap();
    let ctx = json!({"xs": ["a", "b"]});
    assert_eq!(tmpl.render(&ctx).unwrap(), tmpl.render(&ctx).unwrap());
}

#[test]
fn test_render_with_host_engine() {
    let env = Environment::new();
    let tmpl = env.template_from_str("- var total = a * 2\np= total").unwrap();
    let mut engine = ScriptEngine::new();
    minipug::Evaluator::declare_variable(&mut engine, "a", Value::from(21.0));
    assert_eq!(tmpl.render_with(&mut engine).unwrap(), "<p>42</p>");
    assert_eq!(engine.get_variable("total"), Some(&Value::from(42.0)));
}

#[test]
fn test_typed_host_variables() {
    let env = Environment::new();
    let tmpl = env
        .template_from_str("if admin\n  p= name + ' #' + (id + 1)")
        .unwrap();
    let mut engine = ScriptEngine::new();
    minipug::Evaluator::declare_variable(&mut engine, "name", Value::from("Ann"));
    minipug::Evaluator::declare_variable(&mut engine, "id", Value::from(41i64));
    minipug::Evaluator::declare_variable(&mut engine, "admin", Value::from(true));
    assert_eq!(tmpl.render_with(&mut engine).unwrap(), "<p>Ann #42</p>");
    assert_eq!(minipug::VERSION, env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_context_must_be_a_map() {
    let env = Environment::new();
    let err = env.render_str("p", json!([1, 2])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadSerialization);
    assert_eq!(env.render_str("p", ()).unwrap(), "<p></p>");
}

#[test]
fn test_syntax_errors() {
    let env = Environment::new();
    let err = env
        .template_from_named_str("index.pug", "div\n  else")
        .unwrap_err();
    assert!(err.kind().is_syntax_error());
    assert_eq!(err.name(), Some("index.pug"));
    assert_eq!(err.line(), Some(2));
    assert!(format!("{err:#}").contains("   2 > "));

    let err = env.template_from_str("p\ndoctype html").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DoctypeNotFirst);
}

#[test]
fn test_serde_struct_context() {
    #[derive(serde::Serialize)]
    struct User {
        name: &'static str,
        tags: Vec<&'static str>,
    }

    let env = Environment::new();
    let tmpl = env
        .template_from_str("p #{user.name} (#{user.tags.length})")
        .unwrap();
    let user = User {
        name: "Ann",
        tags: vec!["a", "b"],
    };
    assert_eq!(
        tmpl.render(json!({"user": serde_json::to_value(&user).unwrap()}))
            .unwrap(),
        "<p>Ann (2)</p>"
    );
}
