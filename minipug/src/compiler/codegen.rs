use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::cache::content_hash;
use crate::compiler::ast::{
    Ast, Attribute, Block, BlockMode, Case, Conditional, Include, Loop, MixinCall, Node, NodeId,
    NodeKind, Tag,
};
use crate::compiler::parser::parse;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::script::{Evaluator, Value, ValueMap};
use crate::utils::HtmlEscape;

/// What mixin calls, includes and extends count against the recursion limit.
const CALL_RECURSION_COST: usize = 10;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta",
    "param", "source", "track", "wbr",
];

/// A parsed template and where it came from.
struct Doc {
    ast: Arc<Ast>,
    source: Arc<str>,
    name: Option<String>,
    dir: PathBuf,
    /// Distance from the most derived template of an extends chain.
    level: usize,
    /// Index of the block override table this document reads from.
    overrides: usize,
}

/// Points at a node in a specific document.
#[derive(Clone)]
struct NodeRef {
    doc: Rc<Doc>,
    id: NodeId,
}

/// A block body contributed by a descendant template.
struct Layer {
    block: NodeRef,
    level: usize,
}

type Overrides = BTreeMap<String, Vec<Layer>>;

/// Walks parsed templates and writes HTML.
///
/// A generator renders exactly one template (plus everything it includes
/// or extends) and is consumed by [`finish`](Self::finish).
pub(crate) struct Generator<'a> {
    env: &'a Environment,
    eval: &'a mut dyn Evaluator,
    out: String,
    xml: bool,
    mixins: HashMap<String, NodeRef>,
    overrides: Vec<Overrides>,
    file_stack: Vec<PathBuf>,
    /// The mixin call whose body an unnamed `block` renders, per active call.
    callers: Vec<Option<NodeRef>>,
    depth: usize,
    diagnostics: Vec<Error>,
}

impl<'a> Generator<'a> {
    pub fn new(env: &'a Environment, eval: &'a mut dyn Evaluator) -> Generator<'a> {
        Generator {
            env,
            eval,
            out: String::new(),
            xml: false,
            mixins: HashMap::new(),
            overrides: Vec::new(),
            file_stack: Vec::new(),
            callers: Vec::new(),
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Renders a template from its parsed tree.
    ///
    /// `dir` is the directory includes are resolved against, `path` the
    /// file the template was loaded from, if any.
    pub fn render_template(
        &mut self,
        ast: Arc<Ast>,
        source: Arc<str>,
        name: Option<&str>,
        path: Option<&Path>,
        dir: &Path,
    ) -> Result<(), Error> {
        let doc = Rc::new(Doc {
            ast,
            source,
            name: name.map(Into::into),
            dir: dir.to_path_buf(),
            level: 0,
            overrides: self.new_overrides(),
        });
        if let Some(path) = path {
            self.file_stack.push(path.to_path_buf());
        }
        let rv = self.render_document(doc, true);
        if path.is_some() {
            self.file_stack.pop();
        }
        rv
    }

    /// Returns the output and the diagnostics of degraded evaluations.
    pub fn finish(self) -> (String, Vec<Error>) {
        (self.out, self.diagnostics)
    }

    fn incr_depth(&mut self, cost: usize) -> Result<(), Error> {
        let limit = self.env.recursion_limit;
        if self.depth + cost > limit {
            return Err(Error::new(
                ErrorKind::RecursionLimitExceeded,
                format!("template nests deeper than the recursion limit of {limit}"),
            ));
        }
        self.depth += cost;
        Ok(())
    }

    fn decr_depth(&mut self, cost: usize) {
        self.depth -= cost;
    }

    fn new_overrides(&mut self) -> usize {
        self.overrides.push(Overrides::new());
        self.overrides.len() - 1
    }

    fn render_document(&mut self, doc: Rc<Doc>, emit_doctype: bool) -> Result<(), Error> {
        let ast = doc.ast.clone();
        let document = ast.document();

        let mut extends = None;
        for &id in &document.children {
            match ast[id].kind {
                NodeKind::MixinDef(ref def) => {
                    self.mixins.insert(
                        def.name.clone(),
                        NodeRef {
                            doc: doc.clone(),
                            id,
                        },
                    );
                }
                NodeKind::Extends(_) if extends.is_none() => extends = Some(id),
                _ => {}
            }
        }

        if let Some(extends_id) = extends {
            self.collect_blocks(&doc, &document.children);
            // top level code of a child still runs so it can set up variables
            for &id in &document.children {
                if matches!(ast[id].kind, NodeKind::Code(ref code) if !code.buffered) {
                    ok!(self.render_node(&doc, id));
                }
            }
            let node = &ast[extends_id];
            return self
                .render_extends(&doc, node, emit_doctype)
                .map_err(|err| attach_location(&doc, node, err));
        }

        if emit_doctype {
            if let Some(ref doctype) = document.doctype {
                self.xml = !doctype.eq_ignore_ascii_case("html");
                self.out.push_str(&doctype_declaration(doctype));
            }
        }
        self.render_nodes(&doc, &document.children)
    }

    /// Registers the blocks of a child template (top level and nested in
    /// other blocks) as overrides for its ancestors.
    fn collect_blocks(&mut self, doc: &Rc<Doc>, ids: &[NodeId]) {
        for &id in ids {
            if let NodeKind::Block(ref block) = doc.ast[id].kind {
                if block.name.is_empty() {
                    continue;
                }
                self.overrides[doc.overrides]
                    .entry(block.name.clone())
                    .or_default()
                    .push(Layer {
                        block: NodeRef {
                            doc: doc.clone(),
                            id,
                        },
                        level: doc.level,
                    });
                self.collect_blocks(doc, &block.body);
            }
        }
    }

    fn render_extends(&mut self, doc: &Rc<Doc>, node: &Node, emit_doctype: bool) -> Result<(), Error> {
        let target = match node.kind {
            NodeKind::Extends(ref extends) => &extends.path,
            _ => return Ok(()),
        };
        let (path, source) = ok!(self.load(doc, target, ErrorKind::ExtendsNotFound));
        log::debug!("{} extends {}", display_name(doc), path.display());
        let ast = ok!(parse_related(&path, &source, ErrorKind::ExtendsParseError));
        let parent = Rc::new(Doc {
            ast,
            source,
            name: Some(path.display().to_string()),
            dir: parent_dir(&path),
            level: doc.level + 1,
            overrides: doc.overrides,
        });
        ok!(self.incr_depth(CALL_RECURSION_COST));
        self.file_stack.push(path);
        let rv = self.render_document(parent, emit_doctype);
        self.file_stack.pop();
        self.decr_depth(CALL_RECURSION_COST);
        rv
    }

    /// Resolves and reads a template referenced from `doc`.
    fn load(
        &self,
        doc: &Doc,
        target: &str,
        not_found: ErrorKind,
    ) -> Result<(PathBuf, Arc<str>), Error> {
        let path = self.env.loader.resolve(&doc.dir, target);
        if self.file_stack.contains(&path) {
            return Err(Error::new(
                ErrorKind::RecursiveInclude,
                format!("{} is already being rendered", path.display()),
            ));
        }
        match ok!(self.env.loader.load(&path)) {
            Some(source) => Ok((path, source.into())),
            None => Err(Error::new(
                not_found,
                format!("{} (resolved to {})", target, path.display()),
            )),
        }
    }

    fn render_nodes(&mut self, doc: &Rc<Doc>, ids: &[NodeId]) -> Result<(), Error> {
        let mut prev_piped = false;
        for &id in ids {
            let piped = is_piped(&doc.ast[id].kind);
            if piped && prev_piped {
                self.out.push('\n');
            }
            prev_piped = piped;
            ok!(self.render_node(doc, id));
        }
        Ok(())
    }

    fn render_node(&mut self, doc: &Rc<Doc>, id: NodeId) -> Result<(), Error> {
        let node = &doc.ast[id];
        let rv = match self.incr_depth(1) {
            Ok(()) => {
                #[cfg(feature = "stacker")]
                let rv = stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
                    self.render_node_kind(doc, id, node)
                });
                #[cfg(not(feature = "stacker"))]
                let rv = self.render_node_kind(doc, id, node);
                self.decr_depth(1);
                rv
            }
            Err(err) => Err(err),
        };
        rv.map_err(|err| attach_location(doc, node, err))
    }

    fn render_node_kind(&mut self, doc: &Rc<Doc>, id: NodeId, node: &Node) -> Result<(), Error> {
        match node.kind {
            NodeKind::Document(ref document) => self.render_nodes(doc, &document.children),
            NodeKind::Tag(ref tag) => self.render_tag(doc, node, tag),
            NodeKind::Text(ref text) => {
                self.out.push_str(&text.content);
                Ok(())
            }
            NodeKind::Interpolation(ref interp) => {
                match ok!(self.eval_lenient(doc, node, &interp.expr)) {
                    Some(value) => self.write_value(&value, interp.unescaped),
                    None => {
                        let marker = if interp.unescaped { '!' } else { '#' };
                        let _ = write!(self.out, "{}{{{}}}", marker, interp.expr);
                    }
                }
                Ok(())
            }
            NodeKind::Code(ref code) => {
                let value = ok!(self.eval.eval(&code.code));
                if code.buffered {
                    self.write_value(&value, code.unescaped);
                }
                Ok(())
            }
            NodeKind::Conditional(ref cond) => self.render_conditional(doc, node, cond),
            NodeKind::Loop(ref lp) if lp.is_while => self.render_while(doc, node, lp),
            NodeKind::Loop(ref lp) => self.render_each(doc, node, lp),
            NodeKind::MixinDef(ref def) => {
                self.mixins.insert(
                    def.name.clone(),
                    NodeRef {
                        doc: doc.clone(),
                        id,
                    },
                );
                Ok(())
            }
            NodeKind::MixinCall(ref call) => self.render_mixin_call(doc, id, node, call),
            NodeKind::Include(ref include) => self.render_include(doc, include),
            // handled when the document is rendered
            NodeKind::Extends(_) => Ok(()),
            NodeKind::Block(ref block) => self.render_block(doc, id, block),
            NodeKind::Comment(ref comment) => {
                if comment.buffered && self.env.include_comments {
                    let mut content = Cow::Borrowed(comment.content.as_str());
                    while content.contains("--") {
                        content = Cow::Owned(content.replace("--", "- -"));
                    }
                    let _ = write!(self.out, "<!--{content}-->");
                }
                Ok(())
            }
            NodeKind::Case(ref case) => self.render_case(doc, node, case),
            NodeKind::When(ref when) => self.render_nodes(doc, &when.body),
        }
    }

    /// Evaluates an expression whose failure degrades to `None`.
    ///
    /// Running out of fuel still aborts the render.
    fn eval_lenient(
        &mut self,
        doc: &Doc,
        node: &Node,
        source: &str,
    ) -> Result<Option<Value>, Error> {
        match self.eval.eval(source) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::OutOfFuel => Err(err),
            Err(err) => {
                let err = attach_location(doc, node, err);
                log::warn!("evaluation of `{source}` failed, continuing: {err}");
                self.diagnostics.push(err);
                Ok(None)
            }
        }
    }

    fn is_truthy(&mut self, doc: &Doc, node: &Node, source: &str) -> Result<bool, Error> {
        Ok(match ok!(self.eval_lenient(doc, node, source)) {
            Some(value) => !matches!(
                value.to_string().as_str(),
                "false" | "null" | "undefined" | "0" | ""
            ),
            None => false,
        })
    }

    fn write_value(&mut self, value: &Value, unescaped: bool) {
        if value.is_nullish() {
            return;
        }
        if unescaped {
            let _ = write!(self.out, "{value}");
        } else {
            let _ = write!(self.out, "{}", HtmlEscape(&value.to_string()));
        }
    }

    fn render_tag(&mut self, doc: &Rc<Doc>, node: &Node, tag: &Tag) -> Result<(), Error> {
        if tag.name.is_empty() {
            return self.render_nodes(doc, &tag.children);
        }
        self.out.push('<');
        self.out.push_str(&tag.name);
        ok!(self.render_attributes(doc, node, &tag.attributes));
        if tag.self_closing {
            self.out.push_str("/>");
            return Ok(());
        }
        if VOID_ELEMENTS.contains(&tag.name.as_str()) {
            self.out.push_str(if self.xml { "/>" } else { ">" });
            return Ok(());
        }
        self.out.push('>');
        ok!(self.render_nodes(doc, &tag.children));
        let _ = write!(self.out, "</{}>", tag.name);
        Ok(())
    }

    fn render_attributes(
        &mut self,
        doc: &Doc,
        node: &Node,
        attributes: &[Attribute],
    ) -> Result<(), Error> {
        // (name, value) in output order, `None` marks a boolean attribute
        let mut rendered: Vec<(&str, Option<String>)> = Vec::with_capacity(attributes.len());
        let mut classes: Vec<String> = Vec::new();

        for attr in attributes {
            let is_class = attr.name == "class";
            let value = match attr.value {
                None => None,
                Some(ref value) if !attr.is_expression => Some(value.clone()),
                Some(ref source) => {
                    let value = match ok!(self.eval_lenient(doc, node, source)) {
                        Some(value) => value,
                        None => continue,
                    };
                    let value = if is_class {
                        class_string(&value)
                    } else {
                        match value {
                            Value::Undefined | Value::Null | Value::Bool(false) => continue,
                            Value::Bool(true) => {
                                rendered.push((&attr.name, None));
                                continue;
                            }
                            other => other.to_string(),
                        }
                    };
                    Some(if attr.unescaped {
                        value
                    } else {
                        HtmlEscape(&value).to_string()
                    })
                }
            };
            match value {
                Some(value) if is_class => {
                    if classes.is_empty() {
                        rendered.push(("class", Some(String::new())));
                    }
                    classes.push(value);
                }
                value => rendered.push((&attr.name, value)),
            }
        }

        for (name, value) in rendered {
            match value {
                Some(_) if name == "class" => {
                    let joined = classes
                        .iter()
                        .filter(|x| !x.is_empty())
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(" ");
                    if !joined.is_empty() {
                        let _ = write!(self.out, " class=\"{joined}\"");
                    }
                }
                Some(value) => {
                    let _ = write!(self.out, " {name}=\"{value}\"");
                }
                None if self.xml => {
                    let _ = write!(self.out, " {name}=\"{name}\"");
                }
                None => {
                    let _ = write!(self.out, " {name}");
                }
            }
        }
        Ok(())
    }

    fn render_conditional(
        &mut self,
        doc: &Rc<Doc>,
        node: &Node,
        cond: &Conditional,
    ) -> Result<(), Error> {
        let truthy = ok!(self.is_truthy(doc, node, &cond.condition));
        if truthy != cond.unless {
            self.render_nodes(doc, &cond.then_branch)
        } else if let Some(ref else_branch) = cond.else_branch {
            self.render_nodes(doc, else_branch)
        } else {
            Ok(())
        }
    }

    fn render_each(&mut self, doc: &Rc<Doc>, node: &Node, lp: &Loop) -> Result<(), Error> {
        let limit = self.env.max_loop_iterations;
        let iterable = ok!(self.eval_lenient(doc, node, &lp.iterable));
        let count = match iterable.as_ref().map(|x| x.get_attr("length")) {
            Some(Value::Number(n)) if n.fract() == 0.0 && n > 0.0 => {
                if n > limit as f64 {
                    return Err(Error::new(
                        ErrorKind::LoopLimitExceeded,
                        format!("each loop over {n} items exceeds the limit of {limit} iterations"),
                    ));
                }
                n as usize
            }
            _ => 0,
        };
        let iterable = match iterable {
            Some(iterable) if count > 0 => iterable,
            _ => {
                return match lp.else_branch {
                    Some(ref else_branch) => self.render_nodes(doc, else_branch),
                    None => Ok(()),
                }
            }
        };

        for idx in 0..count {
            ok!(self.eval.track_iteration());
            self.eval.push_scope();
            self.eval
                .declare_variable(&lp.item, iterable.get_item(&Value::from(idx)));
            if let Some(ref index) = lp.index {
                self.eval.declare_variable(index, Value::from(idx));
            }
            let rv = self.render_nodes(doc, &lp.body);
            self.eval.pop_scope();
            ok!(rv);
        }
        Ok(())
    }

    fn render_while(&mut self, doc: &Rc<Doc>, node: &Node, lp: &Loop) -> Result<(), Error> {
        let limit = self.env.max_loop_iterations;
        let mut iterations = 0;
        while ok!(self.is_truthy(doc, node, &lp.iterable)) {
            if iterations >= limit {
                return Err(Error::new(
                    ErrorKind::LoopLimitExceeded,
                    format!("while loop did not finish within {limit} iterations"),
                ));
            }
            iterations += 1;
            ok!(self.eval.track_iteration());
            self.eval.push_scope();
            let rv = self.render_nodes(doc, &lp.body);
            self.eval.pop_scope();
            ok!(rv);
        }
        match lp.else_branch {
            Some(ref else_branch) if iterations == 0 => self.render_nodes(doc, else_branch),
            _ => Ok(()),
        }
    }

    fn render_case(&mut self, doc: &Rc<Doc>, node: &Node, case: &Case) -> Result<(), Error> {
        if let Some(subject) = ok!(self.eval_lenient(doc, node, &case.subject)) {
            let subject = subject.to_string();
            for &id in &case.whens {
                if let NodeKind::When(ref when) = doc.ast[id].kind {
                    if when.values.iter().any(|value| *value == subject) {
                        return self.render_node(doc, id);
                    }
                }
            }
        }
        match case.default {
            Some(ref default) => self.render_nodes(doc, default),
            None => Ok(()),
        }
    }

    fn render_mixin_call(
        &mut self,
        doc: &Rc<Doc>,
        id: NodeId,
        node: &Node,
        call: &MixinCall,
    ) -> Result<(), Error> {
        let mixin = match self.mixins.get(&call.name) {
            Some(mixin) => mixin.clone(),
            None => {
                return Err(Error::new(
                    ErrorKind::MixinNotFound,
                    format!("mixin `{}` is not defined", call.name),
                ))
            }
        };
        let def = match mixin.doc.ast[mixin.id].kind {
            NodeKind::MixinDef(ref def) => def,
            _ => return Ok(()),
        };
        // arguments see the caller's scope
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(ok!(self.eval_lenient(doc, node, arg)).unwrap_or_default());
        }
        let attributes = ok!(self.mixin_attributes(doc, node, &call.attributes));

        self.eval.push_scope();
        let mut args = args.into_iter();
        for param in &def.params {
            self.eval
                .declare_variable(param, args.next().unwrap_or_default());
        }
        if let Some(ref rest) = def.rest {
            self.eval
                .declare_variable(rest, Value::from_array(args.collect()));
        }
        self.eval.declare_variable("attributes", attributes);

        let rv = match self.incr_depth(CALL_RECURSION_COST) {
            Ok(()) => {
                self.callers.push(call.body.as_ref().map(|_| NodeRef {
                    doc: doc.clone(),
                    id,
                }));
                let rv = self.render_nodes(&mixin.doc, &def.body);
                self.callers.pop();
                self.decr_depth(CALL_RECURSION_COST);
                rv
            }
            Err(err) => Err(err),
        };
        self.eval.pop_scope();
        rv
    }

    fn mixin_attributes(
        &mut self,
        doc: &Doc,
        node: &Node,
        attributes: &[Attribute],
    ) -> Result<Value, Error> {
        let mut map = ValueMap::new();
        for attr in attributes {
            let value = match attr.value {
                None => Value::Bool(true),
                Some(ref value) if !attr.is_expression => Value::from(value.as_str()),
                Some(ref source) => match ok!(self.eval_lenient(doc, node, source)) {
                    Some(value) => value,
                    None => continue,
                },
            };
            let value = match map.get(&attr.name) {
                Some(prev) if attr.name == "class" => Value::from(format!("{prev} {value}")),
                _ => value,
            };
            map.insert(attr.name.clone(), value);
        }
        Ok(Value::from_object(map))
    }

    fn render_block(&mut self, doc: &Rc<Doc>, id: NodeId, block: &Block) -> Result<(), Error> {
        if block.name.is_empty() {
            return self.render_caller_body();
        }

        let mut parts = vec![NodeRef {
            doc: doc.clone(),
            id,
        }];
        if let Some(layers) = self.overrides[doc.overrides].get(&block.name) {
            let mut layers: Vec<&Layer> =
                layers.iter().filter(|x| x.level < doc.level).collect();
            // most distant ancestor first, most derived child last
            layers.sort_by(|a, b| b.level.cmp(&a.level));
            for layer in layers {
                let mode = match layer.block.doc.ast[layer.block.id].kind {
                    NodeKind::Block(ref block) => block.mode,
                    _ => continue,
                };
                match mode {
                    BlockMode::Replace => parts = vec![layer.block.clone()],
                    BlockMode::Append => parts.push(layer.block.clone()),
                    BlockMode::Prepend => parts.insert(0, layer.block.clone()),
                }
            }
        }

        for part in parts {
            if let NodeKind::Block(ref block) = part.doc.ast[part.id].kind {
                ok!(self.render_nodes(&part.doc, &block.body));
            }
        }
        Ok(())
    }

    /// Renders the body passed to the innermost active mixin call.
    fn render_caller_body(&mut self) -> Result<(), Error> {
        let caller = match self.callers.pop() {
            Some(caller) => caller,
            None => return Ok(()),
        };
        let rv = match caller {
            Some(ref call) => match call.doc.ast[call.id].kind {
                NodeKind::MixinCall(MixinCall {
                    body: Some(ref body),
                    ..
                }) => self.render_nodes(&call.doc, body),
                _ => Ok(()),
            },
            None => Ok(()),
        };
        self.callers.push(caller);
        rv
    }

    fn render_include(&mut self, doc: &Rc<Doc>, include: &Include) -> Result<(), Error> {
        let (path, source) = ok!(self.load(doc, &include.path, ErrorKind::IncludeNotFound));
        if path.extension().map_or(false, |ext| ext != "pug") {
            log::debug!("including {} verbatim", path.display());
            self.out.push_str(&source);
            return Ok(());
        }

        let hash = content_hash(&source);
        let key = if self.xml {
            format!("{} (xml)", path.display())
        } else {
            path.display().to_string()
        };
        if let Some(ref cache) = self.env.cache {
            let mut cache = cache.lock().unwrap_or_else(|err| err.into_inner());
            if let Some(html) = cache.get_if_valid(&key, hash) {
                log::debug!("cache hit for include {key}");
                self.out.push_str(html);
                return Ok(());
            }
        }

        log::debug!("including {}", path.display());
        let ast = ok!(parse_related(&path, &source, ErrorKind::IncludeParseError));
        let cacheable = is_static(&ast);
        let extends = ast
            .document()
            .children
            .iter()
            .any(|&id| matches!(ast[id].kind, NodeKind::Extends(_)));
        let (level, overrides) = if extends {
            (0, self.new_overrides())
        } else {
            (doc.level, doc.overrides)
        };
        let included = Rc::new(Doc {
            ast,
            source,
            name: Some(path.display().to_string()),
            dir: parent_dir(&path),
            level,
            overrides,
        });

        let start = self.out.len();
        ok!(self.incr_depth(CALL_RECURSION_COST));
        self.file_stack.push(path);
        let rv = self.render_document(included, false);
        self.file_stack.pop();
        self.decr_depth(CALL_RECURSION_COST);
        ok!(rv);

        if cacheable {
            if let Some(ref cache) = self.env.cache {
                let mut cache = cache.lock().unwrap_or_else(|err| err.into_inner());
                cache.put(key, self.out[start..].to_string(), hash);
            }
        }
        Ok(())
    }
}

fn attach_location(doc: &Doc, node: &Node, mut err: Error) -> Error {
    err.set_position(node.line(), node.column());
    if let Some(ref name) = doc.name {
        err.set_name(name);
    }
    err.set_template_source(&doc.source);
    err
}

fn display_name(doc: &Doc) -> &str {
    doc.name.as_deref().unwrap_or("<string>")
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn parse_related(path: &Path, source: &str, kind: ErrorKind) -> Result<Arc<Ast>, Error> {
    parse(source).map(Arc::new).map_err(|mut err| {
        let name = path.display().to_string();
        err.set_name(&name);
        err.set_template_source(source);
        Error::new(kind, format!("could not parse {name}")).with_source(err)
    })
}

fn is_piped(kind: &NodeKind) -> bool {
    match kind {
        NodeKind::Text(text) => text.raw,
        NodeKind::Tag(tag) => tag.name.is_empty(),
        _ => false,
    }
}

/// Does rendering this tree never touch the evaluator or other files?
///
/// Only such includes produce the same output on every render.
fn is_static(ast: &Ast) -> bool {
    ast.iter().all(|(_, node)| match node.kind {
        NodeKind::Document(_) | NodeKind::Text(_) => true,
        NodeKind::Comment(ref comment) => !comment.buffered,
        NodeKind::Tag(ref tag) => !tag.attributes.iter().any(|x| x.is_expression),
        _ => false,
    })
}

/// Flattens a `class` attribute value.
///
/// Arrays join their truthy items, objects contribute the keys with a
/// truthy value.
fn class_string(value: &Value) -> String {
    match value {
        Value::Undefined | Value::Null | Value::Bool(false) => String::new(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .filter(|x| x.is_true())
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .borrow()
            .iter()
            .filter(|(_, v)| v.is_true())
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

fn doctype_declaration(doctype: &str) -> Cow<'static, str> {
    Cow::Borrowed(match doctype.to_ascii_lowercase().as_str() {
        "html" => "<!DOCTYPE html>",
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#,
        "transitional" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#
        }
        "strict" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#
        }
        "frameset" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#
        }
        "1.1" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
        "basic" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#
        }
        "mobile" => {
            r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#
        }
        "plist" => {
            r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#
        }
        _ => return Cow::Owned(format!("<!DOCTYPE {doctype}>")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    use crate::script::ScriptEngine;

    fn render(source: &str) -> (String, Vec<Error>) {
        let env = Environment::new();
        let mut engine = ScriptEngine::new();
        let mut gen = Generator::new(&env, &mut engine);
        gen.render_template(
            Arc::new(parse(source).unwrap()),
            source.into(),
            None,
            None,
            Path::new("."),
        )
        .unwrap();
        gen.finish()
    }

    #[test]
    fn test_void_elements() {
        assert_eq!(render("br\nimg(src=\"a.png\")").0, "<br><img src=\"a.png\">");
        assert_eq!(
            render("doctype xml\nbr").0,
            "<?xml version=\"1.0\" encoding=\"utf-8\" ?><br/>"
        );
        assert_eq!(render("foo/").0, "<foo/>");
    }

    #[test]
    fn test_class_merging() {
        let (html, diagnostics) =
            render("- var extra = ['x', null, 'y']\ndiv.a(class=extra id=\"i\" class=\"b\")");
        assert_eq!(html, "<div class=\"a x y b\" id=\"i\"></div>");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_boolean_attributes() {
        assert_eq!(
            render("input(checked disabled=false readonly=true)").0,
            "<input checked readonly>"
        );
        assert!(render("doctype strict\ninput(checked)")
            .0
            .ends_with("<input checked=\"checked\"/>"));
    }

    #[test]
    fn test_failed_interpolation_is_kept() {
        let (html, diagnostics) = render("p hi #{missing.name}");
        assert_eq!(html, "<p>hi #{missing.name}</p>");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind(), ErrorKind::EvalRuntime);
        assert_eq!(diagnostics[0].line(), Some(1));
    }

    #[test]
    fn test_doctype_declarations() {
        assert_eq!(doctype_declaration("HTML"), "<!DOCTYPE html>");
        assert_eq!(doctype_declaration("svg"), "<!DOCTYPE svg>");
    }

    #[test]
    fn test_comment_dashes() {
        let mut env = Environment::new();
        env.set_include_comments(true);
        let mut engine = ScriptEngine::new();
        let mut gen = Generator::new(&env, &mut engine);
        let source = "// a -- b\n//- hidden";
        gen.render_template(
            Arc::new(parse(source).unwrap()),
            source.into(),
            None,
            None,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(gen.finish().0, "<!-- a - - b-->");
    }
}
