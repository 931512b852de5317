use std::fmt;
use std::ops::Index;

use crate::compiler::tokens::Span;

/// Handle to a node inside an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The position of the node in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single node with location info.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    /// The 1-indexed line of the node.
    pub fn line(&self) -> usize {
        self.span.line as usize
    }

    /// The 1-indexed column of the node.
    pub fn column(&self) -> usize {
        self.span.col as usize
    }
}

/// The closed set of node variants.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Document(Document),
    Tag(Tag),
    Text(Text),
    Interpolation(Interpolation),
    Code(Code),
    Conditional(Conditional),
    Loop(Loop),
    MixinDef(MixinDef),
    MixinCall(MixinCall),
    Include(Include),
    Extends(Extends),
    Block(Block),
    Comment(Comment),
    Case(Case),
    When(When),
}

/// The root of a template.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub children: Vec<NodeId>,
    pub doctype: Option<String>,
}

/// An element, or a transparent fragment if the name is empty.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<NodeId>,
    pub self_closing: bool,
}

/// A tag or mixin call attribute.
///
/// An attribute without value is a boolean attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub unescaped: bool,
    pub is_expression: bool,
}

#[derive(Debug, Clone)]
pub struct Text {
    pub content: String,
    /// Set for piped text.
    pub raw: bool,
}

#[derive(Debug, Clone)]
pub struct Interpolation {
    pub expr: String,
    pub unescaped: bool,
}

#[derive(Debug, Clone)]
pub struct Code {
    pub code: String,
    pub buffered: bool,
    pub unescaped: bool,
}

/// `if` / `unless` with an optional else branch.
///
/// `else if` chains are stored as a nested conditional that is the sole
/// node of the else branch.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub condition: String,
    pub then_branch: Vec<NodeId>,
    pub else_branch: Option<Vec<NodeId>>,
    pub unless: bool,
}

/// `each` and `while` loops.
///
/// For while loops `iterable` holds the condition and `item` is empty.
#[derive(Debug, Clone)]
pub struct Loop {
    pub item: String,
    pub index: Option<String>,
    pub iterable: String,
    pub body: Vec<NodeId>,
    pub else_branch: Option<Vec<NodeId>>,
    pub is_while: bool,
}

#[derive(Debug, Clone)]
pub struct MixinDef {
    pub name: String,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MixinCall {
    pub name: String,
    pub args: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub body: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct Include {
    pub path: String,
    /// Parsed but not acted upon.
    pub filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Extends {
    pub path: String,
}

/// How a block in a child template combines with the parent's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Replace,
    Append,
    Prepend,
}

/// A named block.  The unnamed block marks a mixin's body slot.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub mode: BlockMode,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub content: String,
    pub buffered: bool,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub subject: String,
    /// Handles to [`When`] nodes.
    pub whens: Vec<NodeId>,
    pub default: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct When {
    pub values: Vec<String>,
    pub body: Vec<NodeId>,
}

/// A parsed template.
///
/// All nodes live in a flat arena and refer to each other through
/// [`NodeId`] handles.  The tree is immutable once parsed.
#[derive(Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Ast {
    pub(crate) fn from_parts(nodes: Vec<Node>, root: NodeId) -> Ast {
        Ast { nodes, root }
    }

    /// The handle of the document node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The document node.
    pub fn document(&self) -> &Document {
        match self[self.root].kind {
            NodeKind::Document(ref doc) => doc,
            _ => unreachable!("the root of a tree is always a document"),
        }
    }

    /// Looks up a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// The number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no nodes.  A parsed tree always has at
    /// least the document.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx as u32), node))
    }

    /// Does this tree define any mixins?
    pub fn defines_mixins(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node.kind, NodeKind::MixinDef(_)))
    }

    fn dump_list(&self, f: &mut fmt::Formatter<'_>, ids: &[NodeId], depth: usize) -> fmt::Result {
        for &id in ids {
            ok!(self.dump(f, id, depth));
        }
        Ok(())
    }

    fn dump(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let indent = depth * 2;
        match self[id].kind {
            NodeKind::Document(ref doc) => {
                ok!(write!(f, "{:indent$}Document", ""));
                if let Some(ref doctype) = doc.doctype {
                    ok!(write!(f, " doctype={doctype}"));
                }
                ok!(writeln!(f));
                self.dump_list(f, &doc.children, depth + 1)
            }
            NodeKind::Tag(ref tag) => {
                ok!(write!(f, "{:indent$}Tag {}", "", tag.name));
                ok!(dump_attributes(f, &tag.attributes));
                if tag.self_closing {
                    ok!(write!(f, " /"));
                }
                ok!(writeln!(f));
                self.dump_list(f, &tag.children, depth + 1)
            }
            NodeKind::Text(ref text) => {
                ok!(write!(f, "{:indent$}Text {:?}", "", text.content));
                if text.raw {
                    ok!(write!(f, " raw"));
                }
                writeln!(f)
            }
            NodeKind::Interpolation(ref interp) => {
                let marker = if interp.unescaped { '!' } else { '#' };
                writeln!(f, "{:indent$}Interpolation {marker}{{{}}}", "", interp.expr)
            }
            NodeKind::Code(ref code) => {
                let marker = match (code.buffered, code.unescaped) {
                    (false, _) => "-",
                    (true, false) => "=",
                    (true, true) => "!=",
                };
                writeln!(f, "{:indent$}Code {marker} {}", "", code.code)
            }
            NodeKind::Conditional(ref cond) => {
                let kw = if cond.unless { "Unless" } else { "If" };
                ok!(writeln!(f, "{:indent$}{kw} {}", "", cond.condition));
                ok!(self.dump_list(f, &cond.then_branch, depth + 1));
                self.dump_else(f, cond.else_branch.as_deref(), depth)
            }
            NodeKind::Loop(ref lp) => {
                if lp.is_while {
                    ok!(writeln!(f, "{:indent$}While {}", "", lp.iterable));
                } else {
                    ok!(write!(f, "{:indent$}Each {}", "", lp.item));
                    if let Some(ref index) = lp.index {
                        ok!(write!(f, ", {index}"));
                    }
                    ok!(writeln!(f, " in {}", lp.iterable));
                }
                ok!(self.dump_list(f, &lp.body, depth + 1));
                self.dump_else(f, lp.else_branch.as_deref(), depth)
            }
            NodeKind::MixinDef(ref def) => {
                let mut params = def.params.clone();
                if let Some(ref rest) = def.rest {
                    params.push(format!("...{rest}"));
                }
                ok!(writeln!(f, "{:indent$}Mixin {}({})", "", def.name, params.join(", ")));
                self.dump_list(f, &def.body, depth + 1)
            }
            NodeKind::MixinCall(ref call) => {
                ok!(write!(f, "{:indent$}Call {}({})", "", call.name, call.args.join(", ")));
                ok!(dump_attributes(f, &call.attributes));
                ok!(writeln!(f));
                match call.body {
                    Some(ref body) => self.dump_list(f, body, depth + 1),
                    None => Ok(()),
                }
            }
            NodeKind::Include(ref include) => {
                ok!(write!(f, "{:indent$}Include {}", "", include.path));
                if let Some(ref filter) = include.filter {
                    ok!(write!(f, " :{filter}"));
                }
                writeln!(f)
            }
            NodeKind::Extends(ref extends) => {
                writeln!(f, "{:indent$}Extends {}", "", extends.path)
            }
            NodeKind::Block(ref block) => {
                ok!(write!(f, "{:indent$}Block", ""));
                if !block.name.is_empty() {
                    ok!(write!(f, " {}", block.name));
                }
                match block.mode {
                    BlockMode::Replace => {}
                    BlockMode::Append => ok!(write!(f, " append")),
                    BlockMode::Prepend => ok!(write!(f, " prepend")),
                }
                ok!(writeln!(f));
                self.dump_list(f, &block.body, depth + 1)
            }
            NodeKind::Comment(ref comment) => {
                ok!(write!(f, "{:indent$}Comment {:?}", "", comment.content));
                if !comment.buffered {
                    ok!(write!(f, " unbuffered"));
                }
                writeln!(f)
            }
            NodeKind::Case(ref case) => {
                ok!(writeln!(f, "{:indent$}Case {}", "", case.subject));
                ok!(self.dump_list(f, &case.whens, depth + 1));
                if let Some(ref default) = case.default {
                    ok!(writeln!(f, "{:1$}Default", "", indent + 2));
                    ok!(self.dump_list(f, default, depth + 2));
                }
                Ok(())
            }
            NodeKind::When(ref when) => {
                ok!(writeln!(f, "{:indent$}When {}", "", when.values.join(", ")));
                self.dump_list(f, &when.body, depth + 1)
            }
        }
    }

    fn dump_else(
        &self,
        f: &mut fmt::Formatter<'_>,
        branch: Option<&[NodeId]>,
        depth: usize,
    ) -> fmt::Result {
        if let Some(branch) = branch {
            ok!(writeln!(f, "{:1$}Else", "", depth * 2));
            ok!(self.dump_list(f, branch, depth + 1));
        }
        Ok(())
    }
}

fn dump_attributes(f: &mut fmt::Formatter<'_>, attributes: &[Attribute]) -> fmt::Result {
    for attr in attributes {
        match (&attr.value, attr.is_expression) {
            (None, _) => ok!(write!(f, " {}", attr.name)),
            (Some(value), false) => ok!(write!(f, " {}={:?}", attr.name, value)),
            (Some(value), true) => {
                let op = if attr.unescaped { "!=" } else { "=" };
                ok!(write!(f, " {}{}({})", attr.name, op, value));
            }
        }
    }
    Ok(())
}

impl Index<NodeId> for Ast {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

/// Renders the tree as an indented outline, one node per line.
impl fmt::Debug for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump(f, self.root, 0)
    }
}

/// Incrementally builds the arena while parsing.
#[derive(Default)]
pub(crate) struct AstBuilder {
    nodes: Vec<Node>,
}

impl AstBuilder {
    pub fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, span });
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn finish(self, root: NodeId) -> Ast {
        Ast::from_parts(self.nodes, root)
    }
}
