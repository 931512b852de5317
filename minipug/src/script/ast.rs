use crate::script::value::Value;

/// A binary operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOpKind {
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A short-circuiting operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogicalOpKind {
    And,
    Or,
    Nullish,
}

/// A unary operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    Neg,
    Plus,
    TypeOf,
}

/// An expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A primitive literal.
    Const(Value),
    /// A variable lookup.
    Var(String),
    /// A template literal, the parts are concatenated.
    Template(Vec<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// `a.b` or `a?.b`
    GetAttr {
        expr: Box<Expr>,
        name: String,
        optional: bool,
    },
    /// `a[b]` or `a?.[b]`
    GetItem {
        expr: Box<Expr>,
        subscript: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    UnaryOp {
        op: UnaryOpKind,
        expr: Box<Expr>,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    LogicalOp {
        op: LogicalOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfExpr {
        test: Box<Expr>,
        true_expr: Box<Expr>,
        false_expr: Box<Expr>,
    },
    /// Plain or compound assignment, `op` is set for compound forms.
    Assign {
        target: Box<Expr>,
        op: Option<BinOpKind>,
        value: Box<Expr>,
    },
    /// `++` and `--`.
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
}

/// A statement.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `var`, `let` or `const` with its declarators.
    Declare(Vec<(String, Option<Expr>)>),
    Expr(Expr),
}
