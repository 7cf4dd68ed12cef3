//! Path query AST (spec §4.7 step 2). Grounded on `mdb/query/ast.py`'s node
//! factories, restated as a plain `enum` instead of Python-AST fragments —
//! this crate has no `eval`, so the compiler (`query::compiler`) lowers this
//! tree directly into closures rather than compiling to a host language AST.

/// A traversal axis (`mdb/query/tree.py`'s `self`/`parent`/`child`/... step
/// constructors). Spelling matches the source's own (including its
/// "preceeding" typo, restated verbatim in `spec.md` §6's reserved-word
/// list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    SelfAxis,
    Parent,
    Child,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    Descendant,
    DescendantOrSelf,
    FollowingSibling,
    Following,
    PreceedingSibling,
    Preceeding,
}

impl Axis {
    pub fn by_name(name: &str) -> Option<Axis> {
        Some(match name {
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "child" => Axis::Child,
            "attribute" => Axis::Attribute,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "following" => Axis::Following,
            "preceeding-sibling" => Axis::PreceedingSibling,
            "preceeding" => Axis::Preceeding,
            _ => return None,
        })
    }
}

/// What an axis step matches against (`mdb/query/parse.py`'s `NodeTest`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// `foo` or `Foo`. The compiler decides name-test vs. kind-test by
    /// whether the first character is an uppercase ASCII letter (spec §4.7
    /// step 3).
    Name(String),
    /// `*`.
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Is,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Some,
    Every,
}

/// A single `$v in expr` clause of a `for`/`some`/`every` binding list.
#[derive(Debug, Clone)]
pub struct VarIn {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// A `/`-or-`//`-joined chain of steps (spec §4.7 step 2
    /// `RelativePathExpr`). An absolute path prepends an implicit
    /// [`Axis::SelfAxis`] `root()` step, grounded on `mdb/query/parse.py`'s
    /// `ROOT = ast.Axis(ast.Name('self'), ast.ReduceAxis(ast.Name('root'), []))`.
    Steps(Vec<Expr>),
    /// One step of a path: `axis::test`, or an abbreviated form lowered to
    /// one of `child`/`attribute`/`parent`/`descendant-or-self` by the
    /// parser.
    AxisStep { axis: Axis, test: NodeTest },
    /// `[expr]` — filters the current step's output by focus.
    Predicate(Box<Expr>),
    /// A non-axis primary expression used as a path step (literal, `$var`,
    /// `(...)`, `.`, function call) — spec §4.7 step 3 "Filter".
    Filter(Box<Expr>),
    /// `.`
    ContextItem,
    /// A top-level comma-separated `ExprList` with more than one member:
    /// each member is evaluated independently against the same input
    /// sequence (spec §4.7's `Expr(*expr)` factory), not concatenated.
    Sequence(Vec<Expr>),
    FunctionCall { name: String, args: Vec<Expr> },
    Var(String),
    Integer(i64),
    Decimal(f64),
    Str(String),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    UnaryMinus(Box<Expr>),
    BinOp { op: BinOpKind, left: Box<Expr>, right: Box<Expr> },
    CmpOp { op: CmpOpKind, left: Box<Expr>, right: Box<Expr> },
    Range { from: Box<Expr>, to: Box<Expr> },
    For { bindings: Vec<VarIn>, body: Box<Expr> },
    Quantified { quant: Quantifier, bindings: Vec<VarIn>, body: Box<Expr> },
    If { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
}
