//! The expression tree the parser builds and the compiler consumes.
//!
//! Every node carries a `(source, line)` pair so the compiler can stamp
//! each instruction it emits with the line that produced it, which is
//! what ends up in an error's trace.

use arcstr::ArcStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub source: ArcStr,
    pub span: Span,
    pub kind: Expr,
}

impl Node {
    pub fn new(source: ArcStr, line: u32, kind: Expr) -> Self {
        Node { source, span: Span { line }, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrSeg {
    Literal(ArcStr),
    Expr(Box<Node>),
}

/// `field := expr` inside a step's `[ ... ]` key clause: the field being
/// narrowed on and the expression producing the key value to look it up
/// by. For all but a `when` chain's first step, `expr` may reference the
/// aliases bound by earlier steps.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBind {
    pub field: ArcStr,
    pub expr: Box<Node>,
}

/// `alias := field` inside a step's `( ... )` projection clause: which
/// of the matched instance's fields to bind, and under what name.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBind {
    pub alias: ArcStr,
    pub field: ArcStr,
}

/// One join step: `[not|delete] [insert] Schema[key := expr, ...](alias := field, ...)`.
/// `keys` narrows the lookup to an index on the listed fields; empty
/// means a broad (schema-wide) head. `binds` selects which fields of the
/// matching instance become aliases visible to later steps and the body.
/// Only a `when` chain's first step may set `created_only`; every other
/// position only ever sets `negated` (spelled `not` there, never `delete`).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub schema: ArcStr,
    pub negated: bool,
    pub created_only: bool,
    pub keys: Vec<KeyBind>,
    pub binds: Vec<FieldBind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: ArcStr,
    pub value: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDecl {
    /// `var f`: an ordinary stored slot.
    Value { name: ArcStr },
    /// `fun F(args) expr`: recomputed from the listed dependencies.
    Computed { name: ArcStr, depends_on: Vec<ArcStr>, body: Box<Node> },
    /// `F := expr`: a value fixed at schema-definition time, shared by
    /// every instance.
    Constant { name: ArcStr, value: Box<Node> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    Int(i64),
    Real(f64),
    Str(Vec<StrSeg>),
    Ident(ArcStr),
    ListLit(Vec<Node>),
    TreeLit(Vec<(Node, Node)>),

    /// `a op b`, precedence already resolved by the parser.
    BinOp { op: ArcStr, lhs: Box<Node>, rhs: Box<Node> },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    /// `old`: the instance a computed field's body is currently being
    /// evaluated for (meaningful only there).
    Old,

    /// `recv:name(args)` / `recv::op(args)`.
    MethodCall { receiver: Box<Node>, name: ArcStr, args: Vec<Node> },
    Call { callee: Box<Node>, args: Vec<Node> },

    Block(Vec<Node>),
    Var { name: ArcStr, value: Box<Node> },
    Def { name: ArcStr, value: Box<Node> },
    Assign { target: Box<Node>, value: Box<Node> },
    If { cases: Vec<(Node, Node)>, else_branch: Option<Box<Node>> },

    /// `loop ... end`: runs until a `while`/`until`/`exit` inside it jumps
    /// out, or forever if none ever fires.
    Loop(Box<Node>),
    /// `while cond`: exits the nearest enclosing loop when `cond` is
    /// falsy, yielding `nil` as that loop's result. Valid only inside a
    /// `loop`/`for` body.
    While(Box<Node>),
    /// `until cond`: exits the nearest enclosing loop when `cond` is
    /// truthy.
    Until(Box<Node>),
    /// `exit [expr]`: leaves the nearest enclosing loop immediately,
    /// yielding `expr` (or `nil`) as its result.
    Exit(Option<Box<Node>>),
    /// `next`: restarts the nearest enclosing loop's body.
    Next,

    /// `for [var] x[, key] in e do body [else else_body] end` (or `:= e`
    /// in place of `in e`, iterating `e` directly rather than its
    /// `values`). `else_body` runs once, in place of `body`'s last
    /// iteration, if the iterator is exhausted without an `exit`.
    ForIn {
        var: ArcStr,
        key: Option<ArcStr>,
        iter: Box<Node>,
        body: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    Fn { params: Vec<ArcStr>, variadic: bool, body: Box<Node> },
    /// `do body [on name do handler] end`: `handler` becomes the error
    /// target for the whole of `body`; an error raised anywhere inside
    /// (however deeply nested) unwinds the operand stack back to what it
    /// held on entry and runs `handler` with the error bound to `name`.
    Do { body: Box<Node>, handler: Option<(ArcStr, Box<Node>)> },
    /// `with a := e, b := e2 do body end`: binds each declaration in
    /// order, each visible to the next's initializer, then evaluates
    /// `body` with all of them in scope.
    With { bindings: Vec<(ArcStr, Node)>, body: Box<Node> },
    Return(Option<Box<Node>>),

    /// `schema Name [( Parent )] is field/fun/index decls end`
    Schema { name: ArcStr, parent: Option<ArcStr>, fields: Vec<FieldDecl>, indices: Vec<Vec<ArcStr>> },
    /// `insert Name(field := value, ...)`
    Insert { schema: ArcStr, fields: Vec<FieldInit> },
    /// `signal Name(field := value, ...)`
    Signal { schema: ArcStr, fields: Vec<FieldInit> },
    /// `update Name[k := expr, ...](field := value, ...)`
    Update { schema: ArcStr, keys: Vec<KeyBind>, fields: Vec<FieldInit> },
    /// `delete Name[k := expr, ...]`
    Delete { schema: ArcStr, keys: Vec<KeyBind> },
    /// `exists step [, step]* then then_branch [else else_branch] end`:
    /// all steps must match (short-circuiting on the first that doesn't,
    /// each possibly `not`-negated) for `then_branch` to run, each step's
    /// bindings visible to the ones after it and to `then_branch`.
    ExistsThenElse {
        steps: Vec<JoinStep>,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    /// `when step, step, ... do body end`
    When { steps: Vec<JoinStep>, body: Box<Node> },
}
