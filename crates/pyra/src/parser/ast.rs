//! The abstract syntax tree produced by the parser.
//!
//! Everything here is already desugared: `for`, `with`, list comprehensions,
//! `elif`, and inline `if`/`else` chains never appear as their own node
//! kinds. The parser rewrites them into the primitives below (`While`,
//! `Try`, `Assign`, `Expr::Block`) while it builds the tree, so the
//! compiler only ever has to lower a small, closed set of shapes. Compound
//! assignment (`+=` and friends) is the one exception: per the
//! specification it stays a distinct node pairing a binary operator with an
//! assignment target, rather than expanding to a plain `Assign` of a
//! `BinOp`, since the target expression must only be evaluated once.

use std::rc::Rc;

use crate::intern::Symbol;
use crate::source::CodeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Invert,
    /// `not x`: not a dunder, computed from truthiness (`Heap::py_bool`) and
    /// negated; never dispatches through `method_symbol`.
    Not,
    Hash,
    Len,
    Bool,
    Int,
    Float,
    Str,
    Repr,
    Index,
}

impl UnaryOp {
    /// The dunder this operator dispatches through when invoked as a
    /// builtin function call (`len(x)`, `hash(x)`, ...) or as prefix syntax
    /// (`-x`, `~x`, `+x`). `Not` has no entry: see its doc comment.
    pub fn method_symbol(self) -> Option<Symbol> {
        use crate::intern::sym::*;
        Some(match self {
            Self::Pos => POS,
            Self::Neg => NEG,
            Self::Invert => INVERT,
            Self::Not => return None,
            Self::Hash => HASH,
            Self::Len => LEN,
            Self::Bool => BOOL,
            Self::Int => INT,
            Self::Float => FLOAT,
            Self::Str => STR,
            Self::Repr => REPR,
            Self::Index => INDEX,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl BinOp {
    /// The attribute name the compiler dispatches this operator through.
    /// Kept as a single fixed table per the specification so user classes
    /// overriding an operator behave exactly like a builtin type would.
    pub fn method_symbol(self) -> Symbol {
        use crate::intern::sym::*;
        match self {
            Self::Add => ADD,
            Self::Sub => SUB,
            Self::Mul => MUL,
            Self::TrueDiv => TRUEDIV,
            Self::FloorDiv => FLOORDIV,
            Self::Mod => MOD,
            Self::Pow => POW,
            Self::BitAnd => AND,
            Self::BitOr => OR,
            Self::BitXor => XOR,
            Self::LShift => LSHIFT,
            Self::RShift => RSHIFT,
            Self::Lt => LT,
            Self::Le => LE,
            Self::Eq => EQ,
            Self::Ne => NE,
            Self::Gt => GT,
            Self::Ge => GE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// A parameter list shared by `def` and `lambda`.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub names: Vec<Symbol>,
    /// Default-value expressions for the trailing `names`, evaluated once
    /// at `def`-execution time, in declaration order.
    pub defaults: Vec<Expr>,
    pub vararg: Option<Symbol>,
    pub kwarg: Option<Symbol>,
}

/// One compiled function body: a `def`, a `lambda`, or the implicit
/// top-level module function the parser roots its output at.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Symbol,
    pub params: Params,
    pub body: Vec<Stmt>,
    pub range: CodeRange,
    /// `true` for `def`s compiled directly inside a `class` body; drives
    /// unbound-to-bound method promotion on attribute access.
    pub is_method: bool,
    /// `true` for the synthetic function the compiler wraps a `class` body
    /// in. Its locals become the class's attribute table once it returns,
    /// rather than being discarded like an ordinary call frame.
    pub is_class_body: bool,

    // -- filled in by capture resolution (see `parser::resolve_captures`) --
    /// True locals: written somewhere in this function's own body (not a
    /// nested def's) and not a parameter, `global`, or `nonlocal` name.
    pub locals: Vec<Symbol>,
    /// Free variables resolved to an enclosing function's cell, i.e. names
    /// referenced-but-not-written here (other than via explicit
    /// `nonlocal`), or explicitly declared `nonlocal`.
    pub local_captures: Vec<Symbol>,
    /// Names declared `global`.
    pub global_captures: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(Symbol),
    Attribute { obj: Expr, attr: Symbol },
    Index { obj: Expr, index: Expr },
    /// Tuple/list destructuring; the RHS must be an iterable of exactly
    /// this many elements.
    Pack(Vec<AssignTarget>),
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    /// `None` for a bare `except:` (must be the last handler).
    pub exc_type: Option<Expr>,
    pub bind: Option<Symbol>,
    pub body: Vec<Stmt>,
    pub range: CodeRange,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: AssignTarget,
        value: Expr,
        range: CodeRange,
    },
    AugAssign {
        target: AssignTarget,
        op: BinOp,
        value: Expr,
        range: CodeRange,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Break(CodeRange),
    Continue(CodeRange),
    Pass,
    Return {
        value: Option<Expr>,
        range: CodeRange,
    },
    Raise {
        value: Option<Expr>,
        range: CodeRange,
    },
    Global(Vec<Symbol>),
    Nonlocal(Vec<Symbol>),
    FunctionDef(Rc<FunctionDef>),
    ClassDef {
        name: Symbol,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
        range: CodeRange,
    },
    Import {
        module: Symbol,
        alias: Symbol,
        range: CodeRange,
    },
    ImportFrom {
        module: Symbol,
        /// `(imported name, local alias)` pairs; empty with `star = true`
        /// for `from m import *`.
        names: Vec<(Symbol, Symbol)>,
        star: bool,
        range: CodeRange,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Vec<Stmt>,
        range: CodeRange,
    },
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    /// `*expr` at a call site: iterates `expr` and splats its elements.
    Starred(Expr),
}

#[derive(Debug, Clone)]
pub enum Kwarg {
    Named(Symbol, Expr),
    /// `**expr` at a call site: `expr` must evaluate to a `dict` whose
    /// keys are all strings.
    DoubleStarred(Expr),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub func: Box<Expr>,
    pub args: Vec<Arg>,
    pub kwargs: Vec<Kwarg>,
    pub range: CodeRange,
}

#[derive(Debug, Clone)]
pub struct SliceExpr {
    pub start: Option<Box<Expr>>,
    pub stop: Option<Box<Expr>>,
    pub step: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    NoneLit,
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    Name(Symbol, CodeRange),
    Tuple(Vec<Expr>),
    ListLit(Vec<Expr>),
    DictLit(Vec<(Expr, Expr)>),
    SetLit(Vec<Expr>),
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        range: CodeRange,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        range: CodeRange,
    },
    BoolOp {
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `a in b` / `a not in b`; compiles to a call to `b.__contains__(a)`
    /// optionally followed by a boolean negation.
    Contains {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    /// `a is b` / `a is not b`; a primitive identity comparison.
    Is {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    Conditional {
        cond: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call(Call),
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
        range: CodeRange,
    },
    Slice(SliceExpr),
    Attribute {
        obj: Box<Expr>,
        attr: Symbol,
        range: CodeRange,
    },
    Lambda(Rc<FunctionDef>),
    /// A desugared list comprehension (or any other construct that needs
    /// to run statements to produce a value): run `stmts`, then evaluate
    /// to `result`.
    Block {
        stmts: Vec<Stmt>,
        result: Box<Expr>,
    },
}

impl Expr {
    pub fn range(&self) -> CodeRange {
        match self {
            Expr::Name(_, r)
            | Expr::UnaryOp { range: r, .. }
            | Expr::BinOp { range: r, .. }
            | Expr::Index { range: r, .. }
            | Expr::Attribute { range: r, .. } => *r,
            Expr::Call(c) => c.range,
            _ => CodeRange::default(),
        }
    }
}
