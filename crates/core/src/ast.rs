//! Shared AST types for the observable-context passes.
//!
//! One closed node set covers the surface shorthand produced by the
//! reader, the canonical context form the passes work on, and the plain
//! expression subset the lowering emits. Every consumer matches node
//! kinds exhaustively.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Provenance
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Provenance {
    pub fn new(file: &str, line: u32, column: u32) -> Self {
        Provenance {
            file: file.to_owned(),
            line,
            column,
        }
    }

    /// Provenance for nodes synthesized by a pass.
    pub fn synthetic() -> Self {
        Provenance::new("<generated>", 0, 0)
    }
}

/// Identity of one observable context, assigned by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

// ──────────────────────────────────────────────
// Literals and operators
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    /// Decimal literal kept as written
    Float(String),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }

    /// Binding strength; higher binds tighter. All binary operators are
    /// left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Coalesce => 3,
            BinaryOp::Or => 4,
            BinaryOp::And => 5,
            BinaryOp::Eq | BinaryOp::Neq => 6,
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => 7,
            BinaryOp::Add | BinaryOp::Sub => 8,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 9,
        }
    }
}

// ──────────────────────────────────────────────
// Functions and bodies
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    Name(String),
    /// `[a, b]` -- destructures an array argument positionally
    Tuple(Vec<String>),
}

impl Param {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Param::Name(n) => vec![n.as_str()],
            Param::Tuple(ns) => ns.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub params: Vec<Param>,
    pub body: Body,
}

// ──────────────────────────────────────────────
// Observable-context nodes
// ──────────────────────────────────────────────

/// One flatten-marker application: `@x`, `@@x`, `@?x`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenExpr {
    pub target: String,
    /// Number of stacked markers, >= 1
    pub depth: u32,
    /// Innermost marker is the nullish variant
    pub nullish: bool,
    pub prov: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOrigin {
    /// `@ => body`
    Arrow,
    /// Produced by desugaring `let @name = E`
    Creation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContextId>,
    pub origin: ContextOrigin,
    /// Explicit dependency list, `@(a, b) => ...`
    pub deps: Option<Vec<String>>,
    pub body: Body,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Always present after desugaring
    pub param: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContextId>,
    pub deps: Option<Vec<String>>,
    pub body: Vec<Stmt>,
    pub catch: Option<CatchClause>,
    pub finally: Option<Vec<Stmt>>,
    pub prov: Provenance,
}

// ──────────────────────────────────────────────
// Expressions and statements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Arrow(Box<Function>),
    Flatten(FlattenExpr),
    Context(Box<ContextExpr>),
    Observe(Box<ObserveExpr>),
}

impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr::Ident(name.to_owned())
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// `receiver.method(args)`
    pub fn method(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
        Expr::call(
            Expr::Member {
                object: Box::new(receiver),
                property: method.to_owned(),
            },
            args,
        )
    }

    pub fn arrow(params: Vec<Param>, body: Body) -> Expr {
        Expr::Arrow(Box::new(Function { params, body }))
    }

    /// Arrow functions, contexts and observation blocks: the nodes whose
    /// bodies the tree walkers count against `max_tree_depth`.
    pub fn opens_scope(&self) -> bool {
        matches!(self, Expr::Arrow(_) | Expr::Context(_) | Expr::Observe(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        prov: Provenance,
    },
    Assign {
        name: String,
        value: Expr,
        prov: Provenance,
    },
    /// `let @name = E`
    Create {
        name: String,
        value: Expr,
        prov: Provenance,
    },
    /// `let @@...@target = E`; target is validated by the desugarer
    ChainCreate {
        markers: u32,
        target: Expr,
        value: Expr,
        prov: Provenance,
    },
    Expr(Expr),
    Return(Option<Expr>),
}

/// A parsed source file: an ordered list of top-level declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub file: String,
    pub body: Vec<Stmt>,
}
