//! Expression nodes.

use super::statement::Stmt;
use super::types::TypeExpr;
use crate::token::Span;
use std::sync::{Arc, OnceLock};

/// An expression with its source location and the advisory checker's
/// type memo. The evaluator never depends on the memo being present.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub checked_type: OnceLock<TypeExpr>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            checked_type: OnceLock::new(),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        // The type memo is not part of structural identity
        self.kind == other.kind
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Identifier(String),
    List(Vec<Expr>),
    Dict(Vec<(DictKey, Expr)>),
    StructLiteral {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `if` in expression position; branches evaluate to their last
    /// expression's value
    If {
        cond: Box<Expr>,
        then_branch: Arc<Vec<Stmt>>,
        else_branch: Option<Arc<Vec<Stmt>>>,
    },
    /// Anonymous `function (params) { ... }`
    Lambda {
        params: Vec<Param>,
        body: Arc<Vec<Stmt>>,
    },
    /// `<<language [bindings] body>>`
    InlineCode {
        language: String,
        bindings: Vec<String>,
        body: String,
    },
    /// `BLOCK-<LANG>-<NNNN>`
    BlockRef(String),
}

/// Dict literal keys are string literals or bare identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictKey {
    Str(String),
    Identifier(String),
}

impl DictKey {
    pub fn as_str(&self) -> &str {
        match self {
            DictKey::Str(s) | DictKey::Identifier(s) => s,
        }
    }
}

/// A function or lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    Assign,
    /// `a |> f(x)` desugars to `f(a, x)`
    Pipeline,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Assign => "=",
            BinaryOp::Pipeline => "|>",
        }
    }
}
