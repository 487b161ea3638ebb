//! Abstract syntax tree for NAAb programs.
//!
//! The tree is immutable after parsing. Every node carries a Span.
//! Expression nodes carry a memo cell for the advisory checker's
//! inferred type; nothing downstream may rely on it being filled.

pub mod expression;
pub mod statement;
pub mod types;

pub use expression::{BinaryOp, DictKey, Expr, ExprKind, Param, UnaryOp};
pub use statement::{
    EnumDecl, FieldDecl, FunctionDecl, ImportDecl, ImportItems, Program, Stmt, StmtKind,
    StructDecl,
};
pub use types::TypeExpr;
