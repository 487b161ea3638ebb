//! Advisory static checks.
//!
//! This pass is optional: it reports likely mistakes (duplicate
//! declarations, unknown type names, wrong arity on direct calls) and
//! memoizes literal types on expression nodes, but the evaluator is the
//! source of truth and never depends on it having run.

use crate::ast::*;
use crate::token::Span;
use rustc_hash::{FxHashMap, FxHashSet};

/// Severity of an advisory finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One advisory finding.
#[derive(Debug, Clone)]
pub struct CheckDiagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

const BASE_TYPES: &[&str] = &[
    "int", "float", "string", "bool", "null", "any", "array", "dict",
];

/// Run the advisory checks over a parsed program.
pub fn check_program(program: &Program) -> Vec<CheckDiagnostic> {
    let mut checker = Checker::default();
    checker.collect_declarations(program);
    checker.check(program);
    checker.diagnostics
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<CheckDiagnostic>,
    /// Declared type names (structs, enums)
    types: FxHashSet<String>,
    /// Function name -> (required arity, total arity)
    functions: FxHashMap<String, (usize, usize)>,
}

impl Checker {
    fn warn(&mut self, message: String, span: Span) {
        self.diagnostics.push(CheckDiagnostic {
            severity: Severity::Warning,
            message,
            span,
        });
    }

    fn error(&mut self, message: String, span: Span) {
        self.diagnostics.push(CheckDiagnostic {
            severity: Severity::Error,
            message,
            span,
        });
    }

    fn collect_declarations(&mut self, program: &Program) {
        let mut seen = FxHashSet::default();
        for s in &program.structs {
            if !seen.insert(s.name.clone()) {
                self.error(format!("duplicate declaration of '{}'", s.name), s.span);
            }
            self.types.insert(s.name.clone());
        }
        for e in &program.enums {
            if !seen.insert(e.name.clone()) {
                self.error(format!("duplicate declaration of '{}'", e.name), e.span);
            }
            self.types.insert(e.name.clone());
        }
        for f in &program.functions {
            if !seen.insert(f.name.clone()) {
                self.error(format!("duplicate declaration of '{}'", f.name), f.span);
            }
            let required = f.params.iter().filter(|p| p.default.is_none()).count();
            self.functions
                .insert(f.name.clone(), (required, f.params.len()));
        }
    }

    fn check(&mut self, program: &Program) {
        for s in &program.structs {
            for field in &s.fields {
                self.check_type(&field.ty, s.span);
            }
        }
        for f in &program.functions {
            for param in &f.params {
                if let Some(ty) = &param.ty {
                    self.check_type(ty, f.span);
                }
            }
            if let Some(ret) = &f.return_type {
                self.check_type(ret, f.span);
            }
            self.check_stmts(&f.body);
        }
        if let Some(main) = &program.main {
            self.check_stmts(main);
        }
        self.check_stmts(&program.top_level);
    }

    fn check_type(&mut self, ty: &TypeExpr, span: Span) {
        match ty {
            TypeExpr::Named(name) => {
                if !BASE_TYPES.contains(&name.as_str()) && !self.types.contains(name) {
                    self.warn(format!("unknown type '{}'", name), span);
                }
            }
            TypeExpr::Generic { name, args } => {
                if !BASE_TYPES.contains(&name.as_str()) && !self.types.contains(name) {
                    self.warn(format!("unknown type '{}'", name), span);
                }
                for arg in args {
                    self.check_type(arg, span);
                }
            }
            TypeExpr::Nullable(inner) => self.check_type(inner, span),
            TypeExpr::Union(parts) => {
                for part in parts {
                    self.check_type(part, span);
                }
            }
            // Module types resolve at load time; nothing to check here
            TypeExpr::Qualified { .. } => {}
        }
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.check_expr(e),
            StmtKind::VarDecl { ty, init, .. } => {
                if let Some(ty) = ty {
                    self.check_type(ty, stmt.span);
                }
                self.check_expr(init);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check_expr(cond);
                self.check_stmts(then_branch);
                if let Some(e) = else_branch {
                    self.check_stmts(e);
                }
            }
            StmtKind::While { cond, body } => {
                self.check_expr(cond);
                self.check_stmts(body);
            }
            StmtKind::For { iterable, body, .. } => {
                self.check_expr(iterable);
                self.check_stmts(body);
            }
            StmtKind::Return(Some(e)) | StmtKind::Throw(e) => self.check_expr(e),
            StmtKind::Try {
                body,
                catch_body,
                finally_body,
                ..
            } => {
                self.check_stmts(body);
                self.check_stmts(catch_body);
                if let Some(f) = finally_body {
                    self.check_stmts(f);
                }
            }
            StmtKind::Compound(body) => self.check_stmts(body),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        // Memoize obvious literal types
        let literal_type = match &expr.kind {
            ExprKind::Int(_) => Some(TypeExpr::Named("int".into())),
            ExprKind::Float(_) => Some(TypeExpr::Named("float".into())),
            ExprKind::Str(_) => Some(TypeExpr::Named("string".into())),
            ExprKind::Bool(_) => Some(TypeExpr::Named("bool".into())),
            ExprKind::Null => Some(TypeExpr::Named("null".into())),
            _ => None,
        };
        if let Some(ty) = literal_type {
            let _ = expr.checked_type.set(ty);
        }

        match &expr.kind {
            ExprKind::Call { callee, args } => {
                if let ExprKind::Identifier(name) = &callee.kind {
                    if let Some(&(required, total)) = self.functions.get(name) {
                        if args.len() < required || args.len() > total {
                            self.error(
                                format!(
                                    "'{}' expects {} to {} arguments, got {}",
                                    name,
                                    required,
                                    total,
                                    args.len()
                                ),
                                expr.span,
                            );
                        }
                    }
                }
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
            }
            ExprKind::Binary { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            ExprKind::Unary { operand, .. } => self.check_expr(operand),
            ExprKind::List(items) => {
                for item in items {
                    self.check_expr(item);
                }
            }
            ExprKind::Dict(entries) => {
                for (_, value) in entries {
                    self.check_expr(value);
                }
            }
            ExprKind::StructLiteral { name, fields } => {
                if !self.types.contains(name) {
                    self.warn(format!("unknown type '{}'", name), expr.span);
                }
                for (_, value) in fields {
                    self.check_expr(value);
                }
            }
            ExprKind::Range { start, end } => {
                self.check_expr(start);
                self.check_expr(end);
            }
            ExprKind::Member { object, .. } => self.check_expr(object),
            ExprKind::Index { object, index } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check_expr(cond);
                self.check_stmts(then_branch);
                if let Some(e) = else_branch {
                    self.check_stmts(e);
                }
            }
            ExprKind::Lambda { body, .. } => self.check_stmts(body),
            _ => {}
        }
    }
}
