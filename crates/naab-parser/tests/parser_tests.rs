//! Parser integration tests
//!
//! End-to-end coverage of the source → AST pipeline: declarations,
//! statements, expression precedence, inline code, error accumulation
//! and recovery, and parser limits.

use naab_parser::ast::*;
use naab_parser::parse_source;
use naab_parser::Parser;

fn parse(source: &str) -> Program {
    parse_source(source).expect("program should parse")
}

fn first_expr(program: &Program) -> &Expr {
    match &program.top_level[0].kind {
        StmtKind::Expr(e) => e,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

// ===== Declarations =====

#[test]
fn test_function_declaration() {
    let program = parse("function add(a, b = 1) -> int { return a + b }");
    assert_eq!(program.functions.len(), 1);
    let f = &program.functions[0];
    assert_eq!(f.name, "add");
    assert_eq!(f.params.len(), 2);
    assert!(f.params[0].default.is_none());
    assert!(f.params[1].default.is_some());
    assert_eq!(f.return_type, Some(TypeExpr::Named("int".into())));
    assert!(!f.exported);
}

#[test]
fn test_export_function() {
    let program = parse("export function f() { return 1 }");
    assert!(program.functions[0].exported);
}

#[test]
fn test_struct_declaration() {
    let program = parse("struct Point { x: int, y: int = 0 }");
    let s = &program.structs[0];
    assert_eq!(s.name, "Point");
    assert_eq!(s.fields.len(), 2);
    assert!(s.fields[1].default.is_some());
}

#[test]
fn test_enum_declaration() {
    let program = parse("enum Color { Red, Green, Blue }");
    assert_eq!(program.enums[0].variants, vec!["Red", "Green", "Blue"]);
}

#[test]
fn test_imports() {
    let program = parse(
        "import {foo, bar as baz} from \"./util.naab\"\nimport * as m from \"lib\"",
    );
    assert_eq!(program.imports.len(), 2);
    assert_eq!(
        program.imports[0].items,
        ImportItems::Named(vec![
            ("foo".into(), None),
            ("bar".into(), Some("baz".into()))
        ])
    );
    assert_eq!(program.imports[1].items, ImportItems::Star("m".into()));
}

#[test]
fn test_main_block() {
    let program = parse("main { let x = 1 }");
    assert!(program.main.is_some());
    assert_eq!(program.main.unwrap().len(), 1);
}

#[test]
fn test_duplicate_main_is_error() {
    assert!(parse_source("main { }\nmain { }").is_err());
}

// ===== Statements =====

#[test]
fn test_if_else_chain() {
    let program = parse("if a { 1 } else if b { 2 } else { 3 }");
    match &program.top_level[0].kind {
        StmtKind::If { else_branch, .. } => {
            let else_stmts = else_branch.as_ref().unwrap();
            assert!(matches!(else_stmts[0].kind, StmtKind::If { .. }));
        }
        other => panic!("expected if, got {:?}", other),
    }
}

#[test]
fn test_for_in_range() {
    let program = parse("for i in 0..10 { print(i) }");
    match &program.top_level[0].kind {
        StmtKind::For { var, iterable, .. } => {
            assert_eq!(var, "i");
            assert!(matches!(iterable.kind, ExprKind::Range { .. }));
        }
        other => panic!("expected for, got {:?}", other),
    }
}

#[test]
fn test_try_catch_finally() {
    let program = parse("try { risky() } catch (e) { print(e) } finally { cleanup() }");
    match &program.top_level[0].kind {
        StmtKind::Try {
            catch_name,
            finally_body,
            ..
        } => {
            assert_eq!(catch_name, "e");
            assert!(finally_body.is_some());
        }
        other => panic!("expected try, got {:?}", other),
    }
}

#[test]
fn test_var_decl_with_type() {
    let program = parse("let xs: array<int> = [1, 2]");
    match &program.top_level[0].kind {
        StmtKind::VarDecl { name, ty, .. } => {
            assert_eq!(name, "xs");
            assert_eq!(ty.as_ref().unwrap().to_string(), "array<int>");
        }
        other => panic!("expected var decl, got {:?}", other),
    }
}

// ===== Expressions =====

#[test]
fn test_precedence() {
    let program = parse("1 + 2 * 3");
    match &first_expr(&program).kind {
        ExprKind::Binary { op, right, .. } => {
            assert_eq!(*op, BinaryOp::Add);
            assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            ));
        }
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn test_assignment_is_binary_expr() {
    let program = parse("x = y = 1");
    match &first_expr(&program).kind {
        ExprKind::Binary { op, right, .. } => {
            assert_eq!(*op, BinaryOp::Assign);
            // Right-associative
            assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Assign,
                    ..
                }
            ));
        }
        other => panic!("expected assignment, got {:?}", other),
    }
}

#[test]
fn test_pipeline() {
    let program = parse("xs |> map(double)");
    assert!(matches!(
        first_expr(&program).kind,
        ExprKind::Binary {
            op: BinaryOp::Pipeline,
            ..
        }
    ));
}

#[test]
fn test_struct_literal_vs_block() {
    // In expression position `Point { x: 1 }` is a struct literal...
    let program = parse("let p = Point { x: 1 }");
    match &program.top_level[0].kind {
        StmtKind::VarDecl { init, .. } => {
            assert!(matches!(init.kind, ExprKind::StructLiteral { .. }));
        }
        other => panic!("expected var decl, got {:?}", other),
    }
    // ...but in an `if` head the `{` begins the body
    let program = parse("if ready { go() }");
    assert!(matches!(program.top_level[0].kind, StmtKind::If { .. }));
}

#[test]
fn test_dict_literal() {
    let program = parse("let d = { \"a\": 1, b: 2 }");
    match &program.top_level[0].kind {
        StmtKind::VarDecl { init, .. } => match &init.kind {
            ExprKind::Dict(entries) => {
                assert_eq!(entries[0].0.as_str(), "a");
                assert_eq!(entries[1].0.as_str(), "b");
            }
            other => panic!("expected dict, got {:?}", other),
        },
        other => panic!("expected var decl, got {:?}", other),
    }
}

#[test]
fn test_lambda_expression() {
    let program = parse("let f = function(x) { return x + 1 }");
    match &program.top_level[0].kind {
        StmtKind::VarDecl { init, .. } => {
            assert!(matches!(init.kind, ExprKind::Lambda { .. }));
        }
        other => panic!("expected var decl, got {:?}", other),
    }
}

#[test]
fn test_inline_code_expression() {
    let program = parse("let y = <<js [a, b] return a + b >>");
    match &program.top_level[0].kind {
        StmtKind::VarDecl { init, .. } => match &init.kind {
            ExprKind::InlineCode {
                language,
                bindings,
                body,
            } => {
                assert_eq!(language, "js");
                assert_eq!(bindings, &["a", "b"]);
                assert_eq!(body, "return a + b ");
            }
            other => panic!("expected inline code, got {:?}", other),
        },
        other => panic!("expected var decl, got {:?}", other),
    }
}

#[test]
fn test_block_reference() {
    let program = parse("BLOCK-PYTHON-0042(1, 2)");
    match &first_expr(&program).kind {
        ExprKind::Call { callee, .. } => {
            assert!(matches!(&callee.kind, ExprKind::BlockRef(id) if id == "BLOCK-PYTHON-0042"));
        }
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn test_member_index_chain() {
    let program = parse("a.b[0].c");
    assert!(matches!(
        first_expr(&program).kind,
        ExprKind::Member { .. }
    ));
}

// ===== Errors & Recovery =====

#[test]
fn test_errors_accumulate() {
    // Two broken statements produce two errors, not one
    let errors = parse_source("let = 1\nlet = 2").unwrap_err();
    assert!(errors.len() >= 2, "{:?}", errors);
}

#[test]
fn test_unclosed_block_names_open_line() {
    let errors = parse_source("function f() {\n let x = 1\n").unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.message.contains("to close block opened at line 1")));
}

#[test]
fn test_depth_limit() {
    // A small cap makes the limit testable without deep recursion
    let source = "((((((((1))))))))";
    let parser = Parser::new(source).unwrap().with_max_depth(5);
    let errors = parser.parse().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.kind.code() == "E_PARSE_TOO_DEEP"));
}

#[test]
fn test_scenario_sources_parse() {
    // The end-to-end scenario programs must parse cleanly
    parse(
        "function make() { let x = 0; return function() { x = x + 1; return x } } \
         let c = make(); c(); c()",
    );
    parse("try { throw \"oops\" } catch (e) { e + \"!\" }");
    parse("let y = <<js return 40 + 2 >>");
    parse("let count = 1; conut + 1");
}
