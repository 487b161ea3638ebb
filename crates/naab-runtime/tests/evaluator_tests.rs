//! Evaluator integration tests
//!
//! End-to-end coverage of statement/expression semantics, closures,
//! exception propagation, control flow, and the runtime invariants
//! (shared mutation, stack balance, fatal-error handling).

use naab_core::{ErrorKind, NaabError, Value};
use naab_runtime::{EvalOptions, OutputSink, Runtime};

fn eval_with_options(
    source: &str,
    options: EvalOptions,
) -> (Result<Value, NaabError>, String) {
    let (sink, buf) = OutputSink::buffer();
    let runtime = Runtime::new(options, sink).expect("runtime");
    let result = runtime.run_source(source, "test.naab");
    let output = buf.lock().clone();
    (result, output)
}

fn eval(source: &str) -> Result<Value, NaabError> {
    eval_with_options(source, EvalOptions::default()).0
}

fn eval_ok(source: &str) -> Value {
    eval(source).expect("program should evaluate")
}

// ===== Scenarios =====

#[test]
fn test_s1_closures_share_captured_state() {
    let value = eval_ok(
        "function make() { let x = 0; return function() { x = x + 1; return x } } \
         let c = make(); c(); c()",
    );
    assert!(value.equal(&Value::Int(2)), "{:?}", value);
}

#[test]
fn test_s2_exception_propagation() {
    let value = eval_ok("try { throw \"oops\" } catch (e) { e + \"!\" }");
    assert_eq!(value.as_str(), Some("oops!"));
}

#[test]
fn test_s7_undefined_suggestion() {
    let err = eval("let count = 1; conut + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Undefined);
    assert!(
        err.message.contains("did you mean 'count'?"),
        "{}",
        err.message
    );
}

// ===== Values & operators =====

#[test]
fn test_arithmetic_and_precedence() {
    assert!(eval_ok("1 + 2 * 3").equal(&Value::Int(7)));
    assert!(eval_ok("(1 + 2) * 3").equal(&Value::Int(9)));
    assert!(eval_ok("7 / 2").equal(&Value::Int(3)));
    assert!(eval_ok("1 + 0.5").equal(&Value::Float(1.5)));
}

#[test]
fn test_division_by_zero() {
    let err = eval("1 / 0").unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivZero);
    // Float division produces infinity, not an error
    assert!(matches!(eval_ok("1.0 / 0"), Value::Float(f) if f.is_infinite()));
}

#[test]
fn test_short_circuit() {
    // The right operand would throw if evaluated
    assert!(eval_ok("false && missing").equal(&Value::Bool(false)));
    assert!(eval_ok("true || missing").equal(&Value::Bool(true)));
}

#[test]
fn test_comparison_chain_and_equality() {
    assert!(eval_ok("1 < 2").equal(&Value::Bool(true)));
    assert!(eval_ok("2 == 2.0").equal(&Value::Bool(true)));
    assert!(eval_ok("\"a\" == 1").equal(&Value::Bool(false)));
    assert_eq!(eval("1 < \"a\"").unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_pipeline_desugars_to_first_argument() {
    let value = eval_ok(
        "function add(a, b) { return a + b }\n10 |> add(5)",
    );
    assert!(value.equal(&Value::Int(15)));
}

#[test]
fn test_if_expression() {
    assert!(eval_ok("let x = if 1 < 2 { \"yes\" } else { \"no\" }; x")
        .equal(&Value::string("yes")));
    assert!(matches!(eval_ok("let x = if false { 1 }; x"), Value::Null));
}

// ===== Environment & closures =====

#[test]
fn test_shadowing_restores_on_scope_exit() {
    let value = eval_ok(
        "let n = 1\n{ let n = 2\n n }\nn",
    );
    assert!(value.equal(&Value::Int(1)));
}

#[test]
fn test_closures_see_bindings_at_call_time() {
    let value = eval_ok(
        "let x = 1\nfunction get() { return x }\nx = 5\nget()",
    );
    assert!(value.equal(&Value::Int(5)));
}

#[test]
fn test_no_deep_copy_on_assignment() {
    let value = eval_ok("let a = [1]\nlet b = a\npush(b, 2)\nlen(a)");
    assert!(value.equal(&Value::Int(2)));
}

#[test]
fn test_default_parameters() {
    let value = eval_ok(
        "function greet(name, suffix = \"!\") { return name + suffix }\ngreet(\"hi\")",
    );
    assert_eq!(value.as_str(), Some("hi!"));
}

#[test]
fn test_arity_errors() {
    let source = "function f(a, b) { return a }\n";
    assert_eq!(
        eval(&format!("{}f(1)", source)).unwrap_err().kind,
        ErrorKind::Arity
    );
    assert_eq!(
        eval(&format!("{}f(1, 2, 3)", source)).unwrap_err().kind,
        ErrorKind::Arity
    );
}

#[test]
fn test_not_callable() {
    assert_eq!(eval("let x = 3; x()").unwrap_err().kind, ErrorKind::NotCallable);
}

#[test]
fn test_return_outside_function() {
    assert!(eval("return 1").is_err());
}

// ===== Control flow =====

#[test]
fn test_while_with_break_continue() {
    let value = eval_ok(
        "let total = 0\nlet i = 0\nwhile true { \
           i = i + 1\n\
           if i > 10 { break }\n\
           if i % 2 == 0 { continue }\n\
           total = total + i\n\
         }\ntotal",
    );
    // 1 + 3 + 5 + 7 + 9
    assert!(value.equal(&Value::Int(25)));
}

#[test]
fn test_for_over_range_and_list() {
    assert!(eval_ok("let t = 0\nfor i in 0..4 { t = t + i }\nt").equal(&Value::Int(6)));
    assert!(eval_ok("let t = 0\nfor x in [5, 6] { t = t + x }\nt").equal(&Value::Int(11)));
}

#[test]
fn test_for_over_dict_iterates_keys() {
    let value = eval_ok(
        "let d = { a: 1, b: 2 }\nlet seen = \"\"\nfor k in d { seen = seen + k }\nseen",
    );
    assert_eq!(value.as_str(), Some("ab"));
}

#[test]
fn test_for_over_string() {
    let value = eval_ok("let n = 0\nfor c in \"abc\" { n = n + 1 }\nn");
    assert!(value.equal(&Value::Int(3)));
}

// ===== Structs, enums, dicts =====

#[test]
fn test_struct_literal_defaults_and_field_access() {
    let value = eval_ok(
        "struct Point { x: int, y: int = 0 }\nlet p = Point { x: 3 }\np.x + p.y",
    );
    assert!(value.equal(&Value::Int(3)));
}

#[test]
fn test_struct_missing_required_field() {
    let err = eval("struct Point { x: int }\nPoint {}").unwrap_err();
    assert_eq!(err.kind, ErrorKind::StructField);
}

#[test]
fn test_struct_field_suggestion() {
    let err = eval(
        "struct Point { x: int }\nlet p = Point { x: 1 }\np.z = 2",
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StructField);
}

#[test]
fn test_struct_member_assignment() {
    let value = eval_ok(
        "struct Point { x: int }\nlet p = Point { x: 1 }\np.x = 9\np.x",
    );
    assert!(value.equal(&Value::Int(9)));
}

#[test]
fn test_structs_are_shared() {
    let value = eval_ok(
        "struct Box { n: int }\nlet a = Box { n: 1 }\nlet b = a\nb.n = 7\na.n",
    );
    assert!(value.equal(&Value::Int(7)));
}

#[test]
fn test_enum_ordinals() {
    let value = eval_ok("enum Color { Red, Green, Blue }\nColor.Green");
    assert!(value.equal(&Value::Int(1)));
}

#[test]
fn test_index_read_and_write() {
    assert!(eval_ok("let xs = [1, 2, 3]\nxs[1] = 9\nxs[1]").equal(&Value::Int(9)));
    assert!(eval_ok("let d = { k: 1 }\nd[\"k\"]").equal(&Value::Int(1)));
    assert_eq!(eval("[1][5]").unwrap_err().kind, ErrorKind::Index);
}

#[test]
fn test_assignment_target_validation() {
    assert_eq!(eval("1 = 2").unwrap_err().kind, ErrorKind::AssignTarget);
}

// ===== Exceptions =====

#[test]
fn test_thrown_values_round_trip() {
    // Thrown non-string values bind unchanged
    let value = eval_ok("try { throw [1, 2] } catch (e) { e[1] }");
    assert!(value.equal(&Value::Int(2)));
}

#[test]
fn test_uncaught_throw_carries_payload() {
    let err = eval("throw \"fatal\"").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Thrown);
    assert_eq!(err.catch_value().as_str(), Some("fatal"));
}

#[test]
fn test_finally_runs_after_return() {
    let (result, output) = eval_with_options(
        "function f() { try { return 1 } catch (e) { return 2 } finally { print(\"cleanup\") } }\nf()",
        EvalOptions::default(),
    );
    assert!(result.unwrap().equal(&Value::Int(1)));
    assert_eq!(output, "cleanup\n");
}

#[test]
fn test_throw_in_finally_replaces_exception() {
    let err = eval(
        "try { throw \"first\" } catch (e) { throw \"second\" } finally { throw \"third\" }",
    )
    .unwrap_err();
    assert_eq!(err.catch_value().as_str(), Some("third"));
}

#[test]
fn test_fatal_errors_are_not_catchable() {
    let err = eval("try { 9223372036854775807 + 1 } catch (e) { 0 }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Overflow);
}

#[test]
fn test_strict_mode_allows_catching_fatal() {
    let mut options = EvalOptions::default();
    options.catch_fatal = true;
    let (result, _) = eval_with_options(
        "try { 9223372036854775807 + 1 } catch (e) { \"caught\" }",
        options,
    );
    assert_eq!(result.unwrap().as_str(), Some("caught"));
}

#[test]
fn test_call_depth_cap() {
    let mut options = EvalOptions::default();
    options.max_call_depth = 32;
    let (result, _) = eval_with_options("function f() { return f() }\nf()", options);
    assert_eq!(result.unwrap_err().kind, ErrorKind::CallDepth);
}

// ===== Invariants =====

#[test]
fn test_stack_balanced_after_success_and_failure() {
    let _ = eval("function f() { return 1 }\nf()");
    assert!(naab_core::stack::is_empty());
    let _ = eval("function f() { throw \"x\" }\nf()");
    assert!(naab_core::stack::is_empty());
}

#[test]
fn test_error_stack_names_host_function() {
    let err = eval("function inner() { throw \"x\" }\nfunction outer() { return inner() }\nouter()")
        .unwrap_err();
    let names: Vec<&str> = err.stack.iter().map(|f| f.function_name.as_str()).collect();
    assert!(names.contains(&"inner"));
    assert!(names.contains(&"outer"));
}

#[test]
fn test_print_output() {
    let (result, output) = eval_with_options(
        "print(\"x\", [1, \"a\"])\nprint(2)",
        EvalOptions::default(),
    );
    result.unwrap();
    assert_eq!(output, "x [1, \"a\"]\n2\n");
}

#[test]
fn test_main_block_runs_after_declarations() {
    let value = eval_ok("function f() { return 40 }\nmain { f() + 2 }");
    assert!(value.equal(&Value::Int(42)));
}

#[test]
fn test_lambda_as_value() {
    let value = eval_ok("let apply = function(f, x) { return f(x) }\napply(function(n) { return n + 1 }, 41)");
    assert!(value.equal(&Value::Int(42)));
}
