//! Module loading integration tests
//!
//! Resolution order, parse-and-execute-once semantics, export/import
//! plumbing, and circular-import detection.

use naab_core::{ErrorKind, Value};
use naab_runtime::{EvalOptions, OutputSink, Runtime};
use std::path::Path;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn runtime_in(dir: &Path) -> (Runtime, std::sync::Arc<parking_lot::Mutex<String>>) {
    let (sink, buf) = OutputSink::buffer();
    let options = EvalOptions {
        base_dir: dir.to_path_buf(),
        ..EvalOptions::default()
    };
    (Runtime::new(options, sink).unwrap(), buf)
}

#[test]
fn test_named_imports_with_alias() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "util.naab",
        "export function double(n) { return n * 2 }\nexport let base = 40",
    );
    let (runtime, _) = runtime_in(dir.path());
    let value = runtime
        .run_source(
            "import {double as twice, base} from \"./util.naab\"\ntwice(base) + 2",
            "main.naab",
        )
        .unwrap();
    assert!(value.equal(&Value::Int(82)));
}

#[test]
fn test_star_import_binds_dict() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "util.naab", "export let answer = 42");
    let (runtime, _) = runtime_in(dir.path());
    let value = runtime
        .run_source(
            "import * as util from \"./util.naab\"\nutil.answer",
            "main.naab",
        )
        .unwrap();
    assert!(value.equal(&Value::Int(42)));
}

#[test]
fn test_imported_struct_definition() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "geo.naab", "export struct Point { x: int, y: int = 0 }");
    let (runtime, _) = runtime_in(dir.path());
    let value = runtime
        .run_source(
            "import {Point} from \"./geo.naab\"\nlet p = Point { x: 5 }\np.x + p.y",
            "main.naab",
        )
        .unwrap();
    assert!(value.equal(&Value::Int(5)));
}

#[test]
fn test_module_executes_once() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "noisy.naab",
        "print(\"loaded\")\nexport let x = 1",
    );
    write(
        dir.path(),
        "mid.naab",
        "import {x} from \"./noisy.naab\"\nexport let y = x + 1",
    );
    let (runtime, buf) = runtime_in(dir.path());
    // Both the program and mid.naab import noisy; it loads once
    let value = runtime
        .run_source(
            "import {x} from \"./noisy.naab\"\nimport {y} from \"./mid.naab\"\nx + y",
            "main.naab",
        )
        .unwrap();
    assert!(value.equal(&Value::Int(3)));
    assert_eq!(*buf.lock(), "loaded\n");
}

#[test]
fn test_s6_circular_import_reports_chain() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.naab", "import {foo} from \"./b.naab\"\nexport let bar = 1");
    write(dir.path(), "b.naab", "import {bar} from \"./a.naab\"\nexport let foo = 2");
    let (runtime, _) = runtime_in(dir.path());
    let err = runtime
        .run_source("import {bar} from \"./a.naab\"\nbar", "main.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircularImport);
    assert!(
        err.message.contains("a.naab, b.naab, a.naab"),
        "{}",
        err.message
    );
}

#[test]
fn test_missing_export_is_import_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "util.naab", "export let x = 1");
    let (runtime, _) = runtime_in(dir.path());
    let err = runtime
        .run_source("import {nope} from \"./util.naab\"\n1", "main.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("does not export 'nope'"));
}

#[test]
fn test_unresolvable_import_lists_searched_paths() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = runtime_in(dir.path());
    let err = runtime
        .run_source("import {x} from \"./ghost.naab\"\n1", "main.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("ghost.naab"));
    assert!(err.message.contains("Searched"));
}

#[test]
fn test_naab_modules_directory_resolution() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("naab_modules")).unwrap();
    write(
        &dir.path().join("naab_modules"),
        "shared.naab",
        "export let version = 7",
    );
    // Importer sits in a nested directory; naab_modules found by
    // walking up
    let nested = dir.path().join("src");
    std::fs::create_dir_all(&nested).unwrap();
    let (runtime, _) = runtime_in(&nested);
    let value = runtime
        .run_source("import {version} from \"shared\"\nversion", "main.naab")
        .unwrap();
    assert!(value.equal(&Value::Int(7)));
}

#[test]
fn test_naabrc_alias_and_extra_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
    write(&dir.path().join("vendor"), "dep.naab", "export let n = 3");
    write(
        dir.path(),
        ".naabrc",
        "[paths]\nextra = [\"./vendor\"]\n\n[aliases]\nmylib = \"./vendor/dep.naab\"\n",
    );
    let (runtime, _) = runtime_in(dir.path());
    // Via extra path
    let value = runtime
        .run_source("import {n} from \"dep\"\nn", "main.naab")
        .unwrap();
    assert!(value.equal(&Value::Int(3)));
    // Via alias
    let value = runtime
        .run_source("import {n} from \"mylib\"\nn", "main.naab")
        .unwrap();
    assert!(value.equal(&Value::Int(3)));
}

#[test]
fn test_module_parse_error_is_parse_kind() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.naab", "let = =");
    let (runtime, _) = runtime_in(dir.path());
    let err = runtime
        .run_source("import {x} from \"./broken.naab\"\n1", "main.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert_eq!(naab_runtime::exit_code_for(&err), 2);
}
