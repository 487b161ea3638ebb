//! The tree-walking evaluator.
//!
//! A visitor over the AST with a result slot, three orthogonal
//! control-flow flags (`returning`, `breaking`, `continuing`) that
//! statements inspect after each sub-evaluation, and an exception
//! channel (`Result<_, NaabError>`) that unwinds through any number of
//! frames until a `catch` consumes it. A program's value is whatever
//! the result slot holds when the last statement finishes.

pub mod calls;
pub mod exprs;

use crate::builtins::{self, OutputSink};
use crate::modules::{ModuleOutputs, ModuleRegistry};
use indexmap::IndexMap;
use naab_core::{
    Environment, ErrorKind, FunctionKind, FunctionValue, NaabError, StructDef, StructField,
    Value,
};
use naab_parser::ast::*;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct EvalOptions {
    /// Name used in stack frames for this compilation unit
    pub file_name: String,
    /// Directory imports and block references resolve against
    pub base_dir: PathBuf,
    /// Hard cap on native call depth
    pub max_call_depth: usize,
    /// Per-foreign-call timeout
    pub foreign_timeout: Duration,
    /// Strict-mode flag: lets test rigs catch fatal kinds
    pub catch_fatal: bool,
    /// Scrub sensitive shapes from rendered errors
    pub production_errors: bool,
    /// Dispatch provably independent adjacent inline-code statements
    /// onto the worker pool
    pub parallel_blocks: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            file_name: "<script>".to_string(),
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_call_depth: 10_000,
            foreign_timeout: naab_polyglot::DEFAULT_TIMEOUT,
            catch_fatal: false,
            production_errors: false,
            parallel_blocks: true,
        }
    }
}

pub struct Evaluator {
    pub(crate) options: EvalOptions,
    pub(crate) globals: Environment,
    pub(crate) structs: FxHashMap<String, Arc<StructDef>>,
    pub(crate) blocks: FxHashMap<String, Value>,
    pub(crate) registry: Arc<ModuleRegistry>,
    pub(crate) sink: OutputSink,

    // Evaluation state
    pub(crate) result: Value,
    pub(crate) returning: bool,
    pub(crate) breaking: bool,
    pub(crate) continuing: bool,
    pub(crate) call_depth: usize,
    pub(crate) in_function: usize,
}

impl Evaluator {
    pub fn new(options: EvalOptions, registry: Arc<ModuleRegistry>, sink: OutputSink) -> Self {
        let globals = Environment::new();
        builtins::install(&globals, sink.clone());
        Self {
            options,
            globals,
            structs: FxHashMap::default(),
            blocks: FxHashMap::default(),
            registry,
            sink,
            result: Value::Null,
            returning: false,
            breaking: false,
            continuing: false,
            call_depth: 0,
            in_function: 0,
        }
    }

    /// The root environment (used by the persistent session).
    pub fn globals(&self) -> &Environment {
        &self.globals
    }

    /// Evaluate a whole program: declarations, imports, then the
    /// script body and the `main` block. Returns the program's value.
    pub fn run_program(&mut self, program: &Program) -> Result<Value, NaabError> {
        let globals = self.globals.clone();
        self.process_imports(program, &globals)?;
        self.declare(program, &globals)?;

        let top_level_env = globals.clone();
        self.exec_block(&program.top_level, &top_level_env)?;
        if let Some(main) = &program.main {
            let main_env = globals.child();
            self.exec_block(main, &main_env)?;
        }
        Ok(self.result.clone())
    }

    /// Evaluate a module's top level and collect its exports.
    pub fn run_module(&mut self, program: &Program) -> Result<ModuleOutputs, NaabError> {
        let globals = self.globals.clone();
        self.process_imports(program, &globals)?;
        self.declare(program, &globals)?;
        self.exec_block(&program.top_level, &globals)?;

        let mut exports = IndexMap::new();
        for f in &program.functions {
            if f.exported {
                exports.insert(f.name.clone(), globals.get(&f.name)?);
            }
        }
        for e in &program.enums {
            if e.exported {
                exports.insert(e.name.clone(), globals.get(&e.name)?);
            }
        }
        for stmt in &program.top_level {
            if let StmtKind::VarDecl {
                name,
                exported: true,
                ..
            } = &stmt.kind
            {
                exports.insert(name.clone(), globals.get(name)?);
            }
        }
        let mut struct_exports = FxHashMap::default();
        for s in &program.structs {
            if s.exported {
                if let Some(def) = self.structs.get(&s.name) {
                    struct_exports.insert(s.name.clone(), def.clone());
                }
            }
        }
        Ok(ModuleOutputs {
            exports,
            struct_exports,
        })
    }

    /// Register struct/enum/function declarations in `env`.
    fn declare(&mut self, program: &Program, env: &Environment) -> Result<(), NaabError> {
        for s in &program.structs {
            let fields = s
                .fields
                .iter()
                .map(|f| StructField {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                    default: f.default.clone(),
                })
                .collect();
            self.structs
                .insert(s.name.clone(), Arc::new(StructDef::new(s.name.clone(), fields)));
        }
        for e in &program.enums {
            let mut entries = IndexMap::new();
            for (ordinal, variant) in e.variants.iter().enumerate() {
                entries.insert(variant.clone(), Value::Int(ordinal as i64));
            }
            env.define(&e.name, Value::dict(entries));
        }
        for f in &program.functions {
            env.define(
                &f.name,
                Value::Function(Arc::new(FunctionValue {
                    name: Some(f.name.clone()),
                    kind: FunctionKind::User {
                        params: f.params.clone(),
                        body: f.body.clone(),
                        env: env.clone(),
                    },
                })),
            );
        }
        Ok(())
    }

    /// Resolve and apply this program's imports.
    fn process_imports(&mut self, program: &Program, env: &Environment) -> Result<(), NaabError> {
        for import in &program.imports {
            let module = self.load_module(&import.source)?;
            match &import.items {
                ImportItems::Named(names) => {
                    for (name, alias) in names {
                        let bind_as = alias.as_ref().unwrap_or(name);
                        let exported = module.exports.lock().get(name).cloned();
                        if let Some(value) = exported {
                            env.define(bind_as, value);
                            continue;
                        }
                        let struct_def = module.struct_exports.lock().get(name).cloned();
                        if let Some(def) = struct_def {
                            self.structs.insert(bind_as.clone(), def);
                            continue;
                        }
                        return Err(NaabError::new(
                            ErrorKind::Import,
                            format!(
                                "module '{}' does not export '{}'",
                                import.source, name
                            ),
                        ));
                    }
                }
                ImportItems::Star(alias) => {
                    let entries: IndexMap<String, Value> = module
                        .exports
                        .lock()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    env.define(alias, Value::dict(entries));
                }
            }
        }
        Ok(())
    }

    fn load_module(&mut self, specifier: &str) -> Result<Arc<crate::modules::Module>, NaabError> {
        let registry = self.registry.clone();
        let options = self.options.clone();
        let sink = self.sink.clone();
        let base_dir = self.options.base_dir.clone();
        registry.load(specifier, &base_dir, &mut |program, path| {
            let mut sub_options = options.clone();
            sub_options.file_name = path.display().to_string();
            sub_options.base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let mut sub = Evaluator::new(sub_options, registry.clone(), sink.clone());
            sub.run_module(program)
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Execute statements in order, stopping on any control-flow flag.
    pub(crate) fn exec_block(
        &mut self,
        stmts: &[Stmt],
        env: &Environment,
    ) -> Result<(), NaabError> {
        let mut index = 0;
        while index < stmts.len() {
            if self.options.parallel_blocks {
                if let Some(consumed) = self.try_parallel_inline_group(&stmts[index..], env)? {
                    index += consumed;
                    continue;
                }
            }
            self.exec_stmt(&stmts[index], env)?;
            if self.returning || self.breaking || self.continuing {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    fn exec_block_in_child(
        &mut self,
        stmts: &[Stmt],
        env: &Environment,
    ) -> Result<(), NaabError> {
        let child = env.child();
        self.exec_block(stmts, &child)
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, env: &Environment) -> Result<(), NaabError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.result = self.eval_expr(expr, env)?;
            }
            StmtKind::VarDecl { name, init, .. } => {
                let value = self.eval_expr(init, env)?;
                env.define(name, value);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval_expr(cond, env)?;
                if condition.truthy() {
                    self.exec_block_in_child(then_branch, env)?;
                } else if let Some(else_branch) = else_branch {
                    self.exec_block_in_child(else_branch, env)?;
                }
            }
            StmtKind::While { cond, body } => loop {
                let condition = self.eval_expr(cond, env)?;
                if !condition.truthy() {
                    break;
                }
                self.exec_block_in_child(body, env)?;
                if self.breaking {
                    self.breaking = false;
                    break;
                }
                if self.continuing {
                    self.continuing = false;
                }
                if self.returning {
                    break;
                }
            },
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                let iterated = self.eval_expr(iterable, env)?;
                let items = iteration_items(&iterated)?;
                for item in items {
                    let loop_env = env.child();
                    loop_env.define(var, item);
                    self.exec_block(body, &loop_env)?;
                    if self.breaking {
                        self.breaking = false;
                        break;
                    }
                    if self.continuing {
                        self.continuing = false;
                    }
                    if self.returning {
                        break;
                    }
                }
            }
            StmtKind::Break => self.breaking = true,
            StmtKind::Continue => self.continuing = true,
            StmtKind::Return(value) => {
                if self.in_function == 0 {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        "'return' outside of a function body".to_string(),
                    ));
                }
                self.result = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                self.returning = true;
            }
            StmtKind::Throw(expr) => {
                let value = self.eval_expr(expr, env)?;
                return Err(NaabError::from_thrown(value));
            }
            StmtKind::Try {
                body,
                catch_name,
                catch_body,
                finally_body,
            } => {
                self.exec_try(stmt, body, catch_name, catch_body, finally_body, env)?;
            }
            StmtKind::Compound(body) => {
                self.exec_block_in_child(body, env)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_try(
        &mut self,
        _stmt: &Stmt,
        body: &[Stmt],
        catch_name: &str,
        catch_body: &[Stmt],
        finally_body: &Option<Vec<Stmt>>,
        env: &Environment,
    ) -> Result<(), NaabError> {
        let mut pending: Option<NaabError> = None;

        match self.exec_block_in_child(body, env) {
            Ok(()) => {}
            Err(e) if e.is_fatal() && !self.options.catch_fatal => pending = Some(e),
            Err(e) => {
                // Bind the caught value in a fresh scope
                let catch_env = env.child();
                catch_env.define(catch_name, e.catch_value());
                if let Err(e2) = self.exec_block(catch_body, &catch_env) {
                    pending = Some(e2);
                }
            }
        }

        if let Some(finally) = finally_body {
            // finally always runs, including after return/break/continue
            let saved = (
                self.returning,
                self.breaking,
                self.continuing,
                self.result.clone(),
            );
            self.returning = false;
            self.breaking = false;
            self.continuing = false;
            match self.exec_block_in_child(finally, env) {
                // A throw inside finally replaces any in-flight
                // exception (and discards pending control flow)
                Err(e) => {
                    pending = Some(e);
                }
                Ok(()) => {
                    if !(self.returning || self.breaking || self.continuing) {
                        // finally completed quietly: resume whatever
                        // the try/catch was doing
                        (self.returning, self.breaking, self.continuing, self.result) = saved;
                    }
                }
            }
        }

        match pending {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn iteration_items(value: &Value) -> Result<Vec<Value>, NaabError> {
    match value {
        Value::List(items) => Ok(items.read().clone()),
        Value::Dict(entries) => Ok(entries.read().keys().map(Value::string).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("cannot iterate over {}", other.type_name()),
        )),
    }
}
