//! Calls: user functions, blocks, inline code, and the parallel
//! dispatch of independent polyglot groups.

use super::Evaluator;
use naab_core::{
    stack, BlockValue, Environment, ErrorKind, Executor, FunctionKind, FunctionValue,
    NaabError, StackFrame, Value,
};
use naab_parser::ast::*;
use naab_polyglot::adapters::create_builtin;
use naab_polyglot::registry::ExecutorRegistry;
use naab_polyglot::wrapper::{self, Task};
use std::path::PathBuf;
use std::sync::Arc;

impl Evaluator {
    pub(crate) fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        line: u32,
        env: &Environment,
    ) -> Result<Value, NaabError> {
        let callee_value = self.eval_expr(callee, env)?;
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expr(arg, env)?);
        }
        self.call_value(callee_value, arg_values, line)
    }

    /// Invoke any callable value.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        line: u32,
    ) -> Result<Value, NaabError> {
        match callee {
            Value::Function(func) => self.call_function_value(func, args, line),
            Value::Block(block) => self.call_block(&block, args, line),
            other => Err(NaabError::new(
                ErrorKind::NotCallable,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    pub(crate) fn call_function_value(
        &mut self,
        func: Arc<FunctionValue>,
        args: Vec<Value>,
        line: u32,
    ) -> Result<Value, NaabError> {
        if self.call_depth >= self.options.max_call_depth {
            return Err(NaabError::new(
                ErrorKind::CallDepth,
                format!(
                    "call depth exceeded the {} frame cap",
                    self.options.max_call_depth
                ),
            ));
        }
        let _frame = stack::push(StackFrame::new(
            "naab",
            func.display_name(),
            self.options.file_name.clone(),
            line,
        ));
        self.call_depth += 1;
        let result = self.invoke(&func, args);
        self.call_depth -= 1;
        result
    }

    fn invoke(&mut self, func: &FunctionValue, args: Vec<Value>) -> Result<Value, NaabError> {
        match &func.kind {
            FunctionKind::Native { func } => func(&args),
            FunctionKind::User { params, body, env } => {
                if args.len() > params.len() {
                    return Err(NaabError::new(
                        ErrorKind::Arity,
                        format!(
                            "{} takes at most {} argument(s), got {}",
                            func.display_name(),
                            params.len(),
                            args.len()
                        ),
                    ));
                }
                // New scope parented to the CAPTURED environment, not
                // the caller's
                let call_env = env.child();
                for (i, param) in params.iter().enumerate() {
                    let value = if i < args.len() {
                        args[i].clone()
                    } else if let Some(default) = &param.default {
                        self.eval_expr(default, &call_env)?
                    } else {
                        return Err(NaabError::new(
                            ErrorKind::Arity,
                            format!(
                                "{} missing required argument '{}'",
                                func.display_name(),
                                param.name
                            ),
                        ));
                    };
                    call_env.define(&param.name, value);
                }

                let saved = (
                    self.returning,
                    self.breaking,
                    self.continuing,
                    self.result.clone(),
                );
                self.returning = false;
                self.breaking = false;
                self.continuing = false;
                self.result = Value::Null;
                self.in_function += 1;

                let outcome = self.exec_block(body, &call_env);

                self.in_function -= 1;
                let returned = if self.returning {
                    self.result.clone()
                } else {
                    Value::Null
                };
                (self.returning, self.breaking, self.continuing, self.result) = saved;

                outcome?;
                Ok(returned)
            }
        }
    }

    /// The polyglot hand-off for `<<lang [bindings] body>>`.
    pub(crate) fn eval_inline_code(
        &mut self,
        language: &str,
        bindings: &[String],
        body: &str,
        line: u32,
        env: &Environment,
    ) -> Result<Value, NaabError> {
        let executor = ExecutorRegistry::global().get_or_init(language)?;

        for name in bindings {
            let value = env.get(name)?;
            executor.bind_value(name, &value)?;
        }

        // Compile-and-load languages get the longer compile timeout
        let timeout = if language == "c" {
            self.options.foreign_timeout.max(naab_polyglot::COMPILE_TIMEOUT)
        } else {
            self.options.foreign_timeout
        };
        let result = {
            let _frame = stack::push(StackFrame::new(
                language.to_string(),
                "<inline>",
                self.options.file_name.clone(),
                line,
            ));
            let task_executor = executor.clone();
            let body = body.to_string();
            wrapper::call_with_timeout(
                timeout,
                executor.cancel_flag(),
                Box::new(move |_flag| task_executor.execute_with_return(&body)),
            )
        };

        // Captured foreign output always reaches the host's stdout,
        // success or not
        let output = executor.drain_captured_output();
        if !output.is_empty() {
            self.sink.write(&output);
        }
        result
    }

    /// Create a native bound-method value for `target.member` where
    /// target is a Block or Foreign handle.
    pub(crate) fn bind_foreign_method(
        &mut self,
        target: &Value,
        member: &str,
    ) -> Result<Value, NaabError> {
        let (executor, language): (Arc<dyn Executor>, String) = match target {
            Value::Block(block) => (block.executor.clone(), block.language.clone()),
            Value::Foreign(foreign) => (
                ExecutorRegistry::global().get_or_init(&foreign.language)?,
                foreign.language.clone(),
            ),
            other => {
                return Err(NaabError::new(
                    ErrorKind::Type,
                    format!("{} has no methods", other.type_name()),
                ))
            }
        };

        let method = member.to_string();
        let target = target.clone();
        let timeout = self.options.foreign_timeout;
        let sink = self.sink.clone();
        let func = move |args: &[Value]| -> Result<Value, NaabError> {
            let args = args.to_vec();
            let call_executor = executor.clone();
            let call_target = target.clone();
            let call_method = method.clone();
            let result = wrapper::call_with_timeout(
                timeout,
                executor.cancel_flag(),
                Box::new(move |_flag| match &call_target {
                    Value::Block(_) => call_executor.call_function(&call_method, &args),
                    other => call_executor.call_method(other, &call_method, &args),
                }),
            );
            let output = executor.drain_captured_output();
            if !output.is_empty() {
                sink.write(&output);
            }
            result
        };

        Ok(Value::Function(Arc::new(FunctionValue {
            name: Some(format!("{}.{}", language, member)),
            kind: FunctionKind::Native {
                func: Arc::new(func),
            },
        })))
    }

    /// Invoke a block's entry function through its executor.
    fn call_block(
        &mut self,
        block: &Arc<BlockValue>,
        args: Vec<Value>,
        line: u32,
    ) -> Result<Value, NaabError> {
        let result = {
            let _frame = stack::push(StackFrame::new(
                block.language.clone(),
                block.entry.clone(),
                block.id.clone(),
                line,
            ));
            let executor = block.executor.clone();
            let entry = block.entry.clone();
            wrapper::call_with_timeout(
                self.options.foreign_timeout,
                block.executor.cancel_flag(),
                Box::new(move |_flag| executor.call_function(&entry, &args)),
            )
        };
        let output = block.executor.drain_captured_output();
        if !output.is_empty() {
            self.sink.write(&output);
        }
        result
    }

    /// Dereference a `BLOCK-<LANG>-<NNNN>` token: locate the source,
    /// load it into the language's executor, and cache the handle.
    pub(crate) fn load_block(&mut self, id: &str) -> Result<Value, NaabError> {
        if let Some(block) = self.blocks.get(id) {
            return Ok(block.clone());
        }

        let mut parts = id.splitn(3, '-');
        let (_, lang_tag) = (parts.next(), parts.next());
        let language = lang_tag
            .map(str::to_lowercase)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                NaabError::new(
                    ErrorKind::Import,
                    format!("malformed block id '{}'", id),
                )
            })?;

        let source_path = self.locate_block_source(id, &language)?;
        let source = std::fs::read_to_string(&source_path)?;

        let executor = ExecutorRegistry::global().get_or_init(&language)?;
        {
            let load_executor = executor.clone();
            let load_source = source.clone();
            wrapper::call_with_timeout(
                naab_polyglot::COMPILE_TIMEOUT,
                executor.cancel_flag(),
                Box::new(move |_flag| load_executor.execute(&load_source)),
            )?;
        }
        let output = executor.drain_captured_output();
        if !output.is_empty() {
            self.sink.write(&output);
        }

        let block = Value::Block(Arc::new(BlockValue {
            id: id.to_string(),
            language: language.clone(),
            entry: scan_entry(&source, &language),
            source,
            // The executor belongs to the process-wide registry
            borrowed: true,
            executor,
        }));
        self.blocks.insert(id.to_string(), block.clone());
        Ok(block)
    }

    fn locate_block_source(&self, id: &str, language: &str) -> Result<PathBuf, NaabError> {
        let extension = match language {
            "python" => "py",
            "js" | "javascript" | "node" => "js",
            "c" => "c",
            "bash" | "sh" => "sh",
            "ruby" => "rb",
            other => {
                return Err(NaabError::new(
                    ErrorKind::Import,
                    format!("no known source extension for language '{}'", other),
                ))
            }
        };
        let file_name = format!("{}.{}", id, extension);

        let mut candidates = Vec::new();
        let mut dir = Some(self.options.base_dir.as_path());
        while let Some(current) = dir {
            candidates.push(current.join("blocks").join(&file_name));
            candidates.push(current.join("naab_modules/blocks").join(&file_name));
            dir = current.parent();
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".naab/blocks").join(&file_name));
        }

        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(candidate.clone());
            }
        }
        Err(NaabError::new(
            ErrorKind::Import,
            format!(
                "cannot locate source for block '{}'. Searched:\n  {}",
                id,
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n  ")
            ),
        ))
    }

    /// Detect a run of adjacent inline-code statements whose reads and
    /// writes are provably disjoint, and dispatch them concurrently.
    /// Their environment writes land after the whole group completes,
    /// in listed order. Returns how many statements were consumed.
    pub(crate) fn try_parallel_inline_group(
        &mut self,
        stmts: &[Stmt],
        env: &Environment,
    ) -> Result<Option<usize>, NaabError> {
        struct Item<'a> {
            target: Option<&'a str>,
            language: &'a str,
            bindings: &'a [String],
            body: &'a str,
        }

        let mut items: Vec<Item<'_>> = Vec::new();
        for stmt in stmts {
            let item = match &stmt.kind {
                StmtKind::VarDecl { name, init, .. } => match &init.kind {
                    ExprKind::InlineCode {
                        language,
                        bindings,
                        body,
                    } => Item {
                        target: Some(name),
                        language,
                        bindings,
                        body,
                    },
                    _ => break,
                },
                StmtKind::Expr(expr) => match &expr.kind {
                    ExprKind::InlineCode {
                        language,
                        bindings,
                        body,
                    } => Item {
                        target: None,
                        language,
                        bindings,
                        body,
                    },
                    _ => break,
                },
                _ => break,
            };
            items.push(item);
        }
        if items.len() < 2 {
            return Ok(None);
        }

        // Independence: no member of the group reads a name another
        // member writes, and written names are distinct
        let targets: Vec<&str> = items.iter().filter_map(|i| i.target).collect();
        let mut distinct = targets.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != targets.len() {
            return Ok(None);
        }
        for item in &items {
            if item.bindings.iter().any(|b| targets.contains(&b.as_str())) {
                return Ok(None);
            }
        }

        // Reads happen before the group starts
        let mut tasks: Vec<Task<(Value, String)>> = Vec::with_capacity(items.len());
        for item in &items {
            let mut bound = Vec::with_capacity(item.bindings.len());
            for name in item.bindings {
                bound.push((name.clone(), env.get(name)?));
            }
            let language = item.language.to_string();
            let body = item.body.to_string();
            tasks.push(Box::new(move |_flag| {
                // Each group member gets its own adapter instance
                let executor = create_builtin(&language)?;
                for (name, value) in &bound {
                    executor.bind_value(name, value)?;
                }
                let value = executor.execute_with_return(&body)?;
                let output = executor.drain_captured_output();
                executor.close();
                Ok((value, output))
            }));
        }

        log::debug!("dispatching {} independent inline blocks in parallel", items.len());
        let results = wrapper::parallel(self.options.foreign_timeout, tasks);

        // Publish side effects strictly after the group, in order
        for (item, result) in items.iter().zip(results) {
            let (value, output) = result?;
            if !output.is_empty() {
                self.sink.write(&output);
            }
            match item.target {
                Some(name) => env.define(name, value),
                None => self.result = value,
            }
        }
        Ok(Some(items.len()))
    }
}

/// Best-effort entry-point scan: the first function definition in the
/// block's source, defaulting to "main".
fn scan_entry(source: &str, language: &str) -> String {
    let name_chars = |s: &str| -> String {
        s.chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect()
    };
    for line in source.lines() {
        let line = line.trim_start();
        let found = match language {
            "python" => line.strip_prefix("def ").map(name_chars),
            "js" | "javascript" | "node" => line.strip_prefix("function ").map(name_chars),
            "bash" | "sh" => line
                .split_once("()")
                .map(|(name, _)| name.trim().to_string())
                .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')),
            "c" => {
                // shape: `type name(args) {`
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some(_ty), Some(rest)) if rest.contains('(') => {
                        Some(name_chars(rest))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(name) = found {
            if !name.is_empty() {
                return name;
            }
        }
    }
    "main".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_entry_python() {
        assert_eq!(scan_entry("import os\n\ndef greet(name):\n    pass\n", "python"), "greet");
    }

    #[test]
    fn test_scan_entry_js() {
        assert_eq!(scan_entry("function add(a, b) { return a + b; }", "js"), "add");
    }

    #[test]
    fn test_scan_entry_c() {
        assert_eq!(
            scan_entry("#include <stdint.h>\nint64_t add(int64_t a, int64_t b) {\n", "c"),
            "add"
        );
    }

    #[test]
    fn test_scan_entry_defaults_to_main() {
        assert_eq!(scan_entry("x = 1\n", "python"), "main");
    }
}
