//! QuickJS adapter (the JIT-engine pattern).
//!
//! A fresh engine context is cheap, so every executor instance owns
//! its own context and no state leaks between instances. QuickJS
//! contexts are thread-bound: the context lives on a dedicated worker
//! thread and the executor handle talks to it over a channel, which
//! keeps the registry `Send`.
//!
//! Two execution modes: *inline-code mode* wraps the body in an
//! immediately-invoked function for isolation (and so `return` works),
//! *library mode* evaluates at top level so later `call_function`
//! sees the definitions. `console.log` is routed through a host
//! callback into the output buffer. The cancellation flag is polled
//! between jobs; QuickJS cannot be interrupted mid-evaluation, so a
//! timed-out evaluation finishes on its worker in the background.

use crate::marshal::{MAX_MARSHAL_DEPTH, MAX_SAFE_JS_INT};
use crossbeam::channel::{bounded, unbounded, Sender};
use naab_core::{CancelFlag, ErrorKind, Executor, NaabError, StackFrame, Value};
use parking_lot::Mutex;
use quick_js::{Context, ExecutionError, JsValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

enum JsJob {
    Execute {
        code: String,
        reply: Sender<Result<(), NaabError>>,
    },
    ExecuteReturn {
        code: String,
        reply: Sender<Result<Value, NaabError>>,
    },
    Call {
        name: String,
        args: Vec<Value>,
        reply: Sender<Result<Value, NaabError>>,
    },
    Bind {
        name: String,
        /// JSON text of the bound value; rehydrated with JSON.parse
        json: String,
        reply: Sender<Result<(), NaabError>>,
    },
    Shutdown,
}

pub struct JsExecutor {
    sender: Sender<JsJob>,
    worker: Mutex<Option<JoinHandle<()>>>,
    output: Arc<Mutex<String>>,
    cancel: CancelFlag,
}

impl JsExecutor {
    pub fn new() -> Result<Self, NaabError> {
        let (sender, receiver) = unbounded::<JsJob>();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let output = Arc::new(Mutex::new(String::new()));
        let cancel = CancelFlag::new();

        let worker_output = output.clone();
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("naab-js".to_string())
            .spawn(move || {
                let context = match Context::new() {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = install_console(&context, worker_output.clone()) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(job) = receiver.recv() {
                    if worker_cancel.is_set() {
                        worker_cancel.clear();
                    }
                    match job {
                        JsJob::Execute { code, reply } => {
                            let result = context
                                .eval(&code)
                                .map(|_| ())
                                .map_err(convert_err);
                            let _ = reply.send(result);
                        }
                        JsJob::ExecuteReturn { code, reply } => {
                            let wrapped = format!("(function() {{\n{}\n}})()", code);
                            let result = context
                                .eval(&wrapped)
                                .map_err(convert_err)
                                .and_then(|v| js_to_value(&v, 0));
                            let _ = reply.send(result);
                        }
                        JsJob::Call { name, args, reply } => {
                            let result = args
                                .iter()
                                .map(value_to_js)
                                .collect::<Result<Vec<_>, _>>()
                                .and_then(|js_args| {
                                    context
                                        .call_function(&name, js_args)
                                        .map_err(convert_err)
                                })
                                .and_then(|v| js_to_value(&v, 0));
                            let _ = reply.send(result);
                        }
                        JsJob::Bind { name, json, reply } => {
                            let result = bind_snippet(&name, &json).and_then(|snippet| {
                                context
                                    .eval(&snippet)
                                    .map(|_| ())
                                    .map_err(convert_err)
                            });
                            let _ = reply.send(result);
                        }
                        JsJob::Shutdown => break,
                    }
                }
            })
            .map_err(|e| NaabError::new(ErrorKind::Io, e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                sender,
                worker: Mutex::new(Some(worker)),
                output,
                cancel,
            }),
            Ok(Err(message)) => Err(NaabError::new(
                ErrorKind::Foreign,
                format!("failed to create QuickJS context: {}", message),
            )),
            Err(_) => Err(NaabError::new(
                ErrorKind::Foreign,
                "QuickJS worker died during start-up".to_string(),
            )),
        }
    }

    fn roundtrip<T>(
        &self,
        build: impl FnOnce(Sender<Result<T, NaabError>>) -> JsJob,
    ) -> Result<T, NaabError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.sender
            .send(build(reply_tx))
            .map_err(|_| worker_gone())?;
        reply_rx.recv().map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> NaabError {
    NaabError::new(
        ErrorKind::Foreign,
        "QuickJS worker is no longer running".to_string(),
    )
}

/// `globalThis.<name> = JSON.parse("<json>")`; JSON string escaping is
/// valid inside a JS string literal.
fn bind_snippet(name: &str, json: &str) -> Result<String, NaabError> {
    let literal = serde_json::to_string(json)
        .map_err(|e| NaabError::new(ErrorKind::Marshal, e.to_string()))?;
    Ok(format!("globalThis.{} = JSON.parse({});", name, literal))
}

fn install_console(context: &Context, output: Arc<Mutex<String>>) -> Result<(), String> {
    let output = std::panic::AssertUnwindSafe(output);
    context
        .add_callback("__naab_print", move |line: String| {
            let output = &output;
            let mut buffer = output.0.lock();
            buffer.push_str(&line);
            buffer.push('\n');
            0i32
        })
        .map_err(|e| e.to_string())?;
    context
        .eval(
            r#"
            globalThis.console = {
                log: function() { __naab_print(Array.prototype.map.call(arguments, String).join(" ")); },
                info: function() { __naab_print(Array.prototype.map.call(arguments, String).join(" ")); },
                warn: function() { __naab_print(Array.prototype.map.call(arguments, String).join(" ")); },
                error: function() { __naab_print(Array.prototype.map.call(arguments, String).join(" ")); }
            };
            "#,
        )
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn convert_err(err: ExecutionError) -> NaabError {
    let message = match &err {
        ExecutionError::Exception(value) => match value {
            JsValue::String(s) => s.clone(),
            other => format!("{:?}", other),
        },
        other => other.to_string(),
    };
    NaabError::foreign(
        "js",
        message,
        vec![StackFrame::new("js", "<eval>", "<inline>", 0)],
    )
}

fn value_to_js(value: &Value) -> Result<JsValue, NaabError> {
    value_to_js_at_depth(value, 0)
}

fn value_to_js_at_depth(value: &Value, depth: usize) -> Result<JsValue, NaabError> {
    if depth > MAX_MARSHAL_DEPTH {
        return Err(NaabError::new(
            ErrorKind::Marshal,
            format!("value nesting exceeds {} levels", MAX_MARSHAL_DEPTH),
        ));
    }
    Ok(match value {
        Value::Null => JsValue::Null,
        Value::Bool(b) => JsValue::Bool(*b),
        Value::Int(i) => {
            if let Ok(small) = i32::try_from(*i) {
                JsValue::Int(small)
            } else if i.abs() <= MAX_SAFE_JS_INT {
                JsValue::Float(*i as f64)
            } else {
                return Err(NaabError::new(
                    ErrorKind::MarshalOverflow,
                    format!("{} exceeds the exact JS number range", i),
                ));
            }
        }
        Value::Float(f) => JsValue::Float(*f),
        Value::Str(s) => JsValue::String(s.to_string()),
        Value::List(items) => JsValue::Array(
            items
                .read()
                .iter()
                .map(|v| value_to_js_at_depth(v, depth + 1))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Dict(entries) => {
            let mut map = HashMap::new();
            for (key, val) in entries.read().iter() {
                map.insert(key.clone(), value_to_js_at_depth(val, depth + 1)?);
            }
            JsValue::Object(map)
        }
        Value::Struct(instance) => {
            // JS object tagged with the struct's type name
            let mut map = HashMap::new();
            map.insert(
                "$struct".to_string(),
                JsValue::String(instance.def.name.clone()),
            );
            let fields = instance.fields.read();
            for (i, field) in instance.def.fields.iter().enumerate() {
                map.insert(
                    field.name.clone(),
                    value_to_js_at_depth(&fields[i], depth + 1)?,
                );
            }
            JsValue::Object(map)
        }
        Value::Function(_) | Value::Block(_) | Value::Foreign(_) => {
            return Err(NaabError::new(
                ErrorKind::Marshal,
                format!("cannot marshal {} into js", value.type_name()),
            ))
        }
    })
}

fn js_to_value(value: &JsValue, depth: usize) -> Result<Value, NaabError> {
    if depth > MAX_MARSHAL_DEPTH {
        return Err(NaabError::new(
            ErrorKind::Marshal,
            format!("js value nesting exceeds {} levels", MAX_MARSHAL_DEPTH),
        ));
    }
    Ok(match value {
        JsValue::Undefined | JsValue::Null => Value::Null,
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Int(i) => Value::Int(*i as i64),
        JsValue::Float(f) => Value::Float(*f),
        JsValue::String(s) => Value::string(s.clone()),
        JsValue::Array(items) => Value::list(
            items
                .iter()
                .map(|v| js_to_value(v, depth + 1))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        JsValue::Object(entries) => {
            let mut map = indexmap::IndexMap::new();
            for (key, val) in entries.iter() {
                map.insert(key.clone(), js_to_value(val, depth + 1)?);
            }
            Value::dict(map)
        }
        other => {
            return Err(NaabError::new(
                ErrorKind::Marshal,
                format!("unsupported js value: {:?}", other),
            ))
        }
    })
}

impl Executor for JsExecutor {
    fn language_id(&self) -> &str {
        "js"
    }

    fn initialized(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        let code = code.to_string();
        self.roundtrip(|reply| JsJob::Execute { code, reply })
    }

    fn execute_with_return(&self, code: &str) -> Result<Value, NaabError> {
        let code = code.to_string();
        self.roundtrip(|reply| JsJob::ExecuteReturn { code, reply })
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        let name = name.to_string();
        let args = args.to_vec();
        self.roundtrip(|reply| JsJob::Call { name, args, reply })
    }

    fn bind_value(&self, name: &str, value: &Value) -> Result<(), NaabError> {
        let name = name.to_string();
        let json = crate::marshal::to_json_string(value)?;
        self.roundtrip(|reply| JsJob::Bind { name, json, reply })
    }

    fn drain_captured_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn close(&self) {
        let _ = self.sender.send(JsJob::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for JsExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
