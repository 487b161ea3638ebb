//! Embedded Python adapter (the embedded-interpreter pattern).
//!
//! CPython has a global lock: every call acquires the GIL, which also
//! serializes executors against each other. Each executor instance
//! gets its own globals dict as a sub-environment, so two Python
//! executors do not see each other's definitions. stdout/stderr are
//! redirected into the executor's output buffer for the duration of
//! each call. Python exceptions come back as `E_FOREIGN` with the
//! traceback converted frame-by-frame into the common stack model.
//!
//! Thread state: pool workers call [`warmup_thread`] at start-up so
//! the interpreter registers every OS thread exactly once, up front.

use crate::marshal::MAX_MARSHAL_DEPTH;
use naab_core::{
    CancelFlag, ErrorKind, Executor, ForeignValue, NaabError, StackFrame, Value,
};
use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use pyo3::IntoPyObjectExt;
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pre-register this OS thread with the interpreter. Called once per
/// pool worker; repeated calls are safe (pyo3 tracks attachment).
pub fn warmup_thread() {
    Python::with_gil(|_| {});
}

pub struct PythonExecutor {
    /// Per-executor global namespace (sub-environment isolation)
    globals: Py<PyDict>,
    output: Mutex<String>,
    handles: Arc<Mutex<FxHashMap<u64, Py<PyAny>>>>,
    next_handle: AtomicU64,
    cancel: CancelFlag,
}

impl PythonExecutor {
    pub fn new() -> Result<Self, NaabError> {
        Python::with_gil(|py| {
            let globals = PyDict::new(py);
            Ok(Self {
                globals: globals.unbind(),
                output: Mutex::new(String::new()),
                handles: Arc::new(Mutex::new(FxHashMap::default())),
                next_handle: AtomicU64::new(1),
                cancel: CancelFlag::new(),
            })
        })
    }

    /// Run `f` with sys.stdout/sys.stderr pointed at a StringIO, then
    /// append whatever was written to the executor's output buffer.
    fn with_redirected_output<T>(
        &self,
        py: Python<'_>,
        f: impl FnOnce() -> PyResult<T>,
    ) -> PyResult<T> {
        let sys = py.import("sys")?;
        let io = py.import("io")?;
        let buffer = io.getattr("StringIO")?.call0()?;
        let old_out = sys.getattr("stdout")?;
        let old_err = sys.getattr("stderr")?;
        sys.setattr("stdout", &buffer)?;
        sys.setattr("stderr", &buffer)?;

        let result = f();

        let _ = sys.setattr("stdout", old_out);
        let _ = sys.setattr("stderr", old_err);
        if let Ok(text) = buffer
            .call_method0("getvalue")
            .and_then(|v| v.extract::<String>())
        {
            if !text.is_empty() {
                self.output.lock().push_str(&text);
            }
        }
        result
    }

    /// Convert a PyErr into `E_FOREIGN`, preserving the message, the
    /// traceback as language-tagged frames, and (when the exception
    /// argument marshals) the thrown payload for host `catch`.
    fn convert_err(&self, py: Python<'_>, err: PyErr) -> NaabError {
        let message = err.to_string();
        let mut frames = Vec::new();
        let mut current = err.traceback(py).map(|tb| tb.into_any());
        while let Some(tb) = current {
            let line: u32 = tb
                .getattr("tb_lineno")
                .and_then(|l| l.extract())
                .unwrap_or(0);
            let (name, file) = tb
                .getattr("tb_frame")
                .and_then(|f| f.getattr("f_code"))
                .map(|code| {
                    let name = code
                        .getattr("co_name")
                        .and_then(|n| n.extract::<String>())
                        .unwrap_or_default();
                    let file = code
                        .getattr("co_filename")
                        .and_then(|n| n.extract::<String>())
                        .unwrap_or_default();
                    (name, file)
                })
                .unwrap_or_default();
            frames.push(StackFrame::new("python", name, file, line));
            current = tb
                .getattr("tb_next")
                .ok()
                .filter(|next| !next.is_none());
        }

        let mut error = NaabError::foreign("python", message, frames);
        // A single-argument exception whose payload marshals cleanly
        // rides along as the thrown value
        if let Ok(args) = err.value(py).getattr("args") {
            if let Ok(tuple) = args.downcast::<PyTuple>() {
                if tuple.len() == 1 {
                    if let Ok(item) = tuple.get_item(0) {
                        if let Ok(value) = self.from_python(py, &item, 0) {
                            if !matches!(value, Value::Foreign(_)) {
                                error.thrown = Some(value);
                            }
                        }
                    }
                }
            }
        }
        error
    }

    fn to_python(&self, py: Python<'_>, value: &Value) -> Result<Py<PyAny>, NaabError> {
        let obj = match value {
            Value::Null => py.None(),
            Value::Int(i) => i
                .into_py_any(py)
                .map_err(|e| marshal_err(py, e))?,
            Value::Float(f) => f
                .into_py_any(py)
                .map_err(|e| marshal_err(py, e))?,
            Value::Bool(b) => b
                .into_py_any(py)
                .map_err(|e| marshal_err(py, e))?,
            Value::Str(s) => PyString::new(py, s).into_any().unbind(),
            Value::List(items) => {
                let list = PyList::empty(py);
                for item in items.read().iter() {
                    let obj = self.to_python(py, item)?;
                    list.append(obj).map_err(|e| marshal_err(py, e))?;
                }
                list.into_any().unbind()
            }
            Value::Dict(entries) => {
                let dict = PyDict::new(py);
                for (key, val) in entries.read().iter() {
                    let obj = self.to_python(py, val)?;
                    dict.set_item(key, obj).map_err(|e| marshal_err(py, e))?;
                }
                dict.into_any().unbind()
            }
            Value::Struct(instance) => {
                // Best effort: a dict of fields
                let dict = PyDict::new(py);
                let fields = instance.fields.read();
                for (i, field) in instance.def.fields.iter().enumerate() {
                    let obj = self.to_python(py, &fields[i])?;
                    dict.set_item(&field.name, obj)
                        .map_err(|e| marshal_err(py, e))?;
                }
                dict.into_any().unbind()
            }
            Value::Foreign(foreign) => {
                if foreign.language != "python" {
                    return Err(NaabError::new(
                        ErrorKind::Marshal,
                        format!(
                            "cannot pass a {} handle into python",
                            foreign.language
                        ),
                    ));
                }
                // Native passthrough
                self.handles
                    .lock()
                    .get(&foreign.handle)
                    .map(|obj| obj.clone_ref(py))
                    .ok_or_else(|| {
                        NaabError::new(
                            ErrorKind::Marshal,
                            "stale python handle".to_string(),
                        )
                    })?
            }
            Value::Function(_) | Value::Block(_) => {
                return Err(NaabError::new(
                    ErrorKind::Marshal,
                    format!("cannot marshal {} into python", value.type_name()),
                ))
            }
        };
        Ok(obj)
    }

    fn from_python(
        &self,
        py: Python<'_>,
        obj: &Bound<'_, PyAny>,
        depth: usize,
    ) -> Result<Value, NaabError> {
        if depth > MAX_MARSHAL_DEPTH {
            return Err(NaabError::new(
                ErrorKind::Marshal,
                format!("python value nesting exceeds {} levels", MAX_MARSHAL_DEPTH),
            ));
        }
        if obj.is_none() {
            return Ok(Value::Null);
        }
        if obj.is_instance_of::<PyBool>() {
            return Ok(Value::Bool(obj.extract().map_err(|e| marshal_err(py, e))?));
        }
        if obj.is_instance_of::<PyInt>() {
            return match obj.extract::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => Err(NaabError::new(
                    ErrorKind::MarshalOverflow,
                    "python int does not fit in 64-bit signed".to_string(),
                )),
            };
        }
        if obj.is_instance_of::<PyFloat>() {
            return Ok(Value::Float(obj.extract().map_err(|e| marshal_err(py, e))?));
        }
        if obj.is_instance_of::<PyString>() {
            return Ok(Value::string(
                obj.extract::<String>().map_err(|e| marshal_err(py, e))?,
            ));
        }
        if let Ok(list) = obj.downcast::<PyList>() {
            let mut items = Vec::with_capacity(list.len());
            for item in list.iter() {
                items.push(self.from_python(py, &item, depth + 1)?);
            }
            return Ok(Value::list(items));
        }
        if let Ok(tuple) = obj.downcast::<PyTuple>() {
            let mut items = Vec::with_capacity(tuple.len());
            for item in tuple.iter() {
                items.push(self.from_python(py, &item, depth + 1)?);
            }
            return Ok(Value::list(items));
        }
        if let Ok(dict) = obj.downcast::<PyDict>() {
            let mut entries = indexmap::IndexMap::new();
            for (key, val) in dict.iter() {
                let key: String = key
                    .extract()
                    .unwrap_or_else(|_| key.to_string());
                entries.insert(key, self.from_python(py, &val, depth + 1)?);
            }
            return Ok(Value::dict(entries));
        }

        // Anything else stays inside the runtime as an opaque handle
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let repr = obj
            .repr()
            .map(|r| r.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<python object>".to_string());
        self.handles.lock().insert(id, obj.clone().unbind());
        let handles = self.handles.clone();
        Ok(Value::Foreign(Arc::new(ForeignValue::new(
            "python".to_string(),
            id,
            repr,
            move || {
                handles.lock().remove(&id);
            },
        ))))
    }

    fn run_code(&self, py: Python<'_>, code: &str) -> Result<(), NaabError> {
        let code_c = CString::new(code).map_err(|_| {
            NaabError::new(ErrorKind::Marshal, "python code contains NUL".to_string())
        })?;
        let globals = self.globals.bind(py);
        self.with_redirected_output(py, || py.run(code_c.as_c_str(), Some(globals), None))
            .map_err(|e| self.convert_err(py, e))
    }
}

/// Wrap an inline body in a function definition so `return` works at
/// the top of the body, and stash the result in a well-known global.
fn wrap_inline_body(body: &str) -> String {
    let dedented = super::dedent(body);
    let indented: String = if dedented.trim().is_empty() {
        "    pass\n".to_string()
    } else {
        dedented.lines().map(|l| format!("    {}\n", l)).collect()
    };
    format!(
        "def __naab_inline__():\n{}\n__naab_result__ = __naab_inline__()\n",
        indented
    )
}

fn marshal_err(_py: Python<'_>, e: PyErr) -> NaabError {
    NaabError::new(ErrorKind::Marshal, e.to_string())
}

impl Executor for PythonExecutor {
    fn language_id(&self) -> &str {
        "python"
    }

    fn initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.cancel.clear();
        Python::with_gil(|py| self.run_code(py, &super::dedent(code)))
    }

    fn execute_with_return(&self, code: &str) -> Result<Value, NaabError> {
        self.cancel.clear();
        Python::with_gil(|py| {
            self.run_code(py, &wrap_inline_body(code))?;
            let globals = self.globals.bind(py);
            match globals.get_item("__naab_result__") {
                Ok(Some(obj)) => self.from_python(py, &obj, 0),
                _ => Ok(Value::Null),
            }
        })
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        self.cancel.clear();
        Python::with_gil(|py| {
            let globals = self.globals.bind(py);
            let func = globals
                .get_item(name)
                .ok()
                .flatten()
                .ok_or_else(|| {
                    NaabError::new(
                        ErrorKind::Foreign,
                        format!("python function '{}' is not defined", name),
                    )
                })?;
            let mut py_args = Vec::with_capacity(args.len());
            for arg in args {
                py_args.push(self.to_python(py, arg)?);
            }
            let tuple = PyTuple::new(py, py_args).map_err(|e| marshal_err(py, e))?;
            let result = self
                .with_redirected_output(py, || func.call1(tuple))
                .map_err(|e| self.convert_err(py, e))?;
            self.from_python(py, &result, 0)
        })
    }

    fn bind_value(&self, name: &str, value: &Value) -> Result<(), NaabError> {
        Python::with_gil(|py| {
            let obj = self.to_python(py, value)?;
            self.globals
                .bind(py)
                .set_item(name, obj)
                .map_err(|e| marshal_err(py, e))
        })
    }

    fn drain_captured_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }

    fn call_method(&self, target: &Value, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        let foreign = match target {
            Value::Foreign(f) if f.language == "python" => f,
            _ => {
                return Err(NaabError::new(
                    ErrorKind::Foreign,
                    "python method call on a non-python value".to_string(),
                ))
            }
        };
        Python::with_gil(|py| {
            let obj = self
                .handles
                .lock()
                .get(&foreign.handle)
                .map(|o| o.clone_ref(py))
                .ok_or_else(|| {
                    NaabError::new(ErrorKind::Foreign, "stale python handle".to_string())
                })?;
            let bound = obj.bind(py);
            let method = bound
                .getattr(name)
                .map_err(|e| self.convert_err(py, e))?;
            let mut py_args = Vec::with_capacity(args.len());
            for arg in args {
                py_args.push(self.to_python(py, arg)?);
            }
            let tuple = PyTuple::new(py, py_args).map_err(|e| marshal_err(py, e))?;
            let result = self
                .with_redirected_output(py, || method.call1(tuple))
                .map_err(|e| self.convert_err(py, e))?;
            self.from_python(py, &result, 0)
        })
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn close(&self) {
        let handles: Vec<Py<PyAny>> = {
            let mut map = self.handles.lock();
            map.drain().map(|(_, obj)| obj).collect()
        };
        if !handles.is_empty() {
            Python::with_gil(|_| drop(handles));
        }
        self.output.lock().clear();
    }
}
