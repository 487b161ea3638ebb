//! Host builtins installed in the root environment.

use naab_core::{Environment, ErrorKind, FunctionKind, FunctionValue, NaabError, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Where `print` and drained foreign output go. Tests capture into a
/// buffer; the CLI uses real stdout.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Arc<Mutex<String>>),
}

impl OutputSink {
    pub fn buffer() -> (OutputSink, Arc<Mutex<String>>) {
        let buf = Arc::new(Mutex::new(String::new()));
        (OutputSink::Buffer(buf.clone()), buf)
    }

    pub fn write(&self, text: &str) {
        match self {
            OutputSink::Stdout => {
                use std::io::Write;
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(text.as_bytes());
                let _ = lock.flush();
            }
            OutputSink::Buffer(buf) => buf.lock().push_str(text),
        }
    }
}

fn native(
    env: &Environment,
    name: &str,
    func: impl Fn(&[Value]) -> Result<Value, NaabError> + Send + Sync + 'static,
) {
    env.define(
        name,
        Value::Function(Arc::new(FunctionValue {
            name: Some(name.to_string()),
            kind: FunctionKind::Native {
                func: Arc::new(func),
            },
        })),
    );
}

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value, NaabError> {
    args.get(index).ok_or_else(|| {
        NaabError::new(
            ErrorKind::Arity,
            format!("{} expects at least {} argument(s)", name, index + 1),
        )
    })
}

/// Install the builtin functions into `env`.
pub fn install(env: &Environment, sink: OutputSink) {
    let print_sink = sink.clone();
    native(env, "print", move |args| {
        let rendered: Vec<String> = args
            .iter()
            .map(naab_core::display::to_display_string)
            .collect();
        print_sink.write(&rendered.join(" "));
        print_sink.write("\n");
        Ok(Value::Null)
    });

    let println_sink = sink;
    native(env, "println", move |args| {
        let rendered: Vec<String> = args
            .iter()
            .map(naab_core::display::to_display_string)
            .collect();
        println_sink.write(&rendered.join(" "));
        println_sink.write("\n");
        Ok(Value::Null)
    });

    native(env, "len", |args| {
        let value = arg(args, 0, "len")?;
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.read().len(),
            Value::Dict(entries) => entries.read().len(),
            other => {
                return Err(NaabError::new(
                    ErrorKind::Type,
                    format!("len: unsupported type {}", other.type_name()),
                ))
            }
        };
        Ok(Value::Int(len as i64))
    });

    native(env, "type_of", |args| {
        Ok(Value::string(arg(args, 0, "type_of")?.type_name()))
    });

    native(env, "str", |args| {
        Ok(Value::string(naab_core::display::to_display_string(arg(
            args, 0, "str",
        )?)))
    });

    native(env, "int", |args| match arg(args, 0, "int")? {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            NaabError::new(ErrorKind::Type, format!("int: cannot parse '{}'", s))
        }),
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("int: unsupported type {}", other.type_name()),
        )),
    });

    native(env, "float", |args| match arg(args, 0, "float")? {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            NaabError::new(ErrorKind::Type, format!("float: cannot parse '{}'", s))
        }),
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("float: unsupported type {}", other.type_name()),
        )),
    });

    native(env, "push", |args| {
        let list = arg(args, 0, "push")?;
        let value = arg(args, 1, "push")?;
        match list {
            Value::List(items) => {
                items.write().push(value.clone());
                Ok(list.clone())
            }
            other => Err(NaabError::new(
                ErrorKind::Type,
                format!("push: expected list, got {}", other.type_name()),
            )),
        }
    });

    native(env, "keys", |args| match arg(args, 0, "keys")? {
        Value::Dict(entries) => Ok(Value::list(
            entries.read().keys().map(Value::string).collect(),
        )),
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("keys: expected dict, got {}", other.type_name()),
        )),
    });

    native(env, "values", |args| match arg(args, 0, "values")? {
        Value::Dict(entries) => Ok(Value::list(entries.read().values().cloned().collect())),
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("values: expected dict, got {}", other.type_name()),
        )),
    });

    native(env, "contains", |args| {
        let collection = arg(args, 0, "contains")?;
        let needle = arg(args, 1, "contains")?;
        let found = match collection {
            Value::List(items) => items.read().iter().any(|v| v.equal(needle)),
            Value::Dict(entries) => match needle.as_str() {
                Some(key) => entries.read().contains_key(key),
                None => false,
            },
            Value::Str(s) => match needle.as_str() {
                Some(sub) => s.contains(sub),
                None => false,
            },
            other => {
                return Err(NaabError::new(
                    ErrorKind::Type,
                    format!("contains: unsupported type {}", other.type_name()),
                ))
            }
        };
        Ok(Value::Bool(found))
    });

    native(env, "range", |args| {
        let start = arg(args, 0, "range")?.as_int().ok_or_else(|| {
            NaabError::new(ErrorKind::Type, "range: start must be an int".to_string())
        })?;
        let end = arg(args, 1, "range")?.as_int().ok_or_else(|| {
            NaabError::new(ErrorKind::Type, "range: end must be an int".to_string())
        })?;
        Ok(Value::list((start..end).map(Value::Int).collect()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_builtins() -> (Environment, Arc<Mutex<String>>) {
        let env = Environment::new();
        let (sink, buf) = OutputSink::buffer();
        install(&env, sink);
        (env, buf)
    }

    fn call(env: &Environment, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        match env.get(name).unwrap() {
            Value::Function(f) => match &f.kind {
                FunctionKind::Native { func } => func(args),
                _ => panic!("expected native function"),
            },
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_print_writes_sink() {
        let (env, buf) = env_with_builtins();
        call(&env, "print", &[Value::string("hi"), Value::Int(2)]).unwrap();
        assert_eq!(*buf.lock(), "hi 2\n");
    }

    #[test]
    fn test_len() {
        let (env, _) = env_with_builtins();
        let v = call(&env, "len", &[Value::string("héllo")]).unwrap();
        assert!(v.equal(&Value::Int(5)));
        assert!(call(&env, "len", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_int_conversions() {
        let (env, _) = env_with_builtins();
        assert!(call(&env, "int", &[Value::string(" 42 ")])
            .unwrap()
            .equal(&Value::Int(42)));
        assert!(call(&env, "int", &[Value::Float(2.9)])
            .unwrap()
            .equal(&Value::Int(2)));
        assert!(call(&env, "int", &[Value::string("nope")]).is_err());
    }

    #[test]
    fn test_range() {
        let (env, _) = env_with_builtins();
        let v = call(&env, "range", &[Value::Int(1), Value::Int(4)]).unwrap();
        assert!(v.equal(&Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3)
        ])));
    }

    #[test]
    fn test_push_mutates_shared_list() {
        let (env, _) = env_with_builtins();
        let list = Value::list(vec![]);
        call(&env, "push", &[list.clone(), Value::Int(1)]).unwrap();
        assert!(call(&env, "len", &[list]).unwrap().equal(&Value::Int(1)));
    }
}
