//! Lexically-scoped environments.
//!
//! An environment is a chain of frames. Lookup walks parent links;
//! `define` writes to the innermost frame; `assign` updates the nearest
//! enclosing frame that already holds the name. Closures capture their
//! defining frame by shared reference.

use crate::error::{ErrorKind, NaabError};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone)]
pub struct Environment {
    frame: Arc<Frame>,
}

struct Frame {
    vars: RwLock<IndexMap<String, Value>>,
    parent: Option<Environment>,
}

impl Environment {
    /// Create a root environment.
    pub fn new() -> Self {
        Self {
            frame: Arc::new(Frame {
                vars: RwLock::new(IndexMap::new()),
                parent: None,
            }),
        }
    }

    /// Create a child environment whose parent is `self`.
    pub fn child(&self) -> Self {
        Self {
            frame: Arc::new(Frame {
                vars: RwLock::new(IndexMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Define `name` in the innermost frame, shadowing any outer
    /// binding. Redefinition in the same frame overwrites.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.frame.vars.write().insert(name.into(), value);
    }

    /// Look up `name`, walking parent links to the root.
    pub fn get(&self, name: &str) -> Result<Value, NaabError> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if let Some(value) = env.frame.vars.read().get(name) {
                return Ok(value.clone());
            }
            current = env.frame.parent.clone();
        }
        Err(self.undefined(name))
    }

    /// Update the nearest enclosing binding of `name`.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), NaabError> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            {
                let mut vars = env.frame.vars.write();
                if let Some(slot) = vars.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
            }
            current = env.frame.parent.clone();
        }
        Err(self.undefined(name))
    }

    /// Whether `name` is bound anywhere in the chain.
    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// All names reachable from this frame, innermost first. Shadowed
    /// names appear once, at their innermost binding.
    pub fn names_in_scope(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            for name in env.frame.vars.read().keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            current = env.frame.parent.clone();
        }
        names
    }

    /// Identity comparison, used to verify capture/shared-frame
    /// invariants.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame)
    }

    fn undefined(&self, name: &str) -> NaabError {
        let message = match crate::suggest::closest(name, self.names_in_scope()) {
            Some(suggestion) => format!(
                "undefined variable '{}' (did you mean '{}'?)",
                name, suggestion
            ),
            None => format!("undefined variable '{}'", name),
        };
        NaabError::new(ErrorKind::Undefined, message)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_get() {
        let env = Environment::new();
        env.define("x", Value::Int(1));
        assert!(env.get("x").unwrap().equal(&Value::Int(1)));
    }

    #[test]
    fn test_shadowing() {
        let outer = Environment::new();
        outer.define("n", Value::Int(1));
        let inner = outer.child();
        inner.define("n", Value::Int(2));
        assert!(inner.get("n").unwrap().equal(&Value::Int(2)));
        assert!(outer.get("n").unwrap().equal(&Value::Int(1)));
    }

    #[test]
    fn test_assign_walks_to_parent() {
        let outer = Environment::new();
        outer.define("x", Value::Int(1));
        let inner = outer.child();
        inner.assign("x", Value::Int(9)).unwrap();
        assert!(outer.get("x").unwrap().equal(&Value::Int(9)));
    }

    #[test]
    fn test_assign_undefined_fails() {
        let env = Environment::new();
        let err = env.assign("nope", Value::Null).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Undefined);
    }

    #[test]
    fn test_undefined_with_suggestion() {
        let env = Environment::new();
        env.define("count", Value::Int(1));
        let err = env.get("conut").unwrap_err();
        assert!(err.message.contains("did you mean 'count'?"), "{}", err.message);
    }

    #[test]
    fn test_names_in_scope_innermost_first() {
        let outer = Environment::new();
        outer.define("a", Value::Int(1));
        let inner = outer.child();
        inner.define("b", Value::Int(2));
        assert_eq!(inner.names_in_scope(), vec!["b".to_string(), "a".to_string()]);
    }
}
