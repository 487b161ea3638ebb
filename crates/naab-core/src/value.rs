//! The runtime value universe.
//!
//! `Value` is a tagged sum. Scalars are carried by value; strings are
//! immutable shared text; lists, dicts and structs are shared-mutable
//! handles, so two names bound to the same list observe each other's
//! mutations. Shared variants use `Arc` plus `parking_lot` locks so
//! values may cross the polyglot worker pool's threads.

use crate::env::Environment;
use crate::error::{ErrorKind, NaabError};
use crate::exec::Executor;
use indexmap::IndexMap;
use naab_parser::ast::{Expr, Param, Stmt, TypeExpr};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Structural equality recursion cap. Cyclic structures bottom out as
/// unequal instead of spinning.
const MAX_EQ_DEPTH: usize = 256;

#[derive(Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    List(Arc<RwLock<Vec<Value>>>),
    Dict(Arc<RwLock<IndexMap<String, Value>>>),
    Struct(Arc<StructInstance>),
    Function(Arc<FunctionValue>),
    Block(Arc<BlockValue>),
    Foreign(Arc<ForeignValue>),
}

/// Declared shape of a struct: ordered fields plus an index for O(1)
/// field lookup.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
    index: FxHashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
}

impl StructDef {
    pub fn new(name: String, fields: Vec<StructField>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            name,
            fields,
            index,
        }
    }

    /// Index of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// A struct instance: shared definition plus a parallel field vector.
pub struct StructInstance {
    pub def: Arc<StructDef>,
    pub fields: RwLock<Vec<Value>>,
}

impl StructInstance {
    pub fn new(def: Arc<StructDef>, fields: Vec<Value>) -> Self {
        Self {
            def,
            fields: RwLock::new(fields),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        let idx = self.def.field_index(name)?;
        Some(self.fields.read()[idx].clone())
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), NaabError> {
        let idx = self.def.field_index(name).ok_or_else(|| {
            let mut err = NaabError::new(
                ErrorKind::StructField,
                format!("struct '{}' has no field '{}'", self.def.name, name),
            );
            if let Some(suggestion) =
                crate::suggest::closest(name, self.def.field_names().map(String::from))
            {
                err.message = format!("{} (did you mean '{}'?)", err.message, suggestion);
            }
            err
        })?;
        self.fields.write()[idx] = value;
        Ok(())
    }
}

/// A user closure or a native (host) function.
pub struct FunctionValue {
    pub name: Option<String>,
    pub kind: FunctionKind,
}

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, NaabError> + Send + Sync>;

pub enum FunctionKind {
    /// Closure over its defining environment
    User {
        params: Vec<Param>,
        body: Arc<Vec<Stmt>>,
        env: Environment,
    },
    /// Builtin implemented in the host
    Native { func: NativeFn },
}

impl FunctionValue {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Handle to a loaded foreign artifact. Owns its executor unless the
/// executor was borrowed from the process-wide registry.
pub struct BlockValue {
    pub id: String,
    pub language: String,
    pub source: String,
    /// Function invoked when the block itself is called
    pub entry: String,
    /// True when the executor belongs to the process-wide registry;
    /// false when this block owns it
    pub borrowed: bool,
    pub executor: Arc<dyn Executor>,
}

/// Opaque handle to an object living inside a foreign runtime.
///
/// Dropping the last reference runs the finalizer, which releases the
/// underlying object in its runtime. The handle is only meaningful to
/// the executor that issued it.
pub struct ForeignValue {
    pub language: String,
    pub handle: u64,
    pub repr: String,
    finalizer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ForeignValue {
    pub fn new(
        language: String,
        handle: u64,
        repr: String,
        finalizer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            language,
            handle,
            repr,
            finalizer: Mutex::new(Some(Box::new(finalizer))),
        }
    }

    /// Run the finalizer now (used when an executor shuts down).
    pub fn finalize(&self) {
        if let Some(f) = self.finalizer.lock().take() {
            f();
        }
    }
}

impl Drop for ForeignValue {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl Value {
    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(Arc::from(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn dict(entries: IndexMap<String, Value>) -> Self {
        Value::Dict(Arc::new(RwLock::new(entries)))
    }

    pub fn empty_dict() -> Self {
        Value::Dict(Arc::new(RwLock::new(IndexMap::new())))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// The variant tag, for dispatch and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Function(_) => "function",
            Value::Block(_) => "block",
            Value::Foreign(_) => "foreign",
        }
    }

    /// Truthiness: null, false, zero, and empty strings/lists/dicts are
    /// falsy; everything else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.read().is_empty(),
            Value::Dict(entries) => !entries.read().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view, promoting Int to Float.
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    // ========================================================================
    // Equality & Ordering
    // ========================================================================

    /// Structural equality within the same variant; Int and Float
    /// promote and compare numerically; otherwise false without error.
    pub fn equal(&self, other: &Value) -> bool {
        self.equal_at_depth(other, 0)
    }

    fn equal_at_depth(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_EQ_DEPTH {
            return false;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.equal_at_depth(y, depth + 1))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k)
                            .map(|w| v.equal_at_depth(w, depth + 1))
                            .unwrap_or(false)
                    })
            }
            (Value::Struct(a), Value::Struct(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if a.def.name != b.def.name {
                    return false;
                }
                let (fa, fb) = (a.fields.read(), b.fields.read());
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb.iter())
                        .all(|(x, y)| x.equal_at_depth(y, depth + 1))
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Block(a), Value::Block(b)) => Arc::ptr_eq(a, b),
            (Value::Foreign(a), Value::Foreign(b)) => {
                Arc::ptr_eq(a, b) || (a.language == b.language && a.handle == b.handle)
            }
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. Numerics promote; strings
    /// compare lexicographically; anything else is a type error.
    pub fn compare(&self, other: &Value) -> Result<Ordering, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => {
                let (a, b) = match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(NaabError::new(
                            ErrorKind::Type,
                            format!(
                                "cannot compare {} with {}",
                                self.type_name(),
                                other.type_name()
                            ),
                        ))
                    }
                };
                a.partial_cmp(&b).ok_or_else(|| {
                    NaabError::new(ErrorKind::Type, "cannot order NaN".to_string())
                })
            }
        }
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    pub fn add(&self, other: &Value) -> Result<Value, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| overflow("+", *a, *b)),
            (Value::Str(a), Value::Str(b)) => {
                Ok(Value::string(format!("{}{}", a, b)))
            }
            _ => self.float_op(other, "+", |a, b| a + b),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| overflow("-", *a, *b)),
            _ => self.float_op(other, "-", |a, b| a - b),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| overflow("*", *a, *b)),
            _ => self.float_op(other, "*", |a, b| a * b),
        }
    }

    pub fn div(&self, other: &Value) -> Result<Value, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(NaabError::new(
                        ErrorKind::DivZero,
                        "integer division by zero".to_string(),
                    ));
                }
                a.checked_div(*b)
                    .map(Value::Int)
                    .ok_or_else(|| overflow("/", *a, *b))
            }
            // Float division by zero yields ±Inf/NaN per IEEE-754
            _ => self.float_op(other, "/", |a, b| a / b),
        }
    }

    pub fn rem(&self, other: &Value) -> Result<Value, NaabError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(NaabError::new(
                        ErrorKind::DivZero,
                        "integer modulo by zero".to_string(),
                    ));
                }
                a.checked_rem(*b)
                    .map(Value::Int)
                    .ok_or_else(|| overflow("%", *a, *b))
            }
            _ => self.float_op(other, "%", |a, b| a % b),
        }
    }

    pub fn neg(&self) -> Result<Value, NaabError> {
        match self {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| {
                NaabError::new(
                    ErrorKind::Overflow,
                    format!("integer overflow negating {}", i),
                )
            }),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(NaabError::new(
                ErrorKind::Type,
                format!("cannot negate {}", self.type_name()),
            )),
        }
    }

    pub fn not(&self) -> Value {
        Value::Bool(!self.truthy())
    }

    fn float_op(
        &self,
        other: &Value,
        op: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, NaabError> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "unsupported operand types for '{}': {} and {}",
                    op,
                    self.type_name(),
                    other.type_name()
                ),
            )),
        }
    }
}

fn overflow(op: &str, a: i64, b: i64) -> NaabError {
    NaabError::new(
        ErrorKind::Overflow,
        format!("integer overflow evaluating {} {} {}", a, op, b),
    )
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::display::to_display_string(self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::display::to_display_string(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Float(0.0).truthy());
        assert!(!Value::string("").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(!Value::empty_dict().truthy());

        assert!(Value::Bool(true).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(Value::string("x").truthy());
        assert!(Value::list(vec![Value::Null]).truthy());
    }

    #[test]
    fn test_numeric_equality_promotes() {
        assert!(Value::Int(2).equal(&Value::Float(2.0)));
        assert!(Value::Float(2.0).equal(&Value::Int(2)));
        assert!(!Value::Int(2).equal(&Value::Float(2.5)));
    }

    #[test]
    fn test_cross_variant_equality_is_false() {
        assert!(!Value::Int(0).equal(&Value::Null));
        assert!(!Value::string("1").equal(&Value::Int(1)));
        assert!(!Value::Bool(false).equal(&Value::Int(0)));
    }

    #[test]
    fn test_list_structural_equality() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(a.equal(&b));

        let c = Value::list(vec![Value::Int(1)]);
        assert!(!a.equal(&c));
    }

    #[test]
    fn test_shared_list_mutation_is_visible() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = a.clone();
        if let Value::List(items) = &a {
            items.write().push(Value::Int(2));
        }
        if let Value::List(items) = &b {
            assert_eq!(items.read().len(), 2);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn test_cyclic_equality_terminates() {
        let a = Value::list(vec![]);
        if let Value::List(items) = &a {
            items.write().push(a.clone());
        }
        let b = Value::list(vec![]);
        if let Value::List(items) = &b {
            items.write().push(b.clone());
        }
        // Two distinct one-element cycles: must terminate (and bottom
        // out unequal at the depth cap)
        let _ = a.equal(&b);
    }

    #[test]
    fn test_int_arithmetic() {
        assert!(Value::Int(2).add(&Value::Int(3)).unwrap().equal(&Value::Int(5)));
        assert!(Value::Int(7).div(&Value::Int(2)).unwrap().equal(&Value::Int(3)));
        assert!(Value::Int(7).rem(&Value::Int(2)).unwrap().equal(&Value::Int(1)));
    }

    #[test]
    fn test_numeric_promotion() {
        let r = Value::Int(1).add(&Value::Float(0.5)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 1.5));
    }

    #[test]
    fn test_integer_overflow_is_error() {
        let err = Value::Int(i64::MAX).add(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn test_integer_division_by_zero() {
        let err = Value::Int(1).div(&Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivZero);
    }

    #[test]
    fn test_float_division_by_zero_is_inf() {
        let r = Value::Float(1.0).div(&Value::Int(0)).unwrap();
        assert!(matches!(r, Value::Float(f) if f.is_infinite()));
    }

    #[test]
    fn test_string_concat() {
        let r = Value::string("oops").add(&Value::string("!")).unwrap();
        assert_eq!(r.as_str(), Some("oops!"));
    }

    #[test]
    fn test_add_type_error() {
        let err = Value::string("a").add(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_compare_type_error() {
        let err = Value::Int(1).compare(&Value::string("a")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_struct_field_access() {
        let def = Arc::new(StructDef::new(
            "Point".into(),
            vec![
                StructField {
                    name: "x".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
                StructField {
                    name: "y".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: None,
                },
            ],
        ));
        let instance = StructInstance::new(def, vec![Value::Int(1), Value::Int(2)]);
        assert!(instance.get_field("x").unwrap().equal(&Value::Int(1)));
        instance.set_field("y", Value::Int(9)).unwrap();
        assert!(instance.get_field("y").unwrap().equal(&Value::Int(9)));

        let err = instance.set_field("z", Value::Null).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructField);
    }

    #[test]
    fn test_foreign_finalizer_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let foreign = ForeignValue::new("python".into(), 1, "<obj>".into(), move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        foreign.finalize();
        drop(foreign);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
