//! Value ↔ JSON conversion for subprocess transports, plus shared
//! marshalling limits and struct-field validation.
//!
//! The Python and JavaScript conversions live next to their adapters
//! because they speak those runtimes' native value types; everything
//! that crosses a pipe goes through here.

use naab_core::{ErrorKind, NaabError, StructDef, Value};
use serde_json::{json, Map, Number};

/// Maximum serialized payload for one marshalled value.
pub const MAX_MARSHAL_BYTES: usize = 16 * 1024 * 1024;
/// Maximum nesting depth for one marshalled value.
pub const MAX_MARSHAL_DEPTH: usize = 64;

/// Largest integer a JavaScript number can hold exactly.
pub const MAX_SAFE_JS_INT: i64 = 9_007_199_254_740_992;

/// Convert a host value to JSON. Structs become tagged objects;
/// functions, blocks and foreign handles do not cross a pipe.
pub fn to_json(value: &Value) -> Result<serde_json::Value, NaabError> {
    to_json_at_depth(value, 0)
}

fn to_json_at_depth(value: &Value, depth: usize) -> Result<serde_json::Value, NaabError> {
    if depth > MAX_MARSHAL_DEPTH {
        return Err(NaabError::new(
            ErrorKind::Marshal,
            format!("value nesting exceeds {} levels", MAX_MARSHAL_DEPTH),
        ));
    }
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Int(i) => Ok(json!(i)),
        Value::Float(f) => Ok(Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        Value::Bool(b) => Ok(json!(b)),
        Value::Str(s) => Ok(json!(s.as_ref())),
        Value::List(items) => {
            let items = items.read();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(to_json_at_depth(item, depth + 1)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Dict(entries) => {
            let entries = entries.read();
            let mut out = Map::new();
            for (key, val) in entries.iter() {
                out.insert(key.clone(), to_json_at_depth(val, depth + 1)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::Struct(instance) => {
            let mut out = Map::new();
            out.insert(
                "$struct".to_string(),
                json!(instance.def.name.clone()),
            );
            let fields = instance.fields.read();
            for (i, field) in instance.def.fields.iter().enumerate() {
                out.insert(field.name.clone(), to_json_at_depth(&fields[i], depth + 1)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::Function(_) | Value::Block(_) | Value::Foreign(_) => Err(NaabError::new(
            ErrorKind::Marshal,
            format!("cannot marshal {} across a subprocess boundary", value.type_name()),
        )),
    }
}

/// Serialize to a JSON string, enforcing the payload cap.
pub fn to_json_string(value: &Value) -> Result<String, NaabError> {
    let json = to_json(value)?;
    let out = serde_json::to_string(&json)
        .map_err(|e| NaabError::new(ErrorKind::Marshal, e.to_string()))?;
    if out.len() > MAX_MARSHAL_BYTES {
        return Err(NaabError::new(
            ErrorKind::Marshal,
            format!(
                "serialized payload of {} bytes exceeds the {} byte cap",
                out.len(),
                MAX_MARSHAL_BYTES
            ),
        ));
    }
    Ok(out)
}

/// Convert JSON back into a host value. Numbers that fit i64 become
/// Int; everything else becomes Float. Tagged struct objects come back
/// as plain dicts (the evaluator re-validates against a StructDef when
/// a struct target is declared).
pub fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            Value::list(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(entries) => {
            let map = entries
                .into_iter()
                .filter(|(k, _)| k != "$struct")
                .map(|(k, v)| (k, from_json(v)))
                .collect();
            Value::dict(map)
        }
    }
}

/// Validate provided field names against a struct definition before a
/// foreign value is shaped into that struct.
pub fn validate_struct_fields<'a>(
    def: &StructDef,
    provided: impl Iterator<Item = &'a str> + Clone,
) -> Result<(), NaabError> {
    for name in provided.clone() {
        if def.field_index(name).is_none() {
            return Err(NaabError::new(
                ErrorKind::StructField,
                format!("struct '{}' has no field '{}'", def.name, name),
            ));
        }
    }
    for field in &def.fields {
        let given = provided.clone().any(|n| n == field.name);
        if !given && field.default.is_none() {
            return Err(NaabError::new(
                ErrorKind::StructField,
                format!(
                    "missing required field '{}' for struct '{}'",
                    field.name, def.name
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use naab_core::StructField;
    use naab_parser::ast::TypeExpr;
    use std::sync::Arc;

    #[test]
    fn test_scalar_round_trip() {
        for v in [
            Value::Null,
            Value::Int(-7),
            Value::Float(2.5),
            Value::Bool(true),
            Value::string("héllo"),
        ] {
            let back = from_json(to_json(&v).unwrap());
            assert!(v.equal(&back), "{:?} != {:?}", v, back);
        }
    }

    #[test]
    fn test_collection_round_trip() {
        let mut entries = IndexMap::new();
        entries.insert("xs".to_string(), Value::list(vec![Value::Int(1), Value::Int(2)]));
        entries.insert("ok".to_string(), Value::Bool(false));
        let v = Value::dict(entries);
        let back = from_json(to_json(&v).unwrap());
        assert!(v.equal(&back));
    }

    #[test]
    fn test_struct_becomes_tagged_object() {
        let def = Arc::new(StructDef::new(
            "Point".into(),
            vec![StructField {
                name: "x".into(),
                ty: TypeExpr::Named("int".into()),
                default: None,
            }],
        ));
        let instance = naab_core::StructInstance::new(def, vec![Value::Int(3)]);
        let json = to_json(&Value::Struct(Arc::new(instance))).unwrap();
        assert_eq!(json["$struct"], "Point");
        assert_eq!(json["x"], 3);
    }

    #[test]
    fn test_function_does_not_marshal() {
        let f = Value::Function(Arc::new(naab_core::FunctionValue {
            name: None,
            kind: naab_core::FunctionKind::Native {
                func: Arc::new(|_| Ok(Value::Null)),
            },
        }));
        let err = to_json(&f).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Marshal);
    }

    #[test]
    fn test_depth_cap_catches_cycles() {
        let v = Value::list(vec![]);
        if let Value::List(items) = &v {
            items.write().push(v.clone());
        }
        let err = to_json(&v).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Marshal);
    }

    #[test]
    fn test_validate_struct_fields() {
        let def = StructDef::new(
            "User".into(),
            vec![
                StructField {
                    name: "name".into(),
                    ty: TypeExpr::Named("string".into()),
                    default: None,
                },
                StructField {
                    name: "age".into(),
                    ty: TypeExpr::Named("int".into()),
                    default: Some(naab_parser::ast::Expr::new(
                        naab_parser::ast::ExprKind::Int(0),
                        naab_parser::Span::default(),
                    )),
                },
            ],
        );
        // Required field present, defaulted field absent: ok
        validate_struct_fields(&def, ["name"].into_iter()).unwrap();
        // Missing required field
        let err = validate_struct_fields(&def, ["age"].into_iter()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructField);
        // Unknown field
        let err = validate_struct_fields(&def, ["name", "email"].into_iter()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructField);
    }
}
