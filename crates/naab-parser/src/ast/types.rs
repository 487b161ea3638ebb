//! The small type language: base types, generics, nullable, unions,
//! qualified module types.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// `int`, `string`, `Point`, a generic parameter `T`
    Named(String),
    /// `array<T>`, `dict<K, V>`, user generics
    Generic { name: String, args: Vec<TypeExpr> },
    /// `?T`
    Nullable(Box<TypeExpr>),
    /// `A|B`
    Union(Vec<TypeExpr>),
    /// `mod::T`
    Qualified { module: String, name: String },
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(name) => write!(f, "{}", name),
            TypeExpr::Generic { name, args } => {
                write!(f, "{}<", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeExpr::Nullable(inner) => write!(f, "?{}", inner),
            TypeExpr::Union(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            TypeExpr::Qualified { module, name } => write!(f, "{}::{}", module, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let t = TypeExpr::Generic {
            name: "dict".into(),
            args: vec![
                TypeExpr::Named("string".into()),
                TypeExpr::Generic {
                    name: "array".into(),
                    args: vec![TypeExpr::Named("int".into())],
                },
            ],
        };
        assert_eq!(t.to_string(), "dict<string, array<int>>");
    }

    #[test]
    fn test_display_union_nullable() {
        let t = TypeExpr::Union(vec![
            TypeExpr::Named("int".into()),
            TypeExpr::Nullable(Box::new(TypeExpr::Named("string".into()))),
        ]);
        assert_eq!(t.to_string(), "int|?string");
    }
}
