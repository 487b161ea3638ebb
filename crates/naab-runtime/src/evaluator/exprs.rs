//! Expression evaluation.

use super::Evaluator;
use indexmap::IndexMap;
use naab_core::{
    suggest, Environment, ErrorKind, FunctionKind, FunctionValue, NaabError, StructInstance,
    Value,
};
use naab_parser::ast::*;
use std::sync::Arc;

impl Evaluator {
    pub(crate) fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Environment,
    ) -> Result<Value, NaabError> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Str(s) => Ok(Value::string(s.clone())),
            ExprKind::Identifier(name) => env.get(name),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::new();
                for (key, value_expr) in entries {
                    let value = self.eval_expr(value_expr, env)?;
                    map.insert(key.as_str().to_string(), value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::StructLiteral { name, fields } => {
                self.eval_struct_literal(name, fields, env)
            }
            ExprKind::Range { start, end } => {
                let start = self.eval_expr(start, env)?;
                let end = self.eval_expr(end, env)?;
                match (start.as_int(), end.as_int()) {
                    (Some(a), Some(b)) => {
                        Ok(Value::list((a..b).map(Value::Int).collect()))
                    }
                    _ => Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "range bounds must be ints, got {} and {}",
                            start.type_name(),
                            end.type_name()
                        ),
                    )),
                }
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand, env)?;
                match op {
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Not => Ok(value.not()),
                }
            }
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.span.line, env),
            ExprKind::Member { object, member } => {
                let value = self.eval_expr(object, env)?;
                self.eval_member(&value, member)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                index_value(&object, &index)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval_expr(cond, env)?;
                self.result = Value::Null;
                if condition.truthy() {
                    let child = env.child();
                    self.exec_block(then_branch, &child)?;
                } else if let Some(else_branch) = else_branch {
                    let child = env.child();
                    self.exec_block(else_branch, &child)?;
                }
                Ok(self.result.clone())
            }
            ExprKind::Lambda { params, body } => Ok(Value::Function(Arc::new(FunctionValue {
                name: None,
                kind: FunctionKind::User {
                    params: params.clone(),
                    body: body.clone(),
                    env: env.clone(),
                },
            }))),
            ExprKind::InlineCode {
                language,
                bindings,
                body,
            } => self.eval_inline_code(language, bindings, body, expr.span.line, env),
            ExprKind::BlockRef(id) => self.load_block(id),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &Environment,
    ) -> Result<Value, NaabError> {
        match op {
            BinaryOp::Assign => {
                let value = self.eval_expr(right, env)?;
                self.assign_to(left, value.clone(), env)?;
                return Ok(value);
            }
            BinaryOp::And => {
                let lhs = self.eval_expr(left, env)?;
                if !lhs.truthy() {
                    return Ok(lhs);
                }
                return self.eval_expr(right, env);
            }
            BinaryOp::Or => {
                let lhs = self.eval_expr(left, env)?;
                if lhs.truthy() {
                    return Ok(lhs);
                }
                return self.eval_expr(right, env);
            }
            BinaryOp::Pipeline => {
                // `a |> f(x)` inserts `a` as the first positional arg
                let piped = self.eval_expr(left, env)?;
                return match &right.kind {
                    ExprKind::Call { callee, args } => {
                        let callee = self.eval_expr(callee, env)?;
                        let mut call_args = Vec::with_capacity(args.len() + 1);
                        call_args.push(piped);
                        for arg in args {
                            call_args.push(self.eval_expr(arg, env)?);
                        }
                        self.call_value(callee, call_args, right.span.line)
                    }
                    _ => {
                        let callee = self.eval_expr(right, env)?;
                        self.call_value(callee, vec![piped], right.span.line)
                    }
                };
            }
            _ => {}
        }

        let lhs = self.eval_expr(left, env)?;
        let rhs = self.eval_expr(right, env)?;
        match op {
            BinaryOp::Add => lhs.add(&rhs),
            BinaryOp::Sub => lhs.sub(&rhs),
            BinaryOp::Mul => lhs.mul(&rhs),
            BinaryOp::Div => lhs.div(&rhs),
            BinaryOp::Mod => lhs.rem(&rhs),
            BinaryOp::Eq => Ok(Value::Bool(lhs.equal(&rhs))),
            BinaryOp::NotEq => Ok(Value::Bool(!lhs.equal(&rhs))),
            BinaryOp::Less => Ok(Value::Bool(lhs.compare(&rhs)?.is_lt())),
            BinaryOp::LessEq => Ok(Value::Bool(lhs.compare(&rhs)?.is_le())),
            BinaryOp::Greater => Ok(Value::Bool(lhs.compare(&rhs)?.is_gt())),
            BinaryOp::GreaterEq => Ok(Value::Bool(lhs.compare(&rhs)?.is_ge())),
            BinaryOp::Assign | BinaryOp::And | BinaryOp::Or | BinaryOp::Pipeline => {
                unreachable!("handled above")
            }
        }
    }

    /// Store into an assignment target: identifier, member, or index.
    fn assign_to(
        &mut self,
        target: &Expr,
        value: Value,
        env: &Environment,
    ) -> Result<(), NaabError> {
        match &target.kind {
            ExprKind::Identifier(name) => env.assign(name, value),
            ExprKind::Member { object, member } => {
                let object = self.eval_expr(object, env)?;
                match &object {
                    Value::Struct(instance) => instance.set_field(member, value),
                    Value::Dict(entries) => {
                        entries.write().insert(member.clone(), value);
                        Ok(())
                    }
                    other => Err(NaabError::new(
                        ErrorKind::AssignTarget,
                        format!("cannot assign to a member of {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                match (&object, &index) {
                    (Value::List(items), Value::Int(i)) => {
                        let mut items = items.write();
                        let len = items.len();
                        let slot = usize::try_from(*i)
                            .ok()
                            .and_then(|i| items.get_mut(i))
                            .ok_or_else(|| {
                                NaabError::new(
                                    ErrorKind::Index,
                                    format!("index {} out of bounds for list of {}", i, len),
                                )
                            })?;
                        *slot = value;
                        Ok(())
                    }
                    (Value::Dict(entries), Value::Str(key)) => {
                        entries.write().insert(key.to_string(), value);
                        Ok(())
                    }
                    (object, index) => Err(NaabError::new(
                        ErrorKind::Index,
                        format!(
                            "cannot index {} with {}",
                            object.type_name(),
                            index.type_name()
                        ),
                    )),
                }
            }
            _ => Err(NaabError::new(
                ErrorKind::AssignTarget,
                "assignment target must be a name, member, or index".to_string(),
            )),
        }
    }

    fn eval_struct_literal(
        &mut self,
        name: &str,
        fields: &[(String, Expr)],
        env: &Environment,
    ) -> Result<Value, NaabError> {
        let def = self.structs.get(name).cloned().ok_or_else(|| {
            let mut message = format!("unknown struct '{}'", name);
            if let Some(s) = suggest::closest(name, self.structs.keys().cloned()) {
                message = format!("{} (did you mean '{}'?)", message, s);
            }
            NaabError::new(ErrorKind::Type, message)
        })?;

        // Unknown field names first, with suggestions
        for (field_name, _) in fields {
            if def.field_index(field_name).is_none() {
                let mut message = format!(
                    "struct '{}' has no field '{}'",
                    def.name, field_name
                );
                if let Some(s) =
                    suggest::closest(field_name, def.field_names().map(String::from))
                {
                    message = format!("{} (did you mean '{}'?)", message, s);
                }
                return Err(NaabError::new(ErrorKind::StructField, message));
            }
        }

        let mut values = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let provided = fields.iter().find(|(n, _)| n == &field.name);
            let value = match (provided, &field.default) {
                (Some((_, expr)), _) => self.eval_expr(expr, env)?,
                (None, Some(default)) => self.eval_expr(default, env)?,
                (None, None) => {
                    return Err(NaabError::new(
                        ErrorKind::StructField,
                        format!(
                            "missing required field '{}' for struct '{}'",
                            field.name, def.name
                        ),
                    ))
                }
            };
            values.push(value);
        }
        Ok(Value::Struct(Arc::new(StructInstance::new(def, values))))
    }

    /// Member access: struct field, dict key, or a bound method on a
    /// Block/Foreign value (method-chain semantics).
    pub(crate) fn eval_member(&mut self, value: &Value, member: &str) -> Result<Value, NaabError> {
        match value {
            Value::Struct(instance) => instance.get_field(member).ok_or_else(|| {
                let mut message = format!(
                    "struct '{}' has no field '{}'",
                    instance.def.name, member
                );
                if let Some(s) =
                    suggest::closest(member, instance.def.field_names().map(String::from))
                {
                    message = format!("{} (did you mean '{}'?)", message, s);
                }
                NaabError::new(ErrorKind::StructField, message)
            }),
            Value::Dict(entries) => {
                let entries = entries.read();
                entries.get(member).cloned().ok_or_else(|| {
                    let mut message = format!("no key '{}' in dict", member);
                    if let Some(s) = suggest::closest(member, entries.keys().cloned()) {
                        message = format!("{} (did you mean '{}'?)", message, s);
                    }
                    NaabError::new(ErrorKind::Index, message)
                })
            }
            Value::Block(_) | Value::Foreign(_) => self.bind_foreign_method(value, member),
            other => Err(NaabError::new(
                ErrorKind::Type,
                format!("{} has no members", other.type_name()),
            )),
        }
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, NaabError> {
    match (object, index) {
        (Value::List(items), Value::Int(i)) => {
            let items = items.read();
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| {
                    NaabError::new(
                        ErrorKind::Index,
                        format!("index {} out of bounds for list of {}", i, items.len()),
                    )
                })
        }
        (Value::Dict(entries), Value::Str(key)) => {
            entries.read().get(key.as_ref()).cloned().ok_or_else(|| {
                NaabError::new(ErrorKind::Index, format!("no key '{}' in dict", key))
            })
        }
        (Value::Str(s), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::string(c.to_string()))
            .ok_or_else(|| {
                NaabError::new(
                    ErrorKind::Index,
                    format!("index {} out of bounds for string", i),
                )
            }),
        (object, index) => Err(NaabError::new(
            ErrorKind::Index,
            format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ),
        )),
    }
}
