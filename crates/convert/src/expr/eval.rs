use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{
    functions,
    parser::{BinaryOp, Expr},
};
use crate::error::ConvertError;

type Evaluated = Result<Option<Value>, ConvertError>;

struct Env<'a> {
    root: Option<&'a Value>,
    variables: &'a BTreeMap<String, Value>,
    frames: Vec<BTreeMap<String, Value>>,
}

impl Env<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.variables.get(name))
            .cloned()
    }

    fn bind(&mut self, name: String, value: Value) {
        if self.frames.is_empty() {
            self.frames.push(BTreeMap::new());
        }

        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name, value);
        }
    }
}

pub(crate) fn evaluate(ast: &Expr, input: Option<&Value>, variables: &BTreeMap<String, Value>) -> Evaluated {
    let mut env = Env {
        root: input,
        variables,
        frames: Vec::new(),
    };

    eval(ast, input, &mut env)
}

fn eval(expr: &Expr, context: Option<&Value>, env: &mut Env<'_>) -> Evaluated {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Name(name) => Ok(field(context, name)),
        Expr::Variable(name) => Ok(match name.as_str() {
            "" => context.cloned(),
            "$" => env.root.cloned(),
            name => env.lookup(name),
        }),
        Expr::Path(lhs, rhs) => {
            let Some(base) = eval(lhs, context, env)? else {
                return Ok(None);
            };

            let Value::Array(items) = base else {
                return eval(rhs, Some(&base), env);
            };

            let flatten = matches!(**rhs, Expr::Name(_) | Expr::Path(..) | Expr::Filter(..));
            let mut mapped = Vec::new();

            for item in &items {
                match eval(rhs, Some(item), env)? {
                    Some(Value::Array(inner)) if flatten => mapped.extend(inner),
                    Some(value) => mapped.push(value),
                    None => (),
                }
            }

            Ok(non_empty(mapped))
        }
        Expr::Filter(target, predicate) => {
            let Some(base) = eval(target, context, env)? else {
                return Ok(None);
            };

            if let Some(index) = literal_index(predicate) {
                let items = into_items(base);
                let len = items.len() as i64;
                let position = if index < 0 { len + index } else { index };

                if position < 0 {
                    return Ok(None);
                }

                return Ok(items.into_iter().nth(position as usize));
            }

            let was_array = base.is_array();
            let mut kept = Vec::new();

            for item in into_items(base) {
                let verdict = eval(predicate, Some(&item), env)?;

                if truthy(verdict.as_ref()) {
                    kept.push(item);
                }
            }

            if was_array {
                Ok(non_empty(kept))
            } else {
                Ok(kept.into_iter().next())
            }
        }
        Expr::KeepArray(target) => Ok(eval(target, context, env)?.map(|value| match value {
            Value::Array(_) => value,
            other => Value::Array(vec![other]),
        })),
        Expr::Negate(operand) => match eval(operand, context, env)? {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(super::number(-n.as_f64().unwrap_or_default()))),
            Some(other) => Err(evaluation(format!("cannot negate {}", type_name(&other)))),
        },
        Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, context, env),
        Expr::Condition {
            condition,
            then,
            otherwise,
        } => {
            let verdict = eval(condition, context, env)?;

            if truthy(verdict.as_ref()) {
                eval(then, context, env)
            } else if let Some(otherwise) = otherwise {
                eval(otherwise, context, env)
            } else {
                Ok(None)
            }
        }
        Expr::Object(entries) => {
            let mut object = Map::new();

            for (key, value) in entries {
                let key = match eval(key, context, env)? {
                    Some(Value::String(key)) => key,
                    Some(other) => {
                        return Err(evaluation(format!("object key must be a string, got {}", type_name(&other))));
                    }
                    None => continue,
                };

                if let Some(value) = eval(value, context, env)? {
                    object.insert(key, value);
                }
            }

            Ok(Some(Value::Object(object)))
        }
        Expr::Array(items) => {
            let mut array = Vec::with_capacity(items.len());

            for item in items {
                if let Some(value) = eval(item, context, env)? {
                    array.push(value);
                }
            }

            Ok(Some(Value::Array(array)))
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());

            for arg in args {
                values.push(eval(arg, context, env)?);
            }

            functions::call(name, values)
        }
        Expr::Block(expressions) => {
            env.frames.push(BTreeMap::new());

            let mut result = Ok(None);

            for expression in expressions {
                result = eval(expression, context, env);

                if result.is_err() {
                    break;
                }
            }

            env.frames.pop();
            result
        }
        Expr::Bind(name, value) => {
            let value = eval(value, context, env)?;

            if let Some(value) = &value {
                env.bind(name.clone(), value.clone());
            }

            Ok(value)
        }
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, context: Option<&Value>, env: &mut Env<'_>) -> Evaluated {
    match op {
        BinaryOp::And => {
            let left = eval(lhs, context, env)?;

            if !truthy(left.as_ref()) {
                return Ok(Some(Value::Bool(false)));
            }

            let right = eval(rhs, context, env)?;
            Ok(Some(Value::Bool(truthy(right.as_ref()))))
        }
        BinaryOp::Or => {
            let left = eval(lhs, context, env)?;

            if truthy(left.as_ref()) {
                return Ok(Some(Value::Bool(true)));
            }

            let right = eval(rhs, context, env)?;
            Ok(Some(Value::Bool(truthy(right.as_ref()))))
        }
        op => {
            let left = eval(lhs, context, env)?;
            let right = eval(rhs, context, env)?;

            apply(op, left, right)
        }
    }
}

fn apply(op: BinaryOp, left: Option<Value>, right: Option<Value>) -> Evaluated {
    match op {
        BinaryOp::Concat => {
            let mut out = functions::stringify(left.as_ref());
            out.push_str(&functions::stringify(right.as_ref()));

            Ok(Some(Value::String(out)))
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };

            let equal = values_equal(&left, &right);
            Ok(Some(Value::Bool(if op == BinaryOp::Equal { equal } else { !equal })))
        }
        BinaryOp::In => {
            let (Some(needle), Some(haystack)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };

            let found = match &haystack {
                Value::Array(items) => items.iter().any(|item| values_equal(&needle, item)),
                other => values_equal(&needle, other),
            };

            Ok(Some(Value::Bool(found)))
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };

            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .unwrap_or_default()
                    .partial_cmp(&b.as_f64().unwrap_or_default()),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    return Err(evaluation(format!(
                        "cannot compare {} with {}",
                        type_name(&left),
                        type_name(&right)
                    )));
                }
            };

            let Some(ordering) = ordering else {
                return Ok(Some(Value::Bool(false)));
            };

            let result = match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            };

            Ok(Some(Value::Bool(result)))
        }
        arithmetic => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };

            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(evaluation(format!(
                    "arithmetic needs numbers, got {} and {}",
                    type_name(&left),
                    type_name(&right)
                )));
            };

            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();

            let result = match arithmetic {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => {
                    return Err(evaluation("division by zero"));
                }
                BinaryOp::Divide => a / b,
                _ => a % b,
            };

            Ok(Some(super::number(result)))
        }
    }
}

/// Field access. On an array the lookup maps over each element and flattens one level.
fn field(context: Option<&Value>, name: &str) -> Option<Value> {
    match context? {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => {
            let mut out = Vec::new();

            for item in items {
                match field(Some(item), name) {
                    Some(Value::Array(inner)) => out.extend(inner),
                    Some(value) => out.push(value),
                    None => (),
                }
            }

            non_empty(out)
        }
        _ => None,
    }
}

fn literal_index(predicate: &Expr) -> Option<i64> {
    match predicate {
        Expr::Literal(Value::Number(n)) => Some(n.as_f64()?.floor() as i64),
        Expr::Negate(inner) => match inner.as_ref() {
            Expr::Literal(Value::Number(n)) => Some(-(n.as_f64()?.floor() as i64)),
            _ => None,
        },
        _ => None,
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn non_empty(items: Vec<Value>) -> Option<Value> {
    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => items.iter().any(|item| truthy(Some(item))),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b)),
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        (left, right) => left == right,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn evaluation(message: impl Into<String>) -> ConvertError {
    ConvertError::Evaluation(message.into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};

    use crate::expr::Expression;

    fn run(source: &str, input: Value) -> Option<Value> {
        run_with(source, input, BTreeMap::new())
    }

    fn run_with(source: &str, input: Value, variables: BTreeMap<String, Value>) -> Option<Value> {
        Expression::compile(source).unwrap().evaluate(Some(&input), &variables).unwrap()
    }

    #[test]
    fn paths_map_over_arrays() {
        let input = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        });

        assert_eq!(run("messages.role", input.clone()), Some(json!(["system", "user"])));
        assert_eq!(run("messages[role = 'user'].content", input.clone()), Some(json!(["hi"])));
        assert_eq!(run("messages[-1].content", input.clone()), Some(json!("hi")));
        assert_eq!(run("messages[5]", input), None);
    }

    #[test]
    fn single_element_mapping_stays_an_array() {
        let input = json!({"data": [{"embedding": [0.1, 0.2]}]});

        assert_eq!(run("data.embedding", input.clone()), Some(json!([0.1, 0.2])));
        assert_eq!(run("data.{'v': embedding}", input), Some(json!([{"v": [0.1, 0.2]}])));
    }

    #[test]
    fn object_constructor_skips_undefined() {
        let input = json!({"model": "qwen2", "stream": true});

        let result = run(r#"{"model": model, "stream": stream, "options": options}"#, input);

        insta::assert_json_snapshot!(result, @r#"
        {
          "model": "qwen2",
          "stream": true
        }
        "#);
    }

    #[test]
    fn variables_and_blocks() {
        let variables = BTreeMap::from([("id".to_string(), json!("42"))]);

        let result = run_with(
            "($n := $count(items); {'id': $id, 'total': $n * 2, 'first': $$.items[0]})",
            json!({"items": [3, 4, 5]}),
            variables,
        );

        assert_eq!(result, Some(json!({"id": "42", "total": 6, "first": 3})));
    }

    #[test]
    fn conditions_and_truthiness() {
        let input = json!({"done": true, "empty": "", "list": [0, false]});

        assert_eq!(run("done ? 'stop' : 'more'", input.clone()), Some(json!("stop")));
        assert_eq!(run("empty ? 'yes' : 'no'", input.clone()), Some(json!("no")));
        assert_eq!(run("list ? 'yes' : 'no'", input.clone()), Some(json!("no")));
        assert_eq!(run("missing ? 'yes'", input), None);
    }

    #[test]
    fn equality_with_undefined_is_false() {
        assert_eq!(run("missing = 1", json!({})), Some(json!(false)));
        assert_eq!(run("missing != 1", json!({})), Some(json!(false)));
        assert_eq!(run("1 = 1.0", json!({})), Some(json!(true)));
    }

    #[test]
    fn concatenation_treats_undefined_as_empty() {
        assert_eq!(run("'data: ' & missing & 'x'", json!({})), Some(json!("data: x")));
        assert_eq!(run("a & 1", json!({"a": "n"})), Some(json!("n1")));
    }

    #[test]
    fn membership() {
        assert_eq!(run("status in ['SUCCEEDED', 'FAILED']", json!({"status": "FAILED"})), Some(json!(true)));
        assert_eq!(run("status in ['SUCCEEDED']", json!({"status": "PENDING"})), Some(json!(false)));
    }

    #[test]
    fn arithmetic_errors() {
        let error = Expression::compile("a + 1")
            .unwrap()
            .evaluate(Some(&json!({"a": "x"})), &BTreeMap::new())
            .unwrap_err();

        insta::assert_snapshot!(error, @"expression evaluation failed: arithmetic needs numbers, got string and number");
    }

    #[test]
    fn comparing_mixed_types_fails() {
        let error = Expression::compile("a < 1")
            .unwrap()
            .evaluate(Some(&json!({"a": "x"})), &BTreeMap::new())
            .unwrap_err();

        insta::assert_snapshot!(error, @"expression evaluation failed: cannot compare string with number");
    }

    #[test]
    fn quoted_field_names() {
        assert_eq!(run("`task-id`", json!({"task-id": "abc"})), Some(json!("abc")));
    }

    #[test]
    fn undefined_input() {
        let result = Expression::compile("{'a': a}")
            .unwrap()
            .evaluate(None, &BTreeMap::new())
            .unwrap();

        assert_eq!(result, Some(json!({})));
    }
}
