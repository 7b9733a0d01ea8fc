use serde_json::{Map, Value};

use super::eval::{evaluation, truthy, type_name, values_equal};
use crate::error::ConvertError;

/// Call a built-in function by name (without the leading `$`).
pub(crate) fn call(name: &str, args: Vec<Option<Value>>) -> Result<Option<Value>, ConvertError> {
    let mut args = Args { name, values: args };

    let result = match name {
        "exists" => Some(Value::Bool(args.next()?.is_some())),
        "string" => args.next()?.map(|value| Value::String(stringify(Some(&value)))),
        "number" => match args.next()? {
            None => None,
            Some(Value::Number(n)) => Some(Value::Number(n)),
            Some(Value::String(s)) => {
                let parsed = s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| evaluation(format!("$number: cannot convert '{s}' to a number")))?;

                Some(super::number(parsed))
            }
            Some(Value::Bool(b)) => Some(super::number(if b { 1.0 } else { 0.0 })),
            Some(other) => return Err(evaluation(format!("$number: cannot convert {}", type_name(&other)))),
        },
        "boolean" => args.next()?.map(|value| Value::Bool(truthy(Some(&value)))),
        "not" => args.next()?.map(|value| Value::Bool(!truthy(Some(&value)))),
        "count" => {
            let count = match args.next()? {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };

            Some(Value::from(count))
        }
        "length" => args.string()?.map(|s| Value::from(s.chars().count())),
        "lowercase" => args.string()?.map(|s| Value::String(s.to_lowercase())),
        "uppercase" => args.string()?.map(|s| Value::String(s.to_uppercase())),
        "trim" => args
            .string()?
            .map(|s| Value::String(s.split_whitespace().collect::<Vec<_>>().join(" "))),
        "substring" => {
            let Some(s) = args.string()? else { return Ok(None) };
            let start = args.number()?.unwrap_or_default() as i64;
            let length = args.number()?;

            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
            let end = match length {
                Some(length) => (start + length.max(0.0) as i64).min(len),
                None => len,
            };

            Some(Value::String(chars[start as usize..end as usize].iter().collect()))
        }
        "contains" => {
            let Some(s) = args.string()? else { return Ok(None) };
            let pattern = args.string()?.unwrap_or_default();

            Some(Value::Bool(s.contains(&pattern)))
        }
        "split" => {
            let Some(s) = args.string()? else { return Ok(None) };
            let separator = args.string()?.unwrap_or_default();
            let limit = args.number()?.map(|n| n.max(0.0) as usize);

            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(|part| Value::String(part.to_string())).collect()
            };

            let parts = match limit {
                Some(limit) => parts.into_iter().take(limit).collect(),
                None => parts,
            };

            Some(Value::Array(parts))
        }
        "replace" => {
            let Some(s) = args.string()? else { return Ok(None) };
            let pattern = args.string()?.unwrap_or_default();
            let replacement = args.string()?.unwrap_or_default();

            if pattern.is_empty() {
                return Err(evaluation("$replace: pattern must not be empty"));
            }

            Some(Value::String(s.replace(&pattern, &replacement)))
        }
        "join" => {
            let Some(items) = args.next()? else { return Ok(None) };
            let separator = args.string()?.unwrap_or_default();

            let mut parts = Vec::new();

            for item in into_items(items) {
                match item {
                    Value::String(s) => parts.push(s),
                    other => return Err(evaluation(format!("$join: expected strings, got {}", type_name(&other)))),
                }
            }

            Some(Value::String(parts.join(&separator)))
        }
        "append" => {
            let first = args.next()?;
            let second = args.next()?;

            match (first, second) {
                (None, None) => None,
                (Some(value), None) | (None, Some(value)) => Some(value),
                (Some(first), Some(second)) => {
                    let mut items = into_items(first);
                    items.extend(into_items(second));

                    Some(Value::Array(items))
                }
            }
        }
        "merge" => {
            let Some(objects) = args.next()? else { return Ok(None) };
            let mut merged = Map::new();

            for object in into_items(objects) {
                match object {
                    Value::Object(map) => merged.extend(map),
                    other => return Err(evaluation(format!("$merge: expected objects, got {}", type_name(&other)))),
                }
            }

            Some(Value::Object(merged))
        }
        "keys" => match args.next()? {
            Some(Value::Object(map)) if !map.is_empty() => {
                Some(Value::Array(map.keys().cloned().map(Value::String).collect()))
            }
            _ => None,
        },
        "lookup" => {
            let object = args.next()?;
            let key = args.string()?.unwrap_or_default();

            match object {
                Some(Value::Object(mut map)) => map.remove(&key),
                _ => None,
            }
        }
        "sum" => {
            let Some(items) = args.next()? else { return Ok(None) };
            let mut total = 0.0;

            for item in into_items(items) {
                match item {
                    Value::Number(n) => total += n.as_f64().unwrap_or_default(),
                    other => return Err(evaluation(format!("$sum: expected numbers, got {}", type_name(&other)))),
                }
            }

            Some(super::number(total))
        }
        "floor" => args.number()?.map(|n| super::number(n.floor())),
        "round" => {
            let Some(n) = args.number()? else { return Ok(None) };
            let precision = args.number()?.unwrap_or_default() as i32;
            let factor = 10f64.powi(precision);

            Some(super::number((n * factor).round() / factor))
        }
        "distinct" => {
            let Some(items) = args.next()? else { return Ok(None) };
            let mut unique: Vec<Value> = Vec::new();

            for item in into_items(items) {
                if !unique.iter().any(|seen| values_equal(seen, &item)) {
                    unique.push(item);
                }
            }

            Some(Value::Array(unique))
        }
        "millis" => Some(Value::from(jiff::Timestamp::now().as_millisecond())),
        "now" => Some(Value::String(jiff::Timestamp::now().to_string())),
        unknown => return Err(evaluation(format!("unknown function ${unknown}"))),
    };

    Ok(result)
}

/// Render a value the way string concatenation and `$string` do.
pub(crate) fn stringify(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

struct Args<'a> {
    name: &'a str,
    values: Vec<Option<Value>>,
}

impl Args<'_> {
    /// Take the next argument; a missing argument is undefined.
    fn next(&mut self) -> Result<Option<Value>, ConvertError> {
        if self.values.is_empty() {
            return Ok(None);
        }

        Ok(self.values.remove(0))
    }

    fn string(&mut self) -> Result<Option<String>, ConvertError> {
        match self.next()? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(evaluation(format!(
                "${}: expected a string argument, got {}",
                self.name,
                type_name(&other)
            ))),
        }
    }

    fn number(&mut self) -> Result<Option<f64>, ConvertError> {
        match self.next()? {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(evaluation(format!(
                "${}: expected a number argument, got {}",
                self.name,
                type_name(&other)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};

    use crate::expr::Expression;

    fn run(source: &str, input: Value) -> Option<Value> {
        Expression::compile(source)
            .unwrap()
            .evaluate(Some(&input), &BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn string_functions() {
        let input = json!({"name": "  Deepseek   R1 ", "model": "qwen2:7b"});

        assert_eq!(run("$trim(name)", input.clone()), Some(json!("Deepseek R1")));
        assert_eq!(run("$lowercase($trim(name))", input.clone()), Some(json!("deepseek r1")));
        assert_eq!(run("$split(model, ':')", input.clone()), Some(json!(["qwen2", "7b"])));
        assert_eq!(run("$substring(model, -2)", input.clone()), Some(json!("7b")));
        assert_eq!(run("$substring(model, 0, 5)", input.clone()), Some(json!("qwen2")));
        assert_eq!(run("$replace(model, ':', '-')", input.clone()), Some(json!("qwen2-7b")));
        assert_eq!(run("$contains(model, 'wen')", input), Some(json!(true)));
    }

    #[test]
    fn aggregation_functions() {
        let input = json!({"usage": [{"n": 2}, {"n": 3}], "tags": ["a", "b", "a"]});

        assert_eq!(run("$sum(usage.n)", input.clone()), Some(json!(5)));
        assert_eq!(run("$count(usage)", input.clone()), Some(json!(2)));
        assert_eq!(run("$count(missing)", input.clone()), Some(json!(0)));
        assert_eq!(run("$join($distinct(tags), ',')", input), Some(json!("a,b")));
    }

    #[test]
    fn object_functions() {
        let input = json!({"a": {"x": 1}, "b": {"y": 2}});

        assert_eq!(run("$merge([a, b])", input.clone()), Some(json!({"x": 1, "y": 2})));
        assert_eq!(run("$keys(a)", input.clone()), Some(json!(["x"])));
        assert_eq!(run("$lookup(b, 'y')", input.clone()), Some(json!(2)));
        assert_eq!(run("$exists(c)", input), Some(json!(false)));
    }

    #[test]
    fn conversions() {
        assert_eq!(run("$string(n)", json!({"n": 5})), Some(json!("5")));
        assert_eq!(run("$string(o)", json!({"o": {"k": true}})), Some(json!(r#"{"k":true}"#)));
        assert_eq!(run("$number('2.5')", json!({})), Some(json!(2.5)));
        assert_eq!(run("$boolean('')", json!({})), Some(json!(false)));
        assert_eq!(run("$round(2.456, 2)", json!({})), Some(json!(2.46)));
    }

    #[test]
    fn unknown_function() {
        let error = Expression::compile("$nope(1)")
            .unwrap()
            .evaluate(None, &BTreeMap::new())
            .unwrap_err();

        insta::assert_snapshot!(error, @"expression evaluation failed: unknown function $nope");
    }
}
