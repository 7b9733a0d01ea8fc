use bytes::Bytes;
use convert::Content;
use http::{HeaderMap, Method, Uri, header::CONTENT_TYPE};
use registry::HybridPolicy;
use serde_json::{Map, Value};

use crate::GatewayError;

/// A parsed inbound request, ready to be scheduled.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Flavor of the route the request came in through.
    pub from_flavor: String,
    pub service: String,
    pub ask_stream: bool,
    pub model: Option<String>,
    /// The service policy, unless the body overrides it.
    pub hybrid_policy: HybridPolicy,
    pub priority: i32,
    pub method: Method,
    pub uri: Uri,
    /// Inbound headers and the JSON body. For `GET` the body is the query
    /// string rendered as a JSON object.
    pub content: Content,
}

impl ServiceRequest {
    /// Read the scheduling fields out of an inbound request.
    ///
    /// `stream`, `model` and `hybrid_policy` are read from the top level of
    /// the JSON body; the body itself is kept untouched for conversion.
    pub fn parse(
        from_flavor: &str,
        service: &str,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        service_policy: HybridPolicy,
    ) -> Result<Self, GatewayError> {
        let body = if method == Method::GET {
            query_to_json(uri.query().unwrap_or_default())?
        } else {
            check_content_type(&headers, &body)?;
            body
        };

        let fields = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice(&body) {
                Ok(Value::Object(fields)) => fields,
                Ok(other) => {
                    return Err(GatewayError::InvalidRequest(format!(
                        "expected a JSON object body, got {}",
                        json_type(&other)
                    )));
                }
                Err(error) => return Err(GatewayError::InvalidRequest(format!("body is not valid JSON: {error}"))),
            }
        };

        let ask_stream = match fields.get("stream") {
            Some(Value::Bool(stream)) => *stream,
            Some(Value::String(stream)) => stream == "true",
            _ => false,
        };

        let model = match fields.get("model") {
            Some(Value::String(model)) if !model.is_empty() => Some(model.clone()),
            _ => None,
        };

        let hybrid_policy = match fields.get("hybrid_policy") {
            Some(Value::String(policy)) if !policy.is_empty() => policy
                .parse()
                .map_err(|error: registry::ParseEnumError| GatewayError::InvalidRequest(error.to_string()))?,
            _ => service_policy,
        };

        Ok(Self {
            from_flavor: from_flavor.to_string(),
            service: service.to_string(),
            ask_stream,
            model,
            hybrid_policy,
            priority: 0,
            method,
            uri,
            content: Content::new(body, headers),
        })
    }
}

fn check_content_type(headers: &HeaderMap, body: &Bytes) -> Result<(), GatewayError> {
    if body.is_empty() {
        return Ok(());
    }

    let Some(content_type) = headers.get(CONTENT_TYPE) else {
        return Ok(());
    };

    let content_type = content_type.to_str().unwrap_or_default();

    if content_type.contains("application/json") || content_type.contains("text/plain") {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "unsupported content type '{content_type}', expected JSON or text"
        )))
    }
}

/// Single values become strings, repeated keys become arrays.
fn query_to_json(query: &str) -> Result<Bytes, GatewayError> {
    let mut object = Map::new();

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());

        match object.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(key.into_owned(), value);
            }
        }
    }

    let body = serde_json::to_vec(&object).map_err(|error| GatewayError::InvalidRequest(error.to_string()))?;

    Ok(Bytes::from(body))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
