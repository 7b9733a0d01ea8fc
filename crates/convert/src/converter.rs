use bytes::Bytes;
use config::HeaderChanges;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{Content, ConvertContext, error::ConvertError, expr::Expression};

/// One entry of a flavor's `conversion` list, as written in the definition file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConversionStep {
    /// Converter kind: `jsonata`, `header` or `action_if`.
    pub converter: String,
    /// Converter-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// A single stateless transform step.
#[derive(Debug, Clone)]
pub enum Converter {
    /// Replaces the JSON body with the result of an expression.
    Expression(Expression),
    /// Edits the headers and passes the body through.
    Header(HeaderChanges),
    /// Drops the item when the body matches.
    ActionIf(ActionIf),
}

#[derive(Debug, Clone)]
pub struct ActionIf {
    trim: bool,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Regex(Regex),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionIfConfig {
    #[serde(default)]
    trim: bool,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    regex: Option<String>,
    action: String,
}

impl Converter {
    /// Build a converter from its definition-file entry.
    pub fn from_step(step: &ConversionStep) -> Result<Self, ConvertError> {
        let invalid = |message: String| ConvertError::InvalidConfig {
            converter: step.converter.clone(),
            message,
        };

        match step.converter.as_str() {
            "jsonata" => {
                let source = match &step.config {
                    Value::String(source) => source,
                    other => return Err(invalid(format!("expected an expression string, got {other}"))),
                };

                Ok(Self::Expression(Expression::compile(source)?))
            }
            "header" => {
                let changes = HeaderChanges::deserialize(&step.config).map_err(|e| invalid(e.to_string()))?;
                Ok(Self::Header(changes))
            }
            "action_if" => {
                let config = ActionIfConfig::deserialize(&step.config).map_err(|e| invalid(e.to_string()))?;

                if config.action != "drop" {
                    return Err(invalid(format!("unsupported action '{}'", config.action)));
                }

                let matcher = match (config.pattern, config.regex) {
                    (Some(pattern), None) => Matcher::Literal(pattern),
                    (None, Some(regex)) => Matcher::Regex(Regex::new(&regex).map_err(|e| invalid(e.to_string()))?),
                    _ => return Err(invalid("exactly one of 'pattern' or 'regex' is required".to_string())),
                };

                Ok(Self::ActionIf(ActionIf {
                    trim: config.trim,
                    matcher,
                }))
            }
            other => Err(ConvertError::UnknownConverter(other.to_string())),
        }
    }

    pub fn convert(&self, mut content: Content, ctx: &ConvertContext) -> Result<Content, ConvertError> {
        match self {
            Self::Expression(expression) => {
                let input = if content.body.iter().all(u8::is_ascii_whitespace) {
                    None
                } else {
                    let value: Value =
                        serde_json::from_slice(&content.body).map_err(|e| ConvertError::InvalidBody(e.to_string()))?;

                    Some(value)
                };

                let output = expression
                    .evaluate(input.as_ref(), ctx.variables())?
                    .ok_or_else(|| ConvertError::Undefined(expression.source().to_string()))?;

                let body = serde_json::to_vec(&output).map_err(|e| ConvertError::Evaluation(e.to_string()))?;
                content.body = Bytes::from(body);

                Ok(content)
            }
            Self::Header(changes) => {
                header_rules::apply(&mut content.headers, changes);
                Ok(content)
            }
            Self::ActionIf(action) => {
                if action.matches(&content.body) {
                    Err(ConvertError::Drop)
                } else {
                    Ok(content)
                }
            }
        }
    }
}

impl ActionIf {
    fn matches(&self, body: &[u8]) -> bool {
        let text = String::from_utf8_lossy(body);
        let text = if self.trim { text.trim() } else { text.as_ref() };

        match &self.matcher {
            Matcher::Literal(pattern) => text == pattern,
            Matcher::Regex(regex) => regex.is_match(text),
        }
    }
}
