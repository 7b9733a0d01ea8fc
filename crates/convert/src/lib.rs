//! Payload converters and the pipelines that chain them.

mod converter;
mod error;
pub mod expr;
mod pipeline;

use std::collections::BTreeMap;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

pub use converter::{ConversionStep, Converter};
pub use error::ConvertError;
pub use pipeline::Pipeline;

/// A payload moving through a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content {
    pub body: Bytes,
    pub headers: HeaderMap,
}

impl Content {
    pub fn new(body: impl Into<Bytes>, headers: HeaderMap) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }
}

/// Values bound as `$name` variables while converting.
#[derive(Debug, Clone, Default)]
pub struct ConvertContext {
    variables: BTreeMap<String, Value>,
}

impl ConvertContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }
}
