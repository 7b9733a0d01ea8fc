//! The YAML shape of a flavor definition file.

use std::collections::BTreeMap;

use convert::ConversionStep;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlavorDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceDefinition {
    pub protocol: Protocol,
    /// `"METHOD /path"` strings.
    pub endpoints: Vec<String>,
    /// Also serve the endpoints without any gateway prefix.
    pub install_raw_routes: bool,
    pub default_model: String,
    /// Default upstream URL for providers of this flavor.
    pub url: String,
    /// Base URL polled for the result of a multi-segment request.
    pub extra_url: String,
    pub auth_type: String,
    /// Where users obtain credentials. Informational.
    pub auth_apply_url: String,
    /// 1 (or 0) is a single exchange; 2 is submit then poll.
    pub request_segments: u32,
    /// JSON object, as a string.
    pub extra_headers: String,
    pub support_models: Vec<String>,
    pub model_selector: ModelSelector,
    pub request_to_canonical: ConversionDefinition,
    pub request_from_canonical: ConversionDefinition,
    pub response_to_canonical: ConversionDefinition,
    pub response_from_canonical: ConversionDefinition,
    pub stream_response_to_canonical: ConversionDefinition,
    pub stream_response_from_canonical: ConversionDefinition,
}

/// JSON paths locating the model name in request and response bodies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSelector {
    pub request: String,
    pub response: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionDefinition {
    pub prologue: Vec<String>,
    pub epilogue: Vec<String>,
    pub conversion: Vec<ConversionStep>,
}
