use std::{collections::BTreeMap, fmt, str::FromStr};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Services the gateway knows how to route.
pub const SERVICES: [&str; 5] = ["chat", "embed", "generate", "models", "text-to-image"];

/// The service that lists models and therefore never validates one.
pub const MODELS_SERVICE: &str = "models";

/// Rule selecting local or remote for a service at request time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridPolicy {
    /// Local unless the machine is busy.
    #[default]
    Default,
    AlwaysLocal,
    AlwaysRemote,
}

/// Where a provider runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    Local,
    Remote,
}

/// How the gateway authenticates against a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "none")]
    None,
    /// `Authorization: Bearer <api_key>`.
    #[serde(rename = "apikey")]
    ApiKey,
    /// Cloud request signing, selected by the provider flavor.
    #[serde(rename = "token")]
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Downloading,
    Downloaded,
    Failed,
}

/// Error returned when parsing one of the registry enums from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(HybridPolicy, "hybrid policy", {
    Default => "default",
    AlwaysLocal => "always_local",
    AlwaysRemote => "always_remote",
});

string_enum!(ServiceSource, "service source", {
    Local => "local",
    Remote => "remote",
});

string_enum!(AuthType, "auth type", {
    None => "none",
    ApiKey => "apikey",
    Token => "token",
});

string_enum!(ModelStatus, "model status", {
    Downloading => "downloading",
    Downloaded => "downloaded",
    Failed => "failed",
});

impl ServiceSource {
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

/// A named capability and the providers designated to serve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub hybrid_policy: HybridPolicy,
    pub local_provider: String,
    pub remote_provider: String,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Service {
    pub fn new(name: impl Into<String>, hybrid_policy: HybridPolicy) -> Self {
        let now = Timestamp::now();

        Self {
            name: name.into(),
            hybrid_policy,
            local_provider: String::new(),
            remote_provider: String::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The provider designated for `source`, if any.
    pub fn provider(&self, source: ServiceSource) -> Option<&str> {
        let name = match source {
            ServiceSource::Local => &self.local_provider,
            ServiceSource::Remote => &self.remote_provider,
        };

        (!name.is_empty()).then_some(name.as_str())
    }

    pub fn set_provider(&mut self, source: ServiceSource, name: impl Into<String>) {
        match source {
            ServiceSource::Local => self.local_provider = name.into(),
            ServiceSource::Remote => self.remote_provider = name.into(),
        }
    }

    /// A service without any designated provider cannot be dispatched.
    pub fn is_usable(&self) -> bool {
        !self.local_provider.is_empty() || !self.remote_provider.is_empty()
    }
}

/// A concrete endpoint implementing one service under one flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub service_name: String,
    pub source: ServiceSource,
    pub flavor: String,
    pub desc: String,
    pub method: String,
    pub url: String,
    pub auth_type: AuthType,
    /// Flavor-specific JSON, e.g. `{"api_key": "..."}`.
    pub auth_key: String,
    pub extra_headers: BTreeMap<String, String>,
    pub extra_json_body: Map<String, Value>,
    pub properties: ProviderProperties,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        service_name: impl Into<String>,
        source: ServiceSource,
        flavor: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();

        Self {
            name: name.into(),
            service_name: service_name.into(),
            source,
            flavor: flavor.into(),
            desc: String::new(),
            method: "POST".to_string(),
            url: url.into(),
            auth_type: AuthType::None,
            auth_key: String::new(),
            extra_headers: BTreeMap::new(),
            extra_json_body: Map::new(),
            properties: ProviderProperties::default(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Capabilities advertised by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderProperties {
    pub max_input_tokens: u64,
    pub supported_response_mode: Vec<String>,
    pub mode_is_changeable: bool,
    pub models: Vec<String>,
    pub xpu: Vec<String>,
}

impl ProviderProperties {
    /// Providers that declare no modes are assumed to stream.
    pub fn supports_stream(&self) -> bool {
        self.supported_response_mode.is_empty() || self.supported_response_mode.iter().any(|mode| mode == "stream")
    }
}

/// A model installed under a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub provider_name: String,
    pub status: ModelStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Model {
    pub fn new(name: impl Into<String>, provider_name: impl Into<String>, status: ModelStatus) -> Self {
        let now = Timestamp::now();

        Self {
            name: name.into(),
            provider_name: provider_name.into(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Provider listing filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ProviderFilter {
    pub service_name: Option<String>,
    pub provider_name: Option<String>,
    pub flavor: Option<String>,
    pub source: Option<ServiceSource>,
}

impl ProviderFilter {
    pub fn matches(&self, provider: &Provider) -> bool {
        self.service_name.as_ref().is_none_or(|name| *name == provider.service_name)
            && self.provider_name.as_ref().is_none_or(|name| *name == provider.name)
            && self.flavor.as_ref().is_none_or(|flavor| *flavor == provider.flavor)
            && self.source.is_none_or(|source| source == provider.source)
    }
}

/// Model listing filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub provider_name: Option<String>,
    pub model_name: Option<String>,
}

impl ModelFilter {
    pub fn provider(name: impl Into<String>) -> Self {
        Self {
            provider_name: Some(name.into()),
            model_name: None,
        }
    }

    pub fn matches(&self, model: &Model) -> bool {
        self.provider_name.as_ref().is_none_or(|name| *name == model.provider_name)
            && self.model_name.as_ref().is_none_or(|name| *name == model.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_their_wire_names() {
        assert_eq!("always_remote".parse::<HybridPolicy>(), Ok(HybridPolicy::AlwaysRemote));
        assert_eq!("apikey".parse::<AuthType>(), Ok(AuthType::ApiKey));
        assert_eq!(ServiceSource::Local.other(), ServiceSource::Remote);

        let error = "sometimes_local".parse::<HybridPolicy>().unwrap_err();
        insta::assert_snapshot!(error, @"unsupported hybrid policy 'sometimes_local'");
    }

    #[test]
    fn properties_from_partial_json() {
        let properties: ProviderProperties =
            serde_json::from_str(r#"{"max_input_tokens": 2048, "supported_response_mode": ["sync"]}"#).unwrap();

        assert_eq!(properties.max_input_tokens, 2048);
        assert!(!properties.supports_stream());
        assert!(ProviderProperties::default().supports_stream());
    }

    #[test]
    fn service_slots() {
        let mut service = Service::new("chat", HybridPolicy::Default);
        assert!(!service.is_usable());

        service.set_provider(ServiceSource::Remote, "remote_deepseek_chat");

        assert!(service.is_usable());
        assert_eq!(service.provider(ServiceSource::Local), None);
        assert_eq!(service.provider(ServiceSource::Remote), Some("remote_deepseek_chat"));
    }
}
