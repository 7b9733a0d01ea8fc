//! Building provider records from admin input, shared by create, install and
//! import.

use std::collections::BTreeMap;

use flavor::FlavorRegistry;
use registry::{AuthType, ModelStatus, Provider, ProviderProperties, Registry, SERVICES, ServiceSource};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::{AdminError, AdminState, code};
use crate::engine;

/// Provider fields as the admin API takes them. Structured fields may be
/// given as JSON values or as JSON text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderRequest {
    pub provider_name: String,
    pub service_name: String,
    pub service_source: String,
    pub api_flavor: String,
    pub desc: String,
    pub method: String,
    pub url: String,
    pub auth_type: String,
    pub auth_key: String,
    pub models: Vec<String>,
    pub extra_headers: Value,
    pub extra_json_body: Value,
    pub properties: Value,
}

fn required(value: &str, name: &str) -> Result<(), AdminError> {
    if value.trim().is_empty() {
        return Err(AdminError::bad_request(code::PROVIDER_BAD_REQUEST, format!("{name} is required")));
    }

    Ok(())
}

/// Validate `request` and fill the gaps from the flavor definition.
pub(crate) fn build_provider(flavors: &FlavorRegistry, request: &ProviderRequest) -> Result<Provider, AdminError> {
    required(&request.provider_name, "provider_name")?;
    required(&request.service_name, "service_name")?;
    required(&request.service_source, "service_source")?;
    required(&request.api_flavor, "api_flavor")?;

    let service_name = request.service_name.as_str();

    if !SERVICES.contains(&service_name) {
        return Err(AdminError::bad_request(
            code::UNSUPPORTED_SERVICE,
            format!("unsupported service '{service_name}'"),
        ));
    }

    let source: ServiceSource = request
        .service_source
        .parse()
        .map_err(|error: registry::ParseEnumError| AdminError::bad_request(code::PROVIDER_BAD_REQUEST, error.to_string()))?;

    let unsupported_flavor = || {
        AdminError::bad_request(
            code::UNSUPPORTED_FLAVOR,
            format!("flavor '{}' does not provide service '{service_name}'", request.api_flavor),
        )
    };

    let flavor = flavors.get(&request.api_flavor).map_err(|_| unsupported_flavor())?;
    let defaults = flavor.service(service_name).map_err(|_| unsupported_flavor())?;

    let auth_type = if request.auth_type.is_empty() {
        defaults.auth_type()
    } else {
        request.auth_type.as_str()
    };

    let auth_type: AuthType = auth_type
        .parse()
        .map_err(|error: registry::ParseEnumError| AdminError::bad_request(code::UNSUPPORTED_AUTH_TYPE, error.to_string()))?;

    if auth_type != AuthType::None && request.auth_key.is_empty() {
        return Err(AdminError::bad_request(
            code::AUTH_INFO_LOST,
            format!("auth type {auth_type} needs an auth_key"),
        ));
    }

    let url = if request.url.is_empty() {
        defaults.definition().url.as_str()
    } else {
        request.url.as_str()
    };

    check_url(url)?;

    let extra_headers = if request.extra_headers.is_null() {
        headers_from(&Value::String(defaults.definition().extra_headers.clone()))?
    } else {
        headers_from(&request.extra_headers)?
    };

    let mut provider = Provider::new(&request.provider_name, service_name, source, flavor.name(), url);

    provider.desc = request.desc.clone();
    provider.auth_type = auth_type;
    provider.auth_key = request.auth_key.clone();
    provider.extra_headers = extra_headers;
    provider.extra_json_body = object_from(&request.extra_json_body, "extra_json_body")?;
    provider.properties = properties_from(&request.properties)?;

    if !request.method.is_empty() {
        provider.method = request.method.to_uppercase();
    }

    Ok(provider)
}

/// Apply the non-empty fields of `request` to `provider`.
pub(crate) fn patch_provider(
    flavors: &FlavorRegistry,
    mut provider: Provider,
    request: &ProviderRequest,
) -> Result<Provider, AdminError> {
    let merged = ProviderRequest {
        provider_name: provider.name.clone(),
        service_name: or(&request.service_name, &provider.service_name),
        service_source: or(&request.service_source, provider.source.as_str()),
        api_flavor: or(&request.api_flavor, &provider.flavor),
        desc: or(&request.desc, &provider.desc),
        method: or(&request.method, &provider.method),
        url: or(&request.url, &provider.url),
        auth_type: or(&request.auth_type, provider.auth_type.as_str()),
        auth_key: or(&request.auth_key, &provider.auth_key),
        models: Vec::new(),
        extra_headers: Value::Null,
        extra_json_body: Value::Null,
        properties: Value::Null,
    };

    let patched = build_provider(flavors, &merged)?;

    provider.service_name = patched.service_name;
    provider.source = patched.source;
    provider.flavor = patched.flavor;
    provider.desc = patched.desc;
    provider.method = patched.method;
    provider.url = patched.url;
    provider.auth_type = patched.auth_type;
    provider.auth_key = patched.auth_key;

    if !request.extra_headers.is_null() {
        provider.extra_headers = headers_from(&request.extra_headers)?;
    }

    if !request.extra_json_body.is_null() {
        provider.extra_json_body = object_from(&request.extra_json_body, "extra_json_body")?;
    }

    if !request.properties.is_null() {
        provider.properties = properties_from(&request.properties)?;
    }

    Ok(provider)
}

fn or(value: &str, fallback: &str) -> String {
    if value.is_empty() { fallback } else { value }.to_string()
}

fn check_url(url: &str) -> Result<(), AdminError> {
    let irregular = || AdminError::bad_request(code::URL_IRREGULAR, format!("url '{url}' is not an absolute http(s) url"));

    let parsed = Url::parse(url).map_err(|_| irregular())?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(irregular());
    }

    Ok(())
}

/// An object given inline or as JSON text. Empty text and `null` are empty.
fn object_from(value: &Value, name: &str) -> Result<Map<String, Value>, AdminError> {
    let invalid = || AdminError::bad_request(code::PROVIDER_BAD_REQUEST, format!("{name} must be a JSON object"));

    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(object) => Ok(object.clone()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str(text) {
            Ok(Value::Object(object)) => Ok(object),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

fn headers_from(value: &Value) -> Result<BTreeMap<String, String>, AdminError> {
    let headers = object_from(value, "extra_headers")?
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(value) => (name, value),
            other => (name, other.to_string()),
        })
        .collect();

    Ok(headers)
}

fn properties_from(value: &Value) -> Result<ProviderProperties, AdminError> {
    let object = object_from(value, "properties")?;

    serde_json::from_value(Value::Object(object))
        .map_err(|error| AdminError::bad_request(code::PROVIDER_BAD_REQUEST, format!("invalid properties: {error}")))
}

/// How models of a local provider get installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Install {
    /// Pull in the background; the record reads `downloading` until done.
    Pull,
    /// Trust that the engine already has the model.
    Assume,
}

/// Register `models` under `provider`. Remote models are usable right away.
pub(crate) fn register_models(
    state: &AdminState,
    provider: &Provider,
    models: &[String],
    install: Install,
) -> Result<(), AdminError> {
    let registry = state.registry();

    if provider.source == ServiceSource::Remote || install == Install::Assume {
        for model in models {
            registry
                .put_model(&provider.name, model, ModelStatus::Downloaded)
                .map_err(AdminError::write_failed(code::ADD_MODEL_FAILED))?;
        }

        return Ok(());
    }

    let engine = state
        .engines
        .engine(provider)
        .map_err(|error| AdminError::engine(code::ADD_MODEL_FAILED, error.to_string()))?;

    for model in models {
        let existing = registry.find_model(&provider.name, model).map_err(AdminError::from)?;

        if existing.is_some_and(|model| model.status == ModelStatus::Downloaded) {
            continue;
        }

        registry
            .put_model(&provider.name, model, ModelStatus::Downloading)
            .map_err(AdminError::write_failed(code::ADD_MODEL_FAILED))?;

        engine::spawn_pull(registry.clone(), engine.clone(), provider.name.clone(), model.clone());
    }

    Ok(())
}

/// Put `provider` into the slot of its service matching its source.
pub(crate) fn assign_slot(registry: &Registry, provider: &Provider) -> Result<(), AdminError> {
    let mut service = registry.get_service(&provider.service_name).map_err(|error| {
        if error.is_not_found() {
            AdminError::not_found(code::SERVICE_NOT_FOUND, error.to_string())
        } else {
            error.into()
        }
    })?;

    service.set_provider(provider.source, &provider.name);
    registry
        .update_service(service)
        .map_err(AdminError::write_failed(code::SERVICE_EDIT_FAILED))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn flavors() -> FlavorRegistry {
        FlavorRegistry::builtin().unwrap()
    }

    fn request(value: Value) -> ProviderRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults_come_from_the_flavor() {
        let provider = build_provider(
            &flavors(),
            &request(json!({
                "provider_name": "remote_tencent_chat",
                "service_name": "chat",
                "service_source": "remote",
                "api_flavor": "tencent",
                "auth_key": r#"{"secret_id":"id","secret_key":"key"}"#,
            })),
        )
        .unwrap();

        assert_eq!(provider.url, "https://hunyuan.tencentcloudapi.com");
        assert_eq!(provider.method, "POST");
        assert_eq!(provider.auth_type, AuthType::Token);
        assert!(provider.extra_headers.contains_key("action"));
    }

    #[test]
    fn validations_have_business_codes() {
        let cases = [
            json!({"service_name": "chat", "service_source": "local", "api_flavor": "ollama"}),
            json!({"provider_name": "p", "service_name": "translate", "service_source": "local", "api_flavor": "ollama"}),
            json!({"provider_name": "p", "service_name": "chat", "service_source": "edge", "api_flavor": "ollama"}),
            json!({"provider_name": "p", "service_name": "chat", "service_source": "local", "api_flavor": "acme"}),
            json!({"provider_name": "p", "service_name": "chat", "service_source": "local", "api_flavor": "ollama", "auth_type": "oauth"}),
            json!({"provider_name": "p", "service_name": "chat", "service_source": "remote", "api_flavor": "deepseek"}),
            json!({"provider_name": "p", "service_name": "chat", "service_source": "local", "api_flavor": "ollama", "url": "localhost:11434"}),
        ];

        let codes: Vec<u32> = cases
            .into_iter()
            .map(|value| build_provider(&flavors(), &request(value)).unwrap_err().business_code())
            .collect();

        assert_eq!(codes, vec![20001, 10015, 20001, 10017, 10018, 20006, 20007]);
    }

    #[test]
    fn structured_fields_accept_text() {
        let provider = build_provider(
            &flavors(),
            &request(json!({
                "provider_name": "local_ollama_chat",
                "service_name": "chat",
                "service_source": "local",
                "api_flavor": "ollama",
                "method": "post",
                "extra_headers": r#"{"x-trace": "on", "x-retries": 2}"#,
                "extra_json_body": {"keep_alive": "5m"},
                "properties": r#"{"max_input_tokens": 8192}"#,
            })),
        )
        .unwrap();

        assert_eq!(provider.method, "POST");
        assert_eq!(provider.extra_json_body["keep_alive"], "5m");
        assert_eq!(provider.properties.max_input_tokens, 8192);

        insta::assert_debug_snapshot!(provider.extra_headers, @r#"
        {
            "x-retries": "2",
            "x-trace": "on",
        }
        "#);
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let flavors = flavors();

        let provider = build_provider(
            &flavors,
            &request(json!({
                "provider_name": "remote_deepseek_chat",
                "service_name": "chat",
                "service_source": "remote",
                "api_flavor": "deepseek",
                "auth_key": r#"{"api_key":"old"}"#,
                "desc": "deepseek",
            })),
        )
        .unwrap();

        let patched = patch_provider(
            &flavors,
            provider,
            &request(json!({"provider_name": "remote_deepseek_chat", "auth_key": r#"{"api_key":"new"}"#})),
        )
        .unwrap();

        assert_eq!(patched.auth_key, r#"{"api_key":"new"}"#);
        assert_eq!(patched.desc, "deepseek");
        assert_eq!(patched.url, "https://api.deepseek.com/chat/completions");
    }
}
