//! Export and import of the whole registry as one portable document.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use registry::{
    HybridPolicy, ModelFilter, Provider, ProviderFilter, ProviderProperties, SERVICES, ServiceSource,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    AdminError, AdminState, Envelope, Params, code, providers,
    provision::{self, Install, ProviderRequest},
};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServiceDocument {
    pub version: String,
    pub services: BTreeMap<String, ServiceEntry>,
    pub service_providers: BTreeMap<String, ProviderEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServiceEntry {
    pub service_providers: Slots,
    pub hybrid_policy: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Slots {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderEntry {
    pub service_name: String,
    pub service_source: String,
    pub desc: String,
    pub api_flavor: String,
    pub method: String,
    pub url: String,
    pub auth_type: String,
    pub auth_key: String,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra_json_body: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<ProviderProperties>,
}

impl ProviderEntry {
    fn new(provider: Provider, models: Vec<String>) -> Self {
        let properties = (provider.properties != ProviderProperties::default()).then_some(provider.properties);

        Self {
            service_name: provider.service_name,
            service_source: provider.source.to_string(),
            desc: provider.desc,
            api_flavor: provider.flavor,
            method: provider.method,
            url: provider.url,
            auth_type: provider.auth_type.to_string(),
            auth_key: provider.auth_key,
            models,
            extra_headers: provider.extra_headers,
            extra_json_body: provider.extra_json_body,
            properties,
        }
    }

    fn request(&self, provider_name: &str) -> ProviderRequest {
        let headers = if self.extra_headers.is_empty() {
            Value::Null
        } else {
            Value::Object(
                self.extra_headers
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect(),
            )
        };

        let properties = match &self.properties {
            Some(properties) => serde_json::to_value(properties).unwrap_or(Value::Null),
            None => Value::Null,
        };

        ProviderRequest {
            provider_name: provider_name.to_string(),
            service_name: self.service_name.clone(),
            service_source: self.service_source.clone(),
            api_flavor: self.api_flavor.clone(),
            desc: self.desc.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            auth_type: self.auth_type.clone(),
            auth_key: self.auth_key.clone(),
            models: self.models.clone(),
            extra_headers: headers,
            extra_json_body: Value::Object(self.extra_json_body.clone()),
            properties,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ExportFilter {
    service_name: String,
    provider_name: String,
    model_name: String,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// The document is returned bare so it can be posted back to import as is.
pub(super) async fn export(
    State(state): State<AdminState>,
    Params(filter): Params<ExportFilter>,
) -> Result<Json<ServiceDocument>, AdminError> {
    let registry = state.registry();

    let services = registry
        .list_services(non_empty(&filter.service_name).as_deref())?
        .into_iter()
        // import rejects services without providers
        .filter(|service| service.is_usable())
        .map(|service| {
            let entry = ServiceEntry {
                service_providers: Slots {
                    local: service.local_provider,
                    remote: service.remote_provider,
                },
                hybrid_policy: service.hybrid_policy.to_string(),
            };

            (service.name, entry)
        })
        .collect();

    let provider_filter = ProviderFilter {
        service_name: non_empty(&filter.service_name),
        provider_name: non_empty(&filter.provider_name),
        ..ProviderFilter::default()
    };

    let mut service_providers = BTreeMap::new();

    for provider in registry.list_providers(&provider_filter)? {
        let model_filter = ModelFilter {
            provider_name: Some(provider.name.clone()),
            model_name: non_empty(&filter.model_name),
        };

        let models = registry
            .list_models(&model_filter)?
            .into_iter()
            .map(|model| model.name)
            .collect();

        service_providers.insert(provider.name.clone(), ProviderEntry::new(provider, models));
    }

    Ok(Json(ServiceDocument {
        version: state.gateway.api_version().to_string(),
        services,
        service_providers,
    }))
}

/// A provider of the document, validated and ready to commit.
struct Staged {
    provider: Provider,
    models: Vec<String>,
    exists: bool,
}

/// Validate the whole document, probe its providers, then commit. Nothing is
/// written when a check fails.
pub(super) async fn import(
    State(state): State<AdminState>,
    Params(document): Params<ServiceDocument>,
) -> Result<Envelope<()>, AdminError> {
    let registry = state.registry();

    if document.version != state.gateway.api_version() {
        return Err(AdminError::bad_request(
            code::VERSION_MISMATCH,
            format!(
                "document version '{}' does not match {}",
                document.version,
                state.gateway.api_version()
            ),
        ));
    }

    let mut policies = Vec::with_capacity(document.services.len());

    for (name, entry) in &document.services {
        if !SERVICES.contains(&name.as_str()) {
            return Err(AdminError::bad_request(
                code::UNSUPPORTED_SERVICE,
                format!("unsupported service '{name}'"),
            ));
        }

        let policy = match entry.hybrid_policy.as_str() {
            "" => None,
            policy => Some(policy.parse::<HybridPolicy>().map_err(|error| {
                AdminError::bad_request(code::UNSUPPORTED_HYBRID_POLICY, error.to_string())
            })?),
        };

        let slots = &entry.service_providers;

        if slots.local.is_empty() && slots.remote.is_empty() {
            return Err(AdminError::bad_request(
                code::SERVICE_BAD_REQUEST,
                format!("service {name} names no provider"),
            ));
        }

        for slot in [&slots.local, &slots.remote] {
            let known = slot.is_empty()
                || document.service_providers.contains_key(slot)
                || registry.get_provider(slot).is_ok();

            if !known {
                return Err(AdminError::bad_request(
                    code::PROVIDER_INVALID,
                    format!("service {name} names unknown provider {slot}"),
                ));
            }
        }

        policies.push((name.as_str(), policy, slots));
    }

    let mut staged = Vec::with_capacity(document.service_providers.len());

    for (name, entry) in &document.service_providers {
        let mut provider = provision::build_provider(registry.flavors(), &entry.request(name))?;

        let exists = match registry.get_provider(name) {
            Ok(existing) => {
                provider.enabled = existing.enabled;
                true
            }
            Err(error) if error.is_not_found() => false,
            Err(error) => return Err(error.into()),
        };

        staged.push(Staged {
            provider,
            models: entry.models.clone(),
            exists,
        });
    }

    if state.import.health_check {
        for Staged { provider, models, .. } in &staged {
            match provider.source {
                ServiceSource::Local => providers::check_engine(&state, provider).await?,
                ServiceSource::Remote => state
                    .gateway
                    .check_provider(provider, models.first().map(String::as_str))
                    .await
                    .map_err(|error| AdminError::unavailable(format!("provider {} is not available: {error}", provider.name)))?,
            }
        }
    }

    let install = if state.import.pull_models {
        Install::Pull
    } else {
        Install::Assume
    };

    for Staged { provider, models, exists } in staged {
        let provider = if exists {
            registry
                .update_provider(provider)
                .map_err(AdminError::write_failed(code::PROVIDER_UPDATE_FAILED))?
        } else {
            registry
                .create_provider(provider)
                .map_err(AdminError::write_failed(code::PROVIDER_INSERT_FAILED))?
        };

        provision::register_models(&state, &provider, &models, install)?;
    }

    for (name, policy, slots) in policies {
        let mut service = registry.get_service(name).map_err(|error| {
            if error.is_not_found() {
                AdminError::not_found(code::SERVICE_NOT_FOUND, error.to_string())
            } else {
                error.into()
            }
        })?;

        if let Some(policy) = policy {
            service.hybrid_policy = policy;
        }

        if !slots.local.is_empty() {
            service.set_provider(ServiceSource::Local, slots.local.as_str());
        }

        if !slots.remote.is_empty() {
            service.set_provider(ServiceSource::Remote, slots.remote.as_str());
        }

        registry
            .update_service(service)
            .map_err(AdminError::write_failed(code::SERVICE_EDIT_FAILED))?;
    }

    log::info!(
        "imported {} services and {} providers",
        document.services.len(),
        document.service_providers.len()
    );

    Ok(Envelope::success(code::SERVICE_SUCCESS))
}
