use std::collections::BTreeMap;

use axum::extract::State;
use jiff::Timestamp;
use registry::{AuthType, ModelFilter, Provider, ProviderFilter, ProviderProperties, ServiceSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    AdminError, AdminState, Envelope, Params, code,
    provision::{self, Install, ProviderRequest},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderQuery {
    service_name: Option<String>,
    provider_name: Option<String>,
    api_flavor: Option<String>,
    service_source: Option<String>,
}

impl ProviderQuery {
    fn filter(self) -> Result<ProviderFilter, AdminError> {
        let non_empty = |value: Option<String>| value.filter(|value| !value.is_empty());

        let source = match non_empty(self.service_source) {
            Some(source) => Some(source.parse::<ServiceSource>().map_err(|error| {
                AdminError::bad_request(code::PROVIDER_BAD_REQUEST, error.to_string())
            })?),
            None => None,
        };

        Ok(ProviderFilter {
            service_name: non_empty(self.service_name),
            provider_name: non_empty(self.provider_name),
            flavor: non_empty(self.api_flavor),
            source,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderView {
    provider_name: String,
    service_name: String,
    service_source: ServiceSource,
    api_flavor: String,
    desc: String,
    method: String,
    url: String,
    auth_type: AuthType,
    auth_key: String,
    extra_headers: BTreeMap<String, String>,
    extra_json_body: Map<String, Value>,
    properties: ProviderProperties,
    models: Vec<String>,
    status: u8,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl ProviderView {
    fn new(provider: Provider, models: Vec<String>) -> Self {
        Self {
            provider_name: provider.name,
            service_name: provider.service_name,
            service_source: provider.source,
            api_flavor: provider.flavor,
            desc: provider.desc,
            method: provider.method,
            url: provider.url,
            auth_type: provider.auth_type,
            auth_key: provider.auth_key,
            extra_headers: provider.extra_headers,
            extra_json_body: provider.extra_json_body,
            properties: provider.properties,
            models,
            status: u8::from(provider.enabled),
            created_at: provider.created_at,
            updated_at: provider.updated_at,
        }
    }
}

pub(super) async fn list(
    State(state): State<AdminState>,
    Params(query): Params<ProviderQuery>,
) -> Result<Envelope<Vec<ProviderView>>, AdminError> {
    let registry = state.registry();
    let providers = registry.list_providers(&query.filter()?)?;

    let mut views = Vec::with_capacity(providers.len());

    for provider in providers {
        let models = registry
            .list_models(&ModelFilter::provider(&provider.name))?
            .into_iter()
            .map(|model| model.name)
            .collect();

        views.push(ProviderView::new(provider, models));
    }

    Ok(Envelope::with_data(code::PROVIDER_SUCCESS, views))
}

pub(super) async fn create(
    State(state): State<AdminState>,
    Params(request): Params<ProviderRequest>,
) -> Result<Envelope<()>, AdminError> {
    create_provider(&state, &request).await?;
    Ok(Envelope::success(code::PROVIDER_SUCCESS))
}

/// Validate, probe and store a new provider, then register its models.
pub(super) async fn create_provider(state: &AdminState, request: &ProviderRequest) -> Result<Provider, AdminError> {
    let registry = state.registry();
    let provider = provision::build_provider(registry.flavors(), request)?;

    match registry.get_provider(&provider.name) {
        Ok(_) => {
            return Err(AdminError::bad_request(
                code::PROVIDER_EXISTS,
                format!("provider {} already exists", provider.name),
            ));
        }
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error.into()),
    }

    let models = match provider.source {
        ServiceSource::Local => {
            check_engine(state, &provider).await?;
            request.models.clone()
        }
        ServiceSource::Remote => {
            let reachable = reachable_models(state, &provider, &request.models).await;

            // a provider left with nothing it can serve is refused
            if reachable.is_empty() && !request.models.is_empty() {
                return Err(AdminError::bad_request(
                    code::PROVIDER_MODEL_EMPTY,
                    format!("no model of provider {} is reachable", provider.name),
                ));
            }

            reachable
        }
    };

    let provider = registry
        .create_provider(provider)
        .map_err(AdminError::write_failed(code::PROVIDER_INSERT_FAILED))?;

    provision::register_models(state, &provider, &models, Install::Pull)?;

    Ok(provider)
}

pub(super) async fn check_engine(state: &AdminState, provider: &Provider) -> Result<(), AdminError> {
    let engine = state
        .engines
        .engine(provider)
        .map_err(|error| AdminError::unavailable(error.to_string()))?;

    engine.health().await.map_err(|error| {
        AdminError::unavailable(format!("local engine of provider {} is not available: {error}", provider.name))
    })
}

/// The models a remote provider answers for. Unreachable ones are left out.
async fn reachable_models(state: &AdminState, provider: &Provider, models: &[String]) -> Vec<String> {
    let mut reachable = Vec::with_capacity(models.len());

    for model in models {
        match state.gateway.check_provider(provider, Some(model)).await {
            Ok(()) => reachable.push(model.clone()),
            Err(error) => log::warn!("skipping model {model} of provider {}: {error}", provider.name),
        }
    }

    reachable
}

pub(super) async fn update(
    State(state): State<AdminState>,
    Params(request): Params<ProviderRequest>,
) -> Result<Envelope<()>, AdminError> {
    let registry = state.registry();

    if request.provider_name.is_empty() {
        return Err(AdminError::bad_request(code::PROVIDER_BAD_REQUEST, "provider_name is required"));
    }

    let existing = registry.get_provider(&request.provider_name).map_err(|error| {
        if error.is_not_found() {
            AdminError::bad_request(code::PROVIDER_INVALID, error.to_string())
        } else {
            error.into()
        }
    })?;

    let provider = provision::patch_provider(registry.flavors(), existing, &request)?;

    let provider = registry
        .update_provider(provider)
        .map_err(AdminError::write_failed(code::PROVIDER_UPDATE_FAILED))?;

    provision::register_models(&state, &provider, &request.models, Install::Pull)?;

    Ok(Envelope::success(code::PROVIDER_SUCCESS))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderName {
    provider_name: String,
}

pub(super) async fn delete(
    State(state): State<AdminState>,
    Params(request): Params<ProviderName>,
) -> Result<Envelope<()>, AdminError> {
    if request.provider_name.is_empty() {
        return Err(AdminError::bad_request(code::PROVIDER_INVALID, "provider_name is required"));
    }

    state.registry().delete_provider(&request.provider_name).map_err(|error| {
        if error.is_not_found() {
            AdminError::bad_request(code::PROVIDER_INVALID, error.to_string())
        } else {
            AdminError::write_failed(code::PROVIDER_INVALID)(error)
        }
    })?;

    Ok(Envelope::success(code::PROVIDER_SUCCESS))
}
