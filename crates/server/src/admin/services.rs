use axum::extract::State;
use jiff::Timestamp;
use registry::{HybridPolicy, Service, ServiceSource};
use serde::{Deserialize, Serialize};

use super::{
    AdminError, AdminState, Envelope, Params, code, providers,
    provision::{self, Install, ProviderRequest},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ServiceQuery {
    service_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ServiceView {
    service_name: String,
    hybrid_policy: HybridPolicy,
    remote_provider: String,
    local_provider: String,
    /// 1 when at least one slot is filled.
    status: u8,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<Service> for ServiceView {
    fn from(service: Service) -> Self {
        Self {
            status: u8::from(service.enabled && service.is_usable()),
            service_name: service.name,
            hybrid_policy: service.hybrid_policy,
            remote_provider: service.remote_provider,
            local_provider: service.local_provider,
            created_at: service.created_at,
            updated_at: service.updated_at,
        }
    }
}

pub(super) async fn list(
    State(state): State<AdminState>,
    Params(query): Params<ServiceQuery>,
) -> Result<Envelope<Vec<ServiceView>>, AdminError> {
    let name = query.service_name.as_deref().filter(|name| !name.is_empty());
    let services = state.registry().list_services(name)?;

    Ok(Envelope::with_data(
        code::SERVICE_SUCCESS,
        services.into_iter().map(ServiceView::from).collect(),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ServiceUpdate {
    service_name: String,
    hybrid_policy: String,
    local_provider: String,
    remote_provider: String,
}

pub(super) async fn update(
    State(state): State<AdminState>,
    Params(request): Params<ServiceUpdate>,
) -> Result<Envelope<()>, AdminError> {
    let registry = state.registry();

    let mut service = registry.get_service(&request.service_name).map_err(|error| {
        if error.is_not_found() {
            AdminError::not_found(code::SERVICE_NOT_FOUND, error.to_string())
        } else {
            error.into()
        }
    })?;

    if !request.hybrid_policy.is_empty() {
        service.hybrid_policy = request.hybrid_policy.parse().map_err(|error: registry::ParseEnumError| {
            AdminError::bad_request(code::UNSUPPORTED_HYBRID_POLICY, error.to_string())
        })?;
    }

    for (source, name) in [
        (ServiceSource::Local, &request.local_provider),
        (ServiceSource::Remote, &request.remote_provider),
    ] {
        if name.is_empty() {
            continue;
        }

        let provider = registry.get_provider(name).map_err(|error| {
            if error.is_not_found() {
                AdminError::bad_request(code::PROVIDER_INVALID, error.to_string())
            } else {
                error.into()
            }
        })?;

        if provider.service_name != service.name || provider.source != source {
            return Err(AdminError::bad_request(
                code::SERVICE_BAD_REQUEST,
                format!(
                    "provider {name} serves {} from {}, not {} from {source}",
                    provider.service_name, provider.source, service.name
                ),
            ));
        }

        service.set_provider(source, name.as_str());
    }

    let service = registry
        .update_service(service)
        .map_err(AdminError::write_failed(code::SERVICE_EDIT_FAILED))?;

    log::info!(
        "updated service {}: policy {}, local '{}', remote '{}'",
        service.name,
        service.hybrid_policy,
        service.local_provider,
        service.remote_provider
    );

    Ok(Envelope::success(code::SERVICE_SUCCESS))
}

/// Create the provider unless it exists, then put it into its service slot.
pub(super) async fn install(
    State(state): State<AdminState>,
    Params(request): Params<ProviderRequest>,
) -> Result<Envelope<()>, AdminError> {
    let registry = state.registry();

    let provider = match registry.get_provider(&request.provider_name) {
        Ok(existing) => {
            if existing.service_name != request.service_name {
                return Err(AdminError::bad_request(
                    code::SERVICE_BAD_REQUEST,
                    format!("provider {} serves {}", existing.name, existing.service_name),
                ));
            }

            provision::register_models(&state, &existing, &request.models, Install::Pull)?;
            existing
        }
        Err(error) if error.is_not_found() => providers::create_provider(&state, &request).await?,
        Err(error) => return Err(error.into()),
    };

    provision::assign_slot(registry, &provider)?;

    log::info!(
        "installed provider {} as {} provider of {}",
        provider.name,
        provider.source,
        provider.service_name
    );

    Ok(Envelope::success(code::SERVICE_SUCCESS))
}
