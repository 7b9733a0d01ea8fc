use axum::extract::State;
use jiff::Timestamp;
use registry::{MODELS_SERVICE, Model, ModelFilter, ModelStatus, Provider, SERVICES, ServiceSource};
use serde::{Deserialize, Serialize};

use super::{
    AdminError, AdminState, Envelope, Params, code,
    provision::{self, Install},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ModelQuery {
    provider_name: Option<String>,
    model_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ModelView {
    model_name: String,
    provider_name: String,
    status: ModelStatus,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<Model> for ModelView {
    fn from(model: Model) -> Self {
        Self {
            model_name: model.name,
            provider_name: model.provider_name,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub(super) async fn list(
    State(state): State<AdminState>,
    Params(query): Params<ModelQuery>,
) -> Result<Envelope<Vec<ModelView>>, AdminError> {
    let filter = ModelFilter {
        provider_name: query.provider_name.filter(|name| !name.is_empty()),
        model_name: query.model_name.filter(|name| !name.is_empty()),
    };

    let models = state.registry().list_models(&filter)?;

    Ok(Envelope::with_data(
        code::MODEL_SUCCESS,
        models.into_iter().map(ModelView::from).collect(),
    ))
}

/// Identifies a model either by provider or by the provider in a service
/// slot.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ModelRequest {
    model_name: String,
    provider_name: String,
    service_name: String,
    service_source: String,
}

impl ModelRequest {
    fn provider(&self, state: &AdminState) -> Result<Provider, AdminError> {
        let registry = state.registry();

        let name = if self.provider_name.is_empty() {
            self.slot_provider(state)?
        } else {
            self.provider_name.clone()
        };

        registry.get_provider(&name).map_err(|error| {
            if error.is_not_found() {
                AdminError::bad_request(code::PROVIDER_INVALID, error.to_string())
            } else {
                error.into()
            }
        })
    }

    fn slot_provider(&self, state: &AdminState) -> Result<String, AdminError> {
        let service_name = self.service_name.as_str();

        if !SERVICES.contains(&service_name) || service_name == MODELS_SERVICE {
            return Err(AdminError::bad_request(
                code::MODEL_BAD_REQUEST,
                format!("service '{service_name}' does not manage models"),
            ));
        }

        let source: ServiceSource = self
            .service_source
            .parse()
            .map_err(|error: registry::ParseEnumError| AdminError::bad_request(code::MODEL_BAD_REQUEST, error.to_string()))?;

        let service = state.registry().get_service(service_name).map_err(|error| {
            if error.is_not_found() {
                AdminError::not_found(code::SERVICE_NOT_FOUND, error.to_string())
            } else {
                error.into()
            }
        })?;

        service
            .provider(source)
            .map(str::to_string)
            .ok_or_else(|| AdminError::bad_request(code::PROVIDER_INVALID, format!("service {service_name} has no {source} provider")))
    }
}

pub(super) async fn create(
    State(state): State<AdminState>,
    Params(request): Params<ModelRequest>,
) -> Result<Envelope<()>, AdminError> {
    if request.model_name.is_empty() {
        return Err(AdminError::bad_request(code::MODEL_BAD_REQUEST, "model_name is required"));
    }

    let provider = request.provider(&state)?;

    // a failed pull may be retried
    match state.registry().find_model(&provider.name, &request.model_name)? {
        Some(model) if model.status != ModelStatus::Failed => {
            return Err(AdminError::bad_request(
                code::MODEL_EXISTS,
                format!("model {} of provider {} is {}", model.name, provider.name, model.status),
            ));
        }
        _ => {}
    }

    provision::register_models(&state, &provider, std::slice::from_ref(&request.model_name), Install::Pull)?;

    log::info!("added model {} to provider {}", request.model_name, provider.name);

    Ok(Envelope::success(code::MODEL_SUCCESS))
}

pub(super) async fn delete(
    State(state): State<AdminState>,
    Params(request): Params<ModelRequest>,
) -> Result<Envelope<()>, AdminError> {
    let registry = state.registry();
    let provider = request.provider(&state)?;

    let Some(model) = registry.find_model(&provider.name, &request.model_name)? else {
        return Err(AdminError::not_found(
            code::MODEL_NOT_EXIST,
            format!("provider {} has no model '{}'", provider.name, request.model_name),
        ));
    };

    if provider.source == ServiceSource::Local && model.status == ModelStatus::Downloaded {
        let engine = state
            .engines
            .engine(&provider)
            .map_err(|error| AdminError::engine(code::ENGINE_DELETE_FAILED, error.to_string()))?;

        engine
            .delete(&model.name)
            .await
            .map_err(|error| AdminError::engine(code::ENGINE_DELETE_FAILED, error.to_string()))?;
    }

    registry
        .delete_model(&provider.name, &model.name)
        .map_err(AdminError::write_failed(code::DELETE_MODEL_FAILED))?;

    log::info!("deleted model {} of provider {}", model.name, provider.name);

    Ok(Envelope::success(code::MODEL_SUCCESS))
}
