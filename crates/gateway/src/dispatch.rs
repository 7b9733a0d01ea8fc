use std::sync::Arc;

use registry::{HybridPolicy, MODELS_SERVICE, ModelStatus, Registry, ServiceSource};
use telemetry::EventBus;

use crate::{GatewayError, ServiceRequest, ServiceTarget, load::LoadProbe};

/// Chooses location, provider, model and stream mode for a request.
///
/// Dispatching only reads the registry and the load probe; the sole side
/// effect is reporting downgrades as warnings.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    load: Arc<dyn LoadProbe>,
    load_threshold: f64,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(registry: Registry, load: Arc<dyn LoadProbe>, load_threshold: f64, events: EventBus) -> Self {
        Self {
            registry,
            load,
            load_threshold,
            events,
        }
    }

    pub fn dispatch(&self, request: &ServiceRequest) -> Result<ServiceTarget, GatewayError> {
        let location = self.location(request);

        let service = match self.registry.get_service(&request.service) {
            Ok(service) => service,
            Err(error) if error.is_not_found() => return Err(GatewayError::ServiceNotFound(request.service.clone())),
            Err(error) => return Err(error.into()),
        };

        let (location, provider_name) = match (service.provider(location), service.provider(location.other())) {
            (Some(name), _) => (location, name.to_string()),
            (None, Some(name)) => {
                self.events.warning(format!(
                    "service '{}' has no {location} provider, falling back to {} provider '{name}'",
                    service.name,
                    location.other()
                ));

                (location.other(), name.to_string())
            }
            (None, None) => return Err(GatewayError::NoProvider(service.name)),
        };

        let provider = match self.registry.get_provider(&provider_name) {
            Ok(provider) => provider,
            Err(error) if error.is_not_found() => {
                return Err(GatewayError::ProviderNotFound {
                    provider: provider_name,
                    location,
                    service: request.service.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        let model = if request.service == MODELS_SERVICE {
            request.model.clone()
        } else {
            Some(self.model(request, location, &provider.name, &provider.flavor)?)
        };

        let mut stream = request.ask_stream;

        if stream && !provider.properties.supports_stream() {
            stream = false;

            self.events.warning(format!(
                "stream mode was asked but provider '{}' only supports {:?}",
                provider.name, provider.properties.supported_response_mode
            ));
        }

        log::debug!(
            "dispatching {} request to {location} provider {} (model {model:?}, stream {stream})",
            request.service,
            provider.name
        );

        Ok(ServiceTarget {
            location,
            flavor: provider.flavor.clone(),
            provider,
            model,
            stream,
        })
    }

    fn location(&self, request: &ServiceRequest) -> ServiceSource {
        match request.hybrid_policy {
            HybridPolicy::AlwaysLocal => ServiceSource::Local,
            HybridPolicy::AlwaysRemote => ServiceSource::Remote,
            // an explicit model is the caller's choice, the machine load does not override it
            HybridPolicy::Default if request.model.is_some() => ServiceSource::Local,
            HybridPolicy::Default => {
                if self.load.is_busy(self.load_threshold) {
                    log::debug!("machine is busy, routing {} remotely", request.service);
                    ServiceSource::Remote
                } else {
                    ServiceSource::Local
                }
            }
        }
    }

    fn model(
        &self,
        request: &ServiceRequest,
        location: ServiceSource,
        provider: &str,
        flavor: &str,
    ) -> Result<String, GatewayError> {
        let service = request.service.clone();

        let Some(name) = &request.model else {
            let model = match location {
                ServiceSource::Local => self.registry.latest_downloaded_model(provider)?.map(|model| model.name),
                ServiceSource::Remote => self.registry.get_default_model(flavor, &request.service),
            };

            return model.ok_or(GatewayError::NoModel { location, service });
        };

        match self.registry.find_model(provider, name)? {
            Some(model) if model.status == ModelStatus::Downloaded => Ok(model.name),
            Some(_) => Err(GatewayError::ModelNotReady {
                model: name.clone(),
                location,
                service,
            }),
            None => Err(GatewayError::ModelNotFound {
                model: name.clone(),
                location,
                service,
            }),
        }
    }
}
