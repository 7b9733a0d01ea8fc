use std::sync::Arc;

use flavor::FlavorRegistry;
use jiff::Timestamp;

use crate::{
    HybridPolicy, Model, ModelFilter, ModelStatus, Provider, ProviderFilter, SERVICES, Service, ServiceSource,
    StoreError,
    store::Datastore,
};

/// Read-mostly view of services, providers and models.
///
/// Cloning is cheap; every clone shares the same datastore. Readers always
/// see the latest committed write, there is no cache in between.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Datastore>,
    flavors: Arc<FlavorRegistry>,
}

impl Registry {
    pub fn new(store: Arc<dyn Datastore>, flavors: Arc<FlavorRegistry>) -> Self {
        Self { store, flavors }
    }

    pub fn flavors(&self) -> &Arc<FlavorRegistry> {
        &self.flavors
    }

    /// Create the built-in services that do not exist yet.
    pub fn seed_default_services(&self) -> Result<(), StoreError> {
        for name in SERVICES {
            if self.store.get_service(name)?.is_some() {
                continue;
            }

            let policy = match name {
                "text-to-image" => HybridPolicy::AlwaysRemote,
                _ => HybridPolicy::Default,
            };

            log::debug!("seeding service {name} with policy {policy}");
            self.store.put_service(&Service::new(name, policy))?;
        }

        Ok(())
    }

    pub fn get_service(&self, name: &str) -> Result<Service, StoreError> {
        self.store
            .get_service(name)?
            .ok_or_else(|| StoreError::not_found("service", name))
    }

    pub fn list_services(&self, name: Option<&str>) -> Result<Vec<Service>, StoreError> {
        let mut services = self.store.list_services()?;

        if let Some(name) = name {
            services.retain(|service| service.name == name);
        }

        Ok(services)
    }

    pub fn update_service(&self, mut service: Service) -> Result<Service, StoreError> {
        let existing = self.get_service(&service.name)?;

        service.created_at = existing.created_at;
        service.updated_at = Timestamp::now();
        self.store.put_service(&service)?;

        Ok(service)
    }

    pub fn get_provider(&self, name: &str) -> Result<Provider, StoreError> {
        self.store
            .get_provider(name)?
            .ok_or_else(|| StoreError::not_found("provider", name))
    }

    pub fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>, StoreError> {
        self.store.list_providers(filter)
    }

    pub fn create_provider(&self, mut provider: Provider) -> Result<Provider, StoreError> {
        let now = Timestamp::now();
        provider.created_at = now;
        provider.updated_at = now;

        self.store.insert_provider(&provider)?;
        log::info!("created provider {} for service {}", provider.name, provider.service_name);

        Ok(provider)
    }

    pub fn update_provider(&self, mut provider: Provider) -> Result<Provider, StoreError> {
        let existing = self.get_provider(&provider.name)?;

        provider.created_at = existing.created_at;
        provider.updated_at = Timestamp::now();
        self.store.update_provider(&provider)?;

        log::info!("updated provider {}", provider.name);

        Ok(provider)
    }

    /// Delete a provider with its models and clear every service slot naming it.
    pub fn delete_provider(&self, name: &str) -> Result<Provider, StoreError> {
        let provider = self.get_provider(name)?;

        self.store.delete_models_of(name)?;
        self.store.delete_provider(name)?;

        for mut service in self.store.list_services()? {
            let source = if service.local_provider == name {
                ServiceSource::Local
            } else if service.remote_provider == name {
                ServiceSource::Remote
            } else {
                continue;
            };

            service.set_provider(source, "");
            service.updated_at = Timestamp::now();
            self.store.put_service(&service)?;
        }

        log::info!("deleted provider {name}");

        Ok(provider)
    }

    pub fn list_models(&self, filter: &ModelFilter) -> Result<Vec<Model>, StoreError> {
        self.store.list_models(filter)
    }

    pub fn find_model(&self, provider_name: &str, model_name: &str) -> Result<Option<Model>, StoreError> {
        self.store.get_model(provider_name, model_name)
    }

    /// Insert a model or move an existing one to `status`.
    pub fn put_model(&self, provider_name: &str, model_name: &str, status: ModelStatus) -> Result<Model, StoreError> {
        let model = match self.store.get_model(provider_name, model_name)? {
            Some(mut existing) => {
                existing.status = status;
                existing.updated_at = Timestamp::now();
                existing
            }
            None => Model::new(model_name, provider_name, status),
        };

        self.store.put_model(&model)?;

        Ok(model)
    }

    pub fn delete_model(&self, provider_name: &str, model_name: &str) -> Result<(), StoreError> {
        if self.store.get_model(provider_name, model_name)?.is_none() {
            return Err(StoreError::not_found("model", model_name));
        }

        self.store.delete_model(provider_name, model_name)
    }

    /// The most recently updated downloaded model of a provider.
    pub fn latest_downloaded_model(&self, provider_name: &str) -> Result<Option<Model>, StoreError> {
        let models = self.store.list_models(&ModelFilter::provider(provider_name))?;

        Ok(models
            .into_iter()
            .filter(|model| model.status == ModelStatus::Downloaded)
            .max_by_key(|model| model.updated_at))
    }

    /// The model a flavor falls back to for a service, if it declares one.
    pub fn get_default_model(&self, flavor: &str, service: &str) -> Option<String> {
        let service = self.flavors.get(flavor).ok()?.service(service).ok()?;
        let model = service.default_model();

        (!model.is_empty()).then(|| model.to_string())
    }
}
