use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::Datastore;
use crate::{Model, ModelFilter, Provider, ProviderFilter, Service, StoreError};

/// Process-local tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    services: BTreeMap<String, Service>,
    providers: BTreeMap<String, Provider>,
    models: BTreeMap<(String, String), Model>,
}

impl MemoryStore {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Datastore for MemoryStore {
    fn get_service(&self, name: &str) -> Result<Option<Service>, StoreError> {
        Ok(self.read()?.services.get(name).cloned())
    }

    fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(self.read()?.services.values().cloned().collect())
    }

    fn put_service(&self, service: &Service) -> Result<(), StoreError> {
        self.write()?.services.insert(service.name.clone(), service.clone());
        Ok(())
    }

    fn get_provider(&self, name: &str) -> Result<Option<Provider>, StoreError> {
        Ok(self.read()?.providers.get(name).cloned())
    }

    fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>, StoreError> {
        let tables = self.read()?;
        Ok(tables.providers.values().filter(|p| filter.matches(p)).cloned().collect())
    }

    fn insert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        if tables.providers.contains_key(&provider.name) {
            return Err(StoreError::conflict("provider", &provider.name));
        }

        tables.providers.insert(provider.name.clone(), provider.clone());
        Ok(())
    }

    fn update_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        match tables.providers.get_mut(&provider.name) {
            Some(existing) => {
                *existing = provider.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("provider", &provider.name)),
        }
    }

    fn delete_provider(&self, name: &str) -> Result<(), StoreError> {
        self.write()?.providers.remove(name);
        Ok(())
    }

    fn get_model(&self, provider_name: &str, model_name: &str) -> Result<Option<Model>, StoreError> {
        let key = (provider_name.to_string(), model_name.to_string());
        Ok(self.read()?.models.get(&key).cloned())
    }

    fn list_models(&self, filter: &ModelFilter) -> Result<Vec<Model>, StoreError> {
        let tables = self.read()?;
        Ok(tables.models.values().filter(|m| filter.matches(m)).cloned().collect())
    }

    fn put_model(&self, model: &Model) -> Result<(), StoreError> {
        let key = (model.provider_name.clone(), model.name.clone());
        self.write()?.models.insert(key, model.clone());

        Ok(())
    }

    fn delete_model(&self, provider_name: &str, model_name: &str) -> Result<(), StoreError> {
        let key = (provider_name.to_string(), model_name.to_string());
        self.write()?.models.remove(&key);

        Ok(())
    }

    fn delete_models_of(&self, provider_name: &str) -> Result<(), StoreError> {
        self.write()?.models.retain(|(provider, _), _| provider != provider_name);
        Ok(())
    }
}
