//! Persistence of services, providers and models.

mod memory;
mod sqlite;

use std::{fs, sync::Arc};

use config::{StoreConfig, StoreKind};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{Model, ModelFilter, Provider, ProviderFilter, Service, StoreError};

/// Tables backing the registry. Every call is a short, self-contained
/// transaction; implementations are shared between request workers.
pub trait Datastore: Send + Sync {
    fn get_service(&self, name: &str) -> Result<Option<Service>, StoreError>;

    fn list_services(&self) -> Result<Vec<Service>, StoreError>;

    /// Inserts or replaces the service with the same name.
    fn put_service(&self, service: &Service) -> Result<(), StoreError>;

    fn get_provider(&self, name: &str) -> Result<Option<Provider>, StoreError>;

    fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the name is taken.
    fn insert_provider(&self, provider: &Provider) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when the provider does not exist.
    fn update_provider(&self, provider: &Provider) -> Result<(), StoreError>;

    fn delete_provider(&self, name: &str) -> Result<(), StoreError>;

    fn get_model(&self, provider_name: &str, model_name: &str) -> Result<Option<Model>, StoreError>;

    fn list_models(&self, filter: &ModelFilter) -> Result<Vec<Model>, StoreError>;

    /// Inserts or replaces the model with the same provider and name.
    fn put_model(&self, model: &Model) -> Result<(), StoreError>;

    fn delete_model(&self, provider_name: &str, model_name: &str) -> Result<(), StoreError>;

    fn delete_models_of(&self, provider_name: &str) -> Result<(), StoreError>;
}

/// Open the datastore selected in the configuration.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn Datastore>, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::default())),
        StoreKind::Sqlite => {
            fs::create_dir_all(&config.data_dir)?;

            let path = config.database_path();
            log::info!("opening registry database at {}", path.display());

            Ok(Arc::new(SqliteStore::open(&path)?))
        }
    }
}
