//! Services, providers and installed models, persisted through a [`Datastore`].

mod error;
mod registry;
pub mod store;
mod types;

pub use error::StoreError;
pub use registry::Registry;
pub use store::{Datastore, MemoryStore, SqliteStore};
pub use types::{
    AuthType, HybridPolicy, MODELS_SERVICE, Model, ModelFilter, ModelStatus, ParseEnumError, Provider, ProviderFilter,
    ProviderProperties, SERVICES, Service, ServiceSource,
};
