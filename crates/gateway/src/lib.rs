//! The request path of the gateway: parsing inbound service requests,
//! scheduling them, choosing a provider, and relaying the exchange with it.
//!
//! A [`Gateway`] owns the scheduler and the upstream client. Its
//! [`router`](Gateway::router) mounts every flavor endpoint; the admin and
//! operational routes live in the `server` crate.

mod auth;
mod client;
mod dispatch;
mod error;
mod handler;
mod load;
mod multi_segment;
mod probe;
mod request;
mod routes;
mod runner;
mod scheduler;
mod stream;
mod task;

use std::sync::Arc;

use axum::Router;
use bytes::Bytes;
use config::GatewayConfig;
use flavor::FlavorRegistry;
use http::{HeaderMap, Method, Uri};
use registry::Registry;
use telemetry::{EventBus, EventKind};
use tokio::sync::mpsc;

pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use load::{FixedLoad, LoadProbe, SystemLoad};
pub use request::ServiceRequest;
pub use scheduler::Scheduler;
pub use stream::StreamMode;
pub use task::{Reply, ServiceTarget, TaskResult, TaskState};

use client::UpstreamClient;
use runner::TaskRunner;

/// Handle to a running gateway. Clones share the same scheduler.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    api_version: String,
    registry: Registry,
    scheduler: Scheduler,
    client: UpstreamClient,
    events: EventBus,
}

impl Gateway {
    /// Start the scheduler and the load sampler on the current tokio runtime.
    pub fn new(config: &GatewayConfig, registry: Registry, events: EventBus) -> Result<Self, GatewayError> {
        Self::with_load(config, registry, events, SystemLoad::start(&config.dispatch))
    }

    /// Like [`Gateway::new`], with an explicit load probe.
    pub fn with_load(
        config: &GatewayConfig,
        registry: Registry,
        events: EventBus,
        load: Arc<dyn LoadProbe>,
    ) -> Result<Self, GatewayError> {
        let client = UpstreamClient::new(&config.upstream, events.clone())?;
        let runner = TaskRunner::new(registry.flavors().clone(), client.clone(), events.clone());

        let dispatcher = Dispatcher::new(
            registry.clone(),
            load,
            config.dispatch.load_threshold,
            events.clone(),
        );

        let scheduler = Scheduler::start(&config.scheduler, dispatcher, runner);

        Ok(Self {
            inner: Arc::new(Inner {
                api_version: config.api_version.clone(),
                registry,
                scheduler,
                client,
                events,
            }),
        })
    }

    /// Routes for every HTTP endpoint of every loaded flavor.
    pub fn router(&self) -> Router {
        routes::flavor_routes(self)
    }

    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn flavors(&self) -> &Arc<FlavorRegistry> {
        self.inner.registry.flavors()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Parse an inbound request arriving through `from_flavor` and queue it.
    ///
    /// Returns the task id and the channel its results arrive on. Scheduling
    /// and upstream errors arrive on the channel as [`TaskResult::Failed`].
    pub async fn invoke_service(
        &self,
        from_flavor: &str,
        service: &str,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(u64, mpsc::Receiver<TaskResult>), GatewayError> {
        let policy = match self.inner.registry.get_service(service) {
            Ok(service) => service.hybrid_policy,
            Err(error) if error.is_not_found() => return Err(GatewayError::ServiceNotFound(service.to_string())),
            Err(error) => return Err(error.into()),
        };

        self.inner.events.notify_http_request(
            EventKind::ReceiveServiceRequest,
            &method,
            &uri.to_string(),
            &headers,
            &body,
        );

        let request = ServiceRequest::parse(from_flavor, service, method, uri, headers, body, policy)?;

        self.inner.scheduler.enqueue(request).await
    }
}
