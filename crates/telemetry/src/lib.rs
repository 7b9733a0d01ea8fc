//! Observability events of the request lifecycle.
//!
//! Components report what happens to a request through an [`EventBus`]; every
//! registered [`EventListener`] sees every event and filters for itself.

mod event;
mod listener;

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

pub use event::{Event, EventData, EventKind, HttpRequestEvent, HttpResponseEvent};
pub use listener::{EventListener, LogListener, RecordingListener};

/// Fan-out of lifecycle events to the registered listeners.
///
/// Listeners are attached while the bus is built; clones share them.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: impl EventListener + 'static) -> Self {
        Arc::make_mut(&mut self.listeners).push(Arc::new(listener));
        self
    }

    pub fn notify(&self, kind: EventKind, data: EventData) {
        let event = Event { kind, data };

        for listener in self.listeners.iter() {
            listener.on_event(&event);
        }
    }

    pub fn notify_http_request(&self, kind: EventKind, method: &Method, url: &str, headers: &HeaderMap, body: &Bytes) {
        if self.listeners.is_empty() {
            return;
        }

        let data = EventData::HttpRequest(HttpRequestEvent {
            method: method.clone(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        });

        self.notify(kind, data);
    }

    pub fn notify_http_response(&self, kind: EventKind, status: StatusCode, headers: &HeaderMap, body: &Bytes) {
        if self.listeners.is_empty() {
            return;
        }

        let data = EventData::HttpResponse(HttpResponseEvent {
            status,
            headers: headers.clone(),
            body: body.clone(),
        });

        self.notify(kind, data);
    }

    /// Report a downgrade or fallback the request survived.
    pub fn warning(&self, message: impl Into<String>) {
        self.notify(EventKind::Warning, EventData::Message(message.into()));
    }
}
