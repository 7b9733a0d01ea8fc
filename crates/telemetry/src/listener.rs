use std::sync::{Arc, Mutex};

use crate::{Event, EventData, EventKind};

/// Receives every event published on the bus.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Writes events to the `log` facade: HTTP dumps at debug, warnings at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&self, event: &Event) {
        match &event.data {
            EventData::Message(message) if event.kind == EventKind::Warning => log::warn!("{message}"),
            EventData::Message(message) => log::debug!("{}: {message}", event.kind),
            EventData::None => log::debug!("{}", event.kind),
            EventData::HttpRequest(request) => {
                log::debug!("\n------------------ >>> {} >>> ------------------\n{request}", event.kind)
            }
            EventData::HttpResponse(response) => {
                log::debug!("\n------------------ <<< {} <<< ------------------\n{response}", event.kind)
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &Event) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };

        events.push(event.clone());
    }
}
