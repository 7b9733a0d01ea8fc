use std::sync::Arc;

use convert::Content;
use http::StatusCode;
use jiff::{SignedDuration, Timestamp};
use registry::{Provider, ServiceSource};
use tokio::sync::mpsc;

use crate::{GatewayError, ServiceRequest};

/// Where and how a task runs, as decided by the dispatcher.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub location: ServiceSource,
    pub provider: Provider,
    /// `None` only for services that do not take a model.
    pub model: Option<String>,
    pub stream: bool,
    /// Flavor of the provider, the format the upstream speaks.
    pub flavor: String,
}

/// A piece of response ready to be written to the client.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub content: Content,
}

/// What a task sends back to the handler.
#[derive(Debug)]
pub enum TaskResult {
    /// One stream chunk; more results follow.
    Chunk(Reply),
    /// The whole response for non-streaming exchanges, or the end of a stream.
    Done(Reply),
    Failed(GatewayError),
}

impl TaskResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskResult::Chunk(_))
    }
}

pub(crate) type ResultSender = mpsc::Sender<TaskResult>;

/// Lifecycle of a task. Every transition stamps the wall clock; later states
/// keep the earlier stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting {
        enqueued_at: Timestamp,
    },
    Running {
        enqueued_at: Timestamp,
        started_at: Timestamp,
    },
    Done {
        enqueued_at: Timestamp,
        started_at: Timestamp,
        completed_at: Timestamp,
    },
    /// `started_at` is `None` when dispatch failed and the task never ran.
    Failed {
        enqueued_at: Timestamp,
        started_at: Option<Timestamp>,
        completed_at: Timestamp,
    },
}

impl TaskState {
    pub(crate) fn waiting() -> Self {
        TaskState::Waiting {
            enqueued_at: Timestamp::now(),
        }
    }

    pub fn enqueued_at(&self) -> Timestamp {
        match *self {
            TaskState::Waiting { enqueued_at }
            | TaskState::Running { enqueued_at, .. }
            | TaskState::Done { enqueued_at, .. }
            | TaskState::Failed { enqueued_at, .. } => enqueued_at,
        }
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        match *self {
            TaskState::Waiting { .. } => None,
            TaskState::Running { started_at, .. } | TaskState::Done { started_at, .. } => Some(started_at),
            TaskState::Failed { started_at, .. } => started_at,
        }
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        match *self {
            TaskState::Done { completed_at, .. } | TaskState::Failed { completed_at, .. } => Some(completed_at),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at().is_some()
    }

    pub(crate) fn start(self) -> Self {
        TaskState::Running {
            enqueued_at: self.enqueued_at(),
            started_at: Timestamp::now(),
        }
    }

    /// Only a running task completes; any other state is returned unchanged.
    pub(crate) fn done(self) -> Self {
        match self {
            TaskState::Running {
                enqueued_at,
                started_at,
            } => TaskState::Done {
                enqueued_at,
                started_at,
                completed_at: Timestamp::now(),
            },
            other => other,
        }
    }

    pub(crate) fn fail(self) -> Self {
        if self.is_terminal() {
            return self;
        }

        TaskState::Failed {
            enqueued_at: self.enqueued_at(),
            started_at: self.started_at(),
            completed_at: Timestamp::now(),
        }
    }

    /// Time spent since the last transition that started the clock.
    pub(crate) fn elapsed(&self) -> SignedDuration {
        let since = self.started_at().unwrap_or(self.enqueued_at());
        self.completed_at().unwrap_or_else(Timestamp::now).duration_since(since)
    }
}

/// Scheduler-owned record of a task.
#[derive(Debug)]
pub(crate) struct ServiceTask {
    pub id: u64,
    pub request: Arc<ServiceRequest>,
    pub results: ResultSender,
    pub state: TaskState,
}

/// Everything a worker needs to run an admitted task.
#[derive(Debug)]
pub(crate) struct RunningTask {
    pub id: u64,
    pub request: Arc<ServiceRequest>,
    pub target: ServiceTarget,
    pub results: ResultSender,
}

impl RunningTask {
    /// Deliver a result; a vanished receiver only means nobody listens anymore.
    pub async fn send(&self, result: TaskResult) {
        if self.results.send(result).await.is_err() {
            log::debug!("task {} result dropped, receiver is gone", self.id);
        }
    }
}
