//! Task admission.
//!
//! One serializer task owns the waiting queue and the running set; everyone
//! else talks to it through a bounded event channel. Workers run admitted
//! tasks in parallel and report back with `Done` or `Failed`. The last
//! finished tasks stay queryable through [`Scheduler::state`].

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use config::SchedulerConfig;
use tokio::sync::{mpsc, oneshot};

use crate::{
    GatewayError, ServiceRequest, TaskResult,
    dispatch::Dispatcher,
    runner::TaskRunner,
    task::{RunningTask, ServiceTask, TaskState},
};

type Admission = (u64, mpsc::Receiver<TaskResult>);

/// Finished tasks whose final state is kept for [`Scheduler::state`].
const FINISHED_HISTORY: usize = 256;

enum SchedulerEvent {
    Enqueue {
        request: Arc<ServiceRequest>,
        reply: oneshot::Sender<Admission>,
    },
    Done(u64),
    Failed(u64, GatewayError),
    State {
        id: u64,
        reply: oneshot::Sender<Option<TaskState>>,
    },
}

/// Handle to the scheduler. Clones share one serializer, which stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct Scheduler {
    events: mpsc::Sender<SchedulerEvent>,
}

impl Scheduler {
    /// Spawn the serializer on the current tokio runtime.
    pub(crate) fn start(config: &SchedulerConfig, dispatcher: Dispatcher, runner: TaskRunner) -> Self {
        let (sender, receiver) = mpsc::channel(config.event_capacity);

        let serializer = Serializer {
            next_id: 1,
            result_capacity: config.result_capacity,
            waiting: VecDeque::new(),
            running: BTreeMap::new(),
            finished: VecDeque::new(),
            dispatcher,
            runner,
            events: sender.downgrade(),
        };

        tokio::spawn(serializer.run(receiver));

        Self { events: sender }
    }

    /// Queue a request. Returns the task id and the channel its results
    /// arrive on; the channel closes after the terminal result.
    pub async fn enqueue(&self, request: ServiceRequest) -> Result<Admission, GatewayError> {
        let (reply, admission) = oneshot::channel();

        let event = SchedulerEvent::Enqueue {
            request: Arc::new(request),
            reply,
        };

        self.events.send(event).await.map_err(|_| GatewayError::SchedulerClosed)?;

        admission.await.map_err(|_| GatewayError::SchedulerClosed)
    }

    /// Current state of a waiting or running task, or the final state of a
    /// recently finished one. `None` once the task fell out of the history.
    pub async fn state(&self, id: u64) -> Result<Option<TaskState>, GatewayError> {
        let (reply, state) = oneshot::channel();

        self.events
            .send(SchedulerEvent::State { id, reply })
            .await
            .map_err(|_| GatewayError::SchedulerClosed)?;

        state.await.map_err(|_| GatewayError::SchedulerClosed)
    }
}

struct Serializer {
    next_id: u64,
    result_capacity: usize,
    waiting: VecDeque<ServiceTask>,
    running: BTreeMap<u64, ServiceTask>,
    finished: VecDeque<(u64, TaskState)>,
    dispatcher: Dispatcher,
    runner: TaskRunner,
    events: mpsc::WeakSender<SchedulerEvent>,
}

impl Serializer {
    async fn run(mut self, mut receiver: mpsc::Receiver<SchedulerEvent>) {
        while let Some(event) = receiver.recv().await {
            match event {
                SchedulerEvent::Enqueue { request, reply } => self.enqueue(request, reply),
                SchedulerEvent::Done(id) => self.finish(id),
                SchedulerEvent::Failed(id, error) => self.fail(id, error),
                SchedulerEvent::State { id, reply } => {
                    let _ = reply.send(self.state(id));
                }
            }

            self.admit();
        }

        log::debug!("scheduler stopped with {} tasks running", self.running.len());
    }

    fn enqueue(&mut self, request: Arc<ServiceRequest>, reply: oneshot::Sender<Admission>) {
        let id = self.next_id;
        self.next_id += 1;

        let (results, receiver) = mpsc::channel(self.result_capacity);

        if reply.send((id, receiver)).is_err() {
            log::debug!("task {id} abandoned before it was queued");
            return;
        }

        log::debug!("task {id} enqueued for service {}", request.service);

        self.waiting.push_back(ServiceTask {
            id,
            request,
            results,
            state: TaskState::waiting(),
        });
    }

    /// Walk the waiting queue front to back and start everything that dispatches.
    fn admit(&mut self) {
        while let Some(mut task) = self.waiting.pop_front() {
            let target = match self.dispatcher.dispatch(&task.request) {
                Ok(target) => target,
                Err(error) => {
                    log::warn!("task {} could not be dispatched: {error}", task.id);
                    self.retire(task.id, task.state.fail());
                    deliver_failure(task, error);
                    continue;
                }
            };

            log::debug!(
                "task {} running on {} after waiting {:#}",
                task.id,
                target.provider.name,
                task.state.elapsed()
            );

            task.state = task.state.start();

            let running = RunningTask {
                id: task.id,
                request: task.request.clone(),
                target,
                results: task.results.clone(),
            };

            let runner = self.runner.clone();
            let events = self.events.clone();

            tokio::spawn(async move {
                let id = running.id;

                // the worker's sender is gone once `run` returns
                let event = match runner.run(running).await {
                    Ok(()) => SchedulerEvent::Done(id),
                    Err(error) => SchedulerEvent::Failed(id, error),
                };

                if let Some(events) = events.upgrade() {
                    let _ = events.send(event).await;
                }
            });

            self.running.insert(task.id, task);
        }
    }

    fn finish(&mut self, id: u64) {
        if let Some(task) = self.running.remove(&id) {
            let state = task.state.done();
            log::debug!("task {id} done in {:#}", state.elapsed());
            self.retire(id, state);
        }
    }

    fn fail(&mut self, id: u64, error: GatewayError) {
        match self.running.remove(&id) {
            Some(task) => {
                let state = task.state.fail();
                log::debug!("task {id} failed after {:#}: {error}", state.elapsed());
                self.retire(id, state);
                deliver_failure(task, error);
            }
            None => log::debug!("failure reported for unknown task {id}: {error}"),
        }
    }

    fn retire(&mut self, id: u64, state: TaskState) {
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }

        self.finished.push_back((id, state));
    }

    fn state(&self, id: u64) -> Option<TaskState> {
        if let Some(task) = self.running.get(&id) {
            return Some(task.state);
        }

        if let Some(task) = self.waiting.iter().find(|task| task.id == id) {
            return Some(task.state);
        }

        self.finished
            .iter()
            .rev()
            .find(|(finished, _)| *finished == id)
            .map(|(_, state)| *state)
    }
}

/// Send the terminal failure and release the task, closing its channel once
/// the failure is delivered. Never blocks the serializer.
fn deliver_failure(task: ServiceTask, error: GatewayError) {
    match task.results.try_send(TaskResult::Failed(error)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(result)) => {
            let results = task.results;

            tokio::spawn(async move {
                let _ = results.send(result).await;
            });
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("task {} failed with nobody listening", task.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{Json, Router, routing::post};
    use bytes::Bytes;
    use config::UpstreamConfig;
    use flavor::FlavorRegistry;
    use http::{HeaderMap, HeaderValue, Method, Uri};
    use registry::{HybridPolicy, MemoryStore, ModelStatus, Provider, Registry, ServiceSource};
    use serde_json::{Value, json};
    use telemetry::EventBus;
    use tokio::net::TcpListener;

    use super::*;
    use crate::{client::UpstreamClient, load::FixedLoad};

    async fn ollama() -> String {
        let app = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"model": body["model"], "message": {"role": "assistant", "content": "hello"}, "done": true}))
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        format!("http://{address}/api/chat")
    }

    fn scheduler(upstream: Option<&str>) -> Scheduler {
        let flavors = Arc::new(FlavorRegistry::builtin().unwrap());
        let registry = Registry::new(Arc::new(MemoryStore::default()), flavors.clone());
        registry.seed_default_services().unwrap();

        if let Some(url) = upstream {
            let provider = Provider::new("local_ollama_chat", "chat", ServiceSource::Local, "ollama", url);
            registry.create_provider(provider).unwrap();
            registry.put_model("local_ollama_chat", "qwen2:7b", ModelStatus::Downloaded).unwrap();

            let mut chat = registry.get_service("chat").unwrap();
            chat.set_provider(ServiceSource::Local, "local_ollama_chat");
            registry.update_service(chat).unwrap();
        }

        let events = EventBus::new();
        let dispatcher = Dispatcher::new(registry, Arc::new(FixedLoad::default()), 80.0, events.clone());
        let client = UpstreamClient::new(&UpstreamConfig::default(), events.clone()).unwrap();
        let runner = TaskRunner::new(flavors, client, events);

        Scheduler::start(&SchedulerConfig::default(), dispatcher, runner)
    }

    fn request(body: &'static str) -> ServiceRequest {
        // same flavor on both sides, so the client's headers reach the upstream as sent
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        ServiceRequest::parse(
            "ollama",
            "chat",
            Method::POST,
            Uri::from_static("/api/chat"),
            headers,
            Bytes::from_static(body.as_bytes()),
            HybridPolicy::Default,
        )
        .unwrap()
    }

    /// Waits for the serializer to record the end of the task.
    async fn final_state(scheduler: &Scheduler, id: u64) -> TaskState {
        for _ in 0..100 {
            match scheduler.state(id).await.unwrap() {
                Some(state) if state.is_terminal() => return state,
                _ => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }

        unreachable!("task {id} never finished");
    }

    #[tokio::test]
    async fn dispatch_failure_is_terminal() {
        let scheduler = scheduler(None);
        let (id, mut results) = scheduler.enqueue(request("{}")).await.unwrap();

        let Some(TaskResult::Failed(error)) = results.recv().await else {
            unreachable!("expected a failure");
        };

        insta::assert_snapshot!(error, @"service 'chat' has neither a local nor a remote provider");
        assert!(results.recv().await.is_none());

        let state = final_state(&scheduler, id).await;

        let TaskState::Failed {
            enqueued_at,
            started_at,
            completed_at,
        } = state
        else {
            unreachable!("expected a failed task, got {state:?}");
        };

        assert_eq!(started_at, None);
        assert!(completed_at >= enqueued_at);
    }

    #[tokio::test]
    async fn unknown_task_has_no_state() {
        let scheduler = scheduler(None);

        assert_eq!(scheduler.state(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ids_increase() {
        let scheduler = scheduler(None);

        let mut ids = Vec::new();

        for _ in 0..3 {
            let (id, _) = scheduler.enqueue(request("{}")).await.unwrap();
            ids.push(id);
        }

        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn one_done_then_closed() {
        let upstream = ollama().await;
        let scheduler = scheduler(Some(upstream.as_str()));

        let (id, mut results) = scheduler
            .enqueue(request(r#"{"model":"qwen2:7b","messages":[],"stream":false}"#))
            .await
            .unwrap();

        let Some(TaskResult::Done(reply)) = results.recv().await else {
            unreachable!("expected the whole response");
        };

        assert_eq!(reply.status, http::StatusCode::OK);

        let body: Value = serde_json::from_slice(&reply.content.body).unwrap();
        insta::assert_json_snapshot!(body, @r#"
        {
          "model": "qwen2:7b",
          "message": {
            "role": "assistant",
            "content": "hello"
          },
          "done": true
        }
        "#);

        assert!(results.recv().await.is_none());

        let state = final_state(&scheduler, id).await;

        let TaskState::Done {
            enqueued_at,
            started_at,
            completed_at,
        } = state
        else {
            unreachable!("expected a finished task, got {state:?}");
        };

        assert!(enqueued_at <= started_at);
        assert!(started_at <= completed_at);
    }
}
