pub mod upstreams;

use std::{net::SocketAddr, time::Duration};

use config::Config;
use serde_json::Value;
use server::ServeConfig;
use telemetry::{EventBus, EventKind, RecordingListener};
use tokio::{net::TcpListener, time::timeout};
use tokio_util::sync::CancellationToken;

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap()
    }

    /// Send a POST request to the given path with JSON body
    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Send a PUT request to the given path with JSON body
    pub async fn put(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Send a DELETE request to the given path with JSON body
    pub async fn delete(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    /// Call an admin endpoint under `/aog/v0.2`, returning the HTTP status
    /// and the response body. A null `body` sends no body at all.
    pub async fn admin(&self, method: reqwest::Method, path: &str, body: &Value) -> (u16, Value) {
        let mut request = self.client.request(method, format!("{}/aog/v0.2{path}", self.base_url));

        if !body.is_null() {
            request = request.json(body);
        }

        let response = request.send().await.unwrap();

        let status = response.status().as_u16();
        let body = response.json().await.unwrap();

        (status, body)
    }
}

pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    pub events: RecordingListener,
    shutdown: CancellationToken,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration. The registry
    /// always lives in memory.
    pub async fn start(config_toml: &str) -> Self {
        let mut config: Config = toml::from_str(config_toml).unwrap();
        config.store.kind = config::StoreKind::Memory;

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let events = RecordingListener::default();
        let shutdown = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            events: EventBus::new().with_listener(events.clone()),
            shutdown: shutdown.clone(),
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Ok(Err(e)) = rx.try_recv() {
            eprintln!("Server failed to start: {e}");
            std::process::exit(1);
        }

        let client = TestClient::new(format!("http://{address}"));

        // Verify the server is actually running by making a simple request
        let mut retries = 10;
        while retries > 0 {
            if timeout(Duration::from_millis(100), client.get("/")).await.is_ok() {
                break;
            }
            retries -= 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client,
            address,
            events,
            shutdown,
            _handle: handle,
        }
    }

    /// Install a provider through `POST /service/install`, asserting success.
    pub async fn install(&self, provider: Value) {
        let (status, body) = self
            .client
            .admin(reqwest::Method::POST, "/service/install", &provider)
            .await;

        assert_eq!(status, 200, "{body}");
        assert_eq!(body["business_code"], 10000, "{body}");
    }

    /// Set the hybrid policy of a service.
    pub async fn set_policy(&self, service: &str, policy: &str) {
        let (status, body) = self
            .client
            .admin(
                reqwest::Method::PUT,
                "/service",
                &serde_json::json!({"service_name": service, "hybrid_policy": policy}),
            )
            .await;

        assert_eq!(status, 200, "{body}");
    }

    /// Wait until `model` of `provider` reports `downloaded`.
    pub async fn wait_downloaded(&self, provider: &str, model: &str) {
        let mut downloaded = false;

        for _ in 0..100 {
            let (_, body) = self
                .client
                .admin(
                    reqwest::Method::GET,
                    &format!("/model?provider_name={provider}"),
                    &Value::Null,
                )
                .await;

            downloaded = body["data"]
                .as_array()
                .into_iter()
                .flatten()
                .any(|entry| entry["model_name"] == model && entry["status"] == "downloaded");

            if downloaded {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(downloaded, "model {model} of {provider} never finished downloading");
    }

    /// Wait until the server published an event of `kind`, returning how many
    /// it published.
    pub async fn wait_event(&self, kind: EventKind) -> usize {
        for _ in 0..100 {
            let count = self.events.kinds().into_iter().filter(|seen| *seen == kind).count();

            if count > 0 {
                return count;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        0
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
