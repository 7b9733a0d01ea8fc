//! Mock upstream providers, each an axum app on an ephemeral port.

pub mod deepseek;
pub mod ollama;
pub mod tencent;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::Router;
use tokio::net::TcpListener;

pub use deepseek::DeepSeekMock;
pub use ollama::OllamaMock;
pub use tencent::TencentMock;

/// Requests seen by a mock, one `METHOD path` line each.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A running mock upstream.
pub struct MockUpstream {
    pub address: SocketAddr,
    pub calls: Calls,
}

impl MockUpstream {
    async fn spawn(app: Router, calls: Calls) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { address, calls }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }
}
