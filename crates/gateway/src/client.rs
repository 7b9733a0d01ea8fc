//! The upstream side of a task: building, authenticating and sending the
//! provider request.

use std::time::Duration;

use bytes::Bytes;
use config::UpstreamConfig;
use convert::Content;
use flavor::FlavorService;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use registry::Provider;
use serde_json::Value;
use telemetry::{EventBus, EventKind};
use url::Url;

use crate::{GatewayError, auth::Authenticator};

pub(crate) type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// A request about to be sent to a provider.
#[derive(Debug, Clone)]
pub(crate) struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Address `provider` with converted content.
    ///
    /// For `GET` the JSON object body is merged into the query string and the
    /// body is cleared. Provider extra headers overwrite content headers.
    pub fn for_provider(provider: &Provider, content: Content) -> Result<Self, GatewayError> {
        let misconfigured = |message: String| GatewayError::ProviderConfig {
            provider: provider.name.clone(),
            message,
        };

        let method = Method::from_bytes(provider.method.to_uppercase().as_bytes())
            .map_err(|_| misconfigured(format!("invalid method '{}'", provider.method)))?;

        let mut url = Url::parse(&provider.url).map_err(|error| misconfigured(format!("invalid url: {error}")))?;

        let mut body = content.body;

        if method == Method::GET {
            merge_query(&mut url, &body)?;
            body = Bytes::new();
        }

        let mut headers = header_rules::forwardable(&content.headers);

        for (name, value) in &provider.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| misconfigured(format!("invalid extra header name '{name}'")))?;

            let value =
                HeaderValue::from_str(value).map_err(|_| misconfigured(format!("invalid value for extra header '{name}'")))?;

            headers.insert(name, value);
        }

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }
}

fn merge_query(url: &mut Url, body: &[u8]) -> Result<(), GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    let params = match serde_json::from_slice(body) {
        Ok(Value::Object(params)) => params,
        Ok(_) => return Err(GatewayError::InvalidRequest("GET parameters must be a JSON object".to_string())),
        Err(error) => return Err(GatewayError::InvalidRequest(format!("GET parameters are not valid JSON: {error}"))),
    };

    if params.is_empty() {
        return Ok(());
    }

    let mut pairs = url.query_pairs_mut();

    for (name, value) in &params {
        match value {
            Value::Array(values) => {
                for value in values {
                    pairs.append_pair(name, &query_value(value));
                }
            }
            value => {
                pairs.append_pair(name, &query_value(value));
            }
        }
    }

    Ok(())
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) enum UpstreamBody {
    Full(Bytes),
    Streaming(ByteStream),
}

impl UpstreamBody {
    pub async fn bytes(self) -> Result<Bytes, reqwest::Error> {
        match self {
            UpstreamBody::Full(bytes) => Ok(bytes),
            UpstreamBody::Streaming(stream) => {
                let parts: Vec<Bytes> = stream.try_collect().await?;
                Ok(Bytes::from(parts.concat()))
            }
        }
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            UpstreamBody::Full(bytes) => futures::stream::once(async move { Ok(bytes) }).boxed(),
            UpstreamBody::Streaming(stream) => stream,
        }
    }
}

/// A successful provider response, its body not read yet.
pub(crate) struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

/// Pooled HTTP client shared by every task.
#[derive(Clone)]
pub(crate) struct UpstreamClient {
    http: reqwest::Client,
    events: EventBus,
    pub(crate) poll_interval: Duration,
    pub(crate) max_poll_attempts: u32,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, events: EventBus) -> Result<Self, GatewayError> {
        // bodies are streamed to the client as they arrive, never decompressed
        let http = reqwest::Client::builder()
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .no_gzip()
            .build()?;

        Ok(Self {
            http,
            events,
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
        })
    }

    /// Send converted content to `provider`.
    ///
    /// Non-2xx answers become [`GatewayError::UpstreamStatus`]. Multi-segment
    /// services are polled until their remote task settles.
    pub async fn invoke(
        &self,
        task_id: u64,
        provider: &Provider,
        service: &FlavorService,
        content: Content,
    ) -> Result<UpstreamResponse, GatewayError> {
        let authenticator = Authenticator::for_provider(provider)?;
        let mut request = UpstreamRequest::for_provider(provider, content)?;

        self.events.notify_http_request(
            EventKind::InvokeServiceProvider,
            &request.method,
            request.url.as_str(),
            &request.headers,
            &request.body,
        );

        authenticator.authenticate(&mut request)?;

        log::debug!("task {task_id} sending {} {}", request.method, request.url);

        let response = self.send(request).await?;

        if service.is_multi_segment() {
            let extra_url = &service.definition().extra_url;
            return self.poll_segments(task_id, &authenticator, extra_url, response).await;
        }

        Ok(response)
    }

    pub(crate) async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, GatewayError> {
        let response = self
            .http
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let body = response.bytes().await?;
            log::warn!("service provider returned {status}: {}", String::from_utf8_lossy(&body));

            return Err(GatewayError::UpstreamStatus { status, headers, body });
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Streaming(response.bytes_stream().boxed()),
        })
    }
}

#[cfg(test)]
mod tests {
    use registry::ServiceSource;

    use super::*;

    fn provider(method: &str, url: &str) -> Provider {
        let mut provider = Provider::new("local_ollama_models", "models", ServiceSource::Local, "ollama", url);
        provider.method = method.to_string();
        provider
    }

    #[test]
    fn get_merges_body_into_query() {
        let provider = provider("get", "http://127.0.0.1:11434/api/tags?verbose=1");
        let content = Content::new(r#"{"name":"qwen2","tag":["a","b"],"limit":3}"#, HeaderMap::new());

        let request = UpstreamRequest::for_provider(&provider, content).unwrap();

        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_empty());
        insta::assert_snapshot!(request.url, @"http://127.0.0.1:11434/api/tags?verbose=1&name=qwen2&tag=a&tag=b&limit=3");
    }

    #[test]
    fn empty_get_body_leaves_url_alone() {
        let provider = provider("GET", "http://127.0.0.1:11434/api/tags");
        let request = UpstreamRequest::for_provider(&provider, Content::new("{}", HeaderMap::new())).unwrap();

        insta::assert_snapshot!(request.url, @"http://127.0.0.1:11434/api/tags");
    }

    #[test]
    fn extra_headers_overwrite_and_denied_headers_are_dropped() {
        let mut provider = provider("POST", "http://127.0.0.1:11434/api/chat");
        provider.extra_headers.insert("x-route".to_string(), "provider".to_string());

        let mut headers = HeaderMap::new();
        headers.insert("x-route", HeaderValue::from_static("client"));
        headers.insert("content-length", HeaderValue::from_static("2"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let request = UpstreamRequest::for_provider(&provider, Content::new("{}", headers)).unwrap();

        assert_eq!(request.headers["x-route"], "provider");
        assert!(request.headers.get("content-length").is_none());
        assert_eq!(request.body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn bad_method() {
        let provider = provider("FETCH ME", "http://127.0.0.1:11434/api/chat");
        let error = UpstreamRequest::for_provider(&provider, Content::default()).unwrap_err();

        insta::assert_snapshot!(error, @"provider 'local_ollama_models' is misconfigured: invalid method 'FETCH ME'");
    }
}
