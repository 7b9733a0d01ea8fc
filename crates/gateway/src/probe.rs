//! Reachability checks run before imported providers are committed.

use convert::{Content, ConvertContext};
use flavor::{CANONICAL_FLAVOR, Stage};
use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};
use registry::{Provider, ServiceSource};
use serde_json::{Value, json};

use crate::{
    Gateway, GatewayError,
    auth::Authenticator,
    client::UpstreamRequest,
};

const CHAT: &str = "chat";

impl Gateway {
    /// Send a one-message chat to a remote chat provider and expect a 2xx.
    ///
    /// Other providers are not probed here; local engines are checked by
    /// whoever manages them.
    pub async fn check_provider(&self, provider: &Provider, model: Option<&str>) -> Result<(), GatewayError> {
        if provider.source != ServiceSource::Remote || provider.service_name != CHAT {
            return Ok(());
        }

        let model = model
            .map(str::to_string)
            .or_else(|| self.registry().get_default_model(&provider.flavor, CHAT))
            .unwrap_or_default();

        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": "hello"}],
            "stream": false,
        });

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut ctx = ConvertContext::new().with("stream", Value::Bool(false));

        if !model.is_empty() {
            ctx.insert("model", Value::String(model.clone()));
        }

        let content = self.flavors().convert(
            CANONICAL_FLAVOR,
            &provider.flavor,
            CHAT,
            Stage::Request,
            Content::new(body.to_string(), headers),
            &ctx,
            |_| {},
        )?;

        let authenticator = Authenticator::for_provider(provider)?;
        let mut request = UpstreamRequest::for_provider(provider, content)?;
        authenticator.authenticate(&mut request)?;

        let response = self.inner.client.send(request).await?;
        response.body.bytes().await?;

        log::debug!("provider {} answered the health probe with {}", provider.name, response.status);

        Ok(())
    }
}
