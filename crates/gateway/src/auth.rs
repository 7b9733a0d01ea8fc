//! Provider authentication, applied to each upstream request right before it is sent.

use hmac::{Hmac, Mac};
use http::{HeaderName, HeaderValue, header::AUTHORIZATION, header::CONTENT_TYPE};
use jiff::Timestamp;
use registry::{AuthType, Provider};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{GatewayError, client::UpstreamRequest};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "TC3-HMAC-SHA256";
const FLAVOR_TENCENT: &str = "tencent";

#[derive(Deserialize)]
struct ApiKeyMaterial {
    api_key: String,
}

#[derive(Deserialize)]
struct SignMaterial {
    secret_id: String,
    secret_key: String,
}

/// Credentials parsed once from a provider record.
pub(crate) enum Authenticator {
    None,
    ApiKey(SecretString),
    Tencent(TencentSigner),
}

impl Authenticator {
    pub fn for_provider(provider: &Provider) -> Result<Self, GatewayError> {
        match provider.auth_type {
            AuthType::None => Ok(Authenticator::None),
            AuthType::ApiKey => {
                let material: ApiKeyMaterial = parse_material(provider)?;
                Ok(Authenticator::ApiKey(SecretString::from(material.api_key)))
            }
            AuthType::Token if provider.flavor == FLAVOR_TENCENT => {
                let material: SignMaterial = parse_material(provider)?;
                let param = |name: &str| provider.extra_headers.get(name).cloned().unwrap_or_default();

                Ok(Authenticator::Tencent(TencentSigner {
                    secret_id: material.secret_id,
                    secret_key: SecretString::from(material.secret_key),
                    version: param("version"),
                    action: param("action"),
                    region: param("region"),
                }))
            }
            AuthType::Token => Err(GatewayError::Authentication(format!(
                "token authentication is not available for flavor '{}'",
                provider.flavor
            ))),
        }
    }

    pub fn authenticate(&self, request: &mut UpstreamRequest) -> Result<(), GatewayError> {
        match self {
            Authenticator::None => Ok(()),
            Authenticator::ApiKey(key) => {
                let mut value = header_value(&format!("Bearer {}", key.expose_secret()))?;
                value.set_sensitive(true);

                request.headers.insert(AUTHORIZATION, value);
                Ok(())
            }
            Authenticator::Tencent(signer) => signer.sign(request, Timestamp::now().as_second()),
        }
    }
}

fn parse_material<T: for<'de> Deserialize<'de>>(provider: &Provider) -> Result<T, GatewayError> {
    // only the position is reported, serde messages may quote the secret
    serde_json::from_str(&provider.auth_key).map_err(|error| {
        GatewayError::Authentication(format!(
            "auth key of provider '{}' is not valid {} material (line {}, column {})",
            provider.name,
            provider.auth_type,
            error.line(),
            error.column()
        ))
    })
}

/// Tencent Cloud API v3 request signing.
pub(crate) struct TencentSigner {
    secret_id: String,
    secret_key: SecretString,
    version: String,
    action: String,
    region: String,
}

impl TencentSigner {
    /// Sign `request` as of `timestamp` (unix seconds).
    ///
    /// Only `content-type` (when present) and `host` are signed. The service
    /// name is the first DNS label of the host.
    pub fn sign(&self, request: &mut UpstreamRequest, timestamp: i64) -> Result<(), GatewayError> {
        let host = match (request.url.host_str(), request.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(GatewayError::Authentication(format!(
                    "cannot sign a request without host: {}",
                    request.url
                )));
            }
        };

        let service = host.split('.').next().unwrap_or_default();

        let mut canonical_headers = String::new();
        let mut signed_headers = String::new();

        if let Some(content_type) = request.headers.get(CONTENT_TYPE) {
            let value = content_type.to_str().unwrap_or_default().trim().to_lowercase();

            canonical_headers.push_str(&format!("content-type:{value}\n"));
            signed_headers.push_str("content-type;");
        }

        canonical_headers.push_str(&format!("host:{host}\n"));
        signed_headers.push_str("host");

        let canonical_request = format!(
            "{}\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
            request.method,
            sha256_hex(&request.body)
        );

        let date = Timestamp::from_second(timestamp)
            .map_err(|error| GatewayError::Authentication(format!("invalid signing timestamp: {error}")))?
            .strftime("%Y-%m-%d")
            .to_string();

        let scope = format!("{date}/{service}/tc3_request");
        let string_to_sign = format!(
            "{ALGORITHM}\n{timestamp}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let secret = format!("TC3{}", self.secret_key.expose_secret());
        let date_key = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
        let service_key = hmac_sha256(&date_key, service.as_bytes())?;
        let signing_key = hmac_sha256(&service_key, b"tc3_request")?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.secret_id
        );

        let mut authorization = header_value(&authorization)?;
        authorization.set_sensitive(true);

        let headers = &mut request.headers;
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(HeaderName::from_static("x-tc-timestamp"), HeaderValue::from(timestamp));
        headers.insert(HeaderName::from_static("x-tc-version"), header_value(&self.version)?);
        headers.insert(HeaderName::from_static("x-tc-region"), header_value(&self.region)?);
        headers.insert(HeaderName::from_static("x-tc-action"), header_value(&self.action)?);

        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|error| GatewayError::Authentication(format!("invalid signing key: {error}")))?;

    mac.update(data);

    Ok(mac.finalize().into_bytes().to_vec())
}

fn header_value(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|_| GatewayError::Authentication("credential is not a valid header value".to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use registry::ServiceSource;

    use super::*;

    fn tencent_provider() -> Provider {
        let mut provider = Provider::new(
            "remote_tencent_chat",
            "chat",
            ServiceSource::Remote,
            "tencent",
            "https://hunyuan.tencentcloudapi.com",
        );

        provider.auth_type = AuthType::Token;
        provider.auth_key =
            r#"{"secret_id":"AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE","secret_key":"Gu5t9xGARNpq86cd98joQYCN3EXAMPLE"}"#
                .to_string();

        for (name, value) in [("version", "2023-09-01"), ("action", "ChatCompletions"), ("region", "ap-guangzhou")] {
            provider.extra_headers.insert(name.to_string(), value.to_string());
        }

        provider
    }

    fn request(method: Method, url: &str, content_type: Option<&'static str>, body: &'static str) -> UpstreamRequest {
        let mut headers = HeaderMap::new();

        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        UpstreamRequest {
            method,
            url: url.parse().unwrap(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn signer() -> TencentSigner {
        match Authenticator::for_provider(&tencent_provider()).unwrap() {
            Authenticator::Tencent(signer) => signer,
            _ => unreachable!(),
        }
    }

    #[test]
    fn tencent_signature_is_reproducible() {
        let mut request = request(
            Method::POST,
            "https://hunyuan.tencentcloudapi.com",
            Some("application/json"),
            r#"{"Model":"hunyuan-lite","Messages":[{"Role":"user","Content":"hi"}]}"#,
        );

        signer().sign(&mut request, 1551113065).unwrap();

        let mut headers: Vec<_> = request
            .headers
            .iter()
            .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap()))
            .collect();

        headers.sort();

        insta::assert_debug_snapshot!(headers, @r#"
        [
            "authorization: TC3-HMAC-SHA256 Credential=AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE/2019-02-25/hunyuan/tc3_request, SignedHeaders=content-type;host, Signature=026eb3152206b0da81c013da776f7edc1eebc05a22137e0792ede7f0cef88fa2",
            "content-type: application/json",
            "x-tc-action: ChatCompletions",
            "x-tc-region: ap-guangzhou",
            "x-tc-timestamp: 1551113065",
            "x-tc-version: 2023-09-01",
        ]
        "#);
    }

    #[test]
    fn poll_without_content_type_signs_host_only() {
        let mut request = request(Method::GET, "https://hunyuan.tencentcloudapi.com/images/tasks/abc", None, "");

        signer().sign(&mut request, 1551113065).unwrap();

        insta::assert_snapshot!(request.headers[AUTHORIZATION].to_str().unwrap(), @"TC3-HMAC-SHA256 Credential=AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE/2019-02-25/hunyuan/tc3_request, SignedHeaders=host, Signature=803ca4fd5deaa801c9a18d78c1fec3af666fe005d05febf0d189d7932368e8c0");
    }

    #[test]
    fn api_key_becomes_bearer() {
        let mut provider = tencent_provider();
        provider.flavor = "deepseek".to_string();
        provider.auth_type = AuthType::ApiKey;
        provider.auth_key = r#"{"api_key":"sk-test"}"#.to_string();

        let mut request = request(Method::POST, "https://api.deepseek.com/chat/completions", None, "{}");

        Authenticator::for_provider(&provider)
            .unwrap()
            .authenticate(&mut request)
            .unwrap();

        assert_eq!(request.headers[AUTHORIZATION], "Bearer sk-test");
        assert!(request.headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn malformed_material() {
        let mut provider = tencent_provider();
        provider.auth_type = AuthType::ApiKey;
        provider.auth_key = "sk-plain".to_string();

        let error = Authenticator::for_provider(&provider).err().unwrap();

        insta::assert_snapshot!(error, @"authentication failed: auth key of provider 'remote_tencent_chat' is not valid apikey material (line 1, column 1)");
    }

    #[test]
    fn token_needs_a_signing_flavor() {
        let mut provider = tencent_provider();
        provider.flavor = "openai".to_string();

        let error = Authenticator::for_provider(&provider).err().unwrap();

        insta::assert_snapshot!(error, @"authentication failed: token authentication is not available for flavor 'openai'");
    }
}
