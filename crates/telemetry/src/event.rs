use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StartApp,
    StartSession,
    EndSession,
    ReceiveServiceRequest,
    RequestConvertedToCanonical,
    InvokeServiceProvider,
    ServiceProviderResponse,
    ResponseConvertedToCanonical,
    SendBackResponse,
    Warning,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StartApp => "start_app",
            EventKind::StartSession => "start_session",
            EventKind::EndSession => "end_session",
            EventKind::ReceiveServiceRequest => "receive_service_request",
            EventKind::RequestConvertedToCanonical => "request_converted_to_canonical",
            EventKind::InvokeServiceProvider => "invoke_service_provider",
            EventKind::ServiceProviderResponse => "service_provider_response",
            EventKind::ResponseConvertedToCanonical => "response_converted_to_canonical",
            EventKind::SendBackResponse => "send_back_response",
            EventKind::Warning => "warning",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub data: EventData,
}

#[derive(Debug, Clone)]
pub enum EventData {
    None,
    Message(String),
    HttpRequest(HttpRequestEvent),
    HttpResponse(HttpResponseEvent),
}

#[derive(Debug, Clone)]
pub struct HttpRequestEvent {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct HttpResponseEvent {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl fmt::Display for HttpRequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6}    {}", self.method.as_str(), self.url)?;
        write_headers(f, &self.headers)?;
        write_body(f, &self.body)
    }
}

impl fmt::Display for HttpResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status Code: {}", self.status.as_u16())?;
        write_headers(f, &self.headers)?;
        write_body(f, &self.body)
    }
}

fn write_headers(f: &mut fmt::Formatter<'_>, headers: &HeaderMap) -> fmt::Result {
    let mut names: Vec<_> = headers.keys().filter(|name| *name != http::header::DATE).collect();
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    for name in names {
        let values: Vec<_> = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();

        writeln!(f, "{:<20}: {}", name.as_str(), values.join(", "))?;
    }

    Ok(())
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &Bytes) -> fmt::Result {
    if body.is_empty() {
        return Ok(());
    }

    match std::str::from_utf8(body) {
        Ok(text) => write!(f, "\n{text}"),
        Err(_) => write!(f, "\n<{} bytes of binary data>", body.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_dump() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer sk".parse().unwrap());
        headers.insert("date", "Mon, 01 Jan 2025 00:00:00 GMT".parse().unwrap());

        let event = HttpRequestEvent {
            method: Method::POST,
            url: "http://127.0.0.1:11434/api/chat".to_string(),
            headers,
            body: Bytes::from_static(br#"{"model":"qwen2"}"#),
        };

        insta::assert_snapshot!(event, @r#"
        POST      http://127.0.0.1:11434/api/chat
        authorization       : Bearer sk
        content-type        : application/json

        {"model":"qwen2"}
        "#);
    }

    #[test]
    fn binary_bodies_are_summarized() {
        let event = HttpResponseEvent {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(&[0xff, 0xfe, 0x00]),
        };

        insta::assert_snapshot!(event, @r"
        Status Code: 200

        <3 bytes of binary data>
        ");
    }
}
