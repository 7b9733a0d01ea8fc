use std::fmt;

use http::Method;

/// One `METHOD /path` entry of a flavor service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    /// Parse `"POST /api/chat"`. A path without a leading slash gets one.
    pub fn parse(value: &str) -> Option<Self> {
        let (method, path) = value.trim().split_once(' ')?;
        let path = path.trim();

        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) || path.is_empty() || path.contains(' ') {
            return None;
        }

        let method = Method::from_bytes(method.as_bytes()).ok()?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Some(Self { method, path })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn parses_method_and_path() {
        let endpoint = Endpoint::parse(" GET  /api/tags").unwrap();

        assert_eq!(endpoint.method, http::Method::GET);
        assert_eq!(endpoint.path, "/api/tags");
    }

    #[test]
    fn adds_missing_slash() {
        assert_eq!(Endpoint::parse("POST chat").unwrap().to_string(), "POST /chat");
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(Endpoint::parse("/api/chat"), None);
        assert_eq!(Endpoint::parse("post /api/chat"), None);
        assert_eq!(Endpoint::parse("POST"), None);
    }
}
