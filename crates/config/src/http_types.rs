//! Header names and values as they appear in flavor definitions, checked when parsed.

use std::{cmp::Ordering, fmt};

use http::header::{HeaderName as HttpHeaderName, HeaderValue as HttpHeaderValue};
use serde::{Deserialize, Deserializer, de::Error};

/// A header name, lowercased when parsed. Ordered by that form, so edits on
/// `Content-Type` and `content-type` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderName(HttpHeaderName);

impl Ord for HeaderName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_str().cmp(other.0.as_str())
    }
}

impl PartialOrd for HeaderName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl AsRef<HttpHeaderName> for HeaderName {
    fn as_ref(&self) -> &HttpHeaderName {
        &self.0
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for HeaderName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;

        HttpHeaderName::try_from(name.as_str())
            .map(Self)
            .map_err(|_| D::Error::custom(format!("'{name}' is not a valid header name")))
    }
}

/// A header value without control characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderValue(HttpHeaderValue);

impl AsRef<HttpHeaderValue> for HeaderValue {
    fn as_ref(&self) -> &HttpHeaderValue {
        &self.0
    }
}

impl<'de> Deserialize<'de> for HeaderValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        HttpHeaderValue::try_from(value.as_str())
            .map(Self)
            .map_err(|_| D::Error::custom(format!("header value {value:?} contains forbidden characters")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;

    use super::*;

    #[test]
    fn names_are_normalized_and_ordered() {
        let headers = indoc! {r#"
            X-Zeta = "1"
            Authorization = "Bearer abc"
            content-type = "application/json"
        "#};

        let headers: BTreeMap<HeaderName, HeaderValue> = toml::from_str(headers).unwrap();
        let names: Vec<_> = headers.keys().map(ToString::to_string).collect();

        insta::assert_debug_snapshot!(names, @r#"
        [
            "authorization",
            "content-type",
            "x-zeta",
        ]
        "#);
    }

    #[test]
    fn invalid_header_value() {
        let headers = indoc! {r#"
            test = "\n\r"
        "#};

        let result: Result<BTreeMap<HeaderName, HeaderValue>, _> = toml::from_str(headers);
        assert!(result.is_err());
    }
}
