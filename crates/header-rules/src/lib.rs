//! Header rules engine: applies flavor header edits and filters headers forwarded upstream.

use std::sync::OnceLock;

use config::HeaderChanges;
use http::header::{self, HeaderMap, HeaderName};

/// Headers that are never copied from a client request onto an upstream request.
static DENY_LIST: OnceLock<[HeaderName; 12]> = OnceLock::new();

/// Apply a header mutation record in place.
///
/// The order is fixed: clear everything if asked, then delete, then set, then add.
pub fn apply(headers: &mut HeaderMap, changes: &HeaderChanges) {
    if changes.clear_all {
        headers.clear();
    }

    for name in &changes.del {
        headers.remove(name.as_ref());
    }

    for (name, value) in &changes.set {
        headers.insert(name.as_ref().clone(), value.as_ref().clone());
    }

    for (name, value) in &changes.add {
        headers.append(name.as_ref().clone(), value.as_ref().clone());
    }
}

/// Headers dropped by [`forwardable`].
fn deny_list() -> &'static [HeaderName] {
    DENY_LIST.get_or_init(|| {
        [
            header::CONTENT_LENGTH,
            header::HOST,
            // hop-by-hop headers
            header::CONNECTION,
            HeaderName::from_static("keep-alive"),
            header::PROXY_AUTHENTICATE,
            header::PROXY_AUTHORIZATION,
            header::TE,
            header::TRAILER,
            header::TRANSFER_ENCODING,
            header::UPGRADE,
            // compression is negotiated by the upstream client, never forwarded
            header::ACCEPT_ENCODING,
            header::EXPECT,
        ]
    })
}

/// Check if a header name is in the deny list.
pub fn is_header_denied(name: &HeaderName) -> bool {
    deny_list().contains(name)
}

/// Copy every header that may be forwarded upstream.
pub fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut result = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if !is_header_denied(name) {
            result.append(name.clone(), value.clone());
        }
    }

    result
}
