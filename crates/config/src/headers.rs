//! Header mutation records used by the flavor `header` converter.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::http_types::{HeaderName, HeaderValue};

/// A set of header edits applied as one step.
///
/// Edits run in a fixed order: `clear_all`, then `del`, then `set`, then `add`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderChanges {
    /// Remove every header before applying the other edits.
    pub clear_all: bool,
    /// Replace the header value, removing previous values of the same name.
    pub set: BTreeMap<HeaderName, HeaderValue>,
    /// Append a value, keeping previous values of the same name.
    pub add: BTreeMap<HeaderName, HeaderValue>,
    /// Remove headers by name.
    pub del: Vec<HeaderName>,
}

impl HeaderChanges {
    /// True when applying these changes leaves any header map untouched.
    pub fn is_empty(&self) -> bool {
        !self.clear_all && self.set.is_empty() && self.add.is_empty() && self.del.is_empty()
    }
}
