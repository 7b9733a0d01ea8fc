use std::path::PathBuf;

use convert::ConvertError;
use thiserror::Error;

use crate::Conversion;

#[derive(Debug, Error)]
pub enum FlavorError {
    #[error("failed to read flavor definitions from {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("malformed flavor definition '{file}': {source}")]
    Yaml { file: String, source: serde_yaml::Error },

    #[error("flavor file '{file}' defines a flavor named '{name}'")]
    NameMismatch { file: String, name: String },

    #[error("flavor '{flavor}' service '{service}' has a malformed endpoint '{endpoint}', expected 'METHOD /path'")]
    MalformedEndpoint {
        flavor: String,
        service: String,
        endpoint: String,
    },

    #[error("flavor '{flavor}' service '{service}' has invalid extra_headers: {message}")]
    ExtraHeaders {
        flavor: String,
        service: String,
        message: String,
    },

    #[error("flavor '{flavor}' service '{service}' has unsupported auth_type '{auth_type}'")]
    AuthType {
        flavor: String,
        service: String,
        auth_type: String,
    },

    #[error("flavor '{flavor}' service '{service}' {conversion}: {source}")]
    Pipeline {
        flavor: String,
        service: String,
        conversion: Conversion,
        source: ConvertError,
    },

    #[error("the canonical flavor '{0}' is not defined")]
    MissingCanonical(String),

    #[error("unknown flavor '{0}'")]
    UnknownFlavor(String),

    #[error("flavor '{flavor}' does not provide service '{service}'")]
    UnknownService { flavor: String, service: String },

    #[error(transparent)]
    Conversion(#[from] ConvertError),
}

impl FlavorError {
    /// True when a conversion step asked to drop the current item.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Conversion(error) if error.is_drop())
    }
}
