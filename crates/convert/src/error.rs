use thiserror::Error;

/// Errors produced while building or running a conversion pipeline.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Not a failure: the current item produces no output.
    #[error("<drop>")]
    Drop,

    /// A pipeline step names a converter that does not exist.
    #[error("unknown converter '{0}'")]
    UnknownConverter(String),

    /// A converter's configuration could not be used.
    #[error("invalid configuration for converter '{converter}': {message}")]
    InvalidConfig { converter: String, message: String },

    #[error("expression syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("expression evaluation failed: {0}")]
    Evaluation(String),

    /// The body handed to an expression converter is not JSON.
    #[error("body is not valid JSON: {0}")]
    InvalidBody(String),

    /// The expression produced no value for this input.
    #[error("expression '{0}' produced no value")]
    Undefined(String),
}

impl ConvertError {
    /// True for the drop sentinel, which callers treat as "emit nothing".
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }
}
