/// Convenience result type used across spriteflat.
pub type FlattenResult<T> = Result<T, FlattenError>;

/// Top-level error taxonomy used by engine APIs.
///
/// Missing references and unsupported filters are not errors: they are logged and skipped.
#[derive(thiserror::Error, Debug)]
pub enum FlattenError {
    /// Invalid user-provided options or scene descriptors.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors while rasterizing a subtree (buffer limits, malformed pixel data).
    #[error("render error: {0}")]
    Render(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlattenError {
    /// Build a [`FlattenError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`FlattenError::Render`] value.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Build a [`FlattenError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for FlattenError {
    fn from(err: serde_json::Error) -> Self {
        Self::serde(err.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
