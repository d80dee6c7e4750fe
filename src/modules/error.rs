//! Error type shared by all resource modules.

use thiserror::Error;

use crate::api::ClcApiError;
use crate::group_tree::GroupLookupError;
use crate::operation::OperationError;

/// Failure of a module run; rendered as the `msg` of the failure result.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ModuleError {
    /// Parameters failed validation.
    #[error("{0}")]
    Validation(String),
    /// Parameters could not be deserialised.
    #[error("invalid module arguments: {0}")]
    Arguments(String),
    /// An API call failed.
    #[error("{context}: {source}")]
    Api {
        /// What the module was doing.
        context: String,
        /// Underlying API error.
        source: ClcApiError,
    },
    /// A resource the module depends on does not exist.
    #[error("{0}")]
    NotFound(String),
    /// An asynchronous operation did not succeed.
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// A group lookup failed.
    #[error(transparent)]
    GroupLookup(#[from] GroupLookupError),
    /// A JSON document could not be converted.
    #[error("failed to process JSON: {0}")]
    Serialization(String),
}

impl ModuleError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Attaches module context to API results.
pub(crate) trait ApiContext<T> {
    /// Wraps an API error into [`ModuleError::Api`] with a lazily built
    /// context message.
    fn with_context<F>(self, context: F) -> Result<T, ModuleError>
    where
        F: FnOnce() -> String;
}

impl<T> ApiContext<T> for Result<T, ClcApiError> {
    fn with_context<F>(self, context: F) -> Result<T, ModuleError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| ModuleError::Api {
            context: context(),
            source,
        })
    }
}
