use std::sync::Arc;

/// Represents a result type for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors.
///
/// Only the construction errors ([`Error::InvalidDefaults`], [`Error::InvalidDeviceId`],
/// [`Error::InvalidPlatform`], [`Error::InvalidProvider`] and [`Error::NoAsyncRuntime`]) are ever
/// returned to the caller directly. Everything else is recovered internally and only shows up in
/// logs or in [`Client::wait_for_configuration()`](crate::Client::wait_for_configuration).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An experiment definition is malformed. Invalidates the whole configuration.
    #[error("invalid configuration for experiment \"{experiment_id}\": {reason}")]
    InvalidExperimentConfiguration {
        /// Id of the first invalid experiment.
        experiment_id: String,
        /// Which part of the definition is invalid.
        reason: String,
    },

    /// The experiment is not present in the live configuration.
    #[error("experiment `{0}` is deprecated")]
    DeprecatedExperiment(String),

    /// Bucketing selected no group, e.g. all group weights are zero.
    #[error("no treatment selected for experiment `{0}`")]
    NoTreatmentSelected(String),

    /// Client was configured without defaults.
    #[error("invalid defaults; expected a mapping of experiment ids to default values")]
    InvalidDefaults,

    /// Client was configured with an empty device id.
    #[error("invalid device ID; expected non-empty string, got `{0}`")]
    InvalidDeviceId(String),

    /// Client was configured with an empty platform.
    #[error("invalid platform; expected non-empty string, got `{0}`")]
    InvalidPlatform(String),

    /// Client was configured without a configuration provider.
    #[error("invalid provider")]
    InvalidProvider,

    /// Client was constructed outside of a tokio runtime.
    #[error("no async runtime available; construct the client from within a tokio runtime")]
    NoAsyncRuntime,

    /// Invalid URL for the configuration service.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Server responded with a non-2xx status.
    #[error("unexpected response status {status} from {url}")]
    UnexpectedStatus {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Server responded with a body that is not a valid configuration document.
    #[error("invalid JSON response from server")]
    InvalidJson(#[source] Arc<serde_json::Error>),

    /// Failed to serialize tracking events.
    #[error("failed to serialize tracking events")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// A background task panicked or was cancelled.
    #[error("background task failed")]
    TaskFailed,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(_: tokio::task::JoinError) -> Self {
        Error::TaskFailed
    }
}
