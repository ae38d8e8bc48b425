//! Forced assignments that take precedence over configuration.
use std::{fmt, future::Future, panic::AssertUnwindSafe};

use derive_more::From;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};

/// A forced assignment for an experiment.
///
/// An override replaces whatever the configuration would select, including the default. A
/// [deferred](Override::deferred) override that fails is treated as if there was no override at
/// all.
///
/// ```
/// # use minixperiment::Override;
/// let literal: Override = "treatment".into();
/// let deferred = Override::deferred(async { Ok::<_, std::io::Error>("treatment".to_owned()) });
/// ```
#[derive(Clone, From)]
pub enum Override {
    /// A literal value.
    Value(String),
    /// A value that becomes available later. Resolves to `None` if it failed or panicked.
    Deferred(Shared<BoxFuture<'static, Option<String>>>),
}

impl Override {
    /// Create an override from an asynchronous value.
    ///
    /// The future is polled lazily, the first time an assignment for the experiment is resolved,
    /// and its result is shared between all resolutions.
    pub fn deferred<F, E>(future: F) -> Override
    where
        F: Future<Output = Result<String, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        // A panic would otherwise poison the shared future for every later resolution.
        let future = async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(err)) => {
                    log::debug!(target: "minixperiment", "override rejected, ignoring it: {err}");
                    None
                }
                Err(_) => {
                    log::warn!(target: "minixperiment", "override panicked, ignoring it");
                    None
                }
            }
        };
        Override::Deferred(future.boxed().shared())
    }

    /// Wait for the override value. `None` means "no override".
    pub async fn resolve(&self) -> Option<String> {
        match self {
            Override::Value(value) => Some(value.clone()),
            Override::Deferred(future) => future.clone().await,
        }
    }
}

impl From<&str> for Override {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Override::Deferred(future) => f
                .debug_tuple("Deferred")
                .field(&future.peek())
                .finish(),
        }
    }
}

/// Layer `override_value` on top of `assignment`.
pub(crate) async fn apply_override(
    override_value: Option<&Override>,
    assignment: Option<String>,
) -> Option<String> {
    match override_value {
        Some(override_value) => override_value.resolve().await.or(assignment),
        None => assignment,
    }
}
