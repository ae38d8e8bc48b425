//! Assignment resolution: configuration, typed bucketing, defaults and overrides.
use std::{collections::HashMap, sync::Arc};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::runtime::Handle;

use crate::{
    experiments::{validate, Configuration},
    overrides::{apply_override, Override},
    provider::ConfigurationProvider,
    sharder::Sha1Sharder,
    Result,
};

/// The single configuration fetch, shared by every resolution.
pub(crate) type SharedConfiguration = Shared<BoxFuture<'static, Result<Arc<Configuration>>>>;

type SharedAssignment = Shared<BoxFuture<'static, Option<String>>>;

/// Inputs fixed for the lifetime of a client.
pub(crate) struct ResolverInputs {
    pub defaults: HashMap<String, String>,
    pub overrides: HashMap<String, Override>,
    pub device_id: String,
    pub login: Option<String>,
}

/// Resolves experiment assignments.
///
/// Everything that does not depend on per-call options is computed once, at construction: one
/// task per experiment with a registered default. Calls only add channel bucketing and the
/// override check on top of that.
pub(crate) struct AssignmentResolver {
    configuration: SharedConfiguration,
    overrides: Arc<HashMap<String, Override>>,
    assignments: HashMap<String, SharedAssignment>,
}

impl AssignmentResolver {
    /// Start fetching configuration from `provider` and pre-resolving every experiment in
    /// `inputs.defaults` on `runtime`.
    pub fn new(
        runtime: &Handle,
        provider: Arc<dyn ConfigurationProvider>,
        inputs: ResolverInputs,
    ) -> AssignmentResolver {
        let fetch = runtime.spawn(load_configuration(provider));
        let configuration: SharedConfiguration =
            async move { fetch.await.unwrap_or_else(|err| Err(err.into())) }
                .boxed()
                .shared();

        let ResolverInputs {
            defaults,
            overrides,
            device_id,
            login,
        } = inputs;
        let overrides = Arc::new(overrides);

        let assignments = defaults
            .into_iter()
            .map(|(experiment_id, default)| {
                let task = runtime.spawn(pre_resolve(
                    configuration.clone(),
                    overrides.clone(),
                    experiment_id.clone(),
                    default.clone(),
                    device_id.clone(),
                    login.clone(),
                ));
                let assignment = async move {
                    match task.await {
                        Ok(assignment) => assignment,
                        Err(err) => {
                            log::warn!(target: "minixperiment", "assignment task failed, using default: {err}");
                            Some(default)
                        }
                    }
                }
                .boxed()
                .shared();
                (experiment_id, assignment)
            })
            .collect();

        AssignmentResolver {
            configuration,
            overrides,
            assignments,
        }
    }

    /// Resolve the assignment for `experiment_id`.
    ///
    /// `channel` only matters for channel experiments, which are bucketed on it. Never fails: any
    /// problem degrades to the registered default, or `None` if there is none.
    pub async fn resolve(&self, experiment_id: &str, channel: Option<&str>) -> Option<String> {
        let base = match self.assignments.get(experiment_id) {
            Some(assignment) => assignment.clone().await,
            None => {
                log::warn!(target: "minixperiment", experiment_id; "no default registered for experiment");
                None
            }
        };

        let assignment = match channel.filter(|channel| !channel.is_empty()) {
            Some(channel) => self
                .channel_assignment(experiment_id, channel)
                .await
                .or(base),
            None => base,
        };

        apply_override(self.overrides.get(experiment_id), assignment).await
    }

    async fn channel_assignment(&self, experiment_id: &str, channel: &str) -> Option<String> {
        let configuration = self.configuration().await?;

        configuration
            .eval_channel_assignment(experiment_id, channel, &Sha1Sharder)
            .unwrap_or_else(|err| {
                log::warn!(target: "minixperiment", experiment_id, channel; "failed to bucket channel, using default: {err}");
                None
            })
    }

    /// The validated configuration, or `None` if it could not be loaded.
    pub async fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.clone().await.ok()
    }

    /// Wait for the configuration to load, reporting why it failed if it did.
    pub async fn wait_for_configuration(&self) -> Result<()> {
        self.configuration.clone().await.map(|_| ())
    }
}

async fn load_configuration(provider: Arc<dyn ConfigurationProvider>) -> Result<Arc<Configuration>> {
    let result = async {
        let config = provider.get_experiment_configuration().await?;
        validate(&config)
    }
    .await;

    match result {
        Ok(configuration) => {
            log::debug!(target: "minixperiment", experiments = configuration.len(); "experiment configuration loaded");
            Ok(Arc::new(configuration))
        }
        Err(err) => {
            log::warn!(target: "minixperiment", "failed to load experiment configuration, using defaults: {err}");
            Err(err)
        }
    }
}

async fn pre_resolve(
    configuration: SharedConfiguration,
    overrides: Arc<HashMap<String, Override>>,
    experiment_id: String,
    default: String,
    device_id: String,
    login: Option<String>,
) -> Option<String> {
    let assignment = match configuration.await {
        Ok(configuration) => configuration
            .eval_assignment(&experiment_id, &device_id, login.as_deref(), &Sha1Sharder)
            .unwrap_or_else(|err| {
                log::warn!(target: "minixperiment", experiment_id:display = experiment_id; "failed to assign treatment, using default: {err}");
                None
            })
            .unwrap_or(default),
        // Already reported once, when loading.
        Err(_) => default,
    };

    let assignment = apply_override(overrides.get(&experiment_id), Some(assignment)).await;
    log::trace!(target: "minixperiment", experiment_id:display = experiment_id; "pre-resolved assignment: {assignment:?}");
    assignment
}
