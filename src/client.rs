use chrono::Utc;
use tokio::runtime::Handle;

use crate::{
    config::ClientConfig,
    events::{EventDispatcher, TrackingEvent, TrackingProperties},
    experiments::Configuration,
    resolver::{AssignmentResolver, ResolverInputs},
    Error, Result,
};

/// A client resolving experiment treatments and tracking them.
///
/// In order to create a client instance, first create [`ClientConfig`]. The client fetches
/// experiment configuration once, when it is created, and resolves every experiment listed in the
/// defaults right away in the background.
///
/// # Examples
/// ```
/// # async fn example() -> minixperiment::Result<()> {
/// use minixperiment::{ClientConfig, GetOptions, ServiceProvider};
///
/// let client = ClientConfig::new("device-id", "web")
///     .default_value("experiment-id", "control")
///     .provider(ServiceProvider::new(ServiceProvider::SERVICE_URL)?)
///     .to_client()?;
///
/// let treatment = client.get("experiment-id", GetOptions::default()).await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    resolver: AssignmentResolver,
    dispatcher: EventDispatcher,
    device_id: String,
    platform: String,
    login: Option<String>,
    beacon_url: String,
}

/// Per-call options for [`Client::get()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Wait until the tracking event has been sent before returning the treatment.
    pub must_track: bool,
    /// Channel the user is on. Channel experiments are bucketed on it.
    pub channel: Option<String>,
}

impl GetOptions {
    /// Wait until the tracking event has been sent.
    pub fn must_track(mut self) -> Self {
        self.must_track = true;
        self
    }

    /// Set the channel the user is on.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Must be called from within a tokio runtime. Configuration fetching, assignment resolution
    /// and event delivery all run on that runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete (see [`ClientConfig::to_client()`]) or
    /// [`Error::NoAsyncRuntime`] outside of a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Client> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoAsyncRuntime)?;

        let ClientConfig {
            device_id,
            platform,
            defaults,
            provider,
            login,
            overrides,
            dispatcher,
            beacon_sink,
            beacon_url,
        } = config;
        let provider = provider.ok_or(Error::InvalidProvider)?;

        let resolver = AssignmentResolver::new(
            &runtime,
            provider,
            ResolverInputs {
                defaults: defaults.unwrap_or_default(),
                overrides,
                device_id: device_id.clone(),
                login: login.clone(),
            },
        );
        let dispatcher = EventDispatcher::new(dispatcher, beacon_sink, runtime);

        Ok(Client {
            resolver,
            dispatcher,
            device_id,
            platform,
            login,
            beacon_url,
        })
    }

    /// Get the treatment for the given experiment and report it.
    ///
    /// Returns the override if there is one, the configured treatment otherwise, and the registered
    /// default if the treatment cannot be determined for any reason. `None` means there is neither a
    /// treatment nor a default. Never fails.
    ///
    /// Every call produces a tracking event. By default the event is queued and the treatment is
    /// returned right away; with [`GetOptions::must_track`] the call waits until the event has been
    /// sent (or failed to).
    pub async fn get(&self, experiment_id: &str, options: GetOptions) -> Option<String> {
        let GetOptions {
            must_track,
            channel,
        } = options;

        let assignment = self
            .resolver
            .resolve(experiment_id, channel.as_deref())
            .await;

        let configuration = self.resolver.configuration().await;
        let event = self.tracking_event(
            experiment_id,
            assignment.clone(),
            configuration.as_deref(),
            channel,
        );
        log::trace!(target: "minixperiment",
                    experiment_id,
                    event:serde = event;
                    "resolved assignment");

        let url = self.beacon_url_for(configuration.as_deref());
        let delivery = self.dispatcher.dispatch(event, url, must_track);
        if must_track {
            delivery.await;
        }

        assignment
    }

    /// Wait for the experiment configuration to be fetched and validated.
    ///
    /// [`Client::get()`] does not need this. It is useful to find out why the client keeps
    /// returning defaults.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the configuration from loading.
    pub async fn wait_for_configuration(&self) -> Result<()> {
        self.resolver.wait_for_configuration().await
    }

    /// Send all queued tracking events now.
    ///
    /// Call this before shutting down to avoid losing the last batch.
    pub async fn flush(&self) {
        let configuration = self.resolver.configuration().await;
        let url = self.beacon_url_for(configuration.as_deref()).to_owned();
        self.dispatcher.flush(&url).await;
    }

    fn beacon_url_for<'a>(&'a self, configuration: Option<&'a Configuration>) -> &'a str {
        configuration
            .and_then(Configuration::beacon_url)
            .unwrap_or(&self.beacon_url)
    }

    fn tracking_event(
        &self,
        experiment_id: &str,
        assignment: Option<String>,
        configuration: Option<&Configuration>,
        channel: Option<String>,
    ) -> TrackingEvent {
        let experiment = configuration.and_then(|configuration| configuration.get(experiment_id));

        TrackingEvent::experiment_branch(TrackingProperties {
            client_time: Utc::now(),
            device_id: self.device_id.clone(),
            experiment_id: experiment_id.to_owned(),
            experiment_group: assignment,
            platform: self.platform.clone(),
            experiment_version: experiment
                .and_then(|experiment| experiment.version)
                .unwrap_or(0),
            experiment_name: experiment.and_then(|experiment| experiment.name.clone()),
            experiment_type: experiment.map(|experiment| experiment.kind),
            login: self.login.clone(),
            channel,
        })
    }
}
