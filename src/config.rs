use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    events::{BeaconSink, EventDispatcherConfig, HttpBeacon},
    Client, ConfigurationProvider, Error, Override, Result,
};

/// Configuration for [`Client`].
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) device_id: String,
    pub(crate) platform: String,
    pub(crate) defaults: Option<HashMap<String, String>>,
    pub(crate) provider: Option<Arc<dyn ConfigurationProvider>>,
    pub(crate) login: Option<String>,
    pub(crate) overrides: HashMap<String, Override>,
    pub(crate) dispatcher: EventDispatcherConfig,
    pub(crate) beacon_sink: Arc<dyn BeaconSink>,
    pub(crate) beacon_url: String,
}

impl ClientConfig {
    /// Default URL tracking events are sent to, unless the configuration names another one.
    pub const DEFAULT_BEACON_URL: &'static str = "https://trowel.twitch.tv/";

    /// Create a configuration for the given device on the given platform (e.g. `web`).
    ///
    /// [`ClientConfig::defaults()`] and [`ClientConfig::provider()`] are required as well.
    ///
    /// ```
    /// # use minixperiment::ClientConfig;
    /// ClientConfig::new("device-id", "web");
    /// ```
    pub fn new(device_id: impl Into<String>, platform: impl Into<String>) -> Self {
        ClientConfig {
            device_id: device_id.into(),
            platform: platform.into(),
            defaults: None,
            provider: None,
            login: None,
            overrides: HashMap::new(),
            dispatcher: EventDispatcherConfig::default(),
            beacon_sink: Arc::new(HttpBeacon::new()),
            beacon_url: ClientConfig::DEFAULT_BEACON_URL.to_owned(),
        }
    }

    /// Set values returned for each experiment whenever a treatment cannot be determined.
    ///
    /// Only experiments listed here are resolved ahead of time. Requesting any other experiment
    /// yields `None` unless it is overridden.
    pub fn defaults(&mut self, defaults: HashMap<String, String>) -> &mut Self {
        self.defaults = Some(defaults);
        self
    }

    /// Add a single default value.
    pub fn default_value(
        &mut self,
        experiment_id: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.defaults
            .get_or_insert_with(HashMap::new)
            .insert(experiment_id.into(), value.into());
        self
    }

    /// Set the source of experiment configuration.
    ///
    /// ```
    /// # use minixperiment::{ClientConfig, ServiceProvider};
    /// let provider = ServiceProvider::new(ServiceProvider::SERVICE_URL).unwrap();
    /// ClientConfig::new("device-id", "web").provider(provider);
    /// ```
    pub fn provider(&mut self, provider: impl ConfigurationProvider + 'static) -> &mut Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set the login of the current user. Enables bucketing of user experiments. An empty login
    /// means no user is logged in.
    pub fn login(&mut self, login: impl Into<String>) -> &mut Self {
        self.login = Some(login.into()).filter(|login| !login.is_empty());
        self
    }

    /// Set forced assignments.
    pub fn overrides(&mut self, overrides: HashMap<String, Override>) -> &mut Self {
        self.overrides = overrides;
        self
    }

    /// Force the assignment of a single experiment.
    ///
    /// ```
    /// # use minixperiment::{ClientConfig, Override};
    /// ClientConfig::new("device-id", "web")
    ///     .override_assignment("experiment-id", "treatment")
    ///     .override_assignment(
    ///         "other-experiment-id",
    ///         Override::deferred(async { Ok::<_, std::io::Error>("treatment".to_owned()) }),
    ///     );
    /// ```
    pub fn override_assignment(
        &mut self,
        experiment_id: impl Into<String>,
        value: impl Into<Override>,
    ) -> &mut Self {
        self.overrides.insert(experiment_id.into(), value.into());
        self
    }

    /// Set how long tracking events are batched before being sent. Zero sends every event on its
    /// own. Clamped to [`EventDispatcherConfig::MAX_BATCH_TIMEOUT`].
    pub fn batch_timeout(&mut self, batch_timeout: Duration) -> &mut Self {
        self.dispatcher = self.dispatcher.clone().with_batch_timeout(batch_timeout);
        self
    }

    /// Set the window in which repeated tracking events for the same treatment are dropped. Zero
    /// (the default) disables throttling. Clamped to [`EventDispatcherConfig::MAX_THROTTLE_TIME`].
    pub fn throttle_time(&mut self, throttle_time: Duration) -> &mut Self {
        self.dispatcher = self.dispatcher.clone().with_throttle_time(throttle_time);
        self
    }

    /// Replace the HTTP beacon with another destination for tracking events.
    pub fn beacon_sink(&mut self, beacon_sink: Arc<dyn BeaconSink>) -> &mut Self {
        self.beacon_sink = beacon_sink;
        self
    }

    /// Override the default beacon URL. A URL named by the experiment configuration still takes
    /// precedence.
    pub fn beacon_url(&mut self, beacon_url: impl Into<String>) -> &mut Self {
        self.beacon_url = beacon_url.into();
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if defaults or provider are missing, if device id or platform are empty, or if there
    /// is no tokio runtime.
    pub fn to_client(&self) -> Result<Client> {
        Client::new(self.clone())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.defaults.is_none() {
            return Err(Error::InvalidDefaults);
        }
        if self.device_id.is_empty() {
            return Err(Error::InvalidDeviceId(self.device_id.clone()));
        }
        if self.platform.is_empty() {
            return Err(Error::InvalidPlatform(self.platform.clone()));
        }
        if self.provider.is_none() {
            return Err(Error::InvalidProvider);
        }
        Ok(())
    }
}
