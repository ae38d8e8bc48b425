//! Sources of experiment configuration.
use futures::{future::BoxFuture, FutureExt};
use reqwest::Url;

use crate::{experiments::ExperimentsConfig, Error, Result};

/// A source of experiment configuration.
///
/// The client asks its provider for configuration exactly once, at construction.
pub trait ConfigurationProvider: Send + Sync {
    /// Retrieve the full experiment configuration.
    fn get_experiment_configuration(&self) -> BoxFuture<'_, Result<ExperimentsConfig>>;
}

/// Provides configuration defined in-process (or injected from another source).
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    configuration: ExperimentsConfig,
}

impl StaticProvider {
    /// Create a provider that always yields `configuration`.
    pub fn new(configuration: ExperimentsConfig) -> StaticProvider {
        StaticProvider { configuration }
    }
}

impl ConfigurationProvider for StaticProvider {
    fn get_experiment_configuration(&self) -> BoxFuture<'_, Result<ExperimentsConfig>> {
        futures::future::ready(Ok(self.configuration.clone())).boxed()
    }
}

/// Fetches configuration as a JSON document from the experiments service.
pub struct ServiceProvider {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    url: Url,
}

impl ServiceProvider {
    /// Default location of the experiments service.
    pub const SERVICE_URL: &'static str = "https://www.twitch.tv/experiments.json";

    /// Create a provider fetching configuration from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if `url` cannot be parsed.
    pub fn new(url: &str) -> Result<ServiceProvider> {
        let url = Url::parse(url).map_err(Error::InvalidBaseUrl)?;
        Ok(ServiceProvider {
            client: reqwest::Client::new(),
            url,
        })
    }

    async fn fetch_configuration(&self) -> Result<ExperimentsConfig> {
        log::debug!(target: "minixperiment", url:display = self.url; "fetching experiment configuration");
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "minixperiment", "received non-2xx response while fetching experiment configuration: {:?}", status);
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body = response.bytes().await?;
        let configuration = parse_configuration(&body)?;

        log::debug!(target: "minixperiment", "successfully fetched experiment configuration");
        Ok(configuration)
    }
}

impl ConfigurationProvider for ServiceProvider {
    fn get_experiment_configuration(&self) -> BoxFuture<'_, Result<ExperimentsConfig>> {
        self.fetch_configuration().boxed()
    }
}

fn parse_configuration(body: &[u8]) -> Result<ExperimentsConfig> {
    serde_json::from_slice(body).map_err(|err| Error::InvalidJson(err.into()))
}
