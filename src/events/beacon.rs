use base64::{engine::general_purpose::STANDARD, Engine};
use futures::{future::BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;

use crate::{events::TrackingEvent, Error, Result};

/// A destination for tracking events.
///
/// Implementations deliver a batch of events in a single request. Failures are reported back to
/// the dispatcher, which logs and drops them; sinks are never retried.
pub trait BeaconSink: Send + Sync {
    /// Deliver `events` to the beacon at `url`.
    fn send_events<'a>(
        &'a self,
        url: &'a str,
        events: &'a [TrackingEvent],
    ) -> BoxFuture<'a, Result<()>>;
}

/// Delivers events with an HTTP POST of a form-encoded, base64-wrapped JSON payload.
#[derive(Debug, Clone, Default)]
pub struct HttpBeacon {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl HttpBeacon {
    /// Create a new beacon client.
    pub fn new() -> HttpBeacon {
        HttpBeacon::default()
    }

    async fn post(&self, url: &str, events: &[TrackingEvent]) -> Result<()> {
        let body = encode_payload(events)?;

        let response = self
            .client
            .post(url)
            .header(
                CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=UTF-8",
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        Ok(())
    }
}

impl BeaconSink for HttpBeacon {
    fn send_events<'a>(
        &'a self,
        url: &'a str,
        events: &'a [TrackingEvent],
    ) -> BoxFuture<'a, Result<()>> {
        self.post(url, events).boxed()
    }
}

/// Encode events into the beacon request body: JSON, then base64, then a form-encoded `data`
/// field.
pub fn encode_payload(events: &[TrackingEvent]) -> Result<String> {
    let json = serde_json::to_vec(events).map_err(|err| Error::Serialization(err.into()))?;
    let encoded = STANDARD.encode(json);
    Ok(url::form_urlencoded::Serializer::new(String::new())
        .append_pair("data", &encoded)
        .finish())
}
