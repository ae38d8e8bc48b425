//! Test doubles shared by unit tests.
use std::sync::{Mutex, PoisonError};

use chrono::DateTime;
use futures::{future::BoxFuture, FutureExt};

use crate::{
    events::{BeaconSink, TrackingEvent, TrackingProperties},
    experiments::ExperimentsConfig,
    provider::ConfigurationProvider,
    Error, Result,
};

/// Records every beacon request instead of sending it.
#[derive(Default)]
pub struct RecordingSink {
    requests: Mutex<Vec<(String, Vec<TrackingEvent>)>>,
}

impl RecordingSink {
    /// All requests so far, as `(url, events)` pairs.
    pub fn requests(&self) -> Vec<(String, Vec<TrackingEvent>)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All events so far, across requests.
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.requests()
            .into_iter()
            .flat_map(|(_, events)| events)
            .collect()
    }
}

impl BeaconSink for RecordingSink {
    fn send_events<'a>(
        &'a self,
        url: &'a str,
        events: &'a [TrackingEvent],
    ) -> BoxFuture<'a, Result<()>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_owned(), events.to_vec()));
        futures::future::ready(Ok(())).boxed()
    }
}

/// A beacon that is always down.
pub struct FailingSink;

impl BeaconSink for FailingSink {
    fn send_events<'a>(
        &'a self,
        url: &'a str,
        _events: &'a [TrackingEvent],
    ) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(Err(Error::UnexpectedStatus {
            status: 503,
            url: url.to_owned(),
        }))
        .boxed()
    }
}

/// A configuration source that is always down.
pub struct FailingProvider;

impl ConfigurationProvider for FailingProvider {
    fn get_experiment_configuration(&self) -> BoxFuture<'_, Result<ExperimentsConfig>> {
        futures::future::ready(Err(Error::UnexpectedStatus {
            status: 500,
            url: "https://experiments.test/".to_owned(),
        }))
        .boxed()
    }
}

/// A minimal tracking event. Events built with the same arguments compare equal.
pub fn event(experiment_id: &str, group: &str) -> TrackingEvent {
    TrackingEvent::experiment_branch(TrackingProperties {
        client_time: DateTime::from_timestamp_millis(1_700_000_000_000)
            .expect("timestamp in range"),
        device_id: "device".to_owned(),
        experiment_id: experiment_id.to_owned(),
        experiment_group: Some(group.to_owned()),
        platform: "test".to_owned(),
        experiment_version: 0,
        experiment_name: None,
        experiment_type: None,
        login: None,
        channel: None,
    })
}
