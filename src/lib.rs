//! A client for deterministic experiment assignment.
//!
//! # Overview
//!
//! The library revolves around a [`Client`] that resolves experiment `treatments` for a device.
//! Experiments are defined by a configuration fetched once from a [`ConfigurationProvider`]. Each
//! experiment lists weighted groups, and a subject (the device, the logged-in user, or the channel
//! being watched, depending on [`ExperimentType`]) is bucketed into one of them by hashing. The
//! same subject always lands in the same group for as long as the configuration does not change.
//!
//! Every resolved treatment is reported as a [`TrackingEvent`]. Events are batched, optionally
//! throttled, and delivered to a beacon.
//!
//! # Error Handling
//!
//! [`Client::get()`] never fails. Anything that goes wrong while fetching configuration, bucketing
//! or resolving overrides degrades to the default registered for the experiment, and tracking
//! failures are logged and dropped.
//!
//! Only constructing a client can fail, with an [`Error`] describing what is missing from the
//! [`ClientConfig`]. Those errors indicate a programming mistake rather than a runtime condition.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into configuration problems, which otherwise only show up as default treatments.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `minixperiment` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod eval;
mod experiments;
mod overrides;
mod provider;
mod resolver;
mod sharder;

pub mod events;

#[cfg(test)]
mod testing;

pub use client::{Client, GetOptions};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use eval::select_treatment;
pub use events::{BeaconSink, HttpBeacon, TrackingEvent, TrackingProperties};
pub use experiments::{
    validate, Configuration, Experiment, ExperimentConfig, ExperimentType, ExperimentsConfig,
    Group, GroupConfig, BEACON_URL_EXPERIMENT_ID,
};
pub use overrides::Override;
pub use provider::{ConfigurationProvider, ServiceProvider, StaticProvider};
pub use sharder::{Sha1Sharder, Sharder};
