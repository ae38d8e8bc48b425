use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiments::ExperimentType;

/// Name of the event reporting an experiment assignment.
pub const EXPERIMENT_BRANCH: &str = "experiment_branch";

/// A single tracking event, as delivered to the beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Event name. Always [`EXPERIMENT_BRANCH`] for events produced by the client.
    pub event: String,
    /// Event payload.
    pub properties: TrackingProperties,
}

impl TrackingEvent {
    /// Create an [`EXPERIMENT_BRANCH`] event.
    pub fn experiment_branch(properties: TrackingProperties) -> TrackingEvent {
        TrackingEvent {
            event: EXPERIMENT_BRANCH.to_owned(),
            properties,
        }
    }
}

/// Describes which treatment a device got for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingProperties {
    /// Time of the assignment. Serialized as epoch seconds.
    #[serde(with = "epoch_seconds")]
    pub client_time: DateTime<Utc>,
    /// Device the client was created for.
    pub device_id: String,
    /// Experiment the treatment was resolved for.
    pub experiment_id: String,
    /// Resolved treatment. `None` if there was neither an assignment nor a default.
    pub experiment_group: Option<String>,
    /// Platform the client was created for.
    pub platform: String,
    /// `0` if the experiment is missing from the configuration or has no version.
    pub experiment_version: i64,
    /// Experiment name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    /// Experiment type, if the experiment is in the configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_type: Option<ExperimentType>,
    /// Login of the current user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Channel passed to the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(time.timestamp_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
            .ok_or_else(|| D::Error::custom("client_time is out of range"))
    }
}
