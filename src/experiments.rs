//! Experiment configuration.
//!
//! [`ExperimentsConfig`] is the wire format returned by a
//! [`ConfigurationProvider`](crate::ConfigurationProvider). It is deliberately loose so that a
//! malformed definition can be reported precisely instead of failing the whole document at parse
//! time. [`validate()`] turns it into a strongly-typed [`Configuration`].
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Experiment id reserved for overriding the beacon URL. The value of its first group is used as
/// the URL tracking events are sent to.
pub const BEACON_URL_EXPERIMENT_ID: &str = "4badc757-13a7-468c-99b6-e42aef7fc286";

/// Raw experiment configuration keyed by experiment id.
///
/// A `BTreeMap` keeps validation order (and thus the reported error) deterministic.
pub type ExperimentsConfig = BTreeMap<String, ExperimentConfig>;

/// Raw definition of a single experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment type: `1` (device), `2` (user) or `3` (channel).
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    /// Salt appended to the bucketing seed. A string or a number.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Value>,
    /// Human-readable experiment name. Only reported in tracking events; a non-scalar name is
    /// ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    /// Experiment version. Only reported in tracking events; a non-integer version is ignored.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    /// Treatment groups, in bucketing order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupConfig>>,
}

/// Raw definition of a treatment group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Treatment value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Non-negative integer weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Value>,
}

impl ExperimentConfig {
    /// Create an empty experiment definition of the given type.
    ///
    /// ```
    /// # use minixperiment::{ExperimentConfig, ExperimentType};
    /// let experiment = ExperimentConfig::new(ExperimentType::Device)
    ///     .with_group("control", 1)
    ///     .with_group("treatment", 1);
    /// ```
    pub fn new(kind: ExperimentType) -> ExperimentConfig {
        ExperimentConfig {
            kind: Some(Value::from(kind.wire_id())),
            groups: Some(Vec::new()),
            ..ExperimentConfig::default()
        }
    }

    /// Append a treatment group.
    pub fn with_group(mut self, value: impl Into<String>, weight: u64) -> ExperimentConfig {
        self.groups.get_or_insert_with(Vec::new).push(GroupConfig {
            value: Some(Value::String(value.into())),
            weight: Some(Value::from(weight)),
        });
        self
    }

    /// Set the bucketing salt.
    pub fn with_salt(mut self, salt: impl Into<String>) -> ExperimentConfig {
        self.salt = Some(Value::String(salt.into()));
        self
    }

    /// Set the experiment name.
    pub fn with_name(mut self, name: impl Into<String>) -> ExperimentConfig {
        self.name = Some(Value::String(name.into()));
        self
    }

    /// Set the experiment version.
    pub fn with_version(mut self, version: i64) -> ExperimentConfig {
        self.version = Some(Value::from(version));
        self
    }
}

/// Determines which identifier a subject is bucketed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentType {
    /// Bucket on the device id supplied at construction.
    #[serde(rename = "device_id")]
    Device,
    /// Bucket on the login supplied at construction, if any.
    #[serde(rename = "user_id")]
    User,
    /// Bucket on the channel supplied per call.
    #[serde(rename = "channel_id")]
    Channel,
}

impl ExperimentType {
    /// Numeric id used in the configuration wire format.
    pub fn wire_id(self) -> i64 {
        match self {
            ExperimentType::Device => 1,
            ExperimentType::User => 2,
            ExperimentType::Channel => 3,
        }
    }

    /// Accepts numbers and numeric strings (`"1"`).
    fn from_wire(value: &Value) -> Option<ExperimentType> {
        let id = match value {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)?,
            other => as_integer(other)?,
        };
        match id {
            1 => Some(ExperimentType::Device),
            2 => Some(ExperimentType::User),
            3 => Some(ExperimentType::Channel),
            _ => None,
        }
    }
}

/// A validated experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    /// Experiment type.
    pub kind: ExperimentType,
    /// Salt appended to the bucketing seed.
    pub salt: Option<String>,
    /// Human-readable experiment name.
    pub name: Option<String>,
    /// Experiment version.
    pub version: Option<i64>,
    /// Treatment groups, in bucketing order. Never empty.
    pub groups: Vec<Group>,
}

/// A validated treatment group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Treatment value.
    pub value: String,
    /// Relative weight.
    pub weight: u64,
}

/// Validated experiment configuration. Immutable for the life of a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    experiments: HashMap<String, Experiment>,
}

impl Configuration {
    /// Get the experiment with the given id.
    pub fn get(&self, experiment_id: &str) -> Option<&Experiment> {
        self.experiments.get(experiment_id)
    }

    /// Number of experiments in the configuration.
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Returns `true` if the configuration contains no experiments.
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Beacon URL override, taken from the first group of the reserved
    /// [`BEACON_URL_EXPERIMENT_ID`] experiment.
    pub fn beacon_url(&self) -> Option<&str> {
        self.get(BEACON_URL_EXPERIMENT_ID)
            .and_then(|experiment| experiment.groups.first())
            .map(|group| group.value.as_str())
            .filter(|url| !url.is_empty())
    }
}

/// Validate raw experiment configuration.
///
/// Validation is all-or-nothing: the first invalid experiment aborts with
/// [`Error::InvalidExperimentConfiguration`] naming the experiment and the defect.
pub fn validate(config: &ExperimentsConfig) -> Result<Configuration> {
    let experiments = config
        .iter()
        .map(|(experiment_id, experiment)| {
            let experiment = validate_experiment(experiment).map_err(|reason| {
                Error::InvalidExperimentConfiguration {
                    experiment_id: experiment_id.clone(),
                    reason,
                }
            })?;
            Ok((experiment_id.clone(), experiment))
        })
        .collect::<Result<HashMap<_, _>>>()?;

    Ok(Configuration { experiments })
}

fn validate_experiment(config: &ExperimentConfig) -> std::result::Result<Experiment, String> {
    let kind = config
        .kind
        .as_ref()
        .ok_or("missing a `t` property for experiment type")?;
    let kind = ExperimentType::from_wire(kind).ok_or("undefined experiment type")?;

    let groups = config
        .groups
        .as_ref()
        .ok_or("missing a `groups` property")?;
    if groups.is_empty() {
        return Err("`groups` has no members".to_owned());
    }

    let groups = groups
        .iter()
        .enumerate()
        .map(|(index, group)| {
            validate_group(group).map_err(|defect| {
                let label = group
                    .value
                    .as_ref()
                    .and_then(scalar_to_string)
                    .unwrap_or_else(|| format!("#{index}"));
                format!("Group {label} {defect}")
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Experiment {
        kind,
        salt: config.salt.as_ref().and_then(salt_to_string),
        name: config.name.as_ref().and_then(scalar_to_string),
        version: config.version.as_ref().and_then(as_integer),
        groups,
    })
}

fn validate_group(group: &GroupConfig) -> std::result::Result<Group, &'static str> {
    let value = group.value.as_ref().ok_or("is missing a `value` property")?;
    let value = scalar_to_string(value).ok_or("has a non-scalar `value` property")?;
    let weight = group
        .weight
        .as_ref()
        .ok_or("is missing a `weight` property")?;

    let weight = match as_integer(weight) {
        None => return Err("has a non-integer weight"),
        Some(weight) if weight < 0 => return Err("has a negative weight"),
        Some(weight) => weight as u64,
    };

    Ok(Group { value, weight })
}

/// Interpret a JSON number as an integer, accepting integral floats such as `5.0`.
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(
            n.as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| n.to_string()),
        ),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Falsy salts (`""`, `0`, `false`, `null`) mean "no salt".
fn salt_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Bool(false) => None,
        other => scalar_to_string(other),
    }
}
