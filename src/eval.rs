use crate::{
    experiments::{Configuration, Experiment, ExperimentType},
    sharder::{Sha1Sharder, Sharder},
    Error, Result,
};

/// Select a treatment for `subject_id` using the default [`Sha1Sharder`].
///
/// Returns `None` only if no group can be selected, which happens when all group weights are zero.
///
/// ```
/// # use minixperiment::{select_treatment, validate, ExperimentConfig, ExperimentType, ExperimentsConfig};
/// let config = ExperimentsConfig::from([(
///     "exp-id".to_owned(),
///     ExperimentConfig::new(ExperimentType::Device)
///         .with_group("1", 15)
///         .with_group("2", 85),
/// )]);
/// let configuration = validate(&config).unwrap();
/// let experiment = configuration.get("exp-id").unwrap();
///
/// assert_eq!(select_treatment("exp-id", experiment, "device-id"), Some("1"));
/// ```
pub fn select_treatment<'a>(
    experiment_id: &str,
    experiment: &'a Experiment,
    subject_id: &str,
) -> Option<&'a str> {
    experiment.select_treatment(experiment_id, subject_id, &Sha1Sharder)
}

impl Experiment {
    /// Deterministically pick a group for `subject_id`.
    ///
    /// Groups partition `[0, 1)` into consecutive ranges proportional to their weights, in
    /// configuration order. The subject's point is derived from the experiment id, the subject id
    /// and the salt, so changing the salt reshuffles the population while changing a weight only
    /// moves range boundaries.
    pub fn select_treatment(
        &self,
        experiment_id: &str,
        subject_id: &str,
        sharder: &impl Sharder,
    ) -> Option<&str> {
        let seed = match &self.salt {
            Some(salt) => format!("{experiment_id}{subject_id}{salt}"),
            None => format!("{experiment_id}{subject_id}"),
        };

        let total: f64 = self.groups.iter().map(|group| group.weight as f64).sum();
        if total <= 0.0 {
            return None;
        }

        let mut threshold = sharder.get_point(&seed);
        self.groups
            .iter()
            .find(|group| {
                threshold -= group.weight as f64 / total;
                threshold <= 0.0
            })
            .map(|group| group.value.as_str())
    }
}

impl Configuration {
    /// Evaluate the assignment that can be decided once per client, before any per-call input is
    /// known.
    ///
    /// Returns `Ok(None)` when the experiment type requires input that is not available yet: a
    /// user experiment without a login, or a channel experiment.
    pub(crate) fn eval_assignment(
        &self,
        experiment_id: &str,
        device_id: &str,
        login: Option<&str>,
        sharder: &impl Sharder,
    ) -> Result<Option<String>> {
        let experiment = self
            .get(experiment_id)
            .ok_or_else(|| Error::DeprecatedExperiment(experiment_id.to_owned()))?;

        let subject_id = match (experiment.kind, login) {
            (ExperimentType::Device, _) => device_id,
            (ExperimentType::User, Some(login)) => login,
            (ExperimentType::User, None) | (ExperimentType::Channel, _) => return Ok(None),
        };

        experiment
            .select_treatment(experiment_id, subject_id, sharder)
            .map(|value| Some(value.to_owned()))
            .ok_or_else(|| Error::NoTreatmentSelected(experiment_id.to_owned()))
    }

    /// Evaluate a channel experiment for the given channel.
    ///
    /// Returns `Ok(None)` if the experiment is unknown or is not a channel experiment.
    pub(crate) fn eval_channel_assignment(
        &self,
        experiment_id: &str,
        channel: &str,
        sharder: &impl Sharder,
    ) -> Result<Option<String>> {
        let Some(experiment) = self
            .get(experiment_id)
            .filter(|experiment| experiment.kind == ExperimentType::Channel)
        else {
            return Ok(None);
        };

        experiment
            .select_treatment(experiment_id, channel, sharder)
            .map(|value| Some(value.to_owned()))
            .ok_or_else(|| Error::NoTreatmentSelected(experiment_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        experiments::{validate, Configuration, Experiment, ExperimentConfig, ExperimentType, Group},
        sharder::{DeterministicSharder, Sha1Sharder},
        Error,
    };

    fn experiment(groups: &[(&str, u64)]) -> Experiment {
        Experiment {
            kind: ExperimentType::Device,
            salt: None,
            name: None,
            version: None,
            groups: groups
                .iter()
                .map(|(value, weight)| Group {
                    value: (*value).to_owned(),
                    weight: *weight,
                })
                .collect(),
        }
    }

    fn configuration() -> Configuration {
        validate(
            &[
                (
                    "device-exp",
                    ExperimentConfig::new(ExperimentType::Device)
                        .with_group("5", 10)
                        .with_group("10", 5)
                        .with_group("15", 0),
                ),
                (
                    "user-exp",
                    ExperimentConfig::new(ExperimentType::User)
                        .with_group("control", 1)
                        .with_group("treatment", 1),
                ),
                (
                    "chan-exp",
                    ExperimentConfig::new(ExperimentType::Channel)
                        .with_group("a", 1)
                        .with_group("b", 1),
                ),
                (
                    "disabled-exp",
                    ExperimentConfig::new(ExperimentType::Device).with_group("off", 0),
                ),
            ]
            .into_iter()
            .map(|(id, config)| (id.to_owned(), config))
            .collect(),
        )
        .unwrap()
    }

    #[test]
    fn selects_one_of_configured_treatments() {
        let experiment = experiment(&[("1", 1), ("2", 1), ("3", 1)]);

        let result = experiment.select_treatment("experiment", "device", &Sha1Sharder);

        assert!(matches!(result, Some("1" | "2" | "3")));
    }

    #[test]
    fn is_deterministic() {
        let experiment = experiment(&[("a", 1), ("b", 2), ("c", 3)]);

        for i in 0..100 {
            let subject = format!("device_{i}");
            assert_eq!(
                experiment.select_treatment("exp", &subject, &Sha1Sharder),
                experiment.select_treatment("exp", &subject, &Sha1Sharder)
            );
        }
    }

    #[test]
    fn distribution_follows_weights() {
        let trials = 10_000;
        let tolerance = 0.05;
        let experiment = experiment(&[("0", 1), ("1", 3), ("2", 5), ("3", 7)]);

        let mut results = [0usize; 4];
        for i in 0..trials {
            let assignment = experiment
                .select_treatment("experiment-uuid", &format!("device_{i}"), &Sha1Sharder)
                .unwrap();
            results[assignment.parse::<usize>().unwrap()] += 1;
        }

        let total_weight: u64 = experiment.groups.iter().map(|group| group.weight).sum();
        for (count, group) in results.iter().zip(&experiment.groups) {
            let actual = *count as f64 / trials as f64;
            let expected = group.weight as f64 / total_weight as f64;
            assert!(
                (actual - expected).abs() < tolerance,
                "group {} got {actual}, expected {expected}",
                group.value
            );
        }
    }

    #[test]
    fn weight_changes_move_boundaries_instead_of_redistributing() {
        let select = |groups: &[(&str, u64)]| {
            experiment(groups)
                .select_treatment("exp-id", "device-id", &Sha1Sharder)
                .map(str::to_owned)
        };

        // This subject happens to land near the 15% boundary.
        assert_eq!(select(&[("1", 15), ("2", 85)]).as_deref(), Some("1"));
        assert_eq!(select(&[("1", 14), ("2", 86)]).as_deref(), Some("2"));
        assert_eq!(select(&[("1", 16), ("2", 84)]).as_deref(), Some("1"));
    }

    #[test]
    fn increasing_a_weight_never_moves_subjects_out_of_that_group() {
        let before = experiment(&[("a", 3), ("b", 4), ("c", 5)]);
        let after = experiment(&[("a", 3), ("b", 6), ("c", 5)]);

        for i in 0..2_000 {
            let subject = format!("device_{i}");
            if before.select_treatment("exp", &subject, &Sha1Sharder) == Some("b") {
                assert_eq!(after.select_treatment("exp", &subject, &Sha1Sharder), Some("b"));
            }
        }
    }

    #[test]
    fn salt_reshuffles_assignments() {
        let mut experiment = experiment(&[("1", 1), ("2", 1)]);
        let mut select = |salt: Option<&str>| {
            experiment.salt = salt.map(str::to_owned);
            experiment
                .select_treatment("exp-id", "device-id", &Sha1Sharder)
                .map(str::to_owned)
        };

        assert_eq!(select(None).as_deref(), Some("1"));
        assert_eq!(select(Some("1")).as_deref(), Some("2"));
        assert_eq!(select(Some("2")).as_deref(), Some("1"));
        assert_eq!(select(Some("3")).as_deref(), Some("1"));
    }

    #[test]
    fn zero_weight_groups_are_never_selected() {
        let experiment = experiment(&[("5", 10), ("10", 5), ("15", 0)]);

        for i in 0..1_000 {
            let result = experiment.select_treatment("exp", &format!("device_{i}"), &Sha1Sharder);
            assert!(matches!(result, Some("5" | "10")), "unexpected {result:?}");
        }
    }

    #[test]
    fn zero_total_weight_selects_nothing() {
        let experiment = experiment(&[("a", 0), ("b", 0)]);

        assert_eq!(experiment.select_treatment("exp", "device", &Sha1Sharder), None);
    }

    #[test]
    fn boundary_point_belongs_to_lower_group() {
        let experiment = experiment(&[("a", 1), ("b", 1)]);
        let sharder = DeterministicSharder(HashMap::from([
            ("expon-boundary".to_owned(), 0.5),
            ("expabove".to_owned(), 0.75),
        ]));

        assert_eq!(experiment.select_treatment("exp", "on-boundary", &sharder), Some("a"));
        assert_eq!(experiment.select_treatment("exp", "above", &sharder), Some("b"));
    }

    #[test]
    fn salt_is_appended_to_the_seed() {
        let mut experiment = experiment(&[("a", 1), ("b", 1)]);
        experiment.salt = Some("salt".to_owned());
        let sharder = DeterministicSharder(HashMap::from([("expsubjectsalt".to_owned(), 0.9)]));

        assert_eq!(experiment.select_treatment("exp", "subject", &sharder), Some("b"));
    }

    #[test]
    fn device_experiments_bucket_on_device_id() {
        let configuration = configuration();

        let result = configuration
            .eval_assignment("device-exp", "device_42", None, &Sha1Sharder)
            .unwrap();

        assert_eq!(result.as_deref(), Some("5"));
    }

    #[test]
    fn user_experiments_need_a_login() {
        let configuration = configuration();

        assert_eq!(
            configuration
                .eval_assignment("user-exp", "device", None, &Sha1Sharder)
                .unwrap(),
            None
        );
        assert_eq!(
            configuration
                .eval_assignment("user-exp", "device", Some("user_2"), &Sha1Sharder)
                .unwrap()
                .as_deref(),
            Some("treatment")
        );
    }

    #[test]
    fn channel_experiments_are_decided_per_call() {
        let configuration = configuration();

        assert_eq!(
            configuration
                .eval_assignment("chan-exp", "device", Some("login"), &Sha1Sharder)
                .unwrap(),
            None
        );
        assert_eq!(
            configuration
                .eval_channel_assignment("chan-exp", "channel_0", &Sha1Sharder)
                .unwrap()
                .as_deref(),
            Some("a")
        );
        assert_eq!(
            configuration
                .eval_channel_assignment("device-exp", "channel_0", &Sha1Sharder)
                .unwrap(),
            None
        );
    }

    #[test]
    fn missing_experiment_is_deprecated() {
        let configuration = configuration();

        let result = configuration.eval_assignment("missing", "device", None, &Sha1Sharder);

        assert!(matches!(result, Err(Error::DeprecatedExperiment(id)) if id == "missing"));
    }

    #[test]
    fn disabled_experiment_reports_no_treatment() {
        let configuration = configuration();

        let result = configuration.eval_assignment("disabled-exp", "device", None, &Sha1Sharder);

        assert!(matches!(result, Err(Error::NoTreatmentSelected(id)) if id == "disabled-exp"));
    }
}
