//! Per-subject passage-time computation
//!
//! A [`PassageTimeRunner`] takes one subject's raw session record and turns
//! it into REDCap fields:
//!
//! 1. Baseline, manipulation and near/far passage times are read from the record
//! 2. Words per minute are derived for every timed passage
//! 3. Unless the session was discontinued, baseline and category aggregates
//!    are added
//! 4. Keys and values are rendered in the REDCap field conventions

use tracing::{debug, warn};

use crate::config::StudyConfig;
use crate::error::PassageError;
use crate::stats::{mean, round_to, std_dev};
use crate::types::{
    Category, Condition, MetricKey, MetricKind, MetricValue, Metrics, RawRecord, RedcapRecord,
    RunnerResults, DECIMALS, TIME_SUFFIX,
};

/// Legacy passage name used by the passages survey
const LEGACY_PASSAGE_NAME: &str = "mustang";

/// Name the REDCap project uses for the same passage
const REDCAP_PASSAGE_NAME: &str = "must";

/// Computes reading metrics for a single subject
pub struct PassageTimeRunner<'a> {
    label: String,
    group: Option<u32>,
    record: RawRecord,
    version: String,
    config: &'a StudyConfig,
    results: Option<RunnerResults>,
}

impl<'a> PassageTimeRunner<'a> {
    /// Create a runner for one subject.
    ///
    /// `group` is the 1-based group assignment; `None` or `Some(0)` marks a
    /// subject outside every experimental condition.
    pub fn new(
        label: impl Into<String>,
        group: Option<u32>,
        record: RawRecord,
        version: impl Into<String>,
        config: &'a StudyConfig,
    ) -> Self {
        Self {
            label: label.into(),
            group,
            record,
            version: version.into(),
            config,
            results: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Results of the last successful [`process`](Self::process) call
    pub fn results(&self) -> Option<&RunnerResults> {
        self.results.as_ref()
    }

    pub fn into_results(self) -> Option<RunnerResults> {
        self.results
    }

    /// Elapsed time for a passage plus the subject's discontinued flag
    pub fn get_time(&self, passage: &str) -> Result<(MetricValue, bool), PassageError> {
        let discontinued = self.record.discontinued()?;
        let key = format!("{}{}", passage, TIME_SUFFIX);
        let time = self.record.require(&key)?.to_metric();
        Ok((time, discontinued))
    }

    /// Words per minute for a passage read in `seconds`, rounded to 3 places.
    ///
    /// `seconds` must be positive: zero gives infinity and a negative time a
    /// negative rate. [`process`](Self::process) never calls this for such
    /// times; it leaves their WPM blank and logs a warning instead.
    pub fn compute_wpm(
        &self,
        passage: &str,
        version: &str,
        seconds: f64,
    ) -> Result<f64, PassageError> {
        let words = self.config.word_count(version, passage)?;
        Ok(round_to(words as f64 / (seconds / 60.0), DECIMALS))
    }

    /// Run the full computation, replacing any earlier results.
    ///
    /// Fails without touching `results` when the record is missing a key the
    /// group needs or when the study tables have a gap.
    pub fn process(&mut self) -> Result<&RunnerResults, PassageError> {
        let results = match self.group.filter(|&g| g > 0) {
            None => {
                debug!(label = %self.label, "no group assigned, passing record through");
                RunnerResults::Unassigned(self.record.clone())
            }
            Some(group_id) => {
                let metrics = self.collect_metrics(group_id)?;
                RunnerResults::Formatted(format_for_redcap(&metrics, group_id))
            }
        };
        Ok(&*self.results.insert(results))
    }

    fn collect_metrics(&self, group_id: u32) -> Result<Metrics, PassageError> {
        let group = self.config.group(group_id)?;
        let mut metrics = Metrics::new();

        let mut baseline_times = Vec::with_capacity(group.baseline.len());
        for passage in &group.baseline {
            let (time, _) = self.get_time(passage)?;
            metrics.insert(
                MetricKey::passage(passage, Condition::Baseline, MetricKind::Sec),
                time.clone(),
            );
            baseline_times.push(time);
        }

        for manip in &group.manipulation {
            let (time, _) = self.get_time(&manip.passage)?;
            metrics.insert(
                MetricKey::passage(
                    &manip.passage,
                    Condition::Manipulation(manip.category),
                    MetricKind::Sec,
                ),
                time,
            );
        }

        for (condition, passage) in [(Condition::Near, &group.near), (Condition::Far, &group.far)] {
            let (time, _) = self.get_time(passage)?;
            metrics.insert(MetricKey::passage(passage, condition, MetricKind::Sec), time);
        }

        debug!(
            label = %self.label,
            group = group_id,
            passages = metrics.len(),
            "collected passage times"
        );

        self.derive_wpm(&mut metrics)?;

        if self.record.discontinued()? {
            debug!(label = %self.label, "passages discontinued, skipping aggregates");
            return Ok(metrics);
        }

        let seconds: Vec<f64> = baseline_times.iter().filter_map(MetricValue::as_f64).collect();
        metrics.insert(MetricKey::BaselineMeanSec, stat_value(mean(&seconds)));
        metrics.insert(MetricKey::BaselineMeanStdev, stat_value(std_dev(&seconds)));

        for category in Category::ALL {
            let manip = group
                .manipulation_for(category)
                .ok_or(PassageError::MissingCategory {
                    group: group_id,
                    category,
                })?;
            let key = MetricKey::passage(
                &manip.passage,
                Condition::Manipulation(category),
                MetricKind::Wpm,
            );
            let value = metrics.get(&key).cloned().unwrap_or_else(MetricValue::empty);
            metrics.insert(MetricKey::Category(category), value);
        }

        let baseline_wpm: Vec<f64> = metrics
            .iter()
            .filter(|(key, _)| {
                matches!(
                    key,
                    MetricKey::Passage {
                        condition: Condition::Baseline,
                        kind: MetricKind::Wpm,
                        ..
                    }
                )
            })
            .filter_map(|(_, value)| value.as_f64())
            .collect();
        metrics.insert(MetricKey::BaselineWpmRaw, stat_value(mean(&baseline_wpm)));
        metrics.insert(MetricKey::BaselineWpmStdev, stat_value(std_dev(&baseline_wpm)));

        Ok(metrics)
    }

    /// Add a `_wpm` metric for every `_sec` metric.
    ///
    /// Times that are not a positive number (text sentinels, zero, negative
    /// values) get an empty WPM and a warning rather than an error.
    fn derive_wpm(&self, metrics: &mut Metrics) -> Result<(), PassageError> {
        let timed: Vec<(MetricKey, MetricValue)> = metrics
            .iter()
            .filter_map(|(key, value)| key.to_wpm().map(|wpm_key| (wpm_key, value.clone())))
            .collect();

        for (wpm_key, time) in timed {
            let MetricKey::Passage { passage, .. } = &wpm_key else {
                continue;
            };
            let wpm = match time.as_f64() {
                Some(seconds) if seconds > 0.0 => {
                    MetricValue::Float(self.compute_wpm(passage, &self.version, seconds)?)
                }
                _ => {
                    warn!(
                        label = %self.label,
                        passage = %passage,
                        time = %time.to_redcap(),
                        "passage time is not a positive number, leaving WPM blank"
                    );
                    MetricValue::empty()
                }
            };
            metrics.insert(wpm_key, wpm);
        }
        Ok(())
    }
}

fn stat_value(stat: Option<f64>) -> MetricValue {
    stat.map(MetricValue::Float).unwrap_or_else(MetricValue::empty)
}

/// Render metrics as REDCap fields.
///
/// The passages survey numbers groups from 1 while the REDCap project numbers
/// them from 0, and REDCap names the "mustang" passage "must".
pub fn format_for_redcap(metrics: &Metrics, group_id: u32) -> RedcapRecord {
    let mut record: RedcapRecord = metrics
        .iter()
        .map(|(key, value)| {
            (
                key.to_string().replace(LEGACY_PASSAGE_NAME, REDCAP_PASSAGE_NAME),
                value.to_redcap(),
            )
        })
        .collect();
    record.insert(
        MetricKey::Group.to_string(),
        MetricValue::Integer(i64::from(group_id) - 1).to_redcap(),
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupPassages, ManipulationPassage};
    use crate::types::RawValue;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const FIXTURE: &str = include_str!("../fixtures/study.toml");

    fn fixture_config() -> StudyConfig {
        StudyConfig::from_toml_str(FIXTURE).unwrap()
    }

    /// Group 1 with two baseline passages, A and B
    fn ab_config() -> StudyConfig {
        let manipulation = Category::ALL
            .iter()
            .enumerate()
            .map(|(i, &category)| ManipulationPassage {
                passage: format!("M{}", i),
                category,
            })
            .collect();
        let mut groups = BTreeMap::new();
        groups.insert(
            1,
            GroupPassages {
                baseline: vec!["A".to_string(), "B".to_string()],
                manipulation,
                near: "N".to_string(),
                far: "F".to_string(),
            },
        );
        let counts: BTreeMap<String, u32> = [
            ("A", 150),
            ("B", 180),
            ("M0", 100),
            ("M1", 100),
            ("M2", 100),
            ("M3", 100),
            ("N", 100),
            ("F", 100),
        ]
        .into_iter()
        .map(|(p, w)| (p.to_string(), w))
        .collect();
        let mut word_counts = BTreeMap::new();
        word_counts.insert("1".to_string(), counts);
        StudyConfig {
            groups,
            word_counts,
        }
    }

    fn ab_record() -> RawRecord {
        RawRecord::new()
            .with("passages_discontinued", false)
            .with("A_time", 60i64)
            .with("B_time", 90i64)
            .with("M0_time", 60i64)
            .with("M1_time", 60i64)
            .with("M2_time", 60i64)
            .with("M3_time", 60i64)
            .with("N_time", 60i64)
            .with("F_time", 60i64)
    }

    /// Complete group 1 session in the fixture battery
    fn group_one_record() -> RawRecord {
        RawRecord::new()
            .with("passages_discontinued", "0")
            .with("lion_time", 60i64)
            .with("mustang_time", 90i64)
            .with("storm_time", 120i64)
            .with("maple_time", "80")
            .with("river_time", 105i64)
            .with("garden_time", 95.0)
            .with("harbor_time", 70i64)
            .with("comet_time", 66i64)
            .with("notes", "calm")
    }

    fn formatted(results: &RunnerResults) -> &RedcapRecord {
        results.formatted().expect("expected formatted results")
    }

    #[test]
    fn test_two_passage_baseline_example() {
        let config = ab_config();
        let mut runner = PassageTimeRunner::new("S001", Some(1), ab_record(), "1", &config);
        let out = formatted(runner.process().unwrap());

        assert_eq!(out["A_baseline_sec"], "60");
        assert_eq!(out["A_baseline_wpm"], "150.000");
        assert_eq!(out["B_baseline_sec"], "90");
        assert_eq!(out["B_baseline_wpm"], "120.000");
        assert_eq!(out["baseline_mean_sec"], "75.000");
        assert_eq!(out["baseline_mean_stdev"], "15.000");
        assert_eq!(out["baseline_wpm_raw"], "135.000");
        assert_eq!(out["baseline_wpm_stdev"], "15.000");
        assert_eq!(out["group"], "0");
    }

    #[test]
    fn test_full_group_one_session() {
        let config = fixture_config();
        let mut runner =
            PassageTimeRunner::new("S002", Some(1), group_one_record(), "a", &config);
        let out = formatted(runner.process().unwrap()).clone();

        let expected: RedcapRecord = [
            ("lion_baseline_sec", "60"),
            ("lion_baseline_wpm", "150.000"),
            ("must_baseline_sec", "90"),
            ("must_baseline_wpm", "120.000"),
            ("storm_vocab_sec", "120"),
            ("storm_vocab_wpm", "100.000"),
            ("maple_cohesion_sec", "80"),
            ("maple_cohesion_wpm", "120.000"),
            ("river_decode_sec", "105"),
            ("river_decode_wpm", "120.000"),
            ("garden_syntax_sec", "95.000"),
            ("garden_syntax_wpm", "120.000"),
            ("harbor_near_sec", "70"),
            ("harbor_near_wpm", "150.000"),
            ("comet_far_sec", "66"),
            ("comet_far_wpm", "150.000"),
            ("baseline_mean_sec", "75.000"),
            ("baseline_mean_stdev", "15.000"),
            ("baseline_wpm_raw", "135.000"),
            ("baseline_wpm_stdev", "15.000"),
            ("vocab", "100.000"),
            ("cohesion", "120.000"),
            ("decode", "120.000"),
            ("syntax", "120.000"),
            ("group", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(out, expected);
    }

    #[test]
    fn test_unassigned_group_is_identity() {
        let config = fixture_config();
        let record = RawRecord::new()
            .with("notes", "no condition")
            .with("lion_time", 12i64)
            .with("mustang_time", RawValue::Null);

        for group in [None, Some(0)] {
            let mut runner = PassageTimeRunner::new("S003", group, record.clone(), "a", &config);
            let results = runner.process().unwrap();
            assert_eq!(results, &RunnerResults::Unassigned(record.clone()));
        }
    }

    #[test]
    fn test_compute_wpm_formula() {
        let config = ab_config();
        let runner = PassageTimeRunner::new("S004", Some(1), ab_record(), "1", &config);

        assert_eq!(runner.compute_wpm("A", "1", 60.0).unwrap(), 150.0);
        assert_eq!(runner.compute_wpm("B", "1", 90.0).unwrap(), 120.0);
        assert_eq!(runner.compute_wpm("A", "1", 47.0).unwrap(), 191.489);
    }

    #[test]
    fn test_compute_wpm_decreases_with_time() {
        let config = ab_config();
        let runner = PassageTimeRunner::new("S005", Some(1), ab_record(), "1", &config);

        let mut previous = f64::INFINITY;
        for seconds in [5.0, 30.0, 59.5, 60.0, 120.0, 600.0] {
            let wpm = runner.compute_wpm("A", "1", seconds).unwrap();
            assert!(wpm < previous, "{} wpm at {}s is not below {}", wpm, seconds, previous);
            previous = wpm;
        }
    }

    #[test]
    fn test_compute_wpm_configuration_gap() {
        let config = ab_config();
        let runner = PassageTimeRunner::new("S006", Some(1), ab_record(), "1", &config);

        assert!(matches!(
            runner.compute_wpm("Z", "1", 60.0),
            Err(PassageError::MissingWordCount { .. })
        ));
        assert!(matches!(
            runner.compute_wpm("A", "9", 60.0),
            Err(PassageError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_get_time() {
        let config = fixture_config();
        let runner = PassageTimeRunner::new("S007", Some(1), group_one_record(), "a", &config);

        assert_eq!(runner.get_time("lion").unwrap(), (MetricValue::Integer(60), false));
        assert_eq!(runner.get_time("maple").unwrap(), (MetricValue::Integer(80), false));
        assert!(matches!(
            runner.get_time("unicorn"),
            Err(PassageError::MissingData { key }) if key == "unicorn_time"
        ));
    }

    #[test]
    fn test_non_numeric_time_blanks_wpm() {
        let config = fixture_config();
        let record = group_one_record().with("storm_time", "NA");
        let mut runner = PassageTimeRunner::new("S008", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        assert_eq!(out["storm_vocab_sec"], "NA");
        assert_eq!(out["storm_vocab_wpm"], "");
        assert_eq!(out["vocab"], "");
        assert_eq!(out["cohesion"], "120.000");
    }

    #[test]
    fn test_zero_time_blanks_wpm() {
        let config = fixture_config();
        let record = group_one_record().with("comet_time", 0i64);
        let mut runner = PassageTimeRunner::new("S009", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        assert_eq!(out["comet_far_sec"], "0");
        assert_eq!(out["comet_far_wpm"], "");
    }

    #[test]
    fn test_negative_time_blanks_wpm() {
        let config = fixture_config();
        let record = group_one_record().with("comet_time", -30i64);
        let mut runner = PassageTimeRunner::new("S009", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        assert_eq!(out["comet_far_sec"], "-30");
        assert_eq!(out["comet_far_wpm"], "");
    }

    #[test]
    fn test_non_numeric_baseline_excluded_from_stats() {
        let config = fixture_config();
        let record = group_one_record().with("mustang_time", "");
        let mut runner = PassageTimeRunner::new("S010", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        assert_eq!(out["must_baseline_wpm"], "");
        assert_eq!(out["baseline_mean_sec"], "60.000");
        assert_eq!(out["baseline_mean_stdev"], "0.000");
        assert_eq!(out["baseline_wpm_raw"], "150.000");
    }

    #[test]
    fn test_discontinued_skips_aggregates() {
        let config = fixture_config();
        let record = group_one_record()
            .with("passages_discontinued", "1")
            .with("river_time", "NA")
            .with("garden_time", "NA");
        let mut runner = PassageTimeRunner::new("S011", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        for key in [
            "baseline_mean_sec",
            "baseline_mean_stdev",
            "baseline_wpm_raw",
            "baseline_wpm_stdev",
            "vocab",
            "cohesion",
            "decode",
            "syntax",
        ] {
            assert!(!out.contains_key(key), "{} should be absent", key);
        }
        assert_eq!(out["river_decode_wpm"], "");
        assert_eq!(out["lion_baseline_wpm"], "150.000");
        assert_eq!(out["group"], "0");
    }

    #[test]
    fn test_every_sec_has_wpm() {
        let config = fixture_config();
        let record = group_one_record().with("harbor_time", "skipped");
        let mut runner = PassageTimeRunner::new("S012", Some(1), record, "a", &config);
        let out = formatted(runner.process().unwrap());

        let passage_secs: Vec<&String> = out
            .keys()
            .filter(|k| k.ends_with("_sec") && k.as_str() != "baseline_mean_sec")
            .collect();
        assert_eq!(passage_secs.len(), 8);
        for key in passage_secs {
            let wpm_key = key.replace("_sec", "_wpm");
            assert!(out.contains_key(&wpm_key), "{} has no {}", key, wpm_key);
        }
    }

    #[test]
    fn test_mustang_renamed_in_every_condition() {
        let config = fixture_config();
        let record = RawRecord::new()
            .with("passages_discontinued", 0i64)
            .with("storm_time", 100i64)
            .with("maple_time", 100i64)
            .with("lion_time", 100i64)
            .with("mustang_time", 45i64)
            .with("garden_time", 100i64)
            .with("river_time", 100i64)
            .with("comet_time", 100i64)
            .with("harbor_time", 100i64);
        let mut runner = PassageTimeRunner::new("S013", Some(2), record, "b", &config);
        let out = formatted(runner.process().unwrap());

        assert!(out.keys().all(|k| !k.contains("mustang")));
        assert_eq!(out["must_cohesion_sec"], "45");
        assert_eq!(out["must_cohesion_wpm"], "244.000");
        assert_eq!(out["cohesion"], "244.000");
        assert_eq!(out["group"], "1");
    }

    #[test]
    fn test_group_is_zero_based() {
        for group_id in 1..=12u32 {
            let record = format_for_redcap(&Metrics::new(), group_id);
            assert_eq!(record["group"], (group_id - 1).to_string());
        }
    }

    #[test]
    fn test_missing_time_aborts_subject() {
        let config = fixture_config();
        let record: RawRecord = group_one_record()
            .iter()
            .filter(|(k, _)| k.as_str() != "garden_time")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut runner = PassageTimeRunner::new("S014", Some(1), record, "a", &config);

        let err = runner.process().unwrap_err();
        assert!(matches!(err, PassageError::MissingData { ref key } if key == "garden_time"));
        assert!(runner.results().is_none());
    }

    #[test]
    fn test_unknown_group_fails_loudly() {
        let config = fixture_config();
        let mut runner = PassageTimeRunner::new("S015", Some(7), group_one_record(), "a", &config);

        let err = runner.process().unwrap_err();
        assert!(err.is_configuration_gap());
        assert!(matches!(err, PassageError::UnknownGroup(7)));
    }

    #[test]
    fn test_missing_category_fails_when_aggregating() {
        let mut config = fixture_config();
        config
            .groups
            .get_mut(&1)
            .unwrap()
            .manipulation
            .retain(|m| m.category != Category::Decode);

        let mut runner =
            PassageTimeRunner::new("S016", Some(1), group_one_record(), "a", &config);
        assert!(matches!(
            runner.process(),
            Err(PassageError::MissingCategory {
                group: 1,
                category: Category::Decode
            })
        ));

        let discontinued = group_one_record().with("passages_discontinued", true);
        let mut runner = PassageTimeRunner::new("S016", Some(1), discontinued, "a", &config);
        assert!(runner.process().is_ok());
    }

    #[test]
    fn test_reprocessing_is_stable() {
        let config = fixture_config();
        let mut runner =
            PassageTimeRunner::new("S017", Some(1), group_one_record(), "a", &config);

        let first = runner.process().unwrap().clone();
        let second = runner.process().unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(runner.label(), "S017");
        assert_eq!(runner.into_results(), Some(second));
    }

    #[test]
    fn test_formatting_is_fixed_point() {
        let config = fixture_config();
        let mut runner =
            PassageTimeRunner::new("S018", Some(1), group_one_record(), "a", &config);
        let out = formatted(runner.process().unwrap());

        for (key, value) in out {
            assert_eq!(&MetricValue::parse(value).to_redcap(), value, "field {}", key);
        }
    }
}
