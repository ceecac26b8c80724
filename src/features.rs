use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::event::TargetDescriptor;
use crate::window::HistoricalWindow;

/// A mean over fewer rows than this is too noisy to feed a model;
/// extraction refuses and the caller skips the event.
pub const DEFAULT_MIN_SAMPLES: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    /// Registry/name mismatch. A configuration bug, never skipped.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    /// Expected, data-dependent condition: the window does not hold
    /// enough qualifying rows for a trustworthy aggregate.
    #[error("insufficient history for {feature}: {got} qualifying rows, need {needed}")]
    InsufficientHistory {
        feature: String,
        needed: usize,
        got: usize,
    },
}

/// The two aggregate shapes every named feature reduces to, each
/// parameterized by a source measurement column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    /// Mean of the column over the target subject's own history.
    SelfAggregate,
    /// Mean of the column over rows played at the target's role
    /// against the target's opposing group.
    OpponentDefenseAggregate,
}

#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub shape: FeatureShape,
    pub column: String,
}

impl FeatureSpec {
    pub fn self_mean(column: &str) -> Self {
        Self {
            shape: FeatureShape::SelfAggregate,
            column: column.to_string(),
        }
    }

    pub fn opponent_defense_mean(column: &str) -> Self {
        Self {
            shape: FeatureShape::OpponentDefenseAggregate,
            column: column.to_string(),
        }
    }
}

/// Open name -> spec registry. Adding a feature is one `register`
/// call; the extraction algorithm never changes.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    specs: HashMap<String, FeatureSpec>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, spec: FeatureSpec) {
        self.specs.insert(name.to_string(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }
}

static DEFAULT_REGISTRY: Lazy<FeatureRegistry> = Lazy::new(|| {
    let mut reg = FeatureRegistry::new();
    reg.register("avg_game_time", FeatureSpec::self_mean("gamelength"));
    reg.register("assists_per_game", FeatureSpec::self_mean("assists"));
    reg.register("deaths_per_game", FeatureSpec::self_mean("deaths"));
    reg.register("kills_per_game", FeatureSpec::self_mean("kills"));
    reg.register("cs_diff_at_10", FeatureSpec::self_mean("csdiffat10"));
    reg.register("cs_diff_at_15", FeatureSpec::self_mean("csdiffat15"));
    reg.register(
        "opp_kills_conceded",
        FeatureSpec::opponent_defense_mean("kills"),
    );
    reg.register(
        "opp_deaths_forced",
        FeatureSpec::opponent_defense_mean("deaths"),
    );
    reg
});

pub fn default_registry() -> &'static FeatureRegistry {
    &DEFAULT_REGISTRY
}

/// Reads a newline-separated feature-name file. Order in the file
/// defines dataset column order. Names are validated against the
/// registry up front so a typo fails before a long batch run.
pub fn read_feature_names(path: &Path, registry: &FeatureRegistry) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read feature name file {}", path.display()))?;
    let mut names = Vec::new();
    for line in raw.lines() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        if !registry.contains(name) {
            return Err(anyhow!(FeatureError::UnknownFeature(name.to_string())));
        }
        names.push(name.to_string());
    }
    if names.is_empty() {
        return Err(anyhow!("feature name file {} is empty", path.display()));
    }
    Ok(names)
}

/// Computes named features for one target against one historical
/// window. Created per target, discarded after extraction; successful
/// computations are memoized for the life of the instance.
pub struct FeatureExtractor<'a> {
    window: HistoricalWindow<'a>,
    target: &'a TargetDescriptor,
    registry: &'a FeatureRegistry,
    min_samples: usize,
    cache: HashMap<String, f64>,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(
        window: HistoricalWindow<'a>,
        target: &'a TargetDescriptor,
        registry: &'a FeatureRegistry,
    ) -> Self {
        Self::with_min_samples(window, target, registry, DEFAULT_MIN_SAMPLES)
    }

    pub fn with_min_samples(
        window: HistoricalWindow<'a>,
        target: &'a TargetDescriptor,
        registry: &'a FeatureRegistry,
        min_samples: usize,
    ) -> Self {
        Self {
            window,
            target,
            registry,
            min_samples,
            cache: HashMap::new(),
        }
    }

    pub fn extract(&mut self, feature_name: &str) -> Result<f64, FeatureError> {
        if let Some(value) = self.cache.get(feature_name) {
            return Ok(*value);
        }

        let spec = self
            .registry
            .get(feature_name)
            .ok_or_else(|| FeatureError::UnknownFeature(feature_name.to_string()))?;

        let values: Vec<f64> = match spec.shape {
            FeatureShape::SelfAggregate => self
                .window
                .for_subject(&self.target.subject_id)
                .filter_map(|e| e.measurement(&spec.column))
                .collect(),
            FeatureShape::OpponentDefenseAggregate => self
                .window
                .for_opposing_defense(&self.target.opposing_group_id, &self.target.role)
                .iter()
                .filter_map(|e| e.measurement(&spec.column))
                .collect(),
        };

        if values.len() < self.min_samples {
            return Err(FeatureError::InsufficientHistory {
                feature: feature_name.to_string(),
                needed: self.min_samples,
                got: values.len(),
            });
        }

        let value = values.iter().sum::<f64>() / values.len() as f64;
        self.cache.insert(feature_name.to_string(), value);
        Ok(value)
    }

    pub fn extract_all(&mut self, feature_names: &[String]) -> Result<Vec<f64>, FeatureError> {
        feature_names
            .iter()
            .map(|name| self.extract(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStore, TargetDescriptor, test_event};
    use chrono::NaiveDateTime;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, crate::event::TIME_FORMAT).unwrap()
    }

    fn store_with_kills(n: usize) -> EventStore {
        let rows = (0..n)
            .map(|i| {
                let stamp = format!("2024-02-{:02} 17:00:00", i + 1);
                let game = format!("g{i}");
                test_event(&stamp, "Zeus", "T1", "top", &game, &[("kills", (i + 1) as f64)])
            })
            .collect();
        EventStore::from_rows(rows)
    }

    fn target(stamp: &str) -> TargetDescriptor {
        TargetDescriptor {
            timestamp: ts(stamp),
            subject_id: "Zeus".to_string(),
            group_id: "T1".to_string(),
            opposing_group_id: "GenG".to_string(),
            role: "top".to_string(),
        }
    }

    #[test]
    fn self_aggregate_is_mean_of_prior_games() {
        let store = store_with_kills(6);
        let t = target("2024-03-01 00:00:00");
        let w = HistoricalWindow::before(&store, t.timestamp);
        let mut fe = FeatureExtractor::new(w, &t, default_registry());
        let v = fe.extract("kills_per_game").unwrap();
        assert!((v - 3.5).abs() < 1e-12);
    }

    #[test]
    fn min_samples_boundary() {
        let store = store_with_kills(5);
        let t = target("2024-03-01 00:00:00");

        // Exactly min_samples qualifying rows succeeds.
        let w = HistoricalWindow::before(&store, t.timestamp);
        let mut fe = FeatureExtractor::new(w, &t, default_registry());
        let v = fe.extract("kills_per_game").unwrap();
        assert!((v - 3.0).abs() < 1e-12);

        // One fewer fails with the typed condition.
        let t4 = target("2024-02-05 00:00:00");
        let w4 = HistoricalWindow::before(&store, t4.timestamp);
        let mut fe4 = FeatureExtractor::new(w4, &t4, default_registry());
        match fe4.extract("kills_per_game") {
            Err(FeatureError::InsufficientHistory { needed, got, .. }) => {
                assert_eq!(needed, 5);
                assert_eq!(got, 4);
            }
            other => panic!("expected InsufficientHistory, got {other:?}"),
        }
    }

    #[test]
    fn null_measurements_do_not_count() {
        // 6 games, only 4 carry the assists column.
        let mut rows = Vec::new();
        for i in 0..6u32 {
            let stamp = format!("2024-02-{:02} 17:00:00", i + 1);
            let game = format!("g{i}");
            let cols: &[(&str, f64)] = if i < 4 { &[("assists", 2.0)] } else { &[] };
            rows.push(test_event(&stamp, "Zeus", "T1", "top", &game, cols));
        }
        let store = EventStore::from_rows(rows);
        let t = target("2024-03-01 00:00:00");
        let w = HistoricalWindow::before(&store, t.timestamp);
        let mut fe = FeatureExtractor::new(w, &t, default_registry());
        match fe.extract("assists_per_game") {
            Err(FeatureError::InsufficientHistory { got, .. }) => assert_eq!(got, 4),
            other => panic!("expected InsufficientHistory, got {other:?}"),
        }
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let store = store_with_kills(6);
        let t = target("2024-03-01 00:00:00");
        let w = HistoricalWindow::before(&store, t.timestamp);
        let mut fe = FeatureExtractor::new(w, &t, default_registry());
        assert_eq!(
            fe.extract("no_such_feature"),
            Err(FeatureError::UnknownFeature("no_such_feature".to_string()))
        );
    }

    #[test]
    fn repeated_extraction_hits_the_cache() {
        let store = store_with_kills(6);
        let t = target("2024-03-01 00:00:00");
        let w = HistoricalWindow::before(&store, t.timestamp);
        let mut fe = FeatureExtractor::new(w, &t, default_registry());
        let first = fe.extract("kills_per_game").unwrap();
        let second = fe.extract("kills_per_game").unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn registry_is_open_for_extension() {
        let mut reg = default_registry().clone();
        reg.register("cs_diff_at_20", FeatureSpec::self_mean("csdiffat20"));
        assert!(reg.contains("cs_diff_at_20"));
    }

    fn name_file(tag: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "lol_props_features_{tag}_{}.txt",
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn feature_name_file_preserves_order_and_skips_noise() {
        let path = name_file(
            "order",
            "# prop model columns\n\nkills_per_game\n  assists_per_game  \n\navg_game_time\n",
        );
        let names = read_feature_names(&path, default_registry()).unwrap();
        assert_eq!(
            names,
            vec!["kills_per_game", "assists_per_game", "avg_game_time"]
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn feature_name_file_rejects_a_typo_before_any_run() {
        let path = name_file("typo", "kills_per_game\nkills_per_gane\n");
        let err = read_feature_names(&path, default_registry()).unwrap_err();
        assert!(err.to_string().contains("unknown feature"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn feature_name_file_with_no_names_is_an_error() {
        let path = name_file("empty", "# nothing here\n\n");
        assert!(read_feature_names(&path, default_registry()).is_err());
        let _ = fs::remove_file(&path);
    }
}
