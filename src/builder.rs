use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::dataset::{Dataset, DatasetRow, checkpoint_path, merge_checkpoints};
use crate::event::{EventStore, TargetDescriptor};
use crate::features::{FeatureError, FeatureExtractor, FeatureRegistry};
use crate::labels::{LabelError, LabelRegistry};
use crate::window::HistoricalWindow;

pub const DEFAULT_FLUSH_EVERY: usize = 1000;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Checkpoint cadence: flush after this many successful rows.
    pub flush_every: usize,
    pub min_samples: usize,
    /// Root under which a timestamped run directory is created.
    pub checkpoint_root: PathBuf,
    /// Cooperative interruption: when set, the builder flushes the
    /// current buffer and returns what it has.
    pub stop: Option<Arc<AtomicBool>>,
}

impl BatchConfig {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, checkpoint_root: &Path) -> Self {
        Self {
            start,
            end,
            flush_every: DEFAULT_FLUSH_EVERY,
            min_samples: crate::features::DEFAULT_MIN_SAMPLES,
            checkpoint_root: checkpoint_root.to_path_buf(),
            stop: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub candidates: usize,
    pub processed: usize,
    pub skipped_insufficient_history: usize,
    pub skipped_malformed: usize,
    pub skipped_unknown_subject: usize,
    pub checkpoints_written: usize,
    pub interrupted: bool,
    pub run_dir: PathBuf,
    /// First few skip reasons, kept for post-run inspection.
    pub sample_errors: Vec<String>,
}

const MAX_SAMPLE_ERRORS: usize = 20;

impl BatchSummary {
    fn note_error(&mut self, msg: String) {
        if self.sample_errors.len() < MAX_SAMPLE_ERRORS {
            self.sample_errors.push(msg);
        }
    }
}

enum RowOutcome {
    Row(Box<DatasetRow>),
    InsufficientHistory(String),
    Malformed(String),
    UnknownSubject,
    /// Feature registry misconfiguration: aborts the whole run.
    Fatal(FeatureError),
}

/// Allocates a fresh timestamped directory under `root`. Runs started
/// within the same second get a numeric suffix instead of sharing
/// (and cross-contaminating) one part set.
fn create_run_dir(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("create checkpoint root {}", root.display()))?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    for attempt in 0..1000u32 {
        let candidate = if attempt == 0 {
            root.join(format!("checkpoint_{stamp}"))
        } else {
            root.join(format!("checkpoint_{stamp}_{attempt:03}"))
        };
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create run dir {}", candidate.display()));
            }
        }
    }
    Err(anyhow!("could not allocate a run dir under {}", root.display()))
}

/// Iterates the store in time order, extracts features and label per
/// event, buffers rows and flushes a checkpoint file every
/// `flush_every` successes, then merges all checkpoints into the
/// master dataset.
///
/// Skips are per-event and never abort the batch; only registry
/// misconfiguration (unknown feature/label name) and persistence
/// failures do.
pub fn build_dataset(
    store: &EventStore,
    registry: &FeatureRegistry,
    feature_names: &[String],
    labels: &LabelRegistry,
    label_name: &str,
    config: &BatchConfig,
) -> Result<(Dataset, BatchSummary)> {
    // Label names must be checked here: a bad one would otherwise be
    // misread per event as a malformed row and skipped. Feature names
    // need no pre-scan; an unknown one aborts on the first chunk.
    if labels.get(label_name).is_none() {
        return Err(anyhow!(LabelError::UnknownLabel(label_name.to_string())));
    }

    let run_dir = create_run_dir(&config.checkpoint_root)?;

    let mut summary = BatchSummary {
        run_dir: run_dir.clone(),
        ..Default::default()
    };

    let candidates: Vec<_> = store
        .events()
        .iter()
        .filter(|e| e.timestamp >= config.start && e.timestamp <= config.end)
        .collect();
    summary.candidates = candidates.len();

    let flush_every = config.flush_every.max(1);
    let mut buffer: Vec<DatasetRow> = Vec::with_capacity(flush_every);
    let mut seq = 0usize;

    // Each event's window and extraction are independent, so chunks
    // are extracted in parallel; chunk results come back in original
    // order, keeping checkpoint files time-ordered anyway.
    'outer: for chunk in candidates.chunks(flush_every) {
        let outcomes: Vec<RowOutcome> = chunk
            .par_iter()
            .map(|event| {
                process_event(store, registry, feature_names, labels, label_name, config, event)
            })
            .collect();

        for outcome in outcomes {
            match outcome {
                RowOutcome::Row(row) => {
                    buffer.push(*row);
                    summary.processed += 1;
                    if buffer.len() >= flush_every {
                        flush(&run_dir, feature_names, label_name, &mut buffer, &mut seq, &mut summary)?;
                    }
                }
                RowOutcome::InsufficientHistory(msg) => {
                    summary.skipped_insufficient_history += 1;
                    summary.note_error(msg);
                }
                RowOutcome::Malformed(msg) => {
                    summary.skipped_malformed += 1;
                    summary.note_error(msg);
                }
                RowOutcome::UnknownSubject => summary.skipped_unknown_subject += 1,
                RowOutcome::Fatal(err) => return Err(anyhow!(err)),
            }
        }

        if let Some(stop) = &config.stop
            && stop.load(Ordering::Relaxed)
        {
            summary.interrupted = true;
            break 'outer;
        }
    }

    if !buffer.is_empty() {
        flush(&run_dir, feature_names, label_name, &mut buffer, &mut seq, &mut summary)?;
    }

    let dataset = merge_checkpoints(&run_dir, feature_names, label_name)?;
    write_summary(&run_dir, &summary)?;
    Ok((dataset, summary))
}

fn process_event(
    store: &EventStore,
    registry: &FeatureRegistry,
    feature_names: &[String],
    labels: &LabelRegistry,
    label_name: &str,
    config: &BatchConfig,
    event: &crate::event::Event,
) -> RowOutcome {
    if event.has_unknown_subject() {
        return RowOutcome::UnknownSubject;
    }
    let Some(target) = TargetDescriptor::from_event(event) else {
        return RowOutcome::Malformed(format!(
            "{}/{}: match does not have exactly two groups",
            event.match_id, event.subject_id
        ));
    };

    let window = HistoricalWindow::before(store, target.timestamp);
    let mut extractor =
        FeatureExtractor::with_min_samples(window, &target, registry, config.min_samples);

    let mut features = Vec::with_capacity(feature_names.len());
    for name in feature_names {
        match extractor.extract(name) {
            Ok(value) if value.is_finite() => features.push(value),
            Ok(value) => {
                return RowOutcome::Malformed(format!(
                    "{}/{}: feature {name} is non-finite ({value})",
                    event.match_id, event.subject_id
                ));
            }
            Err(err @ FeatureError::InsufficientHistory { .. }) => {
                return RowOutcome::InsufficientHistory(format!(
                    "{}/{}: {err}",
                    event.match_id, event.subject_id
                ));
            }
            Err(err @ FeatureError::UnknownFeature(_)) => return RowOutcome::Fatal(err),
        }
    }

    let label = match labels.extract(event, label_name) {
        Ok(value) if value.is_finite() => value,
        Ok(value) => {
            return RowOutcome::Malformed(format!(
                "{}/{}: label is non-finite ({value})",
                event.match_id, event.subject_id
            ));
        }
        // Label names were validated up front; a failure here means a
        // bad row, not a bad configuration.
        Err(err) => {
            return RowOutcome::Malformed(format!("{}/{}: {err}", event.match_id, event.subject_id));
        }
    };

    RowOutcome::Row(Box::new(DatasetRow {
        timestamp: event.timestamp,
        match_id: event.match_id.clone(),
        subject_id: event.subject_id.clone(),
        group_id: event.group_id.clone(),
        opposing_group_id: target.opposing_group_id,
        role: event.role.clone(),
        features,
        label,
    }))
}

fn flush(
    run_dir: &Path,
    feature_names: &[String],
    label_name: &str,
    buffer: &mut Vec<DatasetRow>,
    seq: &mut usize,
    summary: &mut BatchSummary,
) -> Result<()> {
    let path = checkpoint_path(run_dir, *seq);
    crate::dataset::write_rows(&path, feature_names, label_name, buffer)
        .with_context(|| format!("flush checkpoint {}", path.display()))?;
    buffer.clear();
    *seq += 1;
    summary.checkpoints_written += 1;
    Ok(())
}

fn write_summary(run_dir: &Path, summary: &BatchSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serialize batch summary")?;
    std::fs::write(run_dir.join("summary.json"), json).context("write batch summary")?;
    Ok(())
}
