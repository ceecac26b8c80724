use std::fs;
use std::path::PathBuf;

use chrono::NaiveDateTime;

use lol_props::builder::{BatchConfig, build_dataset};
use lol_props::dataset::{master_path, merge_checkpoints};
use lol_props::event::{EventStore, TIME_FORMAT};
use lol_props::features::default_registry;
use lol_props::labels::default_labels;
use lol_props::synth::{SynthConfig, generate_events};

fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT).unwrap()
}

fn temp_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lol_props_it_{tag}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn feature_names() -> Vec<String> {
    vec![
        "kills_per_game".to_string(),
        "assists_per_game".to_string(),
        "opp_kills_conceded".to_string(),
    ]
}

#[test]
fn batch_over_synthetic_league_checkpoints_and_merges() {
    let root = temp_root("league");
    let store = EventStore::from_rows(generate_events(&SynthConfig {
        teams: 4,
        days: 20,
        seed: 11,
        ..Default::default()
    }));

    let mut config = BatchConfig::new(ts("2024-01-08 00:00:00"), ts("2024-12-31 00:00:00"), &root);
    config.flush_every = 64;

    let names = feature_names();
    let (dataset, summary) = build_dataset(
        &store,
        default_registry(),
        &names,
        default_labels(),
        "kills",
        &config,
    )
    .unwrap();

    assert_eq!(summary.candidates, store.len());
    assert_eq!(
        summary.processed
            + summary.skipped_insufficient_history
            + summary.skipped_malformed
            + summary.skipped_unknown_subject,
        summary.candidates
    );
    assert_eq!(dataset.len(), summary.processed);
    assert!(summary.checkpoints_written >= 2);

    // Master dataset is strictly time-ordered.
    assert!(
        dataset
            .rows
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    );

    // Re-merging the same checkpoint set is byte-identical.
    let first = fs::read(master_path(&summary.run_dir)).unwrap();
    merge_checkpoints(&summary.run_dir, &names, "kills").unwrap();
    let second = fs::read(master_path(&summary.run_dir)).unwrap();
    assert_eq!(first, second);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn master_dataset_reloads_to_the_same_rows() {
    let root = temp_root("reload");
    let store = EventStore::from_rows(generate_events(&SynthConfig {
        teams: 4,
        days: 12,
        seed: 3,
        ..Default::default()
    }));

    let config = BatchConfig::new(ts("2024-01-08 00:00:00"), ts("2024-12-31 00:00:00"), &root);
    let names = feature_names();
    let (dataset, summary) = build_dataset(
        &store,
        default_registry(),
        &names,
        default_labels(),
        "kills",
        &config,
    )
    .unwrap();

    let reloaded =
        lol_props::dataset::load_dataset(&master_path(&summary.run_dir), &names, "kills").unwrap();
    assert_eq!(reloaded.len(), dataset.len());
    for (a, b) in dataset.rows.iter().zip(&reloaded.rows) {
        assert_eq!(a.subject_id, b.subject_id);
        assert_eq!(a.features, b.features);
        assert_eq!(a.label, b.label);
    }

    let _ = fs::remove_dir_all(&root);
}
