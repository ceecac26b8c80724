use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};

use lol_props::builder::{BatchConfig, build_dataset};
use lol_props::dataset::{load_dataset, master_path};
use lol_props::event::TargetDescriptor;
use lol_props::features::{FeatureExtractor, default_registry, read_feature_names};
use lol_props::labels::{LabelTransform, default_labels};
use lol_props::models::factory_by_name;
use lol_props::simulate::{SimConfig, simulate};
use lol_props::store;
use lol_props::synth::{SynthConfig, generate_events};
use lol_props::window::HistoricalWindow;

const DEFAULT_FEATURES: [&str; 5] = [
    "avg_game_time",
    "assists_per_game",
    "cs_diff_at_10",
    "kills_per_game",
    "opp_kills_conceded",
];

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("seed") => cmd_seed(),
        Some("extract") => cmd_extract(&args[1..]),
        Some("backtest") => cmd_backtest(&args[1..]),
        Some("predict") => cmd_predict(&args[1..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("lol_props: player-prop feature engine and walk-forward backtester");
    println!();
    println!("  seed      [--db PATH] [--teams N] [--days N] [--seed N]");
    println!("  extract   START END [--db PATH] [--label NAME] [--feature-file PATH]");
    println!("            [--checkpoint-dir DIR] [--flush-every N] [--min-samples N]");
    println!("  backtest  MODEL FEATURES_CSV [--label NAME] [--feature-file PATH]");
    println!("  predict   DATE PLAYER TEAM OPPONENT ROLE --features-csv PATH");
    println!("            [--db PATH] [--model NAME] [--label NAME] [--feature-file PATH]");
    println!();
    println!("  dates use MM-DD-YYYY; MODEL is one of mean|poisson");
}

fn cmd_seed() -> Result<()> {
    let db_path = parse_path_arg("--db").unwrap_or_else(store::default_db_path);
    let config = SynthConfig {
        teams: parse_usize_arg("--teams").unwrap_or(8).clamp(2, 64),
        days: parse_usize_arg("--days").unwrap_or(60).clamp(1, 3650),
        seed: parse_usize_arg("--seed").unwrap_or(7) as u64,
        ..Default::default()
    };

    let rows = generate_events(&config);
    let mut conn = store::open_db(&db_path)?;
    let summary = store::ingest_events(&mut conn, &rows)?;
    println!(
        "Seeded {} rows into {} (rejected {})",
        summary.rows_upserted,
        db_path.display(),
        summary.rows_rejected
    );
    Ok(())
}

fn cmd_extract(args: &[String]) -> Result<()> {
    let (Some(start_raw), Some(end_raw)) = (args.first(), args.get(1)) else {
        return Err(anyhow!("usage: extract START END [flags] (MM-DD-YYYY)"));
    };
    let start = parse_date(start_raw)?;
    let end = end_of_day(end_raw)?;

    let db_path = parse_path_arg("--db").unwrap_or_else(store::default_db_path);
    let label_name = parse_string_arg("--label").unwrap_or_else(|| "kills".to_string());
    let checkpoint_root =
        parse_path_arg("--checkpoint-dir").unwrap_or_else(|| PathBuf::from("checkpoints"));

    let feature_names = resolve_feature_names()?;

    let conn = store::open_db(&db_path)?;
    let event_store = store::load_event_store(&conn)?;
    if event_store.is_empty() {
        return Err(anyhow!(
            "no events in {} (run `seed` or ingest real data first)",
            db_path.display()
        ));
    }

    let mut config = BatchConfig::new(start, end, &checkpoint_root);
    if let Some(n) = parse_usize_arg("--flush-every") {
        config.flush_every = n.clamp(1, 1_000_000);
    }
    if let Some(n) = parse_usize_arg("--min-samples") {
        config.min_samples = n.max(1);
    }

    let (dataset, summary) = build_dataset(
        &event_store,
        default_registry(),
        &feature_names,
        default_labels(),
        &label_name,
        &config,
    )?;

    println!("Extraction finished");
    println!("  candidates: {}", summary.candidates);
    println!("  processed:  {}", summary.processed);
    println!(
        "  skipped:    insufficient_history={} malformed={} unknown_subject={}",
        summary.skipped_insufficient_history,
        summary.skipped_malformed,
        summary.skipped_unknown_subject
    );
    println!("  checkpoints: {}", summary.checkpoints_written);
    println!("  rows in master dataset: {}", dataset.len());
    println!("  master: {}", master_path(&summary.run_dir).display());
    for err in &summary.sample_errors {
        println!("  note: {err}");
    }
    Ok(())
}

fn cmd_backtest(args: &[String]) -> Result<()> {
    let (Some(model_name), Some(features_csv)) = (args.first(), args.get(1)) else {
        return Err(anyhow!("usage: backtest MODEL FEATURES_CSV [flags]"));
    };
    let label_name = parse_string_arg("--label").unwrap_or_else(|| "kills".to_string());
    let feature_names = resolve_feature_names()?;

    let dataset = load_dataset(&PathBuf::from(features_csv), &feature_names, &label_name)?;
    println!(
        "Walk-forward backtest: {} rows, model={model_name}, label={label_name}",
        dataset.len()
    );
    if let (Some(first), Some(last)) = (dataset.rows.first(), dataset.rows.last()) {
        println!("Range: {} -> {}", first.timestamp, last.timestamp);
    }

    let factory = factory_by_name(model_name)?;
    let config = SimConfig {
        progress_every: parse_usize_arg("--progress").unwrap_or(1000),
        ..Default::default()
    };
    let report = simulate(&dataset, factory.as_ref(), &config)?;
    println!(
        "Steps: {}  mean abs error: {:.4}",
        report.errors.len(),
        report.mean_error
    );
    Ok(())
}

fn cmd_predict(args: &[String]) -> Result<()> {
    let [date_raw, player, team, opponent, role, ..] = args else {
        return Err(anyhow!(
            "usage: predict DATE PLAYER TEAM OPPONENT ROLE [flags]"
        ));
    };
    let date = parse_date(date_raw)?;
    let db_path = parse_path_arg("--db").unwrap_or_else(store::default_db_path);
    let model_name = parse_string_arg("--model").unwrap_or_else(|| "poisson".to_string());
    let label_name = parse_string_arg("--label").unwrap_or_else(|| "kills".to_string());
    let feature_names = resolve_feature_names()?;

    let features_csv = parse_path_arg("--features-csv")
        .ok_or_else(|| anyhow!("predict needs --features-csv (a merged master dataset)"))?;
    let dataset = load_dataset(&features_csv, &feature_names, &label_name)?;
    if dataset.len() < 2 {
        return Err(anyhow!("training dataset too small: {} rows", dataset.len()));
    }

    let conn = store::open_db(&db_path)?;
    let event_store = store::load_event_store(&conn)?;

    let target = TargetDescriptor {
        timestamp: date,
        subject_id: player.clone(),
        group_id: team.clone(),
        opposing_group_id: opponent.clone(),
        role: role.clone(),
    };
    let window = HistoricalWindow::before(&event_store, target.timestamp);
    let mut extractor = FeatureExtractor::new(window, &target, default_registry());
    let x = extractor
        .extract_all(&feature_names)
        .with_context(|| format!("extract features for {player} vs {opponent}"))?;

    let (train_x, train_y) = dataset.to_matrix();
    let factory = factory_by_name(&model_name)?;
    let model = factory.fit(&train_x, &train_y)?;
    let predicted = model.predict(&x);

    println!("Predicting {label_name} for {player} ({team}) vs {opponent} at {role}");
    for (name, value) in feature_names.iter().zip(&x) {
        println!("  {name}: {value:.3}");
    }
    println!("Prediction: {predicted:.2}");
    if let Some(spec) = default_labels().get(&label_name)
        && spec.transform != LabelTransform::Identity
    {
        println!(
            "Prediction (original scale): {:.2}",
            spec.transform.invert(predicted)
        );
    }
    Ok(())
}

fn resolve_feature_names() -> Result<Vec<String>> {
    match parse_path_arg("--feature-file") {
        Some(path) => read_feature_names(&path, default_registry()),
        None => Ok(DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect()),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%m-%d-%Y")
        .with_context(|| format!("invalid date {raw}, use MM-DD-YYYY"))?;
    date.and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {raw}"))
}

fn end_of_day(raw: &str) -> Result<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%m-%d-%Y")
        .with_context(|| format!("invalid date {raw}, use MM-DD-YYYY"))?;
    date.and_hms_opt(23, 59, 59)
        .ok_or_else(|| anyhow!("invalid date {raw}"))
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_string_arg(name).map(PathBuf::from)
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_string_arg(name).and_then(|raw| raw.parse::<usize>().ok())
}
