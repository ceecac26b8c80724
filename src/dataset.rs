use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;

use crate::event::TIME_FORMAT;

pub const IDENTITY_COLUMNS: [&str; 6] = [
    "date",
    "match_id",
    "subject",
    "group",
    "opponent",
    "role",
];

/// One successfully processed event: identity, extracted feature
/// values (in registry-file order) and the label.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub timestamp: NaiveDateTime,
    pub match_id: String,
    pub subject_id: String,
    pub group_id: String,
    pub opposing_group_id: String,
    pub role: String,
    pub features: Vec<f64>,
    pub label: f64,
}

/// Materialized, time-ordered feature/label table.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub label_name: String,
    pub rows: Vec<DatasetRow>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (X, y) view for a model collaborator.
    pub fn to_matrix(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x = self.rows.iter().map(|r| r.features.clone()).collect();
        let y = self.rows.iter().map(|r| r.label).collect();
        (x, y)
    }

    pub fn sort_by_time(&mut self) {
        self.rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.match_id.cmp(&b.match_id))
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
    }
}

fn header(feature_names: &[String], label_name: &str) -> String {
    let mut cols: Vec<String> = IDENTITY_COLUMNS.iter().map(|c| c.to_string()).collect();
    cols.extend(feature_names.iter().cloned());
    cols.push(label_name.to_string());
    cols.join(",")
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(ch),
        }
    }
    fields.push(field);
    fields
}

fn row_line(row: &DatasetRow) -> String {
    let mut cols = vec![
        row.timestamp.format(TIME_FORMAT).to_string(),
        csv_field(&row.match_id),
        csv_field(&row.subject_id),
        csv_field(&row.group_id),
        csv_field(&row.opposing_group_id),
        csv_field(&row.role),
    ];
    cols.extend(row.features.iter().map(|v| v.to_string()));
    cols.push(row.label.to_string());
    cols.join(",")
}

/// Writes one tabular file: header plus one line per row. Write goes
/// through a tmp file and rename so a crash never leaves a torn file
/// behind.
pub fn write_rows(path: &Path, feature_names: &[String], label_name: &str, rows: &[DatasetRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dataset dir {}", parent.display()))?;
    }
    let mut out = String::with_capacity(rows.len() * 96 + 128);
    out.push_str(&header(feature_names, label_name));
    out.push('\n');
    for row in rows {
        out.push_str(&row_line(row));
        out.push('\n');
    }
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, out).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

fn parse_row(
    line: &str,
    feature_count: usize,
    path: &Path,
    line_no: usize,
) -> Result<DatasetRow> {
    let fields = split_csv_line(line);
    let expected = IDENTITY_COLUMNS.len() + feature_count + 1;
    if fields.len() != expected {
        return Err(anyhow!(
            "{} line {line_no}: {} columns, expected {expected}",
            path.display(),
            fields.len()
        ));
    }
    let timestamp = NaiveDateTime::parse_from_str(&fields[0], TIME_FORMAT)
        .with_context(|| format!("{} line {line_no}: bad date {}", path.display(), fields[0]))?;
    let mut features = Vec::with_capacity(feature_count);
    for raw in &fields[6..6 + feature_count] {
        features.push(
            raw.parse::<f64>()
                .with_context(|| format!("{} line {line_no}: bad value {raw}", path.display()))?,
        );
    }
    let label = fields[6 + feature_count]
        .parse::<f64>()
        .with_context(|| format!("{} line {line_no}: bad label", path.display()))?;
    Ok(DatasetRow {
        timestamp,
        match_id: fields[1].clone(),
        subject_id: fields[2].clone(),
        group_id: fields[3].clone(),
        opposing_group_id: fields[4].clone(),
        role: fields[5].clone(),
        features,
        label,
    })
}

fn read_rows(path: &Path, feature_names: &[String], label_name: &str) -> Result<Vec<DatasetRow>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read dataset {}", path.display()))?;
    let mut lines = raw.lines().enumerate();
    let Some((_, head)) = lines.next() else {
        return Ok(Vec::new());
    };
    let expected = header(feature_names, label_name);
    if head != expected {
        return Err(anyhow!(
            "{}: header mismatch\n  found:    {head}\n  expected: {expected}",
            path.display()
        ));
    }
    let mut rows = Vec::new();
    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(line, feature_names.len(), path, idx + 1)?);
    }
    Ok(rows)
}

/// Loads a materialized dataset. Rows carrying missing or non-finite
/// values are dropped before any model sees them.
pub fn load_dataset(path: &Path, feature_names: &[String], label_name: &str) -> Result<Dataset> {
    let rows = read_rows(path, feature_names, label_name)?;
    let clean: Vec<DatasetRow> = rows
        .into_iter()
        .filter(|r| r.label.is_finite() && r.features.iter().all(|v| v.is_finite()))
        .collect();
    let mut dataset = Dataset {
        feature_names: feature_names.to_vec(),
        label_name: label_name.to_string(),
        rows: clean,
    };
    dataset.sort_by_time();
    Ok(dataset)
}

pub fn checkpoint_path(run_dir: &Path, seq: usize) -> PathBuf {
    run_dir.join(format!("part_{seq:05}.csv"))
}

pub fn master_path(run_dir: &Path) -> PathBuf {
    run_dir.join("features.csv")
}

fn checkpoint_files(run_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(run_dir)
        .with_context(|| format!("read checkpoint dir {}", run_dir.display()))?
    {
        let path = entry.context("read checkpoint dir entry")?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("part_") && name.ends_with(".csv") {
            parts.push(path);
        }
    }
    // Sequence numbers are zero-padded, so the merge order is
    // recoverable from filenames alone.
    parts.sort();
    Ok(parts)
}

/// Concatenates every checkpoint of a run into one master dataset,
/// re-sorted by event time so walk-forward consumers see strict time
/// order even when parts were written by parallel workers. Merging the
/// same part set twice yields a byte-identical master file.
pub fn merge_checkpoints(
    run_dir: &Path,
    feature_names: &[String],
    label_name: &str,
) -> Result<Dataset> {
    let mut rows = Vec::new();
    for part in checkpoint_files(run_dir)? {
        rows.extend(read_rows(&part, feature_names, label_name)?);
    }
    let mut dataset = Dataset {
        feature_names: feature_names.to_vec(),
        label_name: label_name.to_string(),
        rows,
    };
    dataset.sort_by_time();
    write_rows(
        &master_path(run_dir),
        feature_names,
        label_name,
        &dataset.rows,
    )?;
    Ok(dataset)
}
