use std::collections::HashMap;

use chrono::NaiveDateTime;

/// Subject marker used by the source data for rows where the player
/// could not be identified. Such rows are never predicted on.
pub const UNKNOWN_SUBJECT: &str = "unknown player";

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One historical player-game row. Immutable once ingested.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: NaiveDateTime,
    pub subject_id: String,
    pub group_id: String,
    /// Derived at store construction from the two group ids sharing
    /// `match_id`. `None` when the match does not have exactly two
    /// distinct groups (malformed source data).
    pub opposing_group_id: Option<String>,
    pub role: String,
    pub match_id: String,
    /// Named numeric measurements. Absent key == null in the source.
    pub measurements: HashMap<String, f64>,
}

impl Event {
    pub fn measurement(&self, column: &str) -> Option<f64> {
        self.measurements.get(column).copied()
    }

    pub fn has_unknown_subject(&self) -> bool {
        let s = self.subject_id.trim();
        s.is_empty() || s.eq_ignore_ascii_case(UNKNOWN_SUBJECT)
    }
}

/// The game being predicted for. Identity fields only; the game's
/// measurements are by definition not known yet, and in backtest mode
/// they are deliberately hidden from the extractor.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    pub timestamp: NaiveDateTime,
    pub subject_id: String,
    pub group_id: String,
    pub opposing_group_id: String,
    pub role: String,
}

impl TargetDescriptor {
    /// Replay a real historical event as a prediction target.
    /// Only identity and time survive; measurements do not.
    pub fn from_event(event: &Event) -> Option<Self> {
        Some(Self {
            timestamp: event.timestamp,
            subject_id: event.subject_id.clone(),
            group_id: event.group_id.clone(),
            opposing_group_id: event.opposing_group_id.clone()?,
            role: event.role.clone(),
        })
    }
}

/// Time-sorted, in-memory collection of events.
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    /// Builds a store from raw rows: sorts by timestamp and fills in
    /// each event's opponent from the other group seen in its match.
    pub fn from_rows(mut rows: Vec<Event>) -> Self {
        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.match_id.cmp(&b.match_id))
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });

        let mut match_groups: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            let groups = match_groups.entry(row.match_id.clone()).or_default();
            if !groups.contains(&row.group_id) {
                groups.push(row.group_id.clone());
            }
        }

        for row in &mut rows {
            let Some(groups) = match_groups.get(&row.match_id) else {
                continue;
            };
            row.opposing_group_id = if groups.len() == 2 {
                groups.iter().find(|g| **g != row.group_id).cloned()
            } else {
                None
            };
        }

        Self { events: rows }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_event(
    ts: &str,
    subject: &str,
    group: &str,
    role: &str,
    match_id: &str,
    measurements: &[(&str, f64)],
) -> Event {
    Event {
        timestamp: NaiveDateTime::parse_from_str(ts, TIME_FORMAT).expect("test timestamp"),
        subject_id: subject.to_string(),
        group_id: group.to_string(),
        opposing_group_id: None,
        role: role.to_string(),
        match_id: match_id.to_string(),
        measurements: measurements
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    }
}
