use std::collections::HashMap;

use chrono::NaiveDateTime;

use lol_props::event::{Event, EventStore, TIME_FORMAT, TargetDescriptor};
use lol_props::features::{FeatureExtractor, default_registry};
use lol_props::window::HistoricalWindow;

fn ts(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT).unwrap()
}

fn game(stamp: &str, subject: &str, group: &str, match_id: &str, kills: f64) -> Event {
    Event {
        timestamp: ts(stamp),
        subject_id: subject.to_string(),
        group_id: group.to_string(),
        opposing_group_id: None,
        role: "top".to_string(),
        match_id: match_id.to_string(),
        measurements: HashMap::from([("kills".to_string(), kills)]),
    }
}

fn target(stamp: &str) -> TargetDescriptor {
    TargetDescriptor {
        timestamp: ts(stamp),
        subject_id: "P".to_string(),
        group_id: "T1".to_string(),
        opposing_group_id: "GenG".to_string(),
        role: "top".to_string(),
    }
}

/// Six games for P with kills 1..=6 on consecutive days.
fn six_games() -> Vec<Event> {
    (1..=6)
        .map(|day| {
            game(
                &format!("2024-02-{day:02} 17:00:00"),
                "P",
                "T1",
                &format!("g{day}"),
                day as f64,
            )
        })
        .collect()
}

#[test]
fn self_aggregate_sees_all_prior_games() {
    let store = EventStore::from_rows(six_games());
    let t = target("2024-02-07 17:00:00");
    let w = HistoricalWindow::before(&store, t.timestamp);
    let mut fe = FeatureExtractor::new(w, &t, default_registry());
    let v = fe.extract("kills_per_game").unwrap();
    assert!((v - 3.5).abs() < 1e-12);
}

#[test]
fn target_between_events_sees_only_the_earlier_ones() {
    let store = EventStore::from_rows(six_games());
    // Dated between game 5 and game 6.
    let t = target("2024-02-05 20:00:00");
    let w = HistoricalWindow::before(&store, t.timestamp);
    let mut fe = FeatureExtractor::new(w, &t, default_registry());
    let v = fe.extract("kills_per_game").unwrap();
    assert!((v - 3.0).abs() < 1e-12);
}

#[test]
fn sentinel_event_at_target_time_cannot_leak() {
    let mut rows = six_games();
    let t = target("2024-02-07 17:00:00");
    // Extreme values exactly at and after the prediction instant.
    rows.push(game("2024-02-07 17:00:00", "P", "T1", "g7", 1_000_000.0));
    rows.push(game("2024-02-08 17:00:00", "P", "T1", "g8", 1_000_000.0));
    let store = EventStore::from_rows(rows);

    let w = HistoricalWindow::before(&store, t.timestamp);
    let mut fe = FeatureExtractor::new(w, &t, default_registry());
    let v = fe.extract("kills_per_game").unwrap();
    assert!((v - 3.5).abs() < 1e-12, "future data leaked: {v}");
}

#[test]
fn opponent_defense_cannot_leak_either() {
    // Every day GenG concedes 3 kills to whoever tops against them.
    let mut rows = Vec::new();
    for day in 1..=6 {
        let stamp = format!("2024-02-{day:02} 17:00:00");
        let m = format!("g{day}");
        rows.push(game(&stamp, "P", "T1", &m, 2.0));
        rows.push(game(&stamp, "Kiin", "GenG", &m, 1.0));
    }
    // A monster game against GenG at the prediction instant.
    rows.push(game("2024-02-07 17:00:00", "Doran", "HLE", "g7", 500.0));
    rows.push(game("2024-02-07 17:00:00", "Kiin", "GenG", "g7", 0.0));
    let store = EventStore::from_rows(rows);

    let t = target("2024-02-07 17:00:00");
    let w = HistoricalWindow::before(&store, t.timestamp);
    let mut fe = FeatureExtractor::new(w, &t, default_registry());
    let v = fe.extract("opp_kills_conceded").unwrap();
    assert!((v - 2.0).abs() < 1e-12, "future data leaked: {v}");
}
