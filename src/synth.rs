use std::collections::HashMap;

use chrono::{Days, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::event::Event;

pub const ROLES: [&str; 5] = ["top", "jng", "mid", "bot", "sup"];

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub teams: usize,
    pub days: usize,
    pub start: NaiveDate,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            teams: 8,
            days: 60,
            start: NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date"),
            seed: 7,
        }
    }
}

/// Generates a synthetic league: every day pairs teams round-robin
/// style, one game per pairing, five player rows per team. Each player
/// carries a latent kill rate so self- and opponent-aggregates have
/// real signal to find. Deterministic for a fixed seed.
pub fn generate_events(config: &SynthConfig) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let teams: Vec<String> = (0..config.teams).map(|i| format!("Team{i:02}")).collect();

    // Latent per-player kill rates, higher for carries.
    let mut rates: HashMap<String, f64> = HashMap::new();
    for team in &teams {
        for role in ROLES {
            let base: f64 = match role {
                "bot" | "mid" => 4.0,
                "top" | "jng" => 3.0,
                _ => 1.0,
            };
            rates.insert(
                player_name(team, role),
                (base + rng.gen_range(-1.0..1.0)).max(0.3),
            );
        }
    }

    let mut events = Vec::new();
    let mut game_no = 0usize;
    for day in 0..config.days {
        let date = config.start + Days::new(day as u64);
        // Rotate pairings so everyone meets everyone over time.
        let mut order: Vec<usize> = (0..teams.len()).collect();
        order.rotate_left(day % teams.len().max(1));
        for pair in order.chunks(2) {
            let [a, b] = pair else { continue };
            let match_id = format!("synth_{game_no}");
            game_no += 1;
            let kickoff = date
                .and_hms_opt(17, 0, 0)
                .expect("valid kickoff time");
            for (team, opp) in [(&teams[*a], &teams[*b]), (&teams[*b], &teams[*a])] {
                for role in ROLES {
                    events.push(player_game(
                        &mut rng, kickoff, team, opp, role, &rates, &match_id,
                    ));
                }
            }
        }
    }
    events
}

fn player_name(team: &str, role: &str) -> String {
    format!("{team}_{role}")
}

fn player_game(
    rng: &mut StdRng,
    kickoff: NaiveDateTime,
    team: &str,
    _opp: &str,
    role: &str,
    rates: &HashMap<String, f64>,
    match_id: &str,
) -> Event {
    let name = player_name(team, role);
    let rate = rates.get(&name).copied().unwrap_or(2.0);
    let kills = sample_poisson(rng, rate);
    let deaths = sample_poisson(rng, 2.5);
    let assists = sample_poisson(rng, rate + 2.0);
    let gamelength = rng.gen_range(1500.0..2600.0_f64).round();
    let csdiff = rng.gen_range(-25.0..25.0_f64).round();

    let mut measurements = HashMap::new();
    measurements.insert("kills".to_string(), kills);
    measurements.insert("deaths".to_string(), deaths);
    measurements.insert("assists".to_string(), assists);
    measurements.insert("gamelength".to_string(), gamelength);
    measurements.insert("csdiffat10".to_string(), csdiff);

    Event {
        timestamp: kickoff,
        subject_id: name,
        group_id: team.to_string(),
        opposing_group_id: None,
        role: role.to_string(),
        match_id: match_id.to_string(),
        measurements,
    }
}

/// Knuth draw; rates here are tiny so the loop is short.
fn sample_poisson(rng: &mut StdRng, rate: f64) -> f64 {
    let l = (-rate.max(1e-6)).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen_range(0.0..1.0_f64);
        if p <= l || k > 200 {
            return f64::from(k);
        }
        k += 1;
    }
}
