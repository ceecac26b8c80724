use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::event::{Event, EventStore};

/// Read-only view of every event strictly before a target timestamp.
///
/// The cutoff is enforced once here, at construction, so the query
/// methods never need to re-check event times. The store is sorted by
/// timestamp, so the window is a contiguous prefix slice.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalWindow<'a> {
    events: &'a [Event],
    cutoff: NaiveDateTime,
}

impl<'a> HistoricalWindow<'a> {
    pub fn before(store: &'a EventStore, cutoff: NaiveDateTime) -> Self {
        let events = store.events();
        let end = events.partition_point(|e| e.timestamp < cutoff);
        Self {
            events: &events[..end],
            cutoff,
        }
    }

    pub fn cutoff(&self) -> NaiveDateTime {
        self.cutoff
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every historical event for one subject, oldest first.
    pub fn for_subject(&self, subject_id: &str) -> impl Iterator<Item = &'a Event> + '_ {
        let subject_id = subject_id.to_string();
        self.events
            .iter()
            .filter(move |e| e.subject_id == subject_id)
    }

    /// Performance achieved at `role` by anyone who played *against*
    /// group `opp`: events from matches `opp` took part in, excluding
    /// `opp`'s own rows, restricted to the queried role. A proxy for
    /// the opponent's defensive strength at that role.
    pub fn for_opposing_defense(&self, opp: &str, role: &str) -> Vec<&'a Event> {
        let opp_match_ids: HashSet<&str> = self
            .events
            .iter()
            .filter(|e| e.group_id == opp)
            .map(|e| e.match_id.as_str())
            .collect();

        self.events
            .iter()
            .filter(|e| e.group_id != opp)
            .filter(|e| opp_match_ids.contains(e.match_id.as_str()))
            .filter(|e| e.role == role)
            .collect()
    }
}
