use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::event::Event;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Registry/name mismatch. A configuration bug, never skipped.
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    /// The event does not carry the label's source column.
    #[error("event {match_id}/{subject_id} is missing label column {column}")]
    MissingColumn {
        match_id: String,
        subject_id: String,
        column: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelTransform {
    Identity,
    /// ln(1 + x), variance stabilizer for count-like targets.
    Log1p,
}

impl LabelTransform {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            LabelTransform::Identity => value,
            LabelTransform::Log1p => value.ln_1p(),
        }
    }

    /// Maps a model prediction back to the label's original scale.
    pub fn invert(self, value: f64) -> f64 {
        match self {
            LabelTransform::Identity => value,
            LabelTransform::Log1p => value.exp_m1(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelSpec {
    pub column: String,
    pub transform: LabelTransform,
}

#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    specs: HashMap<String, LabelSpec>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, column: &str, transform: LabelTransform) {
        self.specs.insert(
            name.to_string(),
            LabelSpec {
                column: column.to_string(),
                transform,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&LabelSpec> {
        self.specs.get(name)
    }

    /// Pure, history-free label computation over one event's own
    /// measurements. No caching needed.
    pub fn extract(&self, event: &Event, label_name: &str) -> Result<f64, LabelError> {
        let spec = self
            .get(label_name)
            .ok_or_else(|| LabelError::UnknownLabel(label_name.to_string()))?;
        let raw = event
            .measurement(&spec.column)
            .ok_or_else(|| LabelError::MissingColumn {
                match_id: event.match_id.clone(),
                subject_id: event.subject_id.clone(),
                column: spec.column.clone(),
            })?;
        Ok(spec.transform.apply(raw))
    }
}

static DEFAULT_LABELS: Lazy<LabelRegistry> = Lazy::new(|| {
    let mut reg = LabelRegistry::new();
    reg.register("kills", "kills", LabelTransform::Identity);
    reg.register("log_kills", "kills", LabelTransform::Log1p);
    reg.register("winlose", "result", LabelTransform::Identity);
    reg
});

pub fn default_labels() -> &'static LabelRegistry {
    &DEFAULT_LABELS
}
