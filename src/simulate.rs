use anyhow::{Result, anyhow};

use crate::dataset::Dataset;

/// A trained regression model. Point estimate only; implementations
/// may carry uncertainty internally for their own scoring.
pub trait Model {
    fn predict(&self, x: &[f64]) -> f64;
}

/// Pluggable fit contract. Any regression technique satisfying this
/// can be backtested without touching the simulator.
pub trait ModelFactory {
    fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<Box<dyn Model>>;
}

pub fn abs_error(predicted: f64, actual: f64) -> f64 {
    (predicted - actual).abs()
}

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Per-step error metric (prediction, truth).
    pub metric: fn(f64, f64) -> f64,
    /// Print a running mean every this many steps; 0 silences it.
    pub progress_every: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            metric: abs_error,
            progress_every: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimReport {
    /// One error per scored row, in time order.
    pub errors: Vec<f64>,
    pub mean_error: f64,
}

/// Walk-forward backtest: at step i a fresh model is trained on rows
/// [0, i) and scored on row i alone, so no prediction ever sees its
/// own row or anything after it. Retraining every step makes this
/// O(N^2) on purpose; training once on the full table would leak the
/// future into every prediction.
pub fn simulate(
    dataset: &Dataset,
    factory: &dyn ModelFactory,
    config: &SimConfig,
) -> Result<SimReport> {
    if dataset.len() < 2 {
        return Err(anyhow!(
            "walk-forward needs at least 2 rows, got {}",
            dataset.len()
        ));
    }

    let (x, y) = dataset.to_matrix();
    let mut errors = Vec::with_capacity(x.len() - 1);

    for i in 1..x.len() {
        let model = factory.fit(&x[..i], &y[..i])?;
        let predicted = model.predict(&x[i]);
        errors.push((config.metric)(predicted, y[i]));

        if config.progress_every > 0 && i % config.progress_every == 0 {
            let running = errors.iter().sum::<f64>() / errors.len() as f64;
            println!("simulated {i}/{} running error {running:.4}", x.len() - 1);
        }
    }

    let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
    Ok(SimReport { errors, mean_error })
}
