use anyhow::{Result, anyhow};

use crate::simulate::{Model, ModelFactory};

const MAX_ITERS: usize = 600;
const LR_START: f64 = 0.10;
const L2_REG: f64 = 1e-4;

/// Predicts the training-set mean for every input. The floor any real
/// model has to beat.
pub struct MeanModel {
    mean: f64,
}

impl Model for MeanModel {
    fn predict(&self, _x: &[f64]) -> f64 {
        self.mean
    }
}

pub struct MeanFactory;

impl ModelFactory for MeanFactory {
    fn fit(&self, _x: &[Vec<f64>], y: &[f64]) -> Result<Box<dyn Model>> {
        if y.is_empty() {
            return Err(anyhow!("cannot fit on an empty training set"));
        }
        Ok(Box::new(MeanModel {
            mean: y.iter().sum::<f64>() / y.len() as f64,
        }))
    }
}

/// Log-link Poisson regression on standardized features, fit by
/// gradient descent with a decaying learning rate and L2 shrinkage.
/// Suits count-like targets (kills per game).
pub struct PoissonModel {
    means: Vec<f64>,
    stds: Vec<f64>,
    coeffs: Vec<f64>,
    intercept: f64,
}

impl PoissonModel {
    fn linear(&self, x: &[f64]) -> f64 {
        let mut z = self.intercept;
        for (j, coeff) in self.coeffs.iter().enumerate() {
            let v = x.get(j).copied().unwrap_or(0.0);
            z += coeff * standardized(v, self.means[j], self.stds[j]);
        }
        z
    }
}

impl Model for PoissonModel {
    fn predict(&self, x: &[f64]) -> f64 {
        // lambda is clamped so one wild extrapolation cannot overflow.
        self.linear(x).clamp(-20.0, 20.0).exp()
    }
}

pub struct PoissonFactory;

impl ModelFactory for PoissonFactory {
    fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<Box<dyn Model>> {
        if x.is_empty() || x.len() != y.len() {
            return Err(anyhow!(
                "inconsistent training set: {} feature rows, {} labels",
                x.len(),
                y.len()
            ));
        }
        if y.iter().any(|v| *v < 0.0) {
            return Err(anyhow!("poisson regression needs non-negative labels"));
        }
        let dims = x[0].len();
        if x.iter().any(|row| row.len() != dims) {
            return Err(anyhow!("ragged feature matrix"));
        }

        let (means, stds) = feature_moments(x, dims);
        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| standardized(*v, means[j], stds[j]))
                    .collect()
            })
            .collect();

        let n = y.len() as f64;
        let mean_y = (y.iter().sum::<f64>() / n).max(1e-9);
        let mut intercept = mean_y.ln();
        let mut coeffs = vec![0.0; dims];

        for iter in 0..MAX_ITERS {
            let mut grad = vec![0.0; dims];
            let mut grad0 = 0.0;
            for (row, label) in z.iter().zip(y) {
                let mut eta = intercept;
                for (j, coeff) in coeffs.iter().enumerate() {
                    eta += coeff * row[j];
                }
                let lambda = eta.clamp(-20.0, 20.0).exp();
                let d = lambda - label;
                grad0 += d;
                for j in 0..dims {
                    grad[j] += d * row[j];
                }
            }

            let lr = LR_START / (1.0 + iter as f64 * 0.01);
            intercept -= lr * grad0 / n;
            let mut step = 0.0_f64;
            for j in 0..dims {
                let g = grad[j] / n + L2_REG * coeffs[j];
                coeffs[j] -= lr * g;
                step = step.max((lr * g).abs());
            }
            if step < 1e-9 {
                break;
            }
        }

        Ok(Box::new(PoissonModel {
            means,
            stds,
            coeffs,
            intercept,
        }))
    }
}

fn feature_moments(x: &[Vec<f64>], dims: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len() as f64;
    let mut means = vec![0.0; dims];
    for row in x {
        for (j, v) in row.iter().enumerate() {
            means[j] += v;
        }
    }
    for m in &mut means {
        *m /= n;
    }

    let mut stds = vec![0.0; dims];
    for row in x {
        for (j, v) in row.iter().enumerate() {
            stds[j] += (v - means[j]).powi(2);
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt().max(1e-6);
    }
    (means, stds)
}

fn standardized(x: f64, mean: f64, std: f64) -> f64 {
    (x - mean) / std.max(1e-6)
}

/// Resolves a model name from the CLI. The set is intentionally small;
/// anything else plugs in through the ModelFactory trait.
pub fn factory_by_name(name: &str) -> Result<Box<dyn ModelFactory>> {
    match name {
        "mean" => Ok(Box::new(MeanFactory)),
        "poisson" => Ok(Box::new(PoissonFactory)),
        other => Err(anyhow!("unknown model type: {other} (try mean|poisson)")),
    }
}
