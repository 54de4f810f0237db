use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF, Hypergeometric};
use tracing::debug;

use crate::error::KiraError;

/// Significance model for over-representation of a term or gene set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityModel {
    Hypergeometric,
    Binomial,
}

impl ProbabilityModel {
    /// `P(X >= k)` where `k` genes of a cluster of size `n` hit a category
    /// covering `m` of `big_n` reference genes.
    pub fn p_value(&self, k: u64, big_n: u64, m: u64, n: u64) -> Result<f64, KiraError> {
        if k == 0 {
            return Ok(1.0);
        }
        if k > n {
            return Err(KiraError::Statistics(format!(
                "observed count {k} exceeds cluster size {n}"
            )));
        }
        let value = match self {
            ProbabilityModel::Hypergeometric => {
                let hyper = Hypergeometric::new(big_n, m, n)
                    .map_err(|err| KiraError::Statistics(err.to_string()))?;
                // k at or below the support minimum is certain
                if k <= (n + m).saturating_sub(big_n) {
                    return Ok(1.0);
                }
                if k > m {
                    return Err(KiraError::Statistics(format!(
                        "observed count {k} exceeds category size {m}"
                    )));
                }
                hyper.sf(k - 1)
            }
            ProbabilityModel::Binomial => {
                if big_n == 0 {
                    return Err(KiraError::Statistics("empty reference".to_string()));
                }
                let binomial = Binomial::new(m as f64 / big_n as f64, n)
                    .map_err(|err| KiraError::Statistics(err.to_string()))?;
                binomial.sf(k - 1)
            }
        };
        debug!(model = ?self, k, big_n, m, n, p = value, "p-value");
        Ok(clamp_probability(value))
    }
}

fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(f64::MIN_POSITIVE, 1.0)
}

/// Benjamini-Hochberg adjusted p-values, aligned with the input order.
pub fn fdr(p_values: &[f64]) -> Vec<f64> {
    let total = p_values.len();
    let mut order = (0..total).collect::<Vec<_>>();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; total];
    let mut running = 1.0f64;
    for (rank, &index) in order.iter().enumerate().rev() {
        let scaled = p_values[index] * total as f64 / (rank + 1) as f64;
        running = running.min(scaled);
        adjusted[index] = running.clamp(0.0, 1.0);
    }
    adjusted
}
