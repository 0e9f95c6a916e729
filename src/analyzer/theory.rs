//! Steady-state formulas for the birth–death process behind the station.
//!
//! With ρ = λ/μ and β = ν/μ the unnormalized level weights are
//!
//! * `ρ^i / i!` for `0 ≤ i ≤ c` (free channels left),
//! * `ρ^c / c! · ρ^i / Π_{t=1..i}(c + tβ)` for `c + i`, `1 ≤ i ≤ K` (queueing,
//!   each waiting request adds abandonment pressure).
//!
//! Weights are built incrementally as logarithms and normalized with a
//! log-sum-exp, so large channel counts or loads do not overflow.

use tracing::debug;

use crate::analyzer::QueueMetrics;
use crate::error::{Result, StationError};
use crate::parser::yaml_parser::{Capacity, StationConfig};

/// Unbounded vectors stop once the remaining tail mass is below this.
pub const TAIL_EPSILON: f64 = 1e-12;

/// Largest occupancy vector built, theoretical or empirical.
pub const MAX_LEVELS: usize = 10_000_000;

pub struct ProbabilityModel {
    station: StationConfig,
}

fn log_sum_exp(logs: impl Iterator<Item = f64> + Clone) -> f64 {
    let top = logs.clone().fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return top;
    }
    top + logs.map(|l| (l - top).exp()).sum::<f64>().ln()
}

fn finite_or_overflow(values: Vec<f64>, what: &str) -> Result<Vec<f64>> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(StationError::NumericOverflow(what.to_string()))
    }
}

/// Number of levels `0..=top`, refused beyond [`MAX_LEVELS`].
pub(crate) fn level_count(top: usize, extra: usize) -> Result<usize> {
    match top.checked_add(extra).and_then(|t| t.checked_add(1)) {
        Some(levels) if levels <= MAX_LEVELS => Ok(levels),
        _ => Err(StationError::NumericOverflow(format!(
            "state space of {top} + {extra} levels"
        ))),
    }
}

impl ProbabilityModel {
    pub fn new(station: &StationConfig) -> Result<Self> {
        station.validate()?;
        if let (Capacity::Finite(c), Capacity::Unbounded) =
            (station.channels, station.queue_capacity)
        {
            if station.load() >= c as f64 {
                return Err(StationError::invalid(format!(
                    "load {} does not fit {c} channels with an unbounded queue",
                    station.load()
                )));
            }
        }
        Ok(Self {
            station: station.clone(),
        })
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    /// Steady-state probability of each occupancy level.
    pub fn occupancy_probabilities(&self) -> Result<Vec<f64>> {
        let rho = self.station.load();
        let probabilities = match (self.station.channels, self.station.queue_capacity) {
            (Capacity::Unbounded, _) => Self::infinite_server(rho)?,
            (Capacity::Finite(c), Capacity::Finite(k)) => {
                Self::finite(rho, self.station.impatience(), c, k)?
            }
            (Capacity::Finite(c), Capacity::Unbounded) => Self::patient_unbounded(rho, c)?,
        };
        debug!(
            levels = probabilities.len(),
            p0 = probabilities.first().copied().unwrap_or(0.0),
            "Computed theoretical occupancy probabilities"
        );
        Ok(probabilities)
    }

    fn finite(rho: f64, beta: f64, c: usize, k: usize) -> Result<Vec<f64>> {
        let levels = level_count(c, k)?;
        let ln_rho = rho.ln();
        let mut logs = Vec::with_capacity(levels);
        logs.push(0.0);
        for i in 1..=c {
            logs.push(logs[i - 1] + ln_rho - (i as f64).ln());
        }
        for t in 1..=k {
            let previous = logs[c + t - 1];
            logs.push(previous + ln_rho - (c as f64 + t as f64 * beta).ln());
        }
        let log_norm = log_sum_exp(logs.iter().copied());
        finite_or_overflow(
            logs.iter().map(|l| (l - log_norm).exp()).collect(),
            "occupancy probabilities",
        )
    }

    /// M/M/∞: Poisson(ρ), truncated where the tail becomes negligible.
    fn infinite_server(rho: f64) -> Result<Vec<f64>> {
        let ln_rho = rho.ln();
        let mut probabilities = vec![];
        let mut log_p = -rho;
        let mut k = 0usize;
        loop {
            let p = log_p.exp();
            if !p.is_finite() {
                return Err(StationError::NumericOverflow("Poisson occupancy".into()));
            }
            probabilities.push(p);
            let next = (k + 1) as f64;
            // Beyond the mode the tail after k is at most p_k (k+1)/(k+1-ρ).
            if next > rho + 1.0 && p * next / (next - rho) < TAIL_EPSILON {
                break;
            }
            level_count(k, 1)?;
            log_p += ln_rho - next.ln();
            k += 1;
        }
        Ok(probabilities)
    }

    /// M/M/c with an unbounded, patient queue: geometric tail with ratio ρ/c.
    fn patient_unbounded(rho: f64, c: usize) -> Result<Vec<f64>> {
        let levels = level_count(c, 0)?;
        let ln_rho = rho.ln();
        let ln_ratio = (rho / c as f64).ln();
        let ln_tail_sum = -(1.0 - rho / c as f64).ln();
        let mut logs = Vec::with_capacity(levels);
        logs.push(0.0);
        for i in 1..=c {
            logs.push(logs[i - 1] + ln_rho - (i as f64).ln());
        }
        // Levels c, c+1, ... sum to w_c / (1 - ρ/c).
        let ln_c = logs[c];
        let log_norm = log_sum_exp(
            logs[..c]
                .iter()
                .copied()
                .chain(std::iter::once(ln_c + ln_tail_sum)),
        );
        let mut probabilities: Vec<f64> = logs.iter().map(|l| (l - log_norm).exp()).collect();
        let mut n = 0usize;
        loop {
            let tail_after = (ln_c + (n + 1) as f64 * ln_ratio + ln_tail_sum - log_norm).exp();
            if tail_after < TAIL_EPSILON {
                break;
            }
            n += 1;
            level_count(c, n)?;
            probabilities.push((ln_c + n as f64 * ln_ratio - log_norm).exp());
        }
        finite_or_overflow(probabilities, "occupancy probabilities")
    }

    /// Theoretical counterpart of the empirical metrics.
    pub fn metrics(&self) -> Result<QueueMetrics> {
        let station = &self.station;
        let probabilities = self.occupancy_probabilities()?;
        let lambda = station.arrival_rate;

        let rejection_probability = match (station.channels, station.queue_capacity) {
            (Capacity::Finite(_), Capacity::Finite(_)) => {
                probabilities.last().copied().unwrap_or(0.0)
            }
            _ => 0.0,
        };
        let relative_throughput = 1.0 - rejection_probability;
        let throughput = relative_throughput * lambda;

        let busy = |level: usize| match station.channels {
            Capacity::Finite(c) => level.min(c),
            Capacity::Unbounded => level,
        };
        let mut mean_occupancy = 0.0;
        let mut mean_busy_channels = 0.0;
        let mut mean_queue_length = 0.0;
        for (level, p) in probabilities.iter().enumerate() {
            mean_occupancy += level as f64 * p;
            mean_busy_channels += busy(level) as f64 * p;
            mean_queue_length += (level - busy(level)) as f64 * p;
        }

        // Abandonment only happens from a finite waiting line.
        let abandonment_rate = match station.queue_capacity {
            Capacity::Finite(_) => station.abandonment_rate * mean_queue_length,
            Capacity::Unbounded => 0.0,
        };
        let admitted_rate = throughput;

        Ok(QueueMetrics {
            probabilities,
            rejection_probability,
            relative_throughput,
            throughput,
            abandonment_probability: abandonment_rate / lambda,
            effective_throughput: admitted_rate - abandonment_rate,
            mean_occupancy,
            mean_queue_length,
            mean_busy_channels,
            mean_time_in_system: mean_occupancy / admitted_rate,
            mean_time_in_queue: mean_queue_length / admitted_rate,
        })
    }
}
