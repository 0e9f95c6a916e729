pub mod collector;
pub mod estimator;
pub mod theory;

use indicatif::ProgressBar;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info};

use crate::engine::station::{run_replication, SimulationReport};
use crate::error::Result;
use crate::parser::yaml_parser::{SimulationConfig, StationConfig};
use collector::StatisticsCollector;
use theory::ProbabilityModel;

/// Performance measures of a station, either estimated from a run or
/// derived from the steady-state formulas.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMetrics {
    /// Probability of each occupancy level, index = requests in the station.
    pub probabilities: Vec<f64>,
    pub rejection_probability: f64,
    pub relative_throughput: f64,
    pub throughput: f64,
    pub abandonment_probability: f64,
    pub effective_throughput: f64,
    pub mean_occupancy: f64,
    pub mean_queue_length: f64,
    pub mean_busy_channels: f64,
    pub mean_time_in_system: f64,
    pub mean_time_in_queue: f64,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub empirical: QueueMetrics,
    pub theoretical: QueueMetrics,
}

impl Comparison {
    /// Largest per-level gap between the two probability vectors. Missing
    /// levels count as zero.
    pub fn max_probability_deviation(&self) -> f64 {
        let (e, t) = (&self.empirical.probabilities, &self.theoretical.probabilities);
        (0..e.len().max(t.len()))
            .map(|k| {
                let empirical = e.get(k).copied().unwrap_or(0.0);
                let theoretical = t.get(k).copied().unwrap_or(0.0);
                (empirical - theoretical).abs()
            })
            .fold(0.0, f64::max)
    }
}

pub fn compare(station: &StationConfig, collector: &StatisticsCollector) -> Result<Comparison> {
    let theoretical = ProbabilityModel::new(station)?.metrics()?;
    let empirical = collector.metrics(station.arrival_rate, station.max_level())?;
    let comparison = Comparison {
        empirical,
        theoretical,
    };
    debug!(
        deviation = comparison.max_probability_deviation(),
        "Compared empirical and theoretical probabilities"
    );
    Ok(comparison)
}

/// Runs independent replications in parallel, replication `r` seeded with
/// `seed + r`. Reports come back in replication order.
pub fn run_replications(
    station: &StationConfig,
    simulation: &SimulationConfig,
    bar: &ProgressBar,
) -> Result<Vec<SimulationReport>> {
    simulation.validate()?;
    let reports = (0..simulation.replications)
        .into_par_iter()
        .map(|r| {
            let seed = simulation.seed.wrapping_add(r as u64);
            let report = run_replication(station, simulation.horizon, seed);
            bar.inc(1);
            report
        })
        .collect::<Result<Vec<_>>>()?;
    bar.finish_and_clear();
    info!(
        replications = reports.len(),
        horizon = simulation.horizon,
        "Replications finished"
    );
    Ok(reports)
}

/// All replications' logs, concatenated in replication order.
pub fn pool_reports(reports: &[SimulationReport]) -> StatisticsCollector {
    reports
        .iter()
        .map(|report| report.collector.clone())
        .fold(StatisticsCollector::new(), StatisticsCollector::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::yaml_parser::Capacity;

    #[test]
    fn replications_are_seeded_in_order() {
        let station =
            StationConfig::new(Capacity::Finite(2), Capacity::Finite(2), 3.0, 4.0, 1.0).unwrap();
        let simulation = SimulationConfig::new(50.0, 10, 4).unwrap();
        let reports = run_replications(&station, &simulation, &ProgressBar::hidden()).unwrap();
        let seeds: Vec<u64> = reports.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![10, 11, 12, 13]);

        let single = run_replication(&station, 50.0, 12).unwrap();
        assert_eq!(single.collector.outcomes(), reports[2].collector.outcomes());

        let pooled = pool_reports(&reports);
        let total: usize = reports.iter().map(|r| r.collector.arrivals()).sum();
        assert_eq!(pooled.arrivals(), total);
    }

    #[test]
    fn deviation_pads_shorter_vector() {
        let metrics = |probabilities: Vec<f64>| QueueMetrics {
            probabilities,
            rejection_probability: 0.0,
            relative_throughput: 1.0,
            throughput: 1.0,
            abandonment_probability: 0.0,
            effective_throughput: 1.0,
            mean_occupancy: 0.0,
            mean_queue_length: 0.0,
            mean_busy_channels: 0.0,
            mean_time_in_system: 0.0,
            mean_time_in_queue: 0.0,
        };
        let comparison = Comparison {
            empirical: metrics(vec![0.5, 0.5]),
            theoretical: metrics(vec![0.4, 0.4, 0.2]),
        };
        assert!((comparison.max_probability_deviation() - 0.2).abs() < 1e-12);
    }
}
