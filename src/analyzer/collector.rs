use itertools::Itertools;

use crate::analyzer::{estimator, theory::level_count, QueueMetrics};
use crate::engine::request::{Outcome, Request};
use crate::error::{Result, StationError};

/// Channels busy and requests waiting, as seen by an arriving request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Occupancy {
    pub processing: usize,
    pub waiting: usize,
}

impl Occupancy {
    pub fn level(&self) -> usize {
        self.processing + self.waiting
    }
}

/// Append-only log of what happened during one or more runs.
#[derive(Debug, Clone, Default)]
pub struct StatisticsCollector {
    observations: Vec<Occupancy>,
    requests: Vec<Request>,
    completed: usize,
    rejected: usize,
    abandoned: usize,
    waiting_times: Vec<f64>,
    times_in_system: Vec<f64>,
}

fn mean_of(values: &[f64], what: &str) -> Result<f64> {
    estimator::mean(values)
        .map_err(|_| StationError::InsufficientData(format!("no samples for {what}")))
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_arrival(&mut self, snapshot: Occupancy) {
        self.observations.push(snapshot);
    }

    /// Stores a finished request. Unfinished ones are ignored.
    pub fn record(&mut self, request: Request) {
        let Some(outcome) = request.outcome() else {
            return;
        };
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Abandoned => self.abandoned += 1,
        }
        if let Some(waited) = request.waiting_time() {
            self.waiting_times.push(waited);
        }
        if let Some(stayed) = request.time_in_system() {
            self.times_in_system.push(stayed);
        }
        self.requests.push(request);
    }

    /// Appends another collector's log after this one's.
    pub fn merge(mut self, other: StatisticsCollector) -> StatisticsCollector {
        self.observations.extend(other.observations);
        self.requests.extend(other.requests);
        self.completed += other.completed;
        self.rejected += other.rejected;
        self.abandoned += other.abandoned;
        self.waiting_times.extend(other.waiting_times);
        self.times_in_system.extend(other.times_in_system);
        self
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned
    }

    pub fn finished_count(&self) -> usize {
        self.completed + self.rejected + self.abandoned
    }

    pub fn arrivals(&self) -> usize {
        self.observations.len()
    }

    pub fn observations(&self) -> &[Occupancy] {
        &self.observations
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn waiting_times(&self) -> &[f64] {
        &self.waiting_times
    }

    pub fn times_in_system(&self) -> &[f64] {
        &self.times_in_system
    }

    /// `(id, outcome)` in the order requests finished.
    pub fn outcomes(&self) -> Vec<(u64, Outcome)> {
        self.requests
            .iter()
            .filter_map(|r| Some((r.id, r.outcome()?)))
            .collect()
    }

    pub fn occupancy_levels(&self) -> Vec<usize> {
        self.observations.iter().map(Occupancy::level).collect()
    }

    /// Share of arrivals that found `k` requests in the station, for
    /// `k = 0..=max_level`. Without a bound the vector ends at the highest
    /// observed level.
    pub fn occupancy_probabilities(&self, max_level: Option<usize>) -> Result<Vec<f64>> {
        let trials = self.observations.len();
        if trials == 0 {
            return Err(StationError::InsufficientData(
                "no arrivals were observed".into(),
            ));
        }
        let counts = self.observations.iter().map(Occupancy::level).counts();
        let top = max_level
            .or_else(|| counts.keys().max().copied())
            .unwrap_or(0);
        Ok((0..level_count(top, 0)?)
            .map(|k| counts.get(&k).copied().unwrap_or(0) as f64 / trials as f64)
            .collect())
    }

    /// Rejected over completed plus rejected.
    pub fn rejection_probability(&self) -> Result<f64> {
        let decided = self.completed + self.rejected;
        if decided == 0 {
            return Err(StationError::InsufficientData(
                "no request was completed or rejected".into(),
            ));
        }
        Ok(self.rejected as f64 / decided as f64)
    }

    pub fn abandonment_probability(&self) -> Result<f64> {
        let finished = self.finished_count();
        if finished == 0 {
            return Err(StationError::InsufficientData("no request finished".into()));
        }
        Ok(self.abandoned as f64 / finished as f64)
    }

    /// Empirical counterpart of [`ProbabilityModel::metrics`].
    ///
    /// [`ProbabilityModel::metrics`]: crate::analyzer::theory::ProbabilityModel::metrics
    pub fn metrics(&self, arrival_rate: f64, max_level: Option<usize>) -> Result<QueueMetrics> {
        let probabilities = self.occupancy_probabilities(max_level)?;
        let rejection_probability = self.rejection_probability()?;
        let abandonment_probability = self.abandonment_probability()?;
        let relative_throughput = 1.0 - rejection_probability;
        let finished = self.finished_count() as f64;
        let column = |f: fn(&Occupancy) -> usize| -> Vec<f64> {
            self.observations.iter().map(|o| f(o) as f64).collect()
        };
        let mean_occupancy = mean_of(&column(Occupancy::level), "occupancy")?;
        let mean_queue_length = mean_of(&column(|o| o.waiting), "queue length")?;
        let mean_busy_channels = mean_of(&column(|o| o.processing), "busy channels")?;

        Ok(QueueMetrics {
            probabilities,
            rejection_probability,
            relative_throughput,
            throughput: relative_throughput * arrival_rate,
            abandonment_probability,
            effective_throughput: self.completed as f64 / finished * arrival_rate,
            mean_occupancy,
            mean_queue_length,
            mean_busy_channels,
            mean_time_in_system: mean_of(&self.times_in_system, "time in system")?,
            mean_time_in_queue: mean_of(&self.waiting_times, "time in queue")?,
        })
    }
}
