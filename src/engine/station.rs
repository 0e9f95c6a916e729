use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument};

use super::lifecycle::arrivals;
use super::pool::ChannelPool;
use super::request::Request;
use super::scheduler::{EventClock, SimTime};
use crate::analyzer::collector::{Occupancy, StatisticsCollector};
use crate::analyzer::QueueMetrics;
use crate::error::Result;
use crate::parser::yaml_parser::{SimulationConfig, StationConfig};
use crate::utils::distributions::RateSampler;

/// Everything one run shares between its activities. Handed to every
/// activity as an `Rc`; nothing outlives the run.
pub struct SimulationContext {
    pub station: StationConfig,
    pub clock: EventClock,
    pub pool: ChannelPool,
    seed: u64,
    collector: RefCell<StatisticsCollector>,
    rng: RefCell<ChaCha8Rng>,
    next_request: Cell<u64>,
    arrivals: RateSampler,
    service: RateSampler,
    patience: RateSampler,
}

impl SimulationContext {
    pub fn new(station: &StationConfig, seed: u64) -> Result<Rc<Self>> {
        station.validate()?;
        Ok(Rc::new(Self {
            station: station.clone(),
            clock: EventClock::new(),
            pool: ChannelPool::new(station.channels),
            seed,
            collector: RefCell::new(StatisticsCollector::new()),
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            next_request: Cell::new(0),
            arrivals: RateSampler::new(station.arrival_rate)?,
            service: RateSampler::new(station.service_rate)?,
            patience: RateSampler::new(station.abandonment_rate)?,
        }))
    }

    /// Seed of the run's random stream.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_request_id(&self) -> u64 {
        let id = self.next_request.get();
        self.next_request.set(id + 1);
        id
    }

    pub fn sample_interarrival(&self) -> SimTime {
        self.arrivals.sample(&mut *self.rng.borrow_mut())
    }

    pub fn sample_service(&self) -> SimTime {
        self.service.sample(&mut *self.rng.borrow_mut())
    }

    /// Infinite when the station has no impatience.
    pub fn sample_patience(&self) -> SimTime {
        self.patience.sample(&mut *self.rng.borrow_mut())
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            processing: self.pool.in_use_count(),
            waiting: self.pool.queue_length(),
        }
    }

    pub fn observe_arrival(&self) -> Occupancy {
        let snapshot = self.occupancy();
        self.collector.borrow_mut().observe_arrival(snapshot);
        snapshot
    }

    pub fn finish(&self, request: Request) {
        self.collector.borrow_mut().record(request);
    }

    /// Moves the log out, leaving an empty one behind.
    pub fn take_collector(&self) -> StatisticsCollector {
        self.collector.take()
    }

    /// Generates arrivals until `horizon`, then drops whatever is still in
    /// flight and hands back the collected log.
    pub fn run(self: &Rc<Self>, horizon: SimTime) -> SimulationReport {
        self.clock.spawn(arrivals(Rc::clone(self)));
        self.clock.run_until(horizon);
        self.clock.shutdown();
        let collector = self.take_collector();
        info!(
            seed = self.seed,
            arrivals = collector.arrivals(),
            completed = collector.completed_count(),
            rejected = collector.rejected_count(),
            abandoned = collector.abandoned_count(),
            "Simulation finished"
        );
        SimulationReport {
            seed: self.seed,
            horizon,
            collector,
        }
    }
}

/// Plain-data outcome of one run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub seed: u64,
    pub horizon: SimTime,
    pub collector: StatisticsCollector,
}

impl SimulationReport {
    pub fn metrics(&self, station: &StationConfig) -> Result<QueueMetrics> {
        self.collector
            .metrics(station.arrival_rate, station.max_level())
    }
}

#[instrument(
    skip(station),
    fields(channels = %station.channels, queue = %station.queue_capacity)
)]
pub fn run_replication(
    station: &StationConfig,
    horizon: SimTime,
    seed: u64,
) -> Result<SimulationReport> {
    let context = SimulationContext::new(station, seed)?;
    Ok(context.run(horizon))
}

/// Single run with the configured seed.
pub fn simulate(
    station: &StationConfig,
    simulation: &SimulationConfig,
) -> Result<SimulationReport> {
    simulation.validate()?;
    run_replication(station, simulation.horizon, simulation.seed)
}
