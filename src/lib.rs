//! Simulation and steady-state analysis of a multi-channel queueing station
//! with a bounded line and impatient requests, plus a small toolkit for
//! sampling and estimating two-dimensional discrete distributions.

pub mod analyzer;
pub mod error;
pub mod logging;

pub mod engine {
    pub mod lifecycle;
    pub mod pool;
    pub mod race;
    pub mod request;
    pub mod scheduler;
    pub mod station;
}

pub mod parser {
    pub mod yaml_parser;
}

pub mod utils {
    pub mod distributions;
    pub mod joint;
}

pub use analyzer::{compare, Comparison, QueueMetrics};
pub use engine::station::{simulate, SimulationReport};
pub use error::{Result, StationError};
pub use parser::yaml_parser::{Capacity, SimulationConfig, StationConfig};
