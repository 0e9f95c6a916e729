use std::{fmt, fs::File, io::BufReader, path::Path};

use ndarray::Array2;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, StationError};

/// Size of a channel pool or of a waiting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capacity {
    Finite(usize),
    Unbounded,
}

impl Capacity {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Capacity::Unbounded)
    }

    pub fn finite(&self) -> Option<usize> {
        match self {
            Capacity::Finite(n) => Some(*n),
            Capacity::Unbounded => None,
        }
    }

    /// Whether `count` units still leave room for one more.
    pub fn admits(&self, count: usize) -> bool {
        match self {
            Capacity::Finite(n) => count < *n,
            Capacity::Unbounded => true,
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Finite(n) => write!(f, "{n}"),
            Capacity::Unbounded => write!(f, "inf"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCapacity {
    Count(i64),
    Real(f64),
    Label(String),
}

impl TryFrom<RawCapacity> for Capacity {
    type Error = StationError;

    fn try_from(raw: RawCapacity) -> Result<Self> {
        match raw {
            RawCapacity::Count(n) => usize::try_from(n).map(Capacity::Finite).map_err(|_| {
                StationError::invalid(format!("capacity must be non-negative, got {n}"))
            }),
            RawCapacity::Real(x) if x == f64::INFINITY => Ok(Capacity::Unbounded),
            // `usize::MAX as f64` rounds up, so the bound itself is excluded.
            RawCapacity::Real(x) if x >= 0.0 && x.fract() == 0.0 && x < usize::MAX as f64 => {
                Ok(Capacity::Finite(x as usize))
            }
            RawCapacity::Real(x) => Err(StationError::invalid(format!(
                "capacity must be a non-negative integer or inf, got {x}"
            ))),
            RawCapacity::Label(label) => match label.trim().to_ascii_lowercase().as_str() {
                "inf" | "infinity" | "unbounded" => Ok(Capacity::Unbounded),
                other => Err(StationError::invalid(format!(
                    "unknown capacity `{other}`"
                ))),
            },
        }
    }
}

/// Parameters of the queueing station, immutable for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub channels: Capacity,
    pub queue_capacity: Capacity,
    pub arrival_rate: f64,
    pub service_rate: f64,
    pub abandonment_rate: f64,
}

impl StationConfig {
    pub fn new(
        channels: Capacity,
        queue_capacity: Capacity,
        arrival_rate: f64,
        service_rate: f64,
        abandonment_rate: f64,
    ) -> Result<Self> {
        let station = Self {
            channels,
            queue_capacity,
            arrival_rate,
            service_rate,
            abandonment_rate,
        };
        station.validate()?;
        Ok(station)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.arrival_rate.is_finite() && self.arrival_rate > 0.0) {
            return Err(StationError::invalid(format!(
                "arrival rate must be positive, got {}",
                self.arrival_rate
            )));
        }
        if !(self.service_rate.is_finite() && self.service_rate > 0.0) {
            return Err(StationError::invalid(format!(
                "service rate must be positive, got {}",
                self.service_rate
            )));
        }
        if !(self.abandonment_rate.is_finite() && self.abandonment_rate >= 0.0) {
            return Err(StationError::invalid(format!(
                "abandonment rate must be non-negative, got {}",
                self.abandonment_rate
            )));
        }
        if self.channels == Capacity::Finite(0) {
            return Err(StationError::invalid("station needs at least one channel"));
        }
        if let (Some(c), Some(k)) = (self.channels.finite(), self.queue_capacity.finite()) {
            if c.checked_add(k).and_then(|n| n.checked_add(1)).is_none() {
                return Err(StationError::invalid(format!(
                    "{c} channels and a line of {k} exceed the addressable occupancy levels"
                )));
            }
        }
        Ok(())
    }

    /// Offered load ρ = λ/μ.
    pub fn load(&self) -> f64 {
        self.arrival_rate / self.service_rate
    }

    /// Relative impatience β = ν/μ.
    pub fn impatience(&self) -> f64 {
        self.abandonment_rate / self.service_rate
    }

    /// Highest reachable occupancy level, when the station is finite.
    /// `None` also when `c + K` does not fit, which `validate` refuses.
    pub fn max_level(&self) -> Option<usize> {
        self.channels
            .finite()?
            .checked_add(self.queue_capacity.finite()?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub horizon: f64,
    pub seed: u64,
    pub replications: usize,
}

impl SimulationConfig {
    pub fn new(horizon: f64, seed: u64, replications: usize) -> Result<Self> {
        let simulation = Self {
            horizon,
            seed,
            replications,
        };
        simulation.validate()?;
        Ok(simulation)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            return Err(StationError::invalid(format!(
                "horizon must be positive and finite, got {}",
                self.horizon
            )));
        }
        if self.replications == 0 {
            return Err(StationError::invalid("at least one replication is required"));
        }
        Ok(())
    }
}

/// Setup of the two-dimensional sampling experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct JointConfig {
    pub probabilities: Array2<f64>,
    pub rows: Vec<i64>,
    pub columns: Vec<i64>,
    pub draws: usize,
}

#[derive(Debug, Deserialize)]
struct RawStation {
    channels: RawCapacity,
    queue_capacity: RawCapacity,
    arrival_rate: f64,
    service_rate: f64,
    #[serde(default)]
    abandonment_rate: f64,
}

fn default_replications() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct RawSimulation {
    horizon: f64,
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_replications")]
    replications: usize,
}

fn default_draws() -> usize {
    10_000
}

#[derive(Debug, Deserialize)]
struct RawJoint {
    probabilities: Vec<Vec<f64>>,
    rows: Vec<i64>,
    columns: Vec<i64>,
    #[serde(default = "default_draws")]
    draws: usize,
}

#[derive(Debug, Deserialize)]
struct ParsedConfig {
    station: RawStation,
    simulation: RawSimulation,
    #[serde(default)]
    joint: Option<RawJoint>,
}

pub struct Config {
    pub station: StationConfig,
    pub simulation: SimulationConfig,
    pub joint: Option<JointConfig>,
}

impl TryFrom<RawStation> for StationConfig {
    type Error = StationError;

    fn try_from(raw: RawStation) -> Result<Self> {
        StationConfig::new(
            raw.channels.try_into()?,
            raw.queue_capacity.try_into()?,
            raw.arrival_rate,
            raw.service_rate,
            raw.abandonment_rate,
        )
    }
}

impl TryFrom<RawJoint> for JointConfig {
    type Error = StationError;

    fn try_from(raw: RawJoint) -> Result<Self> {
        let width = raw.probabilities.first().map_or(0, Vec::len);
        if raw.probabilities.iter().any(|row| row.len() != width) {
            return Err(StationError::invalid("joint table rows differ in length"));
        }
        let height = raw.probabilities.len();
        let cells = raw.probabilities.into_iter().flatten().collect();
        let probabilities = Array2::from_shape_vec((height, width), cells)
            .map_err(|e| StationError::invalid(e.to_string()))?;
        Ok(Self {
            probabilities,
            rows: raw.rows,
            columns: raw.columns,
            draws: raw.draws,
        })
    }
}

impl TryFrom<ParsedConfig> for Config {
    type Error = StationError;

    fn try_from(parsed: ParsedConfig) -> Result<Self> {
        Ok(Config {
            station: parsed.station.try_into()?,
            simulation: SimulationConfig::new(
                parsed.simulation.horizon,
                parsed.simulation.seed,
                parsed.simulation.replications,
            )?,
            joint: parsed.joint.map(JointConfig::try_from).transpose()?,
        })
    }
}

pub fn parse_str(document: &str) -> Result<Config> {
    let parsed: ParsedConfig = serde_yaml::from_str(document)?;
    parsed.try_into()
}

pub fn parse_config(path: &Path) -> Result<Config> {
    let file = File::open(path)?;
    let reader = BufReader::new(&file);
    let parsed: ParsedConfig = serde_yaml::from_reader(reader)?;
    let config: Config = parsed.try_into()?;
    debug!(path = %path.display(), station = ?config.station, "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
station:
  channels: 2
  queue_capacity: 2
  arrival_rate: 3
  service_rate: 4
  abandonment_rate: 1
simulation:
  horizon: 100
  seed: 7
joint:
  probabilities: [[0.2, 0.3], [0.1, 0.2], [0.1, 0.1]]
  rows: [1, 2, 4]
  columns: [1, 3]
"#;

    #[test]
    fn parses_full_document() {
        let config = parse_str(DOCUMENT).unwrap();
        assert_eq!(config.station.channels, Capacity::Finite(2));
        assert_eq!(config.station.queue_capacity, Capacity::Finite(2));
        assert_eq!(config.station.arrival_rate, 3.0);
        assert_eq!(config.station.max_level(), Some(4));
        assert_eq!(config.simulation.seed, 7);
        assert_eq!(config.simulation.replications, 1);
        let joint = config.joint.unwrap();
        assert_eq!(joint.probabilities.dim(), (3, 2));
        assert_eq!(joint.probabilities[[2, 1]], 0.1);
        assert_eq!(joint.draws, 10_000);
    }

    #[test]
    fn infinite_capacities() {
        let document = DOCUMENT
            .replace("channels: 2", "channels: inf")
            .replace("queue_capacity: 2", "queue_capacity: .inf");
        let config = parse_str(&document).unwrap();
        assert!(config.station.channels.is_unbounded());
        assert!(config.station.queue_capacity.is_unbounded());
        assert_eq!(config.station.max_level(), None);
    }

    #[test]
    fn rejects_negative_queue() {
        let document = DOCUMENT.replace("queue_capacity: 2", "queue_capacity: -1");
        assert!(matches!(
            parse_str(&document),
            Err(StationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_zero_channels_and_bad_rates() {
        let document = DOCUMENT.replace("channels: 2", "channels: 0");
        assert!(matches!(
            parse_str(&document),
            Err(StationError::InvalidConfiguration(_))
        ));
        let one = Capacity::Finite(1);
        assert!(StationConfig::new(one, one, -1.0, 1.0, 0.0).is_err());
        assert!(StationConfig::new(one, one, 1.0, 0.0, 0.0).is_err());
        assert!(StationConfig::new(one, one, 1.0, 1.0, -0.5).is_err());
        assert!(SimulationConfig::new(0.0, 1, 1).is_err());
        assert!(SimulationConfig::new(10.0, 1, 0).is_err());
    }

    #[test]
    fn oversized_capacities_are_invalid() {
        for document in [
            DOCUMENT.replace("queue_capacity: 2", "queue_capacity: 1e30"),
            DOCUMENT.replace("channels: 2", "channels: 1e30"),
            DOCUMENT.replace("queue_capacity: 2", "queue_capacity: 18446744073709551616.0"),
        ] {
            assert!(matches!(
                parse_str(&document),
                Err(StationError::InvalidConfiguration(_))
            ));
        }
        let widest = StationConfig::new(
            Capacity::Finite(2),
            Capacity::Finite(usize::MAX - 1),
            3.0,
            4.0,
            1.0,
        );
        assert!(matches!(widest, Err(StationError::InvalidConfiguration(_))));
    }

    #[test]
    fn ragged_joint_table_is_invalid() {
        let document = DOCUMENT.replace("[0.1, 0.1]]", "[0.1]]");
        assert!(matches!(
            parse_str(&document),
            Err(StationError::InvalidConfiguration(_))
        ));
    }
}
