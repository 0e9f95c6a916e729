use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::error::{Result, StationError};

/// Exponential durations for an event stream of the given rate. A zero rate
/// describes an event that never happens.
#[derive(Debug, Clone, Copy)]
pub struct RateSampler {
    rate: f64,
    dist: Option<Exp<f64>>,
}

impl RateSampler {
    pub fn new(rate: f64) -> Result<Self> {
        if rate == 0.0 {
            return Ok(Self { rate, dist: None });
        }
        let dist = Exp::new(rate)
            .map_err(|e| StationError::invalid(format!("exponential rate {rate}: {e}")))?;
        Ok(Self {
            rate,
            dist: Some(dist),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Draws a duration; infinite for a zero rate.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.dist {
            Some(dist) => dist.sample(rng),
            None => f64::INFINITY,
        }
    }
}
