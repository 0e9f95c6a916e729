use bimap::BiMap;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use crate::error::{Result, StationError};

const MASS_TOLERANCE: f64 = 1e-9;

/// Draws pairs `(x, y)` from a discrete joint distribution given as a table
/// `P[i][j] = P(x = rows[i], y = columns[j])`.
///
/// Sampling is inverse-CDF in two steps: the row from the cumulative row
/// marginal, then the column from that row's cumulative conditional
/// distribution, both located by binary search.
#[derive(Debug, Clone)]
pub struct JointSampler {
    probabilities: Array2<f64>,
    rows: BiMap<i64, usize>,
    columns: BiMap<i64, usize>,
    row_cdf: Vec<f64>,
    conditional_cdfs: Vec<Vec<f64>>,
}

fn index_support(values: &[i64], axis: &str) -> Result<BiMap<i64, usize>> {
    let mut support = BiMap::new();
    for (index, value) in values.iter().enumerate() {
        if support.insert_no_overwrite(*value, index).is_err() {
            return Err(StationError::invalid(format!(
                "{axis} support value {value} appears twice"
            )));
        }
    }
    Ok(support)
}

fn cumulative(weights: impl Iterator<Item = f64>) -> Vec<f64> {
    weights
        .scan(0.0, |acc, w| {
            *acc += w;
            Some(*acc)
        })
        .collect()
}

/// First index whose cumulative weight exceeds `u`. Zero-weight cells are
/// never selected.
fn locate(cdf: &[f64], u: f64) -> usize {
    cdf.partition_point(|c| *c <= u).min(cdf.len() - 1)
}

impl JointSampler {
    pub fn new(probabilities: Array2<f64>, rows: Vec<i64>, columns: Vec<i64>) -> Result<Self> {
        let (height, width) = probabilities.dim();
        if height == 0 || width == 0 {
            return Err(StationError::invalid("joint table is empty"));
        }
        if rows.len() != height || columns.len() != width {
            return Err(StationError::invalid(format!(
                "joint table is {height}x{width} but supports have {} rows and {} columns",
                rows.len(),
                columns.len()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(StationError::invalid(
                "joint probabilities must be finite and non-negative",
            ));
        }
        let total = probabilities.sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(StationError::invalid(format!(
                "joint probabilities sum to {total}, expected 1"
            )));
        }

        let row_cdf = cumulative(probabilities.sum_axis(Axis(1)).iter().copied());
        let conditional_cdfs = probabilities
            .axis_iter(Axis(0))
            .map(|row| cumulative(row.iter().copied()))
            .collect();

        Ok(Self {
            rows: index_support(&rows, "row")?,
            columns: index_support(&columns, "column")?,
            probabilities,
            row_cdf,
            conditional_cdfs,
        })
    }

    pub fn probabilities(&self) -> &Array2<f64> {
        &self.probabilities
    }

    pub fn dim(&self) -> (usize, usize) {
        self.probabilities.dim()
    }

    /// Support values of the first component, in table order.
    pub fn rows(&self) -> Vec<i64> {
        (0..self.row_cdf.len())
            .filter_map(|i| self.rows.get_by_right(&i).copied())
            .collect()
    }

    /// Support values of the second component, in table order.
    pub fn columns(&self) -> Vec<i64> {
        (0..self.probabilities.ncols())
            .filter_map(|j| self.columns.get_by_right(&j).copied())
            .collect()
    }

    pub fn row_marginal(&self) -> Array1<f64> {
        self.probabilities.sum_axis(Axis(1))
    }

    pub fn column_marginal(&self) -> Array1<f64> {
        self.probabilities.sum_axis(Axis(0))
    }

    pub fn sample_indices<R: Rng + ?Sized>(&self, rng: &mut R) -> (usize, usize) {
        let total = self.row_cdf[self.row_cdf.len() - 1];
        let i = locate(&self.row_cdf, rng.gen::<f64>() * total);
        let conditional = &self.conditional_cdfs[i];
        let row_mass = conditional[conditional.len() - 1];
        let j = locate(conditional, rng.gen::<f64>() * row_mass);
        (i, j)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (i64, i64) {
        let (i, j) = self.sample_indices(rng);
        (
            *self.rows.get_by_right(&i).unwrap_or(&0),
            *self.columns.get_by_right(&j).unwrap_or(&0),
        )
    }

    pub fn sample_n<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<(i64, i64)> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    /// Relative frequencies of observed pairs, laid out like the table.
    pub fn frequencies(&self, draws: &[(i64, i64)]) -> Result<Array2<f64>> {
        if draws.is_empty() {
            return Err(StationError::InsufficientData(
                "no draws to build a frequency table from".into(),
            ));
        }
        let mut counts = Array2::<f64>::zeros(self.dim());
        for (x, y) in draws {
            let (Some(i), Some(j)) = (self.rows.get_by_left(x), self.columns.get_by_left(y)) else {
                return Err(StationError::invalid(format!(
                    "pair ({x}, {y}) lies outside the table support"
                )));
            };
            counts[[*i, *j]] += 1.0;
        }
        Ok(counts / draws.len() as f64)
    }

    /// Samples `n` pairs and returns their relative-frequency table.
    pub fn empirical_matrix<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        self.frequencies(&self.sample_n(n, rng))
    }
}
