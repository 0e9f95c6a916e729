//! Point and interval estimates for samples drawn from a discrete
//! two-dimensional distribution, plus the chi-square goodness-of-fit check
//! of an empirical table against the true one.

use ndarray::Array2;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::error::{Result, StationError};

/// Significance level of [`chi_square_test`].
pub const CHI_SQUARE_LEVEL: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub critical_value: f64,
    pub not_rejected: bool,
}

/// Size, mean and unbiased variance of one component's sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginalEstimate {
    pub n: usize,
    pub mean: f64,
    pub variance: f64,
}

impl MarginalEstimate {
    pub fn from_sample(sample: &[f64]) -> Result<Self> {
        let m = mean(sample)?;
        Ok(Self {
            n: sample.len(),
            mean: m,
            variance: variance(sample, m)?,
        })
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn mean_interval(&self, confidence: f64) -> Result<(f64, ConfidenceInterval)> {
        mean_confidence_interval(self.n, self.mean, self.variance, confidence)
    }

    pub fn variance_interval(&self, probabilities: (f64, f64)) -> Result<ConfidenceInterval> {
        variance_confidence_interval(self.n, self.variance, probabilities)
    }
}

fn require(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(StationError::InsufficientSampleSize { required, actual });
    }
    Ok(())
}

fn probability(p: f64, what: &str) -> Result<f64> {
    if p > 0.0 && p < 1.0 {
        Ok(p)
    } else {
        Err(StationError::invalid(format!(
            "{what} must lie strictly between 0 and 1, got {p}"
        )))
    }
}

pub fn mean(sample: &[f64]) -> Result<f64> {
    require(sample.len(), 1)?;
    Ok(sample.iter().sum::<f64>() / sample.len() as f64)
}

/// Unbiased sample variance around a known mean.
pub fn variance(sample: &[f64], mean: f64) -> Result<f64> {
    require(sample.len(), 2)?;
    let squares: f64 = sample.iter().map(|x| (x - mean).powi(2)).sum();
    Ok(squares / (sample.len() - 1) as f64)
}

/// Two-sided Student-t interval for the mean, `n` degrees of freedom and
/// margin `t * sqrt(variance / (n - 1))`. Returns the margin and the interval.
pub fn mean_confidence_interval(
    n: usize,
    mean: f64,
    variance: f64,
    confidence: f64,
) -> Result<(f64, ConfidenceInterval)> {
    require(n, 2)?;
    let confidence = probability(confidence, "confidence level")?;
    let student = StudentsT::new(0.0, 1.0, n as f64)
        .map_err(|e| StationError::invalid(e.to_string()))?;
    let t = student.inverse_cdf((1.0 + confidence) / 2.0);
    let margin = t * (variance / (n - 1) as f64).sqrt();
    Ok((
        margin,
        ConfidenceInterval {
            lower: mean - margin,
            upper: mean + margin,
        },
    ))
}

/// Chi-square interval for the variance with `n - 1` degrees of freedom,
/// built from the `(low, high)` quantile probabilities.
pub fn variance_confidence_interval(
    n: usize,
    variance: f64,
    (low, high): (f64, f64),
) -> Result<ConfidenceInterval> {
    require(n, 2)?;
    let low = probability(low, "lower quantile")?;
    let high = probability(high, "upper quantile")?;
    if low >= high {
        return Err(StationError::invalid(format!(
            "quantile probabilities ({low}, {high}) are not increasing"
        )));
    }
    let freedom = (n - 1) as f64;
    let chi = ChiSquared::new(freedom).map_err(|e| StationError::invalid(e.to_string()))?;
    let (q_low, q_high) = (chi.inverse_cdf(low), chi.inverse_cdf(high));
    Ok(ConfidenceInterval {
        lower: variance - freedom * variance / q_high,
        upper: variance + freedom * variance / q_low,
    })
}

fn same_shape(a: &Array2<f64>, b: &Array2<f64>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(StationError::invalid(format!(
            "tables have shapes {:?} and {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(())
}

/// Correlation coefficient of the components, taking `E[XY]` from the joint
/// table and the moments from the arguments.
pub fn correlation(
    joint: &Array2<f64>,
    rows: &[i64],
    columns: &[i64],
    mean_x: f64,
    mean_y: f64,
    var_x: f64,
    var_y: f64,
) -> Result<f64> {
    if joint.dim() != (rows.len(), columns.len()) {
        return Err(StationError::invalid(format!(
            "joint table {:?} does not match supports of {} and {} values",
            joint.dim(),
            rows.len(),
            columns.len()
        )));
    }
    let scale = (var_x * var_y).sqrt();
    if !(scale > 0.0) {
        return Err(StationError::InsufficientData(
            "correlation needs positive variances".into(),
        ));
    }
    let mixed: f64 = joint
        .indexed_iter()
        .map(|((i, j), p)| rows[i] as f64 * columns[j] as f64 * p)
        .sum();
    Ok((mixed - mean_x * mean_y) / scale)
}

/// Pearson's criterion `n Σ (e - t)² / t` with `cells - 1` degrees of
/// freedom at the 95% level.
pub fn chi_square_test(
    theoretical: &Array2<f64>,
    empirical: &Array2<f64>,
    n: usize,
) -> Result<ChiSquareTest> {
    same_shape(theoretical, empirical)?;
    require(n, 1)?;
    if theoretical.iter().any(|t| !(*t > 0.0)) {
        return Err(StationError::invalid(
            "chi-square test needs every theoretical cell to be positive",
        ));
    }
    let cells = theoretical.len();
    if cells < 2 {
        return Err(StationError::invalid("chi-square test needs at least two cells"));
    }
    let statistic = n as f64
        * theoretical
            .iter()
            .zip(empirical.iter())
            .map(|(t, e)| (e - t).powi(2) / t)
            .sum::<f64>();
    let critical_value = ChiSquared::new((cells - 1) as f64)
        .map_err(|e| StationError::invalid(e.to_string()))?
        .inverse_cdf(CHI_SQUARE_LEVEL);
    Ok(ChiSquareTest {
        statistic,
        critical_value,
        not_rejected: statistic < critical_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::joint::JointSampler;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn point_estimates() {
        let sample = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&sample).unwrap();
        assert_eq!(m, 5.0);
        assert!((variance(&sample, m).unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn small_samples_are_rejected() {
        assert!(matches!(
            mean(&[]),
            Err(StationError::InsufficientSampleSize { required: 1, actual: 0 })
        ));
        assert!(matches!(
            variance(&[1.0], 1.0),
            Err(StationError::InsufficientSampleSize { required: 2, actual: 1 })
        ));
        assert!(mean_confidence_interval(1, 0.0, 1.0, 0.95).is_err());
        assert!(variance_confidence_interval(0, 1.0, (0.025, 0.975)).is_err());
    }

    #[test]
    fn student_interval() {
        // t_{0.975}(10) = 2.228139
        let (margin, interval) = mean_confidence_interval(10, 3.0, 2.5, 0.95).unwrap();
        let expected = 2.228139 * (2.5f64 / 9.0).sqrt();
        assert!((margin - expected).abs() < 1e-4, "margin {margin}");
        assert!((interval.lower - (3.0 - margin)).abs() < 1e-12);
        assert!(interval.contains(3.0));
        let (wider, _) = mean_confidence_interval(10, 3.0, 2.5, 0.99).unwrap();
        assert!(wider > margin);
        assert!(mean_confidence_interval(10, 3.0, 2.5, 1.0).is_err());
    }

    #[test]
    fn chi_square_variance_interval() {
        // chi2_{0.025}(9) = 2.700389, chi2_{0.975}(9) = 19.022768
        let interval = variance_confidence_interval(10, 4.0, (0.025, 0.975)).unwrap();
        assert!((interval.lower - (4.0 - 36.0 / 19.022768)).abs() < 1e-4);
        assert!((interval.upper - (4.0 + 36.0 / 2.700389)).abs() < 1e-3);
        assert!(variance_confidence_interval(10, 4.0, (0.9, 0.1)).is_err());
    }

    #[test]
    fn correlation_of_reference_tables() {
        let diagonal = array![[0.5, 0.0], [0.0, 0.5]];
        let r = correlation(&diagonal, &[0, 1], &[0, 1], 0.5, 0.5, 0.25, 0.25).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let independent = array![[0.06, 0.14], [0.24, 0.56]];
        let (mx, my) = (0.8, 0.7);
        let r = correlation(&independent, &[0, 1], &[0, 1], mx, my, 0.16, 0.21).unwrap();
        assert!(r.abs() < 1e-12);

        assert!(correlation(&diagonal, &[0], &[0, 1], 0.0, 0.0, 1.0, 1.0).is_err());
        assert!(correlation(&diagonal, &[0, 1], &[0, 1], 0.0, 0.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn marginal_bundle() {
        let estimate = MarginalEstimate::from_sample(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(estimate.n, 4);
        assert_eq!(estimate.mean, 2.5);
        assert!((estimate.variance - 5.0 / 3.0).abs() < 1e-12);
        let interval = estimate.variance_interval((0.01, 0.99)).unwrap();
        assert!(interval.contains(estimate.variance));
    }

    #[test]
    fn chi_square_rejects_foreign_table() {
        let truth = array![[0.2, 0.3], [0.1, 0.2], [0.1, 0.1]];
        let skewed = array![[0.4, 0.1], [0.1, 0.2], [0.1, 0.1]];
        let verdict = chi_square_test(&truth, &skewed, 1_000).unwrap();
        // 5 degrees of freedom, 95% quantile 11.0705
        assert!((verdict.critical_value - 11.0705).abs() < 1e-3);
        assert!(!verdict.not_rejected);
        assert!(chi_square_test(&truth, &array![[1.0]], 10).is_err());
        assert!(chi_square_test(&array![[0.0, 1.0]], &array![[0.5, 0.5]], 10).is_err());
    }

    #[test]
    fn chi_square_accepts_true_table() {
        let sampler = JointSampler::new(
            array![[0.2, 0.3], [0.1, 0.2], [0.1, 0.1]],
            vec![1, 2, 4],
            vec![1, 3],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let trials = 200;
        let accepted = (0..trials)
            .filter(|_| {
                let empirical = sampler.empirical_matrix(1_000, &mut rng).unwrap();
                chi_square_test(sampler.probabilities(), &empirical, 1_000)
                    .unwrap()
                    .not_rejected
            })
            .count();
        assert!(accepted as f64 > 0.9 * trials as f64, "accepted {accepted}");
    }
}
