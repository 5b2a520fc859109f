use serde::{Deserialize, Serialize};

/// Running mean, variance and range of a stream of values (Welford's method).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    sq_dev_sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            sq_dev_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        let delta = val - self.mean;
        self.mean += delta / self.n_vals as f64;
        self.sq_dev_sum += delta * (val - self.mean);
        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> AccumulatorReport {
        let empty = self.n_vals == 0;
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if empty { f64::NAN } else { self.mean },
            std_dev: if self.n_vals > 1 {
                (self.sq_dev_sum / (self.n_vals - 1) as f64).sqrt()
            } else {
                f64::NAN
            },
            min: if empty { f64::NAN } else { self.min },
            max: if empty { f64::NAN } else { self.max },
        }
    }
}

/// Correlated series of values, e.g. a population size sampled every save.
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Standard error of the mean, corrected for autocorrelation by blocking.
    pub sem: f64,
    pub last: f64,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> TimeSeriesReport {
        TimeSeriesReport {
            n_vals: self.vals.len(),
            mean: mean(&self.vals),
            std_dev: variance(&self.vals).sqrt(),
            sem: blocked_sem(&self.vals),
            last: self.vals.last().copied().unwrap_or(f64::NAN),
        }
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn variance(vals: &[f64]) -> f64 {
    if vals.len() < 2 {
        return f64::NAN;
    }
    let mean = mean(vals);
    let sq_dev_sum: f64 = vals.iter().map(|&val| (val - mean).powi(2)).sum();
    sq_dev_sum / (vals.len() - 1) as f64
}

/// Standard error of the mean by repeated pairwise blocking (Flyvbjerg-Petersen).
///
/// Returns the first blocked estimate that lies above the lower error bar of
/// itself and of every coarser estimate, or the coarsest estimate if none does.
fn blocked_sem(vals: &[f64]) -> f64 {
    let mut block = vals.to_vec();
    let mut estimates = Vec::new();
    while block.len() >= 2 {
        let n = block.len() as f64;
        let sem_sq = variance(&block) / n;
        estimates.push((sem_sq, sem_sq * (2.0 / (n - 1.0)).sqrt()));
        block = block
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
    }

    let plateau = (0..estimates.len()).find(|&i_est| {
        let floor = estimates[i_est..]
            .iter()
            .map(|(sem_sq, err)| sem_sq - err)
            .fold(f64::NEG_INFINITY, f64::max);
        estimates[i_est].0 > floor
    });

    match plateau {
        Some(i_est) => estimates[i_est].0.sqrt(),
        None => estimates.last().map_or(f64::NAN, |(sem_sq, _)| sem_sq.sqrt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_direct_formulas() {
        let vals = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Accumulator::new();
        vals.iter().for_each(|&val| acc.add(val));
        let report = acc.report();
        assert_eq!(report.n_vals, 8);
        assert!((report.mean - 5.0).abs() < 1e-12);
        assert!((report.std_dev - variance(&vals).sqrt()).abs() < 1e-12);
        assert_eq!(report.min, 2.0);
        assert_eq!(report.max, 9.0);
    }

    #[test]
    fn empty_accumulator_reports_nan() {
        let report = Accumulator::new().report();
        assert!(report.mean.is_nan());
        assert!(report.min.is_nan());
    }

    #[test]
    fn constant_series_has_zero_error() {
        let mut series = TimeSeries::new();
        (0..64).for_each(|_| series.push(3.0));
        let report = series.report();
        assert_eq!(report.mean, 3.0);
        assert_eq!(report.std_dev, 0.0);
        assert_eq!(report.sem, 0.0);
        assert_eq!(report.last, 3.0);
    }

    #[test]
    fn correlated_series_error_exceeds_naive_error() {
        // 16 alternating runs of 64 zeros and ones.
        let vals: Vec<f64> = (0..1024).map(|i| ((i / 64) % 2) as f64).collect();
        let naive = (variance(&vals) / vals.len() as f64).sqrt();
        let sem = blocked_sem(&vals);

        // The estimate plateaus once blocks span a whole run.
        assert!((sem - (0.25_f64 / 15.0).sqrt()).abs() < 1e-9);
        assert!(sem > 4.0 * naive);
    }

    #[test]
    fn short_series_has_undefined_spread() {
        let mut series = TimeSeries::new();
        series.push(1.0);
        let report = series.report();
        assert_eq!(report.mean, 1.0);
        assert!(report.std_dev.is_nan());
        assert!(report.sem.is_nan());
    }
}
