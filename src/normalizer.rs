//! Signal normalization
//!
//! Z-scores a subject's (time x region) activity matrix independently per
//! region along the time axis (population standard deviation).
//! Regions whose signal is constant over the scan carry no information about
//! relative activation and are set to zero instead of dividing by zero.

use ndarray::{Array2, Axis};

/// Z-scored activity plus the regions that had to be zero-filled
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedActivity {
    /// Normalized (time x region) matrix
    pub values: Array2<f64>,
    /// Column positions with zero (or non-finite) variance
    pub constant_regions: Vec<usize>,
}

/// Normalizer for subject activity matrices
pub struct Normalizer;

impl Normalizer {
    /// Z-score every column of `raw` across time
    pub fn zscore(raw: &Array2<f64>) -> NormalizedActivity {
        let mut values = raw.to_owned();
        let mut constant_regions = Vec::new();
        let n = raw.nrows() as f64;

        for (column, mut series) in values.axis_iter_mut(Axis(1)).enumerate() {
            if series.is_empty() {
                continue;
            }
            let mean = series.sum() / n;
            let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std_dev = variance.sqrt();

            if std_dev > 0.0 && std_dev.is_finite() {
                series.mapv_inplace(|v| (v - mean) / std_dev);
            } else {
                series.fill(0.0);
                constant_regions.push(column);
            }
        }

        NormalizedActivity {
            values,
            constant_regions,
        }
    }
}
