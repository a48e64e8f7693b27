//! Z-score standardization over the fixed feature order.
//!
//! Parameters are fit once over the full cleaned population and are immutable
//! afterwards. Every consumer (training, export, query lookup) goes through
//! [`StandardizationParameters::transform`], so there is exactly one code path
//! from raw features to standardized space.

use thiserror::Error;

use crate::features::{DIM, Feature, FeatureVector};
use crate::models::Record;

/// Relative std (per unit of column magnitude) below this counts as zero variance.
const ZERO_SCALE_EPS: f64 = 10.0 * f64::EPSILON;

#[derive(Error, Debug, PartialEq)]
pub enum StandardizeError {
    #[error("cannot fit standardizer on an empty population")]
    EmptyPopulation,
    #[error("non-finite value {value} for feature {feature} at row {row}")]
    NonFinite {
        feature: Feature,
        row: usize,
        value: f64,
    },
    #[error("invalid scale {value} for feature {feature} (must be finite and > 0)")]
    InvalidScale { feature: Feature, value: f64 },
    #[error("invalid mean {value} for feature {feature} (must be finite)")]
    InvalidMean { feature: Feature, value: f64 },
}

/// Per-dimension mean and scale, indexed by [`Feature::ALL`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardizationParameters {
    mean: FeatureVector,
    scale: FeatureVector,
}

impl StandardizationParameters {
    /// Fit mean and population standard deviation per dimension.
    /// A zero-variance dimension gets scale 1 so it passes through mean-centered.
    pub fn fit(population: &[FeatureVector]) -> Result<Self, StandardizeError> {
        let n = population.len();
        if n == 0 {
            return Err(StandardizeError::EmptyPopulation);
        }

        for (row, vec) in population.iter().enumerate() {
            for f in Feature::ALL {
                let value = vec[f.index()];
                if !value.is_finite() {
                    return Err(StandardizeError::NonFinite {
                        feature: f,
                        row,
                        value,
                    });
                }
            }
        }

        let mut mean = [0.0_f64; DIM];
        for vec in population {
            for (d, &val) in vec.iter().enumerate() {
                mean[d] += val;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut var = [0.0_f64; DIM];
        for vec in population {
            for (d, &val) in vec.iter().enumerate() {
                let diff = val - mean[d];
                var[d] += diff * diff;
            }
        }

        let mut min = [f64::INFINITY; DIM];
        let mut max = [f64::NEG_INFINITY; DIM];
        for vec in population {
            for (d, &val) in vec.iter().enumerate() {
                min[d] = min[d].min(val);
                max[d] = max[d].max(val);
            }
        }

        let mut scale = [1.0_f64; DIM];
        for f in Feature::ALL {
            let d = f.index();
            let std = (var[d] / n as f64).sqrt();
            // Summation error leaves a constant column with a tiny nonzero std,
            // so compare against the value range and the column magnitude
            if min[d] == max[d] {
                log::warn!("Feature {} is constant, passing through unscaled", f);
                mean[d] = min[d];
            } else if std <= ZERO_SCALE_EPS * mean[d].abs().max(1.0) {
                log::warn!("Feature {} has zero variance, passing through unscaled", f);
            } else {
                scale[d] = std;
            }
        }

        log::debug!("Fitted standardizer over {} records", n);
        Ok(Self { mean, scale })
    }

    pub fn fit_records(records: &[Record]) -> Result<Self, StandardizeError> {
        let population: Vec<FeatureVector> = records.iter().map(|r| r.features).collect();
        Self::fit(&population)
    }

    /// Rebuild parameters from persisted values, rejecting anything that
    /// could put NaN or infinity into a transformed vector.
    pub fn from_parts(mean: FeatureVector, scale: FeatureVector) -> Result<Self, StandardizeError> {
        for f in Feature::ALL {
            let m = mean[f.index()];
            if !m.is_finite() {
                return Err(StandardizeError::InvalidMean { feature: f, value: m });
            }
            let s = scale[f.index()];
            if !s.is_finite() || s <= 0.0 {
                return Err(StandardizeError::InvalidScale { feature: f, value: s });
            }
        }
        Ok(Self { mean, scale })
    }

    pub fn mean(&self) -> &FeatureVector {
        &self.mean
    }

    pub fn scale(&self) -> &FeatureVector {
        &self.scale
    }

    pub fn mean_of(&self, f: Feature) -> f64 {
        self.mean[f.index()]
    }

    pub fn scale_of(&self, f: Feature) -> f64 {
        self.scale[f.index()]
    }

    /// `(x - mean) / scale` per dimension.
    pub fn transform(&self, features: &FeatureVector) -> FeatureVector {
        let mut out = [0.0_f64; DIM];
        for d in 0..DIM {
            out[d] = (features[d] - self.mean[d]) / self.scale[d];
        }
        out
    }

    pub fn transform_all(&self, population: &[FeatureVector]) -> Vec<FeatureVector> {
        population.iter().map(|v| self.transform(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_with(values: &[(usize, f64)]) -> FeatureVector {
        let mut v = [0.0; DIM];
        for &(d, x) in values {
            v[d] = x;
        }
        v
    }

    fn sample_population() -> Vec<FeatureVector> {
        vec![
            [120.0, 80.0, 89.0, 83.0, 31.0, 0.0, 8.0, 4.0],
            [92.0, 71.0, 61.0, 74.0, 7.0, 0.0, 10.0, 4.0],
            [138.0, 51.0, 32.0, 53.0, 17.0, 0.0, 31.0, 6.0],
            [170.0, 55.0, 58.0, 72.0, 11.0, 0.0, 11.0, 15.0],
            [144.0, 65.0, 23.0, 80.0, 14.0, 63.0, 11.0, 6.0],
            [141.0, 92.0, 66.0, 58.0, 19.0, 0.0, 8.0, 24.0],
        ]
    }

    #[test]
    fn test_two_record_scenario() {
        let pop = vec![vec_with(&[(0, 100.0)]), vec_with(&[(0, 140.0)])];
        let params = StandardizationParameters::fit(&pop).unwrap();
        assert!((params.mean_of(Feature::Bpm) - 120.0).abs() < 1e-12);
        assert!((params.scale_of(Feature::Bpm) - 20.0).abs() < 1e-12);

        assert!((params.transform(&pop[0])[0] + 1.0).abs() < 1e-12);
        assert!((params.transform(&pop[1])[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_mean_unit_variance() {
        let pop = sample_population();
        let params = StandardizationParameters::fit(&pop).unwrap();
        let out = params.transform_all(&pop);
        let n = out.len() as f64;

        for f in Feature::ALL {
            let d = f.index();
            let mean: f64 = out.iter().map(|v| v[d]).sum::<f64>() / n;
            let var: f64 = out.iter().map(|v| (v[d] - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 1e-10, "{} mean {}", f, mean);
            assert!((var.sqrt() - 1.0).abs() < 1e-10, "{} std {}", f, var.sqrt());
        }
    }

    #[test]
    fn test_zero_variance_passes_through_centered() {
        let pop = vec![
            vec_with(&[(0, 1.0), (5, 7.0)]),
            vec_with(&[(0, 3.0), (5, 7.0)]),
        ];
        let params = StandardizationParameters::fit(&pop).unwrap();
        assert_eq!(params.scale_of(Feature::Instrumentalness), 1.0);

        for v in params.transform_all(&pop) {
            assert!(v[5].abs() < 1e-12);
            assert!(v.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_constant_inexact_column_maps_to_zero() {
        for (value, n) in [(123.456, 1000), (0.1, 10_000), (120.1, 952)] {
            let pop: Vec<FeatureVector> = (0..n)
                .map(|i| vec_with(&[(0, value), (1, i as f64)]))
                .collect();
            let params = StandardizationParameters::fit(&pop).unwrap();
            assert_eq!(params.scale_of(Feature::Bpm), 1.0, "value {} n {}", value, n);
            assert_eq!(params.mean_of(Feature::Bpm), value);

            for v in params.transform_all(&pop) {
                assert_eq!(v[0], 0.0);
            }
        }
    }

    #[test]
    fn test_empty_population_fails() {
        assert_eq!(
            StandardizationParameters::fit(&[]),
            Err(StandardizeError::EmptyPopulation)
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let pop = vec![vec_with(&[(2, f64::NAN)])];
        assert!(matches!(
            StandardizationParameters::fit(&pop),
            Err(StandardizeError::NonFinite { feature: Feature::Valence, row: 0, .. })
        ));
    }

    #[test]
    fn test_refit_is_deterministic() {
        let pop = sample_population();
        let a = StandardizationParameters::fit(&pop).unwrap();
        let b = StandardizationParameters::fit(&pop).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_parts_validation() {
        let mean = [0.0; DIM];
        let mut scale = [1.0; DIM];
        assert!(StandardizationParameters::from_parts(mean, scale).is_ok());

        scale[3] = 0.0;
        assert_eq!(
            StandardizationParameters::from_parts(mean, scale),
            Err(StandardizeError::InvalidScale { feature: Feature::Energy, value: 0.0 })
        );

        let mut bad_mean = [0.0; DIM];
        bad_mean[7] = f64::INFINITY;
        assert!(matches!(
            StandardizationParameters::from_parts(bad_mean, [1.0; DIM]),
            Err(StandardizeError::InvalidMean { feature: Feature::Speechiness, .. })
        ));
    }
}
