//! Popularity classifier seam.
//!
//! The pipeline only depends on the [`Trainer`] / [`Predictor`] pair; the
//! bundled [`softmax::SoftmaxRegression`] is one replaceable implementation.
//! Training consumes the same standardized vectors that are exported, and
//! never feeds back into the artifacts.

pub mod softmax;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::config::TrainingConfig;
use crate::features::FeatureVector;
use crate::models::Record;
use crate::popularity::{PopularityClass, Thresholds};
use crate::standardize::StandardizationParameters;

#[derive(Error, Debug, PartialEq)]
pub enum ClassifierError {
    #[error("need at least {needed} examples to train, got {got}")]
    TooFewExamples { needed: usize, got: usize },
    #[error("test fraction {0} must be in (0, 1)")]
    InvalidTestFraction(f64),
    #[error("training diverged at epoch {epoch} (loss {loss})")]
    Diverged { epoch: usize, loss: f64 },
}

/// A standardized feature vector paired with its derived class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: PopularityClass,
}

/// Produces a trained model from labeled examples.
pub trait Trainer {
    type Model: Predictor;

    fn train(&self, examples: &[LabeledExample]) -> Result<Self::Model, ClassifierError>;
}

/// A trained model.
pub trait Predictor {
    fn predict(&self, features: &FeatureVector) -> PopularityClass;

    /// Fraction of examples predicted correctly. 0 for an empty set.
    fn accuracy(&self, examples: &[LabeledExample]) -> f64 {
        if examples.is_empty() {
            return 0.0;
        }
        let correct = examples
            .iter()
            .filter(|e| self.predict(&e.features) == e.label)
            .count();
        correct as f64 / examples.len() as f64
    }

    /// Confusion matrix, `[actual][predicted]`.
    fn confusion(&self, examples: &[LabeledExample]) -> [[usize; 3]; 3] {
        let mut m = [[0usize; 3]; 3];
        for e in examples {
            m[e.label.index()][self.predict(&e.features).index()] += 1;
        }
        m
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub train_size: usize,
    pub test_size: usize,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub confusion: [[usize; 3]; 3],
}

/// Label every record and standardize its features with `params`.
pub fn labeled_examples(
    records: &[Record],
    params: &StandardizationParameters,
    thresholds: &Thresholds,
) -> Vec<LabeledExample> {
    records
        .iter()
        .map(|r| LabeledExample {
            features: params.transform(&r.features),
            label: thresholds.classify(r.meta.streams),
        })
        .collect()
}

/// Deterministic shuffled split. The test side gets `ceil(n * test_fraction)`
/// examples, clamped so both sides are non-empty.
pub fn train_test_split<T: Clone>(
    examples: &[T],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<T>, Vec<T>), ClassifierError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ClassifierError::InvalidTestFraction(test_fraction));
    }
    let n = examples.len();
    if n < 2 {
        return Err(ClassifierError::TooFewExamples { needed: 2, got: n });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_size = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let (test_idx, train_idx) = indices.split_at(test_size);

    let pick = |idx: &[usize]| idx.iter().map(|&i| examples[i].clone()).collect::<Vec<_>>();
    Ok((pick(train_idx), pick(test_idx)))
}

/// Split, train and score a classifier on the cleaned records.
pub fn train_and_evaluate<T: Trainer>(
    trainer: &T,
    records: &[Record],
    params: &StandardizationParameters,
    thresholds: &Thresholds,
    config: &TrainingConfig,
) -> Result<(T::Model, Evaluation), ClassifierError> {
    let examples = labeled_examples(records, params, thresholds);
    let (train, test) = train_test_split(&examples, config.test_fraction, config.seed)?;
    log::info!("Training on {} examples, holding out {}", train.len(), test.len());

    let model = trainer.train(&train)?;
    let evaluation = Evaluation {
        train_size: train.len(),
        test_size: test.len(),
        train_accuracy: model.accuracy(&train),
        test_accuracy: model.accuracy(&test),
        confusion: model.confusion(&test),
    };
    log::info!("Test accuracy: {:.2}%", evaluation.test_accuracy * 100.0);
    Ok((model, evaluation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DIM;

    /// Predicts from the sign of the first feature.
    struct SignModel;

    impl Predictor for SignModel {
        fn predict(&self, features: &FeatureVector) -> PopularityClass {
            if features[0] < 0.0 {
                PopularityClass::Low
            } else {
                PopularityClass::High
            }
        }
    }

    fn example(x: f64, label: PopularityClass) -> LabeledExample {
        let mut features = [0.0; DIM];
        features[0] = x;
        LabeledExample { features, label }
    }

    #[test]
    fn test_split_sizes_and_coverage() {
        let items: Vec<usize> = (0..10).collect();
        let (train, test) = train_test_split(&items, 0.2, 42).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort();
        assert_eq!(all, items);
    }

    #[test]
    fn test_split_is_deterministic() {
        let items: Vec<usize> = (0..100).collect();
        let a = train_test_split(&items, 0.25, 7).unwrap();
        let b = train_test_split(&items, 0.25, 7).unwrap();
        assert_eq!(a, b);
        let c = train_test_split(&items, 0.25, 8).unwrap();
        assert_ne!(a.1, c.1);
    }

    #[test]
    fn test_split_rejects_bad_input() {
        assert_eq!(
            train_test_split(&[1], 0.2, 0),
            Err(ClassifierError::TooFewExamples { needed: 2, got: 1 })
        );
        assert_eq!(
            train_test_split(&[1, 2, 3], 1.0, 0),
            Err(ClassifierError::InvalidTestFraction(1.0))
        );
        // Tiny sets still leave one example on each side
        let (train, test) = train_test_split(&[1, 2], 0.9, 0).unwrap();
        assert_eq!((train.len(), test.len()), (1, 1));
    }

    #[test]
    fn test_accuracy_and_confusion() {
        let examples = vec![
            example(-1.0, PopularityClass::Low),
            example(2.0, PopularityClass::High),
            example(0.5, PopularityClass::Medium),
            example(-0.3, PopularityClass::High),
        ];
        let model = SignModel;
        assert!((model.accuracy(&examples) - 0.5).abs() < 1e-12);
        assert_eq!(model.accuracy(&[]), 0.0);

        let m = model.confusion(&examples);
        assert_eq!(m[0][0], 1);
        assert_eq!(m[2][2], 1);
        assert_eq!(m[1][2], 1);
        assert_eq!(m[2][0], 1);
    }
}
