use indicatif::{ProgressBar, ProgressStyle};

use super::{ClassifierError, LabeledExample, Predictor, Trainer};
use crate::config::TrainingConfig;
use crate::features::{DIM, FeatureVector};
use crate::popularity::PopularityClass;

const CLASSES: usize = 3;

/// Multinomial logistic regression trained by full-batch gradient descent.
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub show_progress: bool,
}

impl From<&TrainingConfig> for SoftmaxRegression {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            l2: config.l2,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxModel {
    weights: [[f64; DIM]; CLASSES],
    bias: [f64; CLASSES],
    /// Mean cross-entropy on the training set after the last epoch.
    pub final_loss: f64,
}

impl SoftmaxModel {
    fn logits(&self, x: &FeatureVector) -> [f64; CLASSES] {
        let mut out = self.bias;
        for (c, w) in self.weights.iter().enumerate() {
            out[c] += w.iter().zip(x).map(|(a, b)| a * b).sum::<f64>();
        }
        out
    }

    pub fn probabilities(&self, x: &FeatureVector) -> [f64; CLASSES] {
        softmax(self.logits(x))
    }
}

impl Predictor for SoftmaxModel {
    fn predict(&self, features: &FeatureVector) -> PopularityClass {
        let p = self.probabilities(features);
        let best = (0..CLASSES)
            .max_by(|&a, &b| p[a].total_cmp(&p[b]).then(b.cmp(&a)))
            .unwrap_or(0);
        PopularityClass::from_index(best).unwrap_or(PopularityClass::Low)
    }
}

fn softmax(logits: [f64; CLASSES]) -> [f64; CLASSES] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = logits.map(|l| (l - max).exp());
    let sum: f64 = out.iter().sum();
    for p in &mut out {
        *p /= sum;
    }
    out
}

impl Trainer for SoftmaxRegression {
    type Model = SoftmaxModel;

    fn train(&self, examples: &[LabeledExample]) -> Result<SoftmaxModel, ClassifierError> {
        if examples.is_empty() {
            return Err(ClassifierError::TooFewExamples { needed: 1, got: 0 });
        }
        let n = examples.len() as f64;
        let mut model = SoftmaxModel {
            weights: [[0.0; DIM]; CLASSES],
            bias: [0.0; CLASSES],
            final_loss: f64::NAN,
        };

        let pb = if self.show_progress {
            let pb = ProgressBar::new(self.epochs as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} epochs ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        for epoch in 0..self.epochs {
            let mut grad_w = [[0.0_f64; DIM]; CLASSES];
            let mut grad_b = [0.0_f64; CLASSES];
            let mut loss = 0.0_f64;

            for e in examples {
                let p = model.probabilities(&e.features);
                let target = e.label.index();
                loss -= p[target].clamp(1e-15, 1.0).ln();
                for c in 0..CLASSES {
                    let g = p[c] - if c == target { 1.0 } else { 0.0 };
                    grad_b[c] += g;
                    for (gw, x) in grad_w[c].iter_mut().zip(&e.features) {
                        *gw += g * x;
                    }
                }
            }

            loss /= n;
            if !loss.is_finite() {
                pb.abandon();
                return Err(ClassifierError::Diverged { epoch, loss });
            }

            for c in 0..CLASSES {
                model.bias[c] -= self.learning_rate * grad_b[c] / n;
                for d in 0..DIM {
                    let w = model.weights[c][d];
                    model.weights[c][d] -= self.learning_rate * (grad_w[c][d] / n + self.l2 * w);
                }
            }

            model.final_loss = loss;
            if epoch % 50 == 0 {
                log::trace!("epoch {} loss {:.5}", epoch, loss);
                pb.set_message(format!("loss {:.4}", loss));
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        log::debug!("Training finished, loss {:.5}", model.final_loss);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::train_test_split;

    fn example(x0: f64, x1: f64, label: PopularityClass) -> LabeledExample {
        let mut features = [0.0; DIM];
        features[0] = x0;
        features[1] = x1;
        LabeledExample { features, label }
    }

    /// Three well separated clusters along the first axis.
    fn clusters() -> Vec<LabeledExample> {
        let mut out = Vec::new();
        for i in 0..30 {
            let jitter = (i as f64 * 0.37).sin() * 0.3;
            out.push(example(-2.0 + jitter, jitter, PopularityClass::Low));
            out.push(example(0.0 + jitter, -jitter, PopularityClass::Medium));
            out.push(example(2.0 + jitter, jitter, PopularityClass::High));
        }
        out
    }

    fn trainer() -> SoftmaxRegression {
        SoftmaxRegression {
            epochs: 400,
            learning_rate: 0.5,
            l2: 0.0,
            show_progress: false,
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax([1.0, 2.0, 1000.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > 0.99);
    }

    #[test]
    fn test_learns_separable_clusters() {
        let data = clusters();
        let (train, test) = train_test_split(&data, 0.2, 42).unwrap();
        let model = trainer().train(&train).unwrap();

        assert!(model.accuracy(&train) > 0.95);
        assert!(model.accuracy(&test) > 0.9);
        assert!(model.final_loss < 0.7);
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = clusters();
        let a = trainer().train(&data).unwrap();
        let b = trainer().train(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_training_set() {
        assert_eq!(
            trainer().train(&[]),
            Err(ClassifierError::TooFewExamples { needed: 1, got: 0 })
        );
    }

    #[test]
    fn test_diverging_learning_rate() {
        let mut data = clusters();
        for e in &mut data {
            e.features[0] *= 1e150;
        }
        let t = SoftmaxRegression {
            learning_rate: 1e150,
            ..trainer()
        };
        assert!(matches!(t.train(&data), Err(ClassifierError::Diverged { .. })));
    }
}
