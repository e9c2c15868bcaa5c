// src/matching/classifier.rs
// Calibrated pair classifier: a lightweight logistic regression over the
// fixed feature schema, composed with a monotonic calibration curve fitted
// by pool-adjacent-violators. Retraining changes coefficients and the curve,
// never the schema or the output range.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::matching::features::{
    feature_name, FeatureVector, FEATURE_ABSENT, FEATURE_COUNT, F_CITY_MATCH, F_COSINE,
    F_EDIT_SIM, F_EXACT_MATCH, F_FOUND_PHONETIC, F_FOUND_TRIGRAM, F_FOUND_VECTOR,
    F_LENGTH_RATIO, F_PHONETIC_OVERLAP, F_PREFIX_RATIO, F_STATE_MATCH, F_TOKEN_JACCARD,
    F_TRIGRAM_SIM,
};
use crate::models::review::Label;

const DEFAULT_LEARNING_RATE: f64 = 0.01;
const DEFAULT_TRAINING_EPOCHS: usize = 50;
const TRAINING_SEED: u64 = 42;
const MIN_TRAINING_LABELS: usize = 20;
/// Absent signals are fed to the model as this neutral value.
const NEUTRAL_FEATURE: f64 = 0.5;

// A lightweight logistic regression model trained via gradient descent.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct LogisticModel {
    // FEATURE_COUNT weights + 1 bias term.
    weights: Vec<f64>,
    learning_rate: f64,
    trials: usize,
}

impl LogisticModel {
    #[cfg(test)]
    fn zeroed() -> Self {
        Self {
            weights: vec![0.0; FEATURE_COUNT + 1],
            learning_rate: DEFAULT_LEARNING_RATE,
            trials: 0,
        }
    }

    /// Hand-tuned starting point: continuous similarity signals dominate so
    /// score decays gradually as names drift apart, keeping near-misses in
    /// the review band instead of cliff-dropping to zero.
    fn default_weights() -> Self {
        let mut weights = vec![0.0; FEATURE_COUNT + 1];
        weights[F_EXACT_MATCH] = 1.2;
        weights[F_TOKEN_JACCARD] = 1.0;
        weights[F_TRIGRAM_SIM] = 2.6;
        weights[F_PHONETIC_OVERLAP] = 1.2;
        weights[F_EDIT_SIM] = 2.6;
        weights[F_LENGTH_RATIO] = 0.4;
        weights[F_PREFIX_RATIO] = 0.8;
        weights[F_FOUND_TRIGRAM] = 0.3;
        weights[F_FOUND_PHONETIC] = 0.2;
        weights[F_FOUND_VECTOR] = 0.2;
        weights[F_COSINE] = 1.0;
        weights[F_CITY_MATCH] = 0.6;
        weights[F_STATE_MATCH] = 0.4;
        weights[FEATURE_COUNT] = -7.0; // bias
        Self {
            weights,
            learning_rate: DEFAULT_LEARNING_RATE,
            trials: 0,
        }
    }

    // Input must already be validated and sentinel-substituted.
    fn predict(&self, features: &[f64]) -> f64 {
        let features_with_bias = features.iter().chain(std::iter::once(&1.0));
        let logit: f64 = self
            .weights
            .iter()
            .zip(features_with_bias)
            .map(|(w, f)| w * f)
            .sum();
        1.0 / (1.0 + (-logit).exp())
    }

    fn update(&mut self, features: &[f64], target: f64) {
        let prediction = self.predict(features);
        let error = target - prediction;
        for (i, feature_val) in features.iter().enumerate() {
            self.weights[i] += self.learning_rate * error * feature_val;
        }
        let bias_index = self.weights.len() - 1;
        self.weights[bias_index] += self.learning_rate * error;
        self.trials += 1;
    }
}

/// Monotonic piecewise-linear mapping from raw model scores to calibrated
/// probabilities. An empty curve is the identity.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CalibrationCurve {
    // (raw score, calibrated probability) knots, raw strictly ascending,
    // probabilities non-decreasing.
    knots: Vec<(f64, f64)>,
}

impl CalibrationCurve {
    pub fn identity() -> Self {
        Self { knots: Vec::new() }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        if self.knots.is_empty() {
            return raw.clamp(0.0, 1.0);
        }
        let first = self.knots[0];
        let last = self.knots[self.knots.len() - 1];
        if raw <= first.0 {
            return first.1;
        }
        if raw >= last.0 {
            return last.1;
        }
        for window in self.knots.windows(2) {
            let (x0, y0) = window[0];
            let (x1, y1) = window[1];
            if raw <= x1 {
                let t = (raw - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }

    /// Pool-adjacent-violators over (raw score, outcome) pairs. The fitted
    /// block means are non-decreasing by construction, so calibration never
    /// reorders two scores.
    pub fn fit(mut samples: Vec<(f64, bool)>) -> Self {
        if samples.is_empty() {
            return Self::identity();
        }
        samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Each block: (sum of scores, sum of outcomes, count)
        let mut blocks: Vec<(f64, f64, usize)> = Vec::new();
        for (score, outcome) in samples {
            blocks.push((score, if outcome { 1.0 } else { 0.0 }, 1));
            while blocks.len() >= 2 {
                let last = blocks[blocks.len() - 1];
                let prev = blocks[blocks.len() - 2];
                let last_mean = last.1 / last.2 as f64;
                let prev_mean = prev.1 / prev.2 as f64;
                if prev_mean <= last_mean {
                    break;
                }
                blocks.pop();
                let merged = (prev.0 + last.0, prev.1 + last.1, prev.2 + last.2);
                blocks.pop();
                blocks.push(merged);
            }
        }

        let mut knots: Vec<(f64, f64)> = blocks
            .into_iter()
            .map(|(score_sum, outcome_sum, count)| {
                (score_sum / count as f64, outcome_sum / count as f64)
            })
            .collect();
        // Collapse duplicate x positions, keeping the later (higher) rate.
        knots.dedup_by(|next, prev| {
            if (next.0 - prev.0).abs() < 1e-12 {
                prev.1 = next.1.max(prev.1);
                true
            } else {
                false
            }
        });
        Self { knots }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub examples: usize,
    pub skipped: usize,
    pub epochs: usize,
    pub mean_log_loss: f64,
    pub version: u32,
}

/// The serving classifier: model + calibration + version.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MatchClassifier {
    model: LogisticModel,
    calibration: CalibrationCurve,
    pub version: u32,
}

impl Default for MatchClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchClassifier {
    pub fn new() -> Self {
        Self {
            model: LogisticModel::default_weights(),
            calibration: CalibrationCurve::identity(),
            version: 1,
        }
    }

    #[cfg(test)]
    pub fn untrained() -> Self {
        Self {
            model: LogisticModel::zeroed(),
            calibration: CalibrationCurve::identity(),
            version: 1,
        }
    }

    /// Calibrated probability that the pair refers to the same entity.
    ///
    /// Rejects malformed input instead of guessing: the decision layer maps
    /// the error to a flagged NoMatch, never an auto-match.
    pub fn score(&self, features: &FeatureVector) -> std::result::Result<f64, MatchError> {
        let effective = Self::effective_values(features.values())?;
        let raw = self.model.predict(&effective);
        Ok(self.calibration.apply(raw).clamp(0.0, 1.0))
    }

    /// The features pushing this score up, strongest first, for reasoning
    /// strings on auto-match results.
    pub fn top_contributors(&self, features: &FeatureVector, n: usize) -> Vec<(usize, f64)> {
        let Ok(effective) = Self::effective_values(features.values()) else {
            return Vec::new();
        };
        let mut contributions: Vec<(usize, f64)> = effective
            .iter()
            .enumerate()
            .map(|(i, v)| (i, self.model.weights[i] * v))
            .filter(|(_, c)| *c > 0.0)
            .collect();
        contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        contributions.truncate(n);
        contributions
    }

    fn effective_values(values: &[f64]) -> std::result::Result<Vec<f64>, MatchError> {
        if values.len() != FEATURE_COUNT {
            return Err(MatchError::Classifier {
                reason: format!(
                    "expected {} features, got {}",
                    FEATURE_COUNT,
                    values.len()
                ),
            });
        }
        let mut effective = Vec::with_capacity(FEATURE_COUNT);
        for (i, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(MatchError::Classifier {
                    reason: format!("feature '{}' is not finite", feature_name(i)),
                });
            }
            if value == FEATURE_ABSENT {
                effective.push(NEUTRAL_FEATURE);
            } else if (-1e-9..=1.0 + 1e-9).contains(&value) {
                effective.push(value.clamp(0.0, 1.0));
            } else {
                return Err(MatchError::Classifier {
                    reason: format!(
                        "feature '{}' out of range: {}",
                        feature_name(i),
                        value
                    ),
                });
            }
        }
        Ok(effective)
    }

    /// Deterministic offline training from labeled pairs. Labels without a
    /// feature snapshot are skipped. Produces a new model version.
    pub fn train_from_labels(&mut self, labels: &[Label], epochs: Option<usize>) -> Result<TrainingReport> {
        let mut examples: Vec<(Vec<f64>, f64)> = Vec::new();
        let mut skipped = 0usize;
        for label in labels {
            match &label.features {
                Some(features) if features.len() == FEATURE_COUNT => {
                    match Self::effective_values(features) {
                        Ok(effective) => {
                            examples.push((effective, if label.same_entity { 1.0 } else { 0.0 }))
                        }
                        Err(_) => skipped += 1,
                    }
                }
                Some(_) => skipped += 1,
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                "training skipped {} labels without usable feature snapshots",
                skipped
            );
        }
        if examples.len() < MIN_TRAINING_LABELS {
            anyhow::bail!(
                "need at least {} labeled examples with features, have {}",
                MIN_TRAINING_LABELS,
                examples.len()
            );
        }

        let epochs = epochs.unwrap_or(DEFAULT_TRAINING_EPOCHS);
        let mut rng = StdRng::seed_from_u64(TRAINING_SEED);
        for epoch in 0..epochs {
            examples.shuffle(&mut rng);
            for (features, target) in &examples {
                self.model.update(features, *target);
            }
            if epoch % 10 == 0 {
                debug!(
                    "training epoch {}: mean log loss {:.4}",
                    epoch,
                    self.mean_log_loss(&examples)
                );
            }
        }

        let mean_log_loss = self.mean_log_loss(&examples);
        self.version += 1;
        info!(
            "classifier trained on {} examples over {} epochs (log loss {:.4}), now v{}",
            examples.len(),
            epochs,
            mean_log_loss,
            self.version
        );
        Ok(TrainingReport {
            examples: examples.len(),
            skipped,
            epochs,
            mean_log_loss,
            version: self.version,
        })
    }

    /// Refits the calibration curve from labeled pairs, typically a held-out
    /// slice of the label store.
    pub fn calibrate(&mut self, labels: &[Label]) -> Result<usize> {
        let mut samples: Vec<(f64, bool)> = Vec::new();
        for label in labels {
            if let Some(features) = &label.features {
                if let Ok(effective) = Self::effective_values(features) {
                    samples.push((self.model.predict(&effective), label.same_entity));
                }
            }
        }
        if samples.is_empty() {
            anyhow::bail!("no labels with usable feature snapshots to calibrate from");
        }
        let count = samples.len();
        self.calibration = CalibrationCurve::fit(samples);
        self.version += 1;
        info!("calibration refit from {} samples, now v{}", count, self.version);
        Ok(count)
    }

    fn mean_log_loss(&self, examples: &[(Vec<f64>, f64)]) -> f64 {
        if examples.is_empty() {
            return 0.0;
        }
        let total: f64 = examples
            .iter()
            .map(|(features, target)| {
                let p = self.model.predict(features).clamp(1e-12, 1.0 - 1e-12);
                -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
            })
            .sum();
        total / examples.len() as f64
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize classifier")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let classifier: MatchClassifier =
            serde_json::from_str(json).context("failed to deserialize classifier")?;
        if classifier.model.weights.len() != FEATURE_COUNT + 1 {
            anyhow::bail!(
                "classifier weight count {} does not match feature schema {} (+ bias)",
                classifier.model.weights.len(),
                FEATURE_COUNT + 1
            );
        }
        Ok(classifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_match_features() -> FeatureVector {
        FeatureVector::from_values([
            1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, FEATURE_ABSENT, FEATURE_ABSENT,
            FEATURE_ABSENT,
        ])
    }

    fn near_miss_features() -> FeatureVector {
        // one-character typo: continuous similarities high, discrete flags off
        FeatureVector::from_values([
            0.0, 0.0, 0.73, 1.0, 0.89, 0.89, 0.89, 1.0, 1.0, 0.0, FEATURE_ABSENT,
            FEATURE_ABSENT, FEATURE_ABSENT,
        ])
    }

    fn weak_features() -> FeatureVector {
        FeatureVector::from_values([
            0.0, 0.0, 0.2, 0.5, 0.47, 0.47, 0.13, 1.0, 1.0, 0.0, FEATURE_ABSENT, FEATURE_ABSENT,
            FEATURE_ABSENT,
        ])
    }

    #[test]
    fn default_weights_score_exact_match_above_auto_threshold() {
        let classifier = MatchClassifier::new();
        let p = classifier.score(&exact_match_features()).unwrap();
        assert!(p >= 0.97, "exact match scored {}", p);
    }

    #[test]
    fn near_miss_lands_in_review_band() {
        let classifier = MatchClassifier::new();
        let p = classifier.score(&near_miss_features()).unwrap();
        assert!(p >= 0.60 && p < 0.97, "near miss scored {}", p);
    }

    #[test]
    fn weak_pair_scores_below_review_band() {
        let classifier = MatchClassifier::new();
        let p = classifier.score(&weak_features()).unwrap();
        assert!(p < 0.60, "weak pair scored {}", p);
    }

    #[test]
    fn score_orders_track_evidence_strength() {
        let classifier = MatchClassifier::new();
        let strong = classifier.score(&exact_match_features()).unwrap();
        let middle = classifier.score(&near_miss_features()).unwrap();
        let weak = classifier.score(&weak_features()).unwrap();
        assert!(strong > middle);
        assert!(middle > weak);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let classifier = MatchClassifier::new();
        let err = MatchClassifier::effective_values(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, MatchError::Classifier { .. }));
        // and a well-formed vector passes
        assert!(classifier.score(&exact_match_features()).is_ok());
    }

    #[test]
    fn nan_and_out_of_range_are_rejected() {
        let mut values = [0.5f64; FEATURE_COUNT];
        values[3] = f64::NAN;
        assert!(MatchClassifier::effective_values(&values).is_err());

        let mut values = [0.5f64; FEATURE_COUNT];
        values[3] = 1.5;
        assert!(MatchClassifier::effective_values(&values).is_err());

        let mut values = [0.5f64; FEATURE_COUNT];
        values[3] = -0.4;
        assert!(MatchClassifier::effective_values(&values).is_err());
    }

    #[test]
    fn sentinel_is_substituted_not_rejected() {
        let values = exact_match_features();
        let effective = MatchClassifier::effective_values(values.values()).unwrap();
        assert_eq!(effective[F_COSINE], NEUTRAL_FEATURE);
        assert_eq!(effective[F_CITY_MATCH], NEUTRAL_FEATURE);
    }

    #[test]
    fn gradient_update_moves_prediction_toward_target() {
        let mut model = LogisticModel::zeroed();
        let features = vec![1.0; FEATURE_COUNT];
        let before = model.predict(&features);
        for _ in 0..200 {
            model.update(&features, 1.0);
        }
        let after = model.predict(&features);
        assert!(after > before);
        assert!(after > 0.7);
        assert_eq!(model.trials, 200);
    }

    #[test]
    fn training_is_deterministic() {
        let labels = synthetic_labels();
        let mut a = MatchClassifier::new();
        let mut b = MatchClassifier::new();
        a.train_from_labels(&labels, Some(20)).unwrap();
        b.train_from_labels(&labels, Some(20)).unwrap();
        assert_eq!(a.model.weights, b.model.weights);
        assert_eq!(a.version, b.version);
    }

    #[test]
    fn training_requires_minimum_labels() {
        let mut classifier = MatchClassifier::new();
        let labels = synthetic_labels().into_iter().take(5).collect::<Vec<_>>();
        assert!(classifier.train_from_labels(&labels, Some(5)).is_err());
    }

    #[test]
    fn training_separates_positive_from_negative_pairs() {
        let mut classifier = MatchClassifier::untrained();
        classifier
            .train_from_labels(&synthetic_labels(), Some(200))
            .unwrap();
        let positive = classifier.score(&exact_match_features()).unwrap();
        let negative = classifier.score(&weak_features()).unwrap();
        assert!(
            positive > negative,
            "trained model should separate: {} vs {}",
            positive,
            negative
        );
    }

    #[test]
    fn pav_output_is_monotonic() {
        // deliberate violator at 0.55
        let samples = vec![
            (0.1, false),
            (0.2, false),
            (0.3, false),
            (0.5, true),
            (0.55, false),
            (0.6, true),
            (0.8, true),
            (0.9, true),
        ];
        let curve = CalibrationCurve::fit(samples);
        let mut previous = -1.0;
        for i in 0..=20 {
            let raw = i as f64 / 20.0;
            let calibrated = curve.apply(raw);
            assert!((0.0..=1.0).contains(&calibrated));
            assert!(
                calibrated >= previous,
                "calibration reordered at raw {}",
                raw
            );
            previous = calibrated;
        }
    }

    #[test]
    fn identity_curve_passes_scores_through() {
        let curve = CalibrationCurve::identity();
        assert_eq!(curve.apply(0.42), 0.42);
        assert_eq!(curve.apply(1.7), 1.0);
        assert_eq!(curve.apply(-0.3), 0.0);
    }

    #[test]
    fn json_round_trip_preserves_scores_and_version() {
        let mut classifier = MatchClassifier::new();
        classifier.train_from_labels(&synthetic_labels(), Some(10)).unwrap();
        let json = classifier.to_json().unwrap();
        let restored = MatchClassifier::from_json(&json).unwrap();
        assert_eq!(restored.version, classifier.version);

        let fv = near_miss_features();
        assert_eq!(
            restored.score(&fv).unwrap(),
            classifier.score(&fv).unwrap()
        );
    }

    #[test]
    fn from_json_rejects_mismatched_schema() {
        let json = r#"{"model":{"weights":[0.1,0.2],"learning_rate":0.01,"trials":0},"calibration":{"knots":[]},"version":1}"#;
        assert!(MatchClassifier::from_json(json).is_err());
    }

    #[test]
    fn top_contributors_name_the_strong_evidence() {
        let classifier = MatchClassifier::new();
        let top = classifier.top_contributors(&exact_match_features(), 2);
        assert_eq!(top.len(), 2);
        let names: Vec<&str> = top.iter().map(|(i, _)| feature_name(*i)).collect();
        assert!(
            names.contains(&"trigram similarity") || names.contains(&"edit-distance similarity"),
            "unexpected contributors: {:?}",
            names
        );
        assert!(top[0].1 >= top[1].1);
    }

    #[test]
    fn calibrate_refits_curve_from_labels() {
        let mut classifier = MatchClassifier::new();
        let before = classifier.version;
        let count = classifier.calibrate(&synthetic_labels()).unwrap();
        assert_eq!(count, synthetic_labels().len());
        assert_eq!(classifier.version, before + 1);
        // outputs stay probabilities
        let p = classifier.score(&exact_match_features()).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    fn synthetic_labels() -> Vec<Label> {
        use crate::models::PayeeId;
        let mut labels = Vec::new();
        for i in 0..15 {
            let jitter = i as f64 * 0.002;
            labels.push(
                Label::new(
                    format!("positive {}", i),
                    format!("positive {}", i),
                    PayeeId(format!("src:p{}", i)),
                    true,
                )
                .with_features(vec![
                    1.0,
                    1.0 - jitter,
                    1.0 - jitter,
                    1.0,
                    1.0 - jitter,
                    1.0,
                    1.0,
                    1.0,
                    1.0,
                    0.0,
                    FEATURE_ABSENT,
                    FEATURE_ABSENT,
                    FEATURE_ABSENT,
                ]),
            );
            labels.push(
                Label::new(
                    format!("negative {}", i),
                    format!("negative {}", i),
                    PayeeId(format!("src:n{}", i)),
                    false,
                )
                .with_features(vec![
                    0.0,
                    0.0,
                    0.15 + jitter,
                    0.0,
                    0.3 + jitter,
                    0.5,
                    0.1,
                    1.0,
                    0.0,
                    0.0,
                    FEATURE_ABSENT,
                    FEATURE_ABSENT,
                    FEATURE_ABSENT,
                ]),
            );
        }
        labels
    }
}
