//! Bayesian threshold learner: a Normal-Normal conjugate-prior belief over
//! the optimal soil-moisture threshold, updated from categorical user
//! feedback (spec §4.5).
//!
//! Grounded directly in `bayesian_threshold.py` — `ThresholdBelief`,
//! `BayesianThresholdAdjuster::update_from_feedback`,
//! `_estimate_adjustment_magnitude`, `_calculate_user_consistency`, and
//! `_get_observation_variance` are all kept as close-to-literal ports of
//! their Python counterparts. Per DESIGN.md Q4, `_calculate_user_consistency`'s
//! arithmetic is kept even though its own docstring overstates what it
//! measures — the formula is self-consistent and the spec's §4.5
//! description matches it, so there is nothing to fix.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const MAX_ADJUSTMENT: f64 = 8.0;
const MIN_ADJUSTMENT: f64 = 2.0;

/// A Normal(mean, variance) belief about the optimal threshold for one
/// (plant-type, growth-stage, variety, strain, pot-size) combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdBelief {
    pub mean: f64,
    pub variance: f64,
    pub sample_count: u32,
    pub last_updated: i64,
    pub plant_type: Option<String>,
    pub growth_stage: Option<String>,
}

impl ThresholdBelief {
    pub fn confidence(&self) -> f64 {
        (self.sample_count as f64 / 50.0).min(1.0)
    }

    pub fn std_dev(&self) -> f64 {
        if self.variance > 0.0 {
            self.variance.sqrt()
        } else {
            0.0
        }
    }

    pub fn precision(&self) -> f64 {
        if self.variance > 0.0 {
            1.0 / self.variance
        } else {
            f64::INFINITY
        }
    }

    /// 95% credible interval under the Normal approximation.
    pub fn credible_interval_95(&self) -> (f64, f64) {
        let margin = 1.96 * self.std_dev();
        (self.mean - margin, self.mean + margin)
    }
}

/// Direction a recommended adjustment points: the threshold should rise,
/// fall, or stay put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
    Maintain,
}

/// The outcome of either a read-only recommendation or a belief update
/// (spec §4.5's exposure: both return the same shape).
#[derive(Debug, Clone)]
pub struct AdjustmentResult {
    pub recommended_threshold: f64,
    pub adjustment_amount: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub uncertainty: f64,
    pub belief: ThresholdBelief,
}

/// Categorical feedback the workflow maps soil-moisture outcomes onto
/// before handing them to the learner (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdFeedback {
    TooLittle,
    JustRight,
    TooMuch,
}

/// Per-user feedback counters used to derive consistency (spec §4.5's
/// "derived from the user's historical feedback counts").
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedbackCounts {
    pub total: u32,
    pub too_little: u32,
    pub just_right: u32,
    pub too_much: u32,
}

fn belief_key(
    plant_type: &str,
    growth_stage: &str,
    plant_variety: Option<&str>,
    strain_variety: Option<&str>,
    pot_size_liters: Option<f64>,
) -> String {
    let mut parts = vec![
        plant_type.trim().to_lowercase(),
        growth_stage.trim().to_lowercase(),
    ];
    if let Some(v) = plant_variety {
        parts.push(format!("variety:{}", v.trim().to_lowercase()));
    }
    if let Some(v) = strain_variety {
        parts.push(format!("strain:{}", v.trim().to_lowercase()));
    }
    if let Some(v) = pot_size_liters {
        parts.push(format!("pot:{:.2}", v));
    }
    parts.join("|")
}

/// Default prior mean threshold per plant type, falling back to a generic
/// default (spec §4.5's μ₀ = "plant-type × stage default threshold").
fn default_prior_mean(plant_type: &str, growth_stage: &str) -> f64 {
    let base = match plant_type.to_lowercase().as_str() {
        "tomato" => 45.0,
        "lettuce" => 55.0,
        "cannabis" => 40.0,
        "herbs" => 50.0,
        _ => 45.0,
    };
    let stage_adjustment = match growth_stage.to_lowercase().as_str() {
        "seedling" => 10.0,
        "flowering" => -5.0,
        _ => 0.0,
    };
    base + stage_adjustment
}

/// Maintains one belief per (unit, user, belief-key). Legacy payloads
/// (a single un-keyed belief) are migrated into the keyed form the first
/// time they are written back out.
pub struct BayesianThresholdAdjuster {
    default_prior_variance: f64,
    min_variance: f64,
    base_observation_variance: f64,
    beliefs: HashMap<(u64, u64, String), ThresholdBelief>,
}

impl BayesianThresholdAdjuster {
    pub fn new(default_prior_variance: f64, min_variance: f64, base_observation_variance: f64) -> Self {
        Self {
            default_prior_variance,
            min_variance,
            base_observation_variance,
            beliefs: HashMap::new(),
        }
    }

    pub fn get_prior(&self, plant_type: &str, growth_stage: &str, now: i64) -> ThresholdBelief {
        ThresholdBelief {
            mean: default_prior_mean(plant_type, growth_stage),
            variance: self.default_prior_variance,
            sample_count: 0,
            last_updated: now,
            plant_type: Some(plant_type.to_string()),
            growth_stage: Some(growth_stage.to_string()),
        }
    }

    /// Load the current belief from cache, or fall back to the prior.
    /// `stored` models a just-loaded persisted payload, already migrated
    /// out of any legacy single-belief shape by the caller.
    pub fn get_belief(
        &mut self,
        unit_id: u64,
        user_id: u64,
        plant_type: &str,
        growth_stage: &str,
        plant_variety: Option<&str>,
        strain_variety: Option<&str>,
        pot_size_liters: Option<f64>,
        stored: Option<ThresholdBelief>,
        now: i64,
    ) -> ThresholdBelief {
        let key = belief_key(plant_type, growth_stage, plant_variety, strain_variety, pot_size_liters);
        let cache_key = (unit_id, user_id, key);

        if let Some(belief) = self.beliefs.get(&cache_key) {
            return belief.clone();
        }
        if let Some(belief) = stored {
            self.beliefs.insert(cache_key, belief.clone());
            return belief;
        }
        let prior = self.get_prior(plant_type, growth_stage, now);
        self.beliefs.insert(cache_key, prior.clone());
        prior
    }

    /// Explore/exploit adjustment magnitude (spec §4.5): shrinks as
    /// confidence rises, and is scaled up (to at most 1.5x) by the
    /// belief's current uncertainty.
    fn estimate_adjustment_magnitude(belief: &ThresholdBelief) -> f64 {
        let adjustment = MAX_ADJUSTMENT - belief.confidence() * (MAX_ADJUSTMENT - MIN_ADJUSTMENT);
        let uncertainty_factor = (1.0 + belief.std_dev() / 20.0).min(1.5);
        adjustment * uncertainty_factor
    }

    /// User consistency c ∈ [0.2, 1.0]: weighted blend of the just-right
    /// rate and how balanced too_little/too_much feedback is. Fewer than
    /// five total samples defaults to 0.5 (spec §4.5).
    pub fn calculate_user_consistency(counts: FeedbackCounts) -> f64 {
        if counts.total < 5 {
            return 0.5;
        }
        let total = counts.total as f64;
        let just_right_rate = counts.just_right as f64 / total;

        let extreme = counts.too_little + counts.too_much;
        let balance = if extreme > 0 {
            1.0 - (counts.too_little as f64 - counts.too_much as f64).abs() / extreme as f64
        } else {
            1.0
        };

        let consistency = just_right_rate * 0.6 + balance * 0.4;
        consistency.clamp(0.2, 1.0)
    }

    fn observation_variance(&self, user_consistency: f64) -> f64 {
        let variance_multiplier = 2.5 - user_consistency * 2.0;
        self.base_observation_variance * variance_multiplier
    }

    /// The core Bayesian update (spec §4.5). Returns the new belief and
    /// the recommended adjustment relative to `current_threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_from_feedback(
        &mut self,
        unit_id: u64,
        user_id: u64,
        feedback: ThresholdFeedback,
        current_threshold: f64,
        plant_type: &str,
        growth_stage: &str,
        plant_variety: Option<&str>,
        strain_variety: Option<&str>,
        pot_size_liters: Option<f64>,
        user_consistency: f64,
        stored: Option<ThresholdBelief>,
        now: i64,
    ) -> AdjustmentResult {
        let belief = self.get_belief(
            unit_id,
            user_id,
            plant_type,
            growth_stage,
            plant_variety,
            strain_variety,
            pot_size_liters,
            stored,
            now,
        );

        let adjustment_magnitude = Self::estimate_adjustment_magnitude(&belief);
        let observed_optimal = match feedback {
            ThresholdFeedback::TooLittle => current_threshold + adjustment_magnitude,
            ThresholdFeedback::TooMuch => current_threshold - adjustment_magnitude,
            ThresholdFeedback::JustRight => current_threshold,
        };

        let observation_variance = self.observation_variance(user_consistency);

        let prior_precision = belief.precision();
        let observation_precision = 1.0 / observation_variance;
        let posterior_precision = prior_precision + observation_precision;
        let posterior_variance = (1.0 / posterior_precision).max(self.min_variance);
        let posterior_mean =
            (prior_precision * belief.mean + observation_precision * observed_optimal) / posterior_precision;
        let posterior_mean = posterior_mean.clamp(20.0, 80.0);

        let new_belief = ThresholdBelief {
            mean: posterior_mean,
            variance: posterior_variance,
            sample_count: belief.sample_count + 1,
            last_updated: now,
            plant_type: Some(plant_type.to_string()),
            growth_stage: Some(growth_stage.to_string()),
        };

        let key = belief_key(plant_type, growth_stage, plant_variety, strain_variety, pot_size_liters);
        self.beliefs.insert((unit_id, user_id, key), new_belief.clone());

        let adjustment_amount = posterior_mean - current_threshold;
        let direction = if adjustment_amount.abs() < 1.0 {
            Direction::Maintain
        } else if adjustment_amount > 0.0 {
            Direction::Increase
        } else {
            Direction::Decrease
        };

        AdjustmentResult {
            recommended_threshold: posterior_mean,
            adjustment_amount: adjustment_amount.abs(),
            direction,
            confidence: new_belief.confidence(),
            uncertainty: new_belief.std_dev(),
            belief: new_belief,
        }
    }

    /// Read-only recommendation from the current belief; never mutates
    /// state (spec §4.5's `get_recommended_threshold`).
    #[allow(clippy::too_many_arguments)]
    pub fn get_recommended_threshold(
        &mut self,
        unit_id: u64,
        user_id: u64,
        current_threshold: f64,
        plant_type: &str,
        growth_stage: &str,
        plant_variety: Option<&str>,
        strain_variety: Option<&str>,
        pot_size_liters: Option<f64>,
        stored: Option<ThresholdBelief>,
        now: i64,
    ) -> AdjustmentResult {
        let belief = self.get_belief(
            unit_id,
            user_id,
            plant_type,
            growth_stage,
            plant_variety,
            strain_variety,
            pot_size_liters,
            stored,
            now,
        );
        let adjustment_amount = belief.mean - current_threshold;
        let direction = if adjustment_amount.abs() < 1.0 {
            Direction::Maintain
        } else if adjustment_amount > 0.0 {
            Direction::Increase
        } else {
            Direction::Decrease
        };
        AdjustmentResult {
            recommended_threshold: belief.mean,
            adjustment_amount: adjustment_amount.abs(),
            direction,
            confidence: belief.confidence(),
            uncertainty: belief.std_dev(),
            belief,
        }
    }

    pub fn reset_belief(&mut self, unit_id: u64, user_id: u64, plant_type: &str, growth_stage: &str, now: i64) -> ThresholdBelief {
        let prior = self.get_prior(plant_type, growth_stage, now);
        let key = belief_key(plant_type, growth_stage, None, None, None);
        self.beliefs.insert((unit_id, user_id, key), prior.clone());
        prior
    }
}

/// Legacy payload migration (spec §4.5): a bare `{mean, variance, ...}`
/// object with no enclosing keyed map is treated as the `"default"` entry.
pub fn migrate_legacy_belief_payload(payload: serde_json::Value) -> HashMap<String, serde_json::Value> {
    match payload {
        serde_json::Value::Object(map) if map.contains_key("mean") => {
            let mut migrated = HashMap::new();
            migrated.insert("default".to_string(), serde_json::Value::Object(map));
            migrated
        }
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_mean_variance_and_sample_count() {
        let belief = ThresholdBelief {
            mean: 47.5,
            variance: 12.0,
            sample_count: 9,
            last_updated: 1_000,
            plant_type: Some("tomato".into()),
            growth_stage: Some("vegetative".into()),
        };
        let json = serde_json::to_value(&belief).unwrap();
        let restored: ThresholdBelief = serde_json::from_value(json).unwrap();
        assert_eq!(restored.mean, belief.mean);
        assert_eq!(restored.variance, belief.variance);
        assert_eq!(restored.sample_count, belief.sample_count);
    }

    #[test]
    fn legacy_unkeyed_payload_migrates_to_default_entry() {
        let legacy = serde_json::json!({"mean": 50.0, "variance": 25.0, "sample_count": 4, "last_updated": 0});
        let migrated = migrate_legacy_belief_payload(legacy);
        assert!(migrated.contains_key("default"));
        assert_eq!(migrated.len(), 1);
    }

    #[test]
    fn too_little_feedback_increases_threshold_matching_worked_example() {
        // Belief(mean=50, variance=25, samples=4), confidence=4/50=0.08.
        // adjustment = 8 - 0.08*6 = 7.52; uncertainty_factor =
        // min(1 + 5/20, 1.5) = 1.25 => magnitude = 9.4, so too_little gives
        // x = 50 + 9.4 = 59.4. Observation variance base=4, consistency=0.5
        // => sigma^2 = 4*(2.5-1.0) = 6. Posterior: tau0=0.04, tau=1/6,
        // tau_n=0.20667, mean_n = (0.04*50 + (1/6)*59.4)/0.20667 = 57.58.
        let mut adjuster = BayesianThresholdAdjuster::new(25.0, 1.0, 4.0);
        let stored = ThresholdBelief {
            mean: 50.0,
            variance: 25.0,
            sample_count: 4,
            last_updated: 0,
            plant_type: Some("default".into()),
            growth_stage: Some("vegetative".into()),
        };

        let result = adjuster.update_from_feedback(
            1,
            1,
            ThresholdFeedback::TooLittle,
            50.0,
            "default",
            "vegetative",
            None,
            None,
            None,
            0.5,
            Some(stored),
            0,
        );

        assert_eq!(result.direction, Direction::Increase);
        assert!((result.belief.mean - 57.58).abs() < 0.1);
        assert!((result.adjustment_amount - 7.58).abs() < 0.1);
        assert!((result.confidence - 0.10).abs() < 1e-9);
    }

    #[test]
    fn just_right_feedback_reinforces_and_shrinks_variance() {
        let mut adjuster = BayesianThresholdAdjuster::new(25.0, 1.0, 4.0);
        let stored = ThresholdBelief {
            mean: 50.0,
            variance: 25.0,
            sample_count: 10,
            last_updated: 0,
            plant_type: Some("default".into()),
            growth_stage: Some("vegetative".into()),
        };

        let result = adjuster.update_from_feedback(
            1,
            1,
            ThresholdFeedback::JustRight,
            50.0,
            "default",
            "vegetative",
            None,
            None,
            None,
            0.9,
            Some(stored.clone()),
            10,
        );

        assert_eq!(result.direction, Direction::Maintain);
        assert!(result.belief.variance < stored.variance);
    }

    #[test]
    fn consistency_defaults_to_half_below_five_samples() {
        let counts = FeedbackCounts {
            total: 3,
            too_little: 1,
            just_right: 1,
            too_much: 1,
        };
        assert_eq!(BayesianThresholdAdjuster::calculate_user_consistency(counts), 0.5);
    }

    #[test]
    fn balanced_alternating_feedback_is_less_consistent_than_mostly_just_right() {
        let balanced = FeedbackCounts {
            total: 10,
            too_little: 5,
            just_right: 0,
            too_much: 5,
        };
        let mostly_right = FeedbackCounts {
            total: 10,
            too_little: 0,
            just_right: 9,
            too_much: 1,
        };
        let c_balanced = BayesianThresholdAdjuster::calculate_user_consistency(balanced);
        let c_mostly_right = BayesianThresholdAdjuster::calculate_user_consistency(mostly_right);
        assert!(c_mostly_right > c_balanced);
    }
}
