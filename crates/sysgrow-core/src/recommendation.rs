//! Plant-care recommendation engine (spec §4.6).
//!
//! Grounded in `recommendation_provider.py`: the `SYMPTOM_DATABASE`/
//! `TREATMENT_MAP` tables are carried near-verbatim, `_check_environmental_conditions`'s
//! temperature/humidity/soil-moisture bands become [`check_environmental_conditions`],
//! and `_get_irrigation_recommendations`'s confidence/materiality gates become
//! [`irrigation_prediction_recommendations`]. `RecommendationProvider` is a
//! trait rather than an ABC per Design Notes §9.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Diagnosis,
    Treatment,
    Environment,
    Watering,
    Maintenance,
    Monitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    RuleBased,
    Ml,
    Llm,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub action: String,
    pub priority: Priority,
    pub category: Category,
    pub confidence: f64,
    pub rationale: Option<String>,
    pub source: Source,
}

/// Health status as reported by the caller; used only for the
/// no-issues-detected fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    NeedsAttention,
}

/// Everything the provider needs to produce recommendations for one plant
/// at one point in time (spec §4.6's `RecommendationContext`).
#[derive(Debug, Clone, Default)]
pub struct RecommendationContext {
    pub symptoms: Vec<String>,
    pub severity_level: u8,
    pub health_status: Option<HealthStatus>,
    pub environmental_data: HashMap<String, f64>,
    pub irrigation_prediction: Option<IrrigationPredictionSummary>,
}

/// The subset of §4.8's prediction contract the recommendation engine
/// reads; the workflow constructs this from whatever predictor is wired.
#[derive(Debug, Clone, Default)]
pub struct IrrigationPredictionSummary {
    pub threshold_direction: Option<ThresholdDirection>,
    pub threshold_adjustment_amount: f64,
    pub threshold_optimal: Option<f64>,
    pub threshold_confidence: f64,

    pub duration_recommended_seconds: Option<u32>,
    pub duration_current_default_seconds: Option<u32>,
    pub duration_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDirection {
    Increase,
    Decrease,
    Maintain,
}

pub trait RecommendationProvider {
    fn get_recommendations(&self, context: &RecommendationContext) -> Vec<Recommendation>;
    fn get_treatment_suggestions(&self, symptoms: &[String]) -> Vec<Recommendation>;
    fn provider_name(&self) -> &'static str;
    fn is_available(&self) -> bool;
}

struct SymptomInfo {
    likely_causes: &'static [&'static str],
}

fn symptom_database(symptom: &str) -> Option<SymptomInfo> {
    let causes: &[&str] = match symptom {
        "yellowing_leaves" => &["overwatering", "nitrogen_deficiency", "root_rot"],
        "brown_spots" => &["fungal_infection", "bacterial_spot", "nutrient_burn"],
        "wilting" => &["underwatering", "root_damage", "heat_stress"],
        "stunted_growth" => &["poor_lighting", "nutrient_deficiency", "root_bound"],
        "leaf_curl" => &["heat_stress", "pest_damage", "overwatering"],
        "white_powdery_coating" => &["powdery_mildew", "high_humidity"],
        "webbing_on_leaves" => &["spider_mites", "low_humidity"],
        "holes_in_leaves" => &["caterpillars", "beetles", "slugs"],
        "drooping_leaves" => &["underwatering", "overwatering", "temperature_stress"],
        "pale_leaves" => &["iron_deficiency", "low_light", "nutrient_lockout"],
        "crispy_leaf_edges" => &["low_humidity", "salt_buildup", "underwatering"],
        "black_spots" => &["fungal_disease", "overwatering", "poor_drainage"],
        _ => return None,
    };
    Some(SymptomInfo { likely_causes: causes })
}

fn treatment_map(symptom: &str) -> Option<&'static [&'static str]> {
    let treatments: &[&str] = match symptom {
        "yellowing_leaves" => &[
            "Check drainage and reduce watering if overwatered",
            "Apply nitrogen fertilizer if deficiency suspected",
            "Inspect roots for rot and trim if necessary",
        ],
        "brown_spots" => &[
            "Improve air circulation",
            "Reduce humidity if too high",
            "Apply fungicide if fungal infection suspected",
        ],
        "wilting" => &[
            "Check soil moisture and water if dry",
            "Reduce temperature if heat stress suspected",
            "Inspect roots for damage",
        ],
        "white_powdery_coating" => &[
            "Reduce humidity below 60%",
            "Improve air circulation with fans",
            "Apply fungicide for powdery mildew",
        ],
        "webbing_on_leaves" => &[
            "Increase humidity to discourage spider mites",
            "Apply miticide or neem oil treatment",
            "Improve air circulation",
        ],
        "stunted_growth" => &[
            "Increase light intensity or duration",
            "Check and adjust nutrient levels",
            "Repot if plant is root-bound",
        ],
        "leaf_curl" => &[
            "Check for pest infestation",
            "Reduce temperature if heat stressed",
            "Adjust watering schedule",
        ],
        "holes_in_leaves" => &[
            "Inspect for caterpillars and remove manually",
            "Apply organic pest control (BT spray)",
            "Set up slug traps if slugs suspected",
        ],
        "drooping_leaves" => &[
            "Check soil moisture - water if dry",
            "Reduce watering if soil is soggy",
            "Provide temperature stability",
        ],
        "pale_leaves" => &[
            "Apply iron supplement or chelated micronutrients",
            "Increase light exposure",
            "Check and adjust pH levels",
        ],
        "crispy_leaf_edges" => &[
            "Increase humidity with humidifier or misting",
            "Flush soil to remove salt buildup",
            "Increase watering frequency slightly",
        ],
        "black_spots" => &[
            "Remove affected leaves immediately",
            "Reduce watering frequency",
            "Improve drainage in container",
        ],
        _ => return None,
    };
    Some(treatments)
}

fn normalize(symptom: &str) -> String {
    symptom.to_lowercase().replace(' ', "_")
}

/// Always available, no external dependencies (spec §4.6).
pub struct RuleBasedRecommendationProvider;

impl RuleBasedRecommendationProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RuleBasedRecommendationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationProvider for RuleBasedRecommendationProvider {
    fn get_recommendations(&self, context: &RecommendationContext) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if let Some(prediction) = &context.irrigation_prediction {
            recommendations.extend(irrigation_prediction_recommendations(prediction));
        }

        if !context.symptoms.is_empty() {
            for symptom in &context.symptoms {
                let key = normalize(symptom);
                if let Some(info) = symptom_database(&key) {
                    for cause in info.likely_causes.iter().take(2) {
                        recommendations.push(Recommendation {
                            action: format!("Investigate {}", cause.replace('_', " ")),
                            priority: if context.severity_level >= 3 {
                                Priority::High
                            } else {
                                Priority::Medium
                            },
                            category: Category::Diagnosis,
                            confidence: 0.6,
                            rationale: Some(format!(
                                "Symptom '{symptom}' is often caused by {}",
                                cause.replace('_', " ")
                            )),
                            source: Source::RuleBased,
                        });
                    }
                }
            }
            recommendations.extend(self.get_treatment_suggestions(&context.symptoms));
        }

        if !context.environmental_data.is_empty() {
            recommendations.extend(check_environmental_conditions(&context.environmental_data));
        }

        if recommendations.is_empty() {
            recommendations.push(match context.health_status {
                Some(HealthStatus::Healthy) => Recommendation {
                    action: "Continue current care routine".into(),
                    priority: Priority::Low,
                    category: Category::Maintenance,
                    confidence: 0.8,
                    rationale: Some("No issues detected".into()),
                    source: Source::RuleBased,
                },
                _ => Recommendation {
                    action: "Monitor plant closely for changes".into(),
                    priority: Priority::Medium,
                    category: Category::Monitoring,
                    confidence: 0.7,
                    rationale: Some("Status requires attention".into()),
                    source: Source::RuleBased,
                },
            });
        }

        recommendations.truncate(6);
        recommendations
    }

    fn get_treatment_suggestions(&self, symptoms: &[String]) -> Vec<Recommendation> {
        let mut suggestions = Vec::new();
        for symptom in symptoms {
            let key = normalize(symptom);
            if let Some(treatments) = treatment_map(&key) {
                for (idx, treatment) in treatments.iter().take(3).enumerate() {
                    suggestions.push(Recommendation {
                        action: treatment.to_string(),
                        priority: if idx == 0 { Priority::High } else { Priority::Medium },
                        category: Category::Treatment,
                        confidence: 0.7 - (idx as f64 * 0.1),
                        rationale: Some(format!("Recommended treatment for {}", symptom.replace('_', " "))),
                        source: Source::RuleBased,
                    });
                }
            }
        }
        suggestions
    }

    fn provider_name(&self) -> &'static str {
        "rule_based"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Environmental threshold checks (spec §4.6): temperature, humidity, and
/// soil moisture bands that map to urgent/high/medium recommendations.
fn check_environmental_conditions(env: &HashMap<String, f64>) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if let Some(&temp) = env.get("temperature") {
        if temp > 32.0 {
            recommendations.push(Recommendation {
                action: "Reduce temperature - risk of heat stress".into(),
                priority: Priority::High,
                category: Category::Environment,
                confidence: 0.8,
                rationale: Some(format!("Temperature ({temp}°C) exceeds safe limit")),
                source: Source::RuleBased,
            });
        } else if temp < 15.0 {
            recommendations.push(Recommendation {
                action: "Increase temperature - risk of cold stress".into(),
                priority: Priority::High,
                category: Category::Environment,
                confidence: 0.8,
                rationale: Some(format!("Temperature ({temp}°C) below optimal range")),
                source: Source::RuleBased,
            });
        }
    }

    if let Some(&humidity) = env.get("humidity") {
        if humidity > 80.0 {
            recommendations.push(Recommendation {
                action: "Reduce humidity to prevent fungal issues".into(),
                priority: Priority::Medium,
                category: Category::Environment,
                confidence: 0.7,
                rationale: Some(format!("Humidity ({humidity}%) is too high")),
                source: Source::RuleBased,
            });
        } else if humidity < 30.0 {
            recommendations.push(Recommendation {
                action: "Increase humidity to prevent leaf damage".into(),
                priority: Priority::Medium,
                category: Category::Environment,
                confidence: 0.7,
                rationale: Some(format!("Humidity ({humidity}%) is too low")),
                source: Source::RuleBased,
            });
        }
    }

    if let Some(&soil_moisture) = env.get("soil_moisture") {
        if soil_moisture < 25.0 {
            recommendations.push(Recommendation {
                action: "Water immediately - soil is very dry".into(),
                priority: Priority::Urgent,
                category: Category::Watering,
                confidence: 0.9,
                rationale: Some(format!("Soil moisture ({soil_moisture}%) critically low")),
                source: Source::RuleBased,
            });
        } else if soil_moisture > 85.0 {
            recommendations.push(Recommendation {
                action: "Reduce watering - risk of root rot".into(),
                priority: Priority::High,
                category: Category::Watering,
                confidence: 0.8,
                rationale: Some(format!("Soil moisture ({soil_moisture}%) too high")),
                source: Source::RuleBased,
            });
        }
    }

    recommendations
}

/// Translate §4.8 predictions into recommendations, gated by confidence
/// ≥ 0.5 and a materially-sized proposed change (spec §4.6).
fn irrigation_prediction_recommendations(prediction: &IrrigationPredictionSummary) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if let (Some(direction), Some(optimal)) = (prediction.threshold_direction, prediction.threshold_optimal) {
        if direction != ThresholdDirection::Maintain
            && prediction.threshold_adjustment_amount > 2.0
            && prediction.threshold_confidence >= 0.5
        {
            let direction_word = match direction {
                ThresholdDirection::Increase => "increase",
                ThresholdDirection::Decrease => "decrease",
                ThresholdDirection::Maintain => unreachable!(),
            };
            recommendations.push(Recommendation {
                action: format!("Adjust soil moisture threshold to {optimal:.1}%"),
                priority: if prediction.threshold_adjustment_amount >= 5.0 {
                    Priority::High
                } else {
                    Priority::Medium
                },
                category: Category::Watering,
                confidence: prediction.threshold_confidence.min(1.0),
                rationale: Some(format!(
                    "Model suggests {direction_word} by {:.1}%",
                    prediction.threshold_adjustment_amount
                )),
                source: Source::Ml,
            });
        }
    }

    if let (Some(recommended), Some(default)) = (
        prediction.duration_recommended_seconds,
        prediction.duration_current_default_seconds,
    ) {
        let diff = (recommended as i64 - default as i64).unsigned_abs();
        if diff > 30 && prediction.duration_confidence > 0.5 {
            let direction_word = if recommended > default { "Increase" } else { "Reduce" };
            recommendations.push(Recommendation {
                action: format!("{direction_word} irrigation duration to {recommended}s"),
                priority: if diff >= 60 { Priority::High } else { Priority::Medium },
                category: Category::Watering,
                confidence: prediction.duration_confidence.min(1.0),
                rationale: Some(format!("Recommended change is {diff}s")),
                source: Source::Ml,
            });
        }
    }

    recommendations
}

/// Delegates to the rule-based provider when no LLM backend is wired, so
/// callers never fail (spec §4.6's "LLM fallback stub").
pub struct LlmFallbackProvider {
    enabled: bool,
    fallback: RuleBasedRecommendationProvider,
}

impl LlmFallbackProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            fallback: RuleBasedRecommendationProvider::new(),
        }
    }
}

impl RecommendationProvider for LlmFallbackProvider {
    fn get_recommendations(&self, context: &RecommendationContext) -> Vec<Recommendation> {
        self.fallback.get_recommendations(context)
    }

    fn get_treatment_suggestions(&self, symptoms: &[String]) -> Vec<Recommendation> {
        self.fallback.get_treatment_suggestions(symptoms)
    }

    fn provider_name(&self) -> &'static str {
        if self.enabled {
            "llm"
        } else {
            "rule_based"
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_symptom_yields_no_diagnosis_entries() {
        let provider = RuleBasedRecommendationProvider::new();
        let context = RecommendationContext {
            symptoms: vec!["spontaneous_combustion".into()],
            ..Default::default()
        };
        let recs = provider.get_recommendations(&context);
        // Falls through to the monitoring fallback since nothing matched.
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].category, Category::Monitoring);
    }

    #[test]
    fn known_symptom_produces_diagnosis_and_treatment() {
        let provider = RuleBasedRecommendationProvider::new();
        let context = RecommendationContext {
            symptoms: vec!["wilting".into()],
            severity_level: 3,
            ..Default::default()
        };
        let recs = provider.get_recommendations(&context);
        assert!(recs.iter().any(|r| r.category == Category::Diagnosis));
        assert!(recs.iter().any(|r| r.category == Category::Treatment));
        assert!(recs.iter().all(|r| r.priority != Priority::Low));
    }

    #[test]
    fn extreme_environment_values_never_produce_false_urgency() {
        let mut env = HashMap::new();
        env.insert("temperature".to_string(), 22.0);
        env.insert("humidity".to_string(), 55.0);
        env.insert("soil_moisture".to_string(), 45.0);
        let recs = check_environmental_conditions(&env);
        assert!(recs.is_empty());
    }

    #[test]
    fn critically_dry_soil_is_urgent() {
        let mut env = HashMap::new();
        env.insert("soil_moisture".to_string(), 10.0);
        let recs = check_environmental_conditions(&env);
        assert_eq!(recs[0].priority, Priority::Urgent);
    }

    #[test]
    fn low_confidence_threshold_prediction_is_not_surfaced() {
        let prediction = IrrigationPredictionSummary {
            threshold_direction: Some(ThresholdDirection::Increase),
            threshold_adjustment_amount: 6.0,
            threshold_optimal: Some(55.0),
            threshold_confidence: 0.2,
            ..Default::default()
        };
        assert!(irrigation_prediction_recommendations(&prediction).is_empty());
    }

    #[test]
    fn material_threshold_change_with_confidence_is_surfaced() {
        let prediction = IrrigationPredictionSummary {
            threshold_direction: Some(ThresholdDirection::Increase),
            threshold_adjustment_amount: 6.0,
            threshold_optimal: Some(55.0),
            threshold_confidence: 0.8,
            ..Default::default()
        };
        let recs = irrigation_prediction_recommendations(&prediction);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::High);
    }

    #[test]
    fn llm_fallback_matches_rule_based_when_disabled() {
        let fallback = LlmFallbackProvider::new(false);
        assert_eq!(fallback.provider_name(), "rule_based");
        assert!(fallback.is_available());
    }
}
