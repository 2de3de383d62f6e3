//! Irrigation predictor contract (spec §4.8): an injected model surface the
//! execution and recommendation paths consult, never owning the model
//! itself (training/serving an actual model is an explicit Non-goal).
//!
//! Grounded in `app/domain/irrigation.py`'s prediction dataclasses, folded
//! into one trait per Design Notes §9's capability-set pattern rather than
//! five separate injected services. Each prediction carries its own
//! `confidence`; a no-op predictor returning `confidence == 0.0` everywhere
//! is a valid implementation and is what [`NoOpPredictor`] provides.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDirection {
    Increase,
    Decrease,
    Maintain,
}

#[derive(Debug, Clone)]
pub struct ThresholdPrediction {
    pub optimal_threshold: f64,
    pub current_threshold: f64,
    pub direction: ThresholdDirection,
    pub adjustment_amount: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone)]
pub struct DurationPrediction {
    pub recommended_seconds: u32,
    pub current_default_seconds: u32,
    pub expected_moisture_increase: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LikelyResponse {
    Approve,
    Delay,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct UserResponsePrediction {
    pub approve_probability: f64,
    pub delay_probability: f64,
    pub cancel_probability: f64,
    pub most_likely: LikelyResponse,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TimingPrediction {
    pub preferred_hour: u8,
    pub preferred_minute: u8,
    pub avoid_hours: Vec<u8>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Injected model surface consulted by detection (timing/user-response),
/// execution (duration), and feedback (threshold) — spec §4.8.
pub trait IrrigationPredictor: Send + Sync {
    fn predict_duration(&self, unit_id: u64, default_seconds: u32) -> DurationPrediction {
        DurationPrediction {
            recommended_seconds: default_seconds,
            current_default_seconds: default_seconds,
            expected_moisture_increase: 0.0,
            confidence: 0.0,
            reasoning: "no model configured".into(),
        }
    }

    fn predict_user_response(&self, unit_id: u64) -> UserResponsePrediction {
        let _ = unit_id;
        UserResponsePrediction {
            approve_probability: 0.0,
            delay_probability: 0.0,
            cancel_probability: 0.0,
            most_likely: LikelyResponse::Approve,
            confidence: 0.0,
        }
    }

    fn predict_threshold(&self, unit_id: u64, current_threshold: f64) -> ThresholdPrediction {
        let _ = unit_id;
        ThresholdPrediction {
            optimal_threshold: current_threshold,
            current_threshold,
            direction: ThresholdDirection::Maintain,
            adjustment_amount: 0.0,
            confidence: 0.0,
            reasoning: "no model configured".into(),
        }
    }

    fn predict_timing(&self, unit_id: u64) -> TimingPrediction {
        let _ = unit_id;
        TimingPrediction {
            preferred_hour: 21,
            preferred_minute: 0,
            avoid_hours: Vec::new(),
            confidence: 0.0,
            reasoning: "no model configured".into(),
        }
    }
}

/// Default predictor: every call falls through to the trait's
/// zero-confidence defaults. Used whenever no model has been wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPredictor;

impl IrrigationPredictor for NoOpPredictor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_predictor_recommends_the_default_duration_with_zero_confidence() {
        let predictor = NoOpPredictor;
        let prediction = predictor.predict_duration(1, 45);
        assert_eq!(prediction.recommended_seconds, 45);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[test]
    fn no_op_predictor_maintains_the_current_threshold() {
        let predictor = NoOpPredictor;
        let prediction = predictor.predict_threshold(1, 40.0);
        assert_eq!(prediction.optimal_threshold, 40.0);
        assert_eq!(prediction.direction, ThresholdDirection::Maintain);
    }
}
