//! Prediction/calibration data model for the
//! [`crate::services::learning_store::LearningStore`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Maximum "avoid" rules retained per agent; oldest is evicted first.
/// Matches the reference implementation's `[-50:]` slicing.
pub const MAX_LEARNED_RULES_PER_AGENT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub agent_id: String,
    pub prediction_type: String,
    pub predicted_value: JsonValue,
    pub actual_value: Option<JsonValue>,
    pub confidence: f64,
    pub context: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub was_correct: Option<bool>,
    pub error_margin: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTrend {
    Improving,
    Declining,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TypeStats {
    pub total: u64,
    pub correct: u64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub agent_id: String,
    pub total_predictions: u64,
    pub correct_predictions: u64,
    pub accuracy: f64,
    pub avg_confidence: f64,
    pub calibration_error: f64,
    pub by_type: HashMap<String, TypeStats>,
    pub trend: CalibrationTrend,
}

impl LearningStats {
    #[must_use]
    pub fn empty(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            total_predictions: 0,
            correct_predictions: 0,
            accuracy: 0.0,
            avg_confidence: 0.0,
            calibration_error: 0.0,
            by_type: HashMap::new(),
            trend: CalibrationTrend::Unknown,
        }
    }
}

/// A rule synthesized from a wrong, context-bearing prediction: "avoid
/// repeating this mistake in a similar context."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedRule {
    pub prediction_type: String,
    pub context_pattern: JsonValue,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Numeric correctness uses a margin tolerance of `max(|predicted| * 20%, 5)`;
/// list-valued predictions use Jaccard overlap `>= 0.5`; everything else is
/// exact equality (case-insensitive for strings). Matches
/// `_evaluate_correctness` in the reference implementation.
#[must_use]
pub fn evaluate_correctness(predicted: &JsonValue, actual: &JsonValue) -> (bool, Option<f64>) {
    match (predicted, actual) {
        (JsonValue::Number(p), JsonValue::Number(a)) => {
            let (p, a) = (p.as_f64().unwrap_or(0.0), a.as_f64().unwrap_or(0.0));
            let margin = (p - a).abs();
            let threshold = (p.abs() * 0.2).max(5.0);
            (margin <= threshold, Some(margin))
        }
        (JsonValue::Bool(p), JsonValue::Bool(a)) => (p == a, None),
        (JsonValue::String(p), JsonValue::String(a)) => (p.eq_ignore_ascii_case(a), None),
        (JsonValue::Array(p), JsonValue::Array(a)) => {
            let ps: std::collections::HashSet<_> = p.iter().map(ToString::to_string).collect();
            let as_: std::collections::HashSet<_> = a.iter().map(ToString::to_string).collect();
            let union = ps.union(&as_).count();
            let intersection = ps.intersection(&as_).count();
            let overlap = if union == 0 {
                1.0
            } else {
                intersection as f64 / union as f64
            };
            (overlap >= 0.5, None)
        }
        (p, a) => (p == a, None),
    }
}

/// `(should_adjust, factor)`. A type with at least 5 verified predictions is
/// judged on its own accuracy (`<0.5` dampens to `0.7`, `>0.9` boosts to
/// `1.1`); otherwise the agent's overall calibration is checked once it has
/// at least 10 verified predictions and is materially overconfident.
#[must_use]
pub fn should_adjust_confidence(stats: &LearningStats, prediction_type: &str) -> (bool, f64) {
    if let Some(type_stats) = stats.by_type.get(prediction_type) {
        if type_stats.total >= 5 {
            if type_stats.accuracy < 0.5 {
                return (true, 0.7);
            }
            if type_stats.accuracy > 0.9 {
                return (true, 1.1);
            }
            return (false, 1.0);
        }
    }
    if stats.calibration_error > 0.2
        && stats.total_predictions >= 10
        && stats.avg_confidence > stats.accuracy
    {
        return (true, 0.85);
    }
    (false, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_margin_uses_relative_or_floor_threshold() {
        let (correct, margin) = evaluate_correctness(
            &serde_json::json!(100.0),
            &serde_json::json!(115.0),
        );
        assert!(correct);
        assert_eq!(margin, Some(15.0));
    }

    #[test]
    fn numeric_margin_rejects_beyond_threshold() {
        let (correct, _) = evaluate_correctness(&serde_json::json!(10.0), &serde_json::json!(20.0));
        assert!(!correct);
    }

    #[test]
    fn string_correctness_is_case_insensitive() {
        let (correct, _) = evaluate_correctness(
            &serde_json::json!("Positive"),
            &serde_json::json!("positive"),
        );
        assert!(correct);
    }

    #[test]
    fn list_overlap_half_is_sufficient() {
        let (correct, _) = evaluate_correctness(
            &serde_json::json!(["a", "b"]),
            &serde_json::json!(["b", "c"]),
        );
        assert!(correct);
    }

    #[test]
    fn low_accuracy_type_dampens_confidence() {
        let mut stats = LearningStats::empty("scout");
        stats.by_type.insert(
            "threat_level".into(),
            TypeStats {
                total: 6,
                correct: 2,
                accuracy: 2.0 / 6.0,
            },
        );
        let (adjust, factor) = should_adjust_confidence(&stats, "threat_level");
        assert!(adjust);
        assert!((factor - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn overconfident_agent_overall_is_dampened() {
        let mut stats = LearningStats::empty("scout");
        stats.total_predictions = 12;
        stats.accuracy = 0.5;
        stats.avg_confidence = 0.8;
        stats.calibration_error = 0.3;
        let (adjust, factor) = should_adjust_confidence(&stats, "unseen_type");
        assert!(adjust);
        assert!((factor - 0.85).abs() < f64::EPSILON);
    }
}
