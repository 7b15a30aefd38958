//! Per-agent prediction log, correctness verification, and confidence
//! calibration.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::learning::{
    evaluate_correctness, should_adjust_confidence, CalibrationTrend, LearnedRule, LearningStats,
    Prediction, TypeStats, MAX_LEARNED_RULES_PER_AGENT,
};

struct AgentLog {
    predictions: Vec<Prediction>,
    rules: Vec<LearnedRule>,
}

impl Default for AgentLog {
    fn default() -> Self {
        Self {
            predictions: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// Calibration memory for one run, keyed by agent id.
pub struct LearningStore {
    by_agent: RwLock<HashMap<String, AgentLog>>,
}

impl Default for LearningStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LearningStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_agent: RwLock::new(HashMap::new()),
        }
    }

    pub async fn log_prediction(
        &self,
        agent_id: impl Into<String>,
        prediction_type: impl Into<String>,
        predicted_value: JsonValue,
        confidence: f64,
        context: Option<JsonValue>,
    ) -> String {
        let agent_id = agent_id.into();
        let prediction = Prediction {
            prediction_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.clone(),
            prediction_type: prediction_type.into(),
            predicted_value,
            actual_value: None,
            confidence,
            context,
            created_at: chrono::Utc::now(),
            verified_at: None,
            was_correct: None,
            error_margin: None,
        };
        let id = prediction.prediction_id.clone();
        self.by_agent
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .predictions
            .push(prediction);
        id
    }

    /// Compares `actual_value` against the stored prediction using
    /// [`evaluate_correctness`]'s type-specific rule, and — for an
    /// incorrect prediction carrying non-empty context — files an "avoid"
    /// rule capped at [`MAX_LEARNED_RULES_PER_AGENT`] per agent.
    pub async fn verify_prediction(&self, prediction_id: &str, actual_value: JsonValue) -> bool {
        let mut by_agent = self.by_agent.write().await;
        for log in by_agent.values_mut() {
            if let Some(prediction) = log
                .predictions
                .iter_mut()
                .find(|p| p.prediction_id == prediction_id)
            {
                let (correct, margin) = evaluate_correctness(&prediction.predicted_value, &actual_value);
                prediction.actual_value = Some(actual_value);
                prediction.verified_at = Some(chrono::Utc::now());
                prediction.was_correct = Some(correct);
                prediction.error_margin = margin;

                if !correct {
                    if let Some(context) = prediction.context.clone() {
                        log.rules.push(LearnedRule {
                            prediction_type: prediction.prediction_type.clone(),
                            context_pattern: context,
                            reason: format!(
                                "predicted {} but observed {}",
                                prediction.predicted_value, prediction.actual_value.clone().unwrap_or(JsonValue::Null)
                            ),
                            created_at: chrono::Utc::now(),
                        });
                        if log.rules.len() > MAX_LEARNED_RULES_PER_AGENT {
                            let excess = log.rules.len() - MAX_LEARNED_RULES_PER_AGENT;
                            log.rules.drain(0..excess);
                        }
                    }
                }
                return correct;
            }
        }
        false
    }

    pub async fn get_agent_stats(&self, agent_id: &str) -> LearningStats {
        let by_agent = self.by_agent.read().await;
        let Some(log) = by_agent.get(agent_id) else {
            return LearningStats::empty(agent_id);
        };

        let verified: Vec<&Prediction> = log.predictions.iter().filter(|p| p.was_correct.is_some()).collect();
        let total = verified.len() as u64;
        let correct = verified.iter().filter(|p| p.was_correct == Some(true)).count() as u64;
        let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };
        let avg_confidence = if verified.is_empty() {
            0.0
        } else {
            verified.iter().map(|p| p.confidence).sum::<f64>() / verified.len() as f64
        };
        let calibration_error = (avg_confidence - accuracy).abs();

        let mut by_type: HashMap<String, TypeStats> = HashMap::new();
        for prediction in &verified {
            let entry = by_type.entry(prediction.prediction_type.clone()).or_default();
            entry.total += 1;
            if prediction.was_correct == Some(true) {
                entry.correct += 1;
            }
        }
        for stats in by_type.values_mut() {
            stats.accuracy = if stats.total == 0 {
                0.0
            } else {
                stats.correct as f64 / stats.total as f64
            };
        }

        let trend = if total < 5 {
            CalibrationTrend::Unknown
        } else if accuracy > avg_confidence {
            CalibrationTrend::Improving
        } else if accuracy < avg_confidence {
            CalibrationTrend::Declining
        } else {
            CalibrationTrend::Stable
        };

        LearningStats {
            agent_id: agent_id.to_string(),
            total_predictions: total,
            correct_predictions: correct,
            accuracy,
            avg_confidence,
            calibration_error,
            by_type,
            trend,
        }
    }

    /// `(should_adjust, multiplier)` per [`should_adjust_confidence`].
    pub async fn should_adjust_confidence(&self, agent_id: &str, prediction_type: &str) -> (bool, f64) {
        let stats = self.get_agent_stats(agent_id).await;
        should_adjust_confidence(&stats, prediction_type)
    }

    pub async fn get_learned_rules(&self, agent_id: &str) -> Vec<LearnedRule> {
        self.by_agent
            .read()
            .await
            .get(agent_id)
            .map(|log| log.rules.clone())
            .unwrap_or_default()
    }

    pub async fn get_all_stats(&self) -> HashMap<String, LearningStats> {
        let agent_ids: Vec<String> = self.by_agent.read().await.keys().cloned().collect();
        let mut out = HashMap::new();
        for agent_id in agent_ids {
            out.insert(agent_id.clone(), self.get_agent_stats(&agent_id).await);
        }
        out
    }

    pub async fn reset(&self) {
        self.by_agent.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_prediction_records_correctness_and_margin() {
        let store = LearningStore::new();
        let id = store
            .log_prediction("scout", "threat_level", serde_json::json!(100.0), 0.8, None)
            .await;
        let correct = store.verify_prediction(&id, serde_json::json!(110.0)).await;
        assert!(correct);
    }

    #[tokio::test]
    async fn incorrect_prediction_with_context_files_avoid_rule() {
        let store = LearningStore::new();
        let id = store
            .log_prediction(
                "scout",
                "threat_level",
                serde_json::json!(10.0),
                0.9,
                Some(serde_json::json!({"competitor": "acme"})),
            )
            .await;
        store.verify_prediction(&id, serde_json::json!(200.0)).await;
        let rules = store.get_learned_rules("scout").await;
        assert_eq!(rules.len(), 1);
    }

    #[tokio::test]
    async fn rule_cap_evicts_oldest() {
        let store = LearningStore::new();
        for i in 0..(MAX_LEARNED_RULES_PER_AGENT + 5) {
            let id = store
                .log_prediction(
                    "scout",
                    "t",
                    serde_json::json!(0.0),
                    0.9,
                    Some(serde_json::json!({"i": i})),
                )
                .await;
            store.verify_prediction(&id, serde_json::json!(1000.0)).await;
        }
        let rules = store.get_learned_rules("scout").await;
        assert_eq!(rules.len(), MAX_LEARNED_RULES_PER_AGENT);
    }

    #[tokio::test]
    async fn low_accuracy_agent_dampens_confidence() {
        let store = LearningStore::new();
        for _ in 0..6 {
            let id = store
                .log_prediction("scout", "threat_level", serde_json::json!(1.0), 0.9, None)
                .await;
            store.verify_prediction(&id, serde_json::json!(1000.0)).await;
        }
        let (adjust, factor) = store.should_adjust_confidence("scout", "threat_level").await;
        assert!(adjust);
        assert!((factor - 0.7).abs() < f64::EPSILON);
    }
}
