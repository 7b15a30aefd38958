//! Consensus-protocol data model for the
//! [`crate::services::collaboration::CollaborationManager`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Phase a [`CollaborationSession`] progresses through. `Debating` is
/// skipped entirely when only one solution survives brainstorming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationPhase {
    Initiated,
    Gathering,
    Brainstorming,
    Debating,
    Voting,
    Consensus,
    Complete,
    Failed,
}

/// What kicks off a session: the problem statement and who's invited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationInput {
    pub problem: String,
    pub context: JsonValue,
    pub facilitator: String,
    pub participants: Vec<String>,
}

/// A participant's vote for one of the brainstormed solutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: String,
    pub choice: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Per-candidate tally computed while checking for consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteTally {
    pub choice: String,
    pub count: usize,
    pub majority_pct: f64,
    pub weighted_score: f64,
}

/// Outcome of a completed (or failed) collaboration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationResult {
    pub session_id: String,
    pub final_phase: CollaborationPhase,
    pub solution: Option<String>,
    pub consensus: bool,
    pub tallies: HashMap<String, VoteTally>,
    pub perspectives: Vec<(String, JsonValue)>,
    pub proposals: Vec<(String, String)>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error: Option<String>,
}

/// Consensus is reached if either a strict majority voted for one choice, or
/// that choice's confidence-weighted score clears `0.6`, matching
/// `_check_consensus` in the reference implementation.
#[must_use]
pub fn has_consensus(tally: &VoteTally) -> bool {
    tally.majority_pct > 0.5 || tally.weighted_score > 0.6
}

/// Builds a tally per distinct `choice` from a vote list and the total
/// number of votes cast, ordered highest-weighted-score first; ties are
/// broken by higher `majority_pct`, then by `choice` key, so the ordering
/// is fully deterministic regardless of `HashMap` iteration order.
#[must_use]
pub fn tally_choices(votes: &[Vote], total_votes: usize) -> Vec<VoteTally> {
    if votes.is_empty() || total_votes == 0 {
        return Vec::new();
    }
    let mut by_choice: HashMap<String, Vec<&Vote>> = HashMap::new();
    for vote in votes {
        by_choice.entry(vote.choice.clone()).or_default().push(vote);
    }
    let mut tallies: Vec<VoteTally> = by_choice
        .into_iter()
        .map(|(choice, cast)| {
            let count = cast.len();
            let confidence_sum: f64 = cast.iter().map(|v| v.confidence).sum();
            VoteTally {
                choice,
                count,
                majority_pct: count as f64 / total_votes as f64,
                weighted_score: confidence_sum / total_votes as f64,
            }
        })
        .collect();
    tallies.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.majority_pct.partial_cmp(&a.majority_pct).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.choice.cmp(&b.choice))
    });
    tallies
}

/// The winning tally (see [`tally_choices`]' ordering), if any votes were
/// cast.
#[must_use]
pub fn tally_votes(votes: &[Vote], total_votes: usize) -> Option<VoteTally> {
    tally_choices(votes, total_votes).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(agent: &str, choice: &str, confidence: f64) -> Vote {
        Vote {
            agent_id: agent.into(),
            choice: choice.into(),
            confidence,
            reasoning: None,
        }
    }

    #[test]
    fn strict_majority_reaches_consensus() {
        let votes = vec![
            vote("a", "plan-x", 0.6),
            vote("b", "plan-x", 0.6),
            vote("c", "plan-y", 0.9),
        ];
        let winner = tally_votes(&votes, 3).unwrap();
        assert_eq!(winner.choice, "plan-x");
        assert!(has_consensus(&winner));
    }

    #[test]
    fn equal_weighted_score_is_broken_by_higher_majority_pct() {
        let votes = vec![
            vote("a", "plan-x", 0.3),
            vote("b", "plan-x", 0.3),
            vote("c", "plan-y", 0.6),
        ];
        let winner = tally_votes(&votes, 3).unwrap();
        assert_eq!(winner.choice, "plan-x");
        assert!((winner.majority_pct - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn fully_tied_tallies_are_broken_by_choice_key() {
        let votes = vec![vote("a", "beta", 0.5), vote("b", "alpha", 0.5)];
        let winner = tally_votes(&votes, 2).unwrap();
        assert_eq!(winner.choice, "alpha");
    }

    #[test]
    fn no_votes_yields_no_tally() {
        assert!(tally_votes(&[], 3).is_none());
        assert!(tally_choices(&[], 3).is_empty());
    }
}
