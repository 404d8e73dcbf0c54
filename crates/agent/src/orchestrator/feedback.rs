//! Round feedback produced by the host after each result collection.

use serde::{Deserialize, Serialize};

/// The host's evaluation of one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// The user's request has been fully served.
    #[serde(default, alias = "is_complete")]
    pub completed: bool,

    /// Overall quality of the round's results, in `[0, 1]`.
    #[serde(default, alias = "quality_score")]
    pub quality: f32,

    /// The plan should be revised before the next round.
    #[serde(default, alias = "needs_plan_update", alias = "plan_needs_update")]
    pub needs_update: bool,

    #[serde(default)]
    pub issues: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,

    #[serde(default)]
    pub confidence: f32,

    #[serde(default, alias = "reasoning")]
    pub reason: String,
}

impl Feedback {
    /// Bring scores into `[0, 1]`.
    ///
    /// Models sometimes score out of 10 or 100; those are scaled down.
    pub fn normalized(mut self) -> Self {
        self.quality = unit_score(self.quality);
        self.confidence = unit_score(self.confidence);
        self
    }
}

fn unit_score(score: f32) -> f32 {
    if !score.is_finite() || score <= 0.0 {
        0.0
    } else if score <= 1.0 {
        score
    } else if score <= 10.0 {
        score / 10.0
    } else {
        (score / 100.0).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_aliases() {
        let feedback: Feedback = serde_json::from_str(
            r#"{"is_complete": true, "quality_score": 0.8, "needs_plan_update": false,
                "issues": ["thin sources"], "reasoning": "good enough"}"#,
        )
        .unwrap();
        assert!(feedback.completed);
        assert!(!feedback.needs_update);
        assert_eq!(feedback.reason, "good enough");
        assert_eq!(feedback.issues, vec!["thin sources"]);
    }

    #[test]
    fn scores_are_normalized() {
        let feedback = Feedback {
            quality: 8.0,
            confidence: 85.0,
            ..Default::default()
        }
        .normalized();
        assert!((feedback.quality - 0.8).abs() < 1e-6);
        assert!((feedback.confidence - 0.85).abs() < 1e-6);

        let feedback = Feedback {
            quality: -3.0,
            confidence: 1000.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(feedback.quality, 0.0);
        assert_eq!(feedback.confidence, 1.0);
    }
}
