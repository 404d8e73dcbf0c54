//! Conversation analysis: the first host call of every orchestration.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// How much coordination a request needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
    #[default]
    Unknown,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::VeryComplex => "very_complex",
            Self::Unknown => "unknown",
        }
    }

    /// Read a tier label, tolerating case and separators.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "simple" | "trivial" | "easy" => Self::Simple,
            "moderate" | "medium" => Self::Moderate,
            "complex" | "hard" => Self::Complex,
            "very_complex" | "verycomplex" => Self::VeryComplex,
            _ => Self::Unknown,
        }
    }

    /// Whether this tier goes through planning.
    pub fn needs_plan(&self) -> bool {
        !matches!(self, Self::Simple)
    }
}

/// The host's classification of the incoming conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    #[serde(default)]
    pub intent: String,

    #[serde(default)]
    pub topics: Vec<String>,

    #[serde(default, deserialize_with = "lenient_complexity")]
    pub complexity: Complexity,

    #[serde(default, alias = "summary", alias = "context")]
    pub context_summary: String,
}

fn lenient_complexity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Complexity, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(label) => Complexity::from_label(&label),
        _ => Complexity::Unknown,
    })
}
