use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relationship between the user and the person they are writing about.
///
/// The analysis service adjusts trust and formality from this value; it is
/// sent verbatim as a lowercase string.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum Relationship {
    #[default]
    Neutral,
    Friend,
    Family,
    Colleague,
    Stranger,
    Adversary,
    Enemy,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Neutral => "neutral",
            Relationship::Friend => "friend",
            Relationship::Family => "family",
            Relationship::Colleague => "colleague",
            Relationship::Stranger => "stranger",
            Relationship::Adversary => "adversary",
            Relationship::Enemy => "enemy",
        }
    }

    /// Case-insensitive lookup; `None` for values the client does not know.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "neutral" => Some(Relationship::Neutral),
            "friend" => Some(Relationship::Friend),
            "family" => Some(Relationship::Family),
            "colleague" => Some(Relationship::Colleague),
            "stranger" => Some(Relationship::Stranger),
            "adversary" => Some(Relationship::Adversary),
            "enemy" => Some(Relationship::Enemy),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -- /analyze ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub text: String,
    pub relationship: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `/analyze` reply exactly as the service sends it.
///
/// Two shapes are in the wild: the legacy flat one (`sentiment_label`,
/// `sentiment_value`) and the nested one (`sentiment: {score, label}`).
/// Everything is optional here; [`crate::analysis::AnalysisResult::from_raw`]
/// collapses both into one schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAnalyzeResponse {
    #[serde(default)]
    pub sentiment_label: Option<String>,
    #[serde(default)]
    pub sentiment_value: Option<f64>,
    #[serde(default)]
    pub sentiment: Option<RawSentiment>,
    #[serde(default)]
    pub dominant_emotion: Option<String>,
    #[serde(default)]
    pub emotions: Option<Map<String, Value>>,
    #[serde(default)]
    pub context: Option<RawContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSentiment {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Context block; values arrive as strings or numbers depending on the
/// service version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContext {
    #[serde(default)]
    pub relationship_type: Option<Value>,
    #[serde(default)]
    pub relationship: Option<Value>,
    #[serde(default)]
    pub trust_level: Option<Value>,
    #[serde(default)]
    pub formality_level: Option<Value>,
    #[serde(default)]
    pub formality: Option<Value>,
}

/// Error body the service returns alongside a 5xx (`{"error": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    pub error: String,
}
