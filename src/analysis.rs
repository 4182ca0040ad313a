//! Normalized analysis schema.
//!
//! The service response is collapsed into [`AnalysisResult`] immediately
//! after it is decoded; nothing downstream of this module looks at the raw
//! wire shapes in [`crate::api`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{RawAnalyzeResponse, RawContext};

/// Five-way sentiment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SentimentBand {
    VeryPositive,
    Positive,
    Neutral,
    Negative,
    VeryNegative,
}

impl SentimentBand {
    /// Bucket a sentiment score.
    ///
    /// `>= 0.6` very positive, `>= 0.2` positive, `>= -0.2` neutral,
    /// `>= -0.6` negative, anything lower (including NaN) very negative.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.6 {
            SentimentBand::VeryPositive
        } else if score >= 0.2 {
            SentimentBand::Positive
        } else if score >= -0.2 {
            SentimentBand::Neutral
        } else if score >= -0.6 {
            SentimentBand::Negative
        } else {
            SentimentBand::VeryNegative
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SentimentBand::VeryPositive => "Very Positive",
            SentimentBand::Positive => "Positive",
            SentimentBand::Neutral => "Neutral",
            SentimentBand::Negative => "Negative",
            SentimentBand::VeryNegative => "Very Negative",
        }
    }

    /// Machine-friendly class name (`very-positive`, ...).
    pub fn class(&self) -> &'static str {
        match self {
            SentimentBand::VeryPositive => "very-positive",
            SentimentBand::Positive => "positive",
            SentimentBand::Neutral => "neutral",
            SentimentBand::Negative => "negative",
            SentimentBand::VeryNegative => "very-negative",
        }
    }
}

impl std::fmt::Display for SentimentBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One emotion and its intensity (0..1 from the service, not clamped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub name: String,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub relationship_type: String,
    pub trust_level: String,
    pub formality_level: String,
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self {
            relationship_type: "Unknown".to_string(),
            trust_level: "Medium".to_string(),
            formality_level: "Casual".to_string(),
        }
    }
}

/// The single internal response schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment_score: f64,
    pub sentiment: SentimentBand,
    pub dominant_emotion: Option<String>,
    /// Emotions in the order the service listed them.
    pub emotions: Vec<EmotionScore>,
    pub context: AnalysisContext,
}

impl AnalysisResult {
    /// Collapse either response format into the internal schema.
    ///
    /// The nested `sentiment.score` wins over the legacy `sentiment_value`;
    /// a missing score counts as 0. The band is always derived from the
    /// score, never taken from a server-supplied label.
    pub fn from_raw(raw: RawAnalyzeResponse) -> Self {
        let sentiment_score = raw
            .sentiment
            .as_ref()
            .and_then(|s| s.score)
            .or(raw.sentiment_value)
            .unwrap_or(0.0);

        let emotions: Vec<EmotionScore> = raw
            .emotions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| {
                value.as_f64().map(|intensity| EmotionScore { name, intensity })
            })
            .collect();

        let dominant_emotion = raw
            .dominant_emotion
            .filter(|d| !d.trim().is_empty())
            .or_else(|| dominant_emotion(&emotions).map(str::to_string));

        let context = raw.context.map(normalize_context).unwrap_or_default();

        Self {
            sentiment_score,
            sentiment: SentimentBand::from_score(sentiment_score),
            dominant_emotion,
            emotions,
            context,
        }
    }
}

/// Arg-max over the emotions; the first listed wins on ties.
pub fn dominant_emotion(emotions: &[EmotionScore]) -> Option<&str> {
    let mut best: Option<&EmotionScore> = None;
    for e in emotions {
        match best {
            Some(b) if e.intensity <= b.intensity => {}
            _ => best = Some(e),
        }
    }
    best.map(|e| e.name.as_str())
}

fn normalize_context(ctx: RawContext) -> AnalysisContext {
    let defaults = AnalysisContext::default();
    AnalysisContext {
        relationship_type: first_text(&[ctx.relationship_type, ctx.relationship])
            .unwrap_or(defaults.relationship_type),
        trust_level: first_text(&[ctx.trust_level]).unwrap_or(defaults.trust_level),
        formality_level: first_text(&[ctx.formality_level, ctx.formality])
            .unwrap_or(defaults.formality_level),
    }
}

fn first_text(candidates: &[Option<Value>]) -> Option<String> {
    candidates.iter().flatten().find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}
