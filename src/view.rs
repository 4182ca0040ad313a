//! Pure view layer.
//!
//! Storage and network code never format output; they hand sessions and
//! analysis results to the functions here, which return plain data
//! ([`SessionView`], [`HistoryEntry`], [`EmotionBar`]) or terminal-ready
//! strings.

use chrono::{DateTime, Local, Utc};
use colored::*;

use crate::analysis::{AnalysisResult, EmotionScore, SentimentBand};
use crate::session::{ChatSession, MessageKind};

const PREVIEW_LIMIT: usize = 50;
const BAR_WIDTH: usize = 20;

// ---------------------------------------------------------------------------
// View models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub kind: MessageKind,
    pub speaker: &'static str,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub id: String,
    pub relationship: Option<String>,
    pub started: DateTime<Utc>,
    pub messages: Vec<MessageView>,
}

/// One row of the "previous conversations" list.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub preview: String,
    pub relationship: String,
    pub started: DateTime<Utc>,
}

/// One bar of the emotion chart.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionBar {
    pub name: String,
    pub percent: i64,
    pub filled: usize,
    pub dominant: bool,
}

pub fn speaker(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::User => "You",
        MessageKind::Ai => "EmotionAI",
    }
}

pub fn render_message(kind: MessageKind, content: &str, timestamp: DateTime<Utc>) -> MessageView {
    MessageView {
        kind,
        speaker: speaker(kind),
        body: content.to_string(),
        timestamp,
    }
}

pub fn render_session(session: &ChatSession) -> SessionView {
    SessionView {
        id: session.id.clone(),
        relationship: session.relationship.clone(),
        started: session.start_time,
        messages: session
            .messages
            .iter()
            .map(|m| render_message(m.kind, &m.content, m.timestamp))
            .collect(),
    }
}

pub fn history_entry(session: &ChatSession) -> HistoryEntry {
    let preview = match session.messages.first() {
        None => "Empty conversation".to_string(),
        Some(first) => {
            let source = if first.kind == MessageKind::User {
                Some(first.content.as_str())
            } else {
                session.messages.get(1).map(|m| m.content.as_str())
            };
            match source {
                Some(text) => truncate_preview(&strip_tags(text)),
                None => "Empty conversation".to_string(),
            }
        }
    };

    HistoryEntry {
        id: session.id.clone(),
        preview,
        relationship: session
            .relationship
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        started: session.start_time,
    }
}

pub fn history_entries(sessions: &[ChatSession]) -> Vec<HistoryEntry> {
    sessions.iter().map(history_entry).collect()
}

/// Drop anything that looks like a markup tag, including an unterminated
/// trailing one.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if in_tag {
            if c == '>' {
                in_tag = false;
            }
            continue;
        }
        let opens_tag = c == '<'
            && chars
                .peek()
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '/');
        if opens_tag {
            in_tag = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// First 50 characters, with `...` appended when anything was cut.
pub fn truncate_preview(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() > PREVIEW_LIMIT {
        let head: String = trimmed.chars().take(PREVIEW_LIMIT).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

pub fn emotion_bars(emotions: &[EmotionScore], dominant: Option<&str>) -> Vec<EmotionBar> {
    emotions
        .iter()
        .map(|e| {
            let clamped = e.intensity.clamp(0.0, 1.0);
            EmotionBar {
                name: e.name.clone(),
                percent: (e.intensity * 100.0).round() as i64,
                filled: (clamped * BAR_WIDTH as f64).round() as usize,
                dominant: dominant == Some(e.name.as_str()),
            }
        })
        .collect()
}

/// The text stored as the AI message content for one analysis.
///
/// Plain text so that replay can print it verbatim.
pub fn analysis_markup(result: &AnalysisResult) -> String {
    let mut lines = vec![
        format!(
            "Sentiment: {} ({:.2})",
            result.sentiment.label(),
            result.sentiment_score
        ),
        format!(
            "Dominant emotion: {}",
            result.dominant_emotion.as_deref().unwrap_or("-")
        ),
        format!(
            "Relationship: {} | Trust: {} | Formality: {}",
            result.context.relationship_type,
            result.context.trust_level,
            result.context.formality_level
        ),
    ];
    if !result.emotions.is_empty() {
        let parts: Vec<String> = result
            .emotions
            .iter()
            .map(|e| format!("{} {:.2}", e.name, e.intensity))
            .collect();
        lines.push(format!("Emotions: {}", parts.join(", ")));
    }
    lines.join("\n")
}

pub fn error_markup(reason: &str) -> String {
    format!("Sorry, an error occurred: {reason}")
}

// ---------------------------------------------------------------------------
// Terminal output
// ---------------------------------------------------------------------------

fn colour_band(band: SentimentBand) -> ColoredString {
    let label = band.label();
    match band {
        SentimentBand::VeryPositive => label.bright_green().bold(),
        SentimentBand::Positive => label.green(),
        SentimentBand::Neutral => label.yellow(),
        SentimentBand::Negative => label.red(),
        SentimentBand::VeryNegative => label.bright_red().bold(),
    }
}

pub fn format_message(view: &MessageView) -> String {
    let who = match view.kind {
        MessageKind::User => view.speaker.bright_cyan().bold(),
        MessageKind::Ai => view.speaker.bright_magenta().bold(),
    };
    let stamp = view
        .timestamp
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string()
        .dimmed();
    format!("{who} {stamp}\n{}", indent(&view.body))
}

/// Live analysis card: sentiment, dominant emotion, context and bar chart.
pub fn format_analysis(result: &AnalysisResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {}\n",
        "EmotionAI".bright_magenta().bold(),
        "analysis".dimmed()
    ));
    out.push_str(&format!(
        "  Sentiment: {} {}\n",
        colour_band(result.sentiment),
        format!("({:.2})", result.sentiment_score).dimmed()
    ));
    if let Some(dominant) = &result.dominant_emotion {
        out.push_str(&format!("  Dominant emotion: {}\n", dominant.bold()));
    }
    out.push_str(&format!(
        "  Relationship: {}  Trust: {}  Formality: {}\n",
        result.context.relationship_type,
        result.context.trust_level,
        result.context.formality_level
    ));

    let bars = emotion_bars(&result.emotions, result.dominant_emotion.as_deref());
    let name_width = bars.iter().map(|b| b.name.chars().count()).max().unwrap_or(0);
    for bar in bars {
        let filled = "█".repeat(bar.filled);
        let empty = "░".repeat(BAR_WIDTH - bar.filled.min(BAR_WIDTH));
        let painted = if bar.dominant {
            filled.bright_green().to_string()
        } else {
            filled.cyan().to_string()
        };
        out.push_str(&format!(
            "  {:<width$} {}{} {:>3}%\n",
            bar.name,
            painted,
            empty.dimmed(),
            bar.percent,
            width = name_width
        ));
    }
    out
}

pub fn format_error(reason: &str) -> String {
    format!("{}", error_markup(reason).bright_red())
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No saved conversations found".to_string();
    }
    let mut out = format!("{}\n", "Previous Conversations".bold());
    for (i, e) in entries.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {}\n    {} {}  {}  {}\n",
            i + 1,
            e.preview,
            "Relationship:".dimmed(),
            e.relationship,
            e.started.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string().dimmed(),
            e.id.dimmed()
        ));
    }
    out
}

fn indent(body: &str) -> String {
    body.lines()
        .map(|l| format!("  {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
