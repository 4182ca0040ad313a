use crate::api::Relationship;
use crate::config::ClientConfig;
use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "emotion-chat")]
#[command(version)]
#[command(about = "Chat with an emotion-analysis service from the terminal")]
pub struct Args {
    /// Analyze a single message and exit instead of starting the chat loop
    pub message: Option<String>,

    /// Base URL of the analysis service
    #[arg(long)]
    pub server: Option<String>,

    /// Relationship to the person the message is addressed to
    #[arg(long, short, value_enum)]
    pub relationship: Option<Relationship>,

    /// Continue a saved conversation by id
    #[arg(long = "continue", value_name = "ID")]
    pub continue_id: Option<String>,

    /// List saved conversations and exit
    #[arg(long)]
    pub history: bool,

    /// Deliver queued feedback and exit
    #[arg(long)]
    pub flush_feedback: bool,

    /// Directory for history and queued feedback
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file (defaults to <data-dir>/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Keep nothing on disk for this run
    #[arg(long)]
    pub ephemeral: bool,

    /// Print shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Args {
    /// Apply command-line overrides on top of file and environment config.
    pub fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(rel) = self.relationship {
            config.default_relationship = rel.to_string();
        }
    }
}

/// One line typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    New,
    History,
    Continue(String),
    Feedback,
    Relationship(Relationship),
    Help,
    Quit,
    /// A `/command` that could not be understood; carries the reason.
    Invalid(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("").to_lowercase();
    let arg = parts.next();
    match (name.as_str(), arg) {
        ("new", _) => Input::New,
        ("history", _) => Input::History,
        ("continue", Some(id)) => Input::Continue(id.to_string()),
        ("continue", None) => Input::Invalid("usage: /continue <id>".into()),
        ("feedback", _) => Input::Feedback,
        ("relationship", Some(r)) => match Relationship::from_str_loose(r) {
            Some(rel) => Input::Relationship(rel),
            None => Input::Invalid(format!("unknown relationship: {r}")),
        },
        ("relationship", None) => Input::Invalid("usage: /relationship <kind>".into()),
        ("help", _) | ("?", _) => Input::Help,
        ("quit", _) | ("exit", _) | ("q", _) => Input::Quit,
        _ => Input::Invalid(format!("unknown command: /{name}")),
    }
}

/// One line typed while the rating prompt is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackAnswer {
    /// Blank line.
    Skip,
    /// `<rating> [comment]`. The range is checked on submit.
    Rating { rating: u8, comment: String },
    /// A `/command`, handled as it would be without the prompt.
    Command(Input),
    Invalid,
}

pub fn parse_feedback_answer(line: &str) -> FeedbackAnswer {
    let line = line.trim();
    if line.is_empty() {
        return FeedbackAnswer::Skip;
    }
    if line.starts_with('/') {
        return FeedbackAnswer::Command(parse_input(line));
    }
    let (rating, comment) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match rating.parse::<u8>() {
        Ok(rating) => FeedbackAnswer::Rating {
            rating,
            comment: comment.trim().to_string(),
        },
        Err(_) => FeedbackAnswer::Invalid,
    }
}

pub const HELP: &str = "\
/new                 start a new conversation
/history             list saved conversations
/continue <id>       continue a saved conversation
/relationship <kind> neutral, friend, family, colleague, stranger, adversary, enemy
/feedback            rate this conversation
/quit                exit";
