use clap::{CommandFactory, Parser};
use colored::*;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use emotion_chat::cli::{parse_feedback_answer, parse_input, Args, FeedbackAnswer, Input, HELP};
use emotion_chat::client::{AnalysisService, FeedbackSink, HttpClient};
use emotion_chat::config::ClientConfig;
use emotion_chat::error::ChatError;
use emotion_chat::feedback::SubmitOutcome;
use emotion_chat::loader::LoadOutcome;
use emotion_chat::pipeline::{ExchangeOutcome, Reply};
use emotion_chat::telemetry::init_tracing;
use emotion_chat::view::{format_analysis, format_error, format_history, format_message, render_message};
use emotion_chat::{open_store, ChatClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "emotion-chat", &mut io::stdout());
        return Ok(());
    }

    let mut config = ClientConfig::load(args.config.as_deref(), args.data_dir.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;
    init_tracing(&config.log_level);
    debug!(server = %config.server_url, data_dir = %config.data_dir.display(), "config resolved");

    let store = open_store(&config, args.ephemeral)?;
    let http = HttpClient::new(config.http_config());
    let mut client = ChatClient::new(http.clone(), http, store, &config);

    if args.history {
        print!("{}", format_history(&client.history()));
        return Ok(());
    }

    if args.flush_feedback {
        let report = client.flush_feedback().await;
        println!(
            "Feedback: {} delivered, {} still queued",
            report.delivered, report.remaining
        );
        return Ok(());
    }

    // One-shot sends have no prompt, so they leave the show-on-load flag alone.
    let startup = if args.message.is_some() {
        client.resume(args.continue_id.as_deref()).await
    } else {
        client.startup(args.continue_id.as_deref()).await
    };
    if startup.flushed.delivered > 0 {
        println!(
            "{}",
            format!("Delivered {} queued feedback record(s)", startup.flushed.delivered).dimmed()
        );
    }
    match startup.loaded {
        Some(LoadOutcome::Loaded(view)) => {
            println!("{}", format!("Continuing conversation {}", view.id).dimmed());
            for message in &view.messages {
                println!("{}", format_message(message));
            }
        }
        Some(LoadOutcome::NotFound) => {
            if let Some(id) = &args.continue_id {
                println!("{}", format!("No saved conversation {id}; starting a new one").yellow());
            }
        }
        None => {}
    }

    if let Some(message) = args.message {
        let outcome = client.send(&message).await?;
        print_exchange(&outcome);
        return Ok(());
    }

    run_interactive(&mut client, config.flush_interval(), startup.prompt_feedback).await?;
    client.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// Interactive loop
// ---------------------------------------------------------------------------

async fn run_interactive<A, F>(
    client: &mut ChatClient<A, F>,
    flush_every: std::time::Duration,
    prompt_now: bool,
) -> Result<(), ChatError>
where
    A: AnalysisService,
    F: FeedbackSink,
{
    println!(
        "{} {}",
        "EmotionAI chat".bright_magenta().bold(),
        format!("(relationship: {}, /help for commands)", client.state().relationship).dimmed()
    );
    if prompt_now {
        print_feedback_prompt();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut flush = tokio::time::interval(flush_every);
    // The first tick fires immediately and startup already flushed.
    flush.tick().await;

    let mut show_prompt = true;
    loop {
        if show_prompt {
            print_prompt(client.feedback_prompt_open());
        }
        show_prompt = true;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = flush.tick() => {
                client.flush_feedback().await;
                show_prompt = false;
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };

        let input = if client.feedback_prompt_open() {
            match parse_feedback_answer(&line) {
                FeedbackAnswer::Command(Input::Help) => {
                    println!("{HELP}");
                    continue;
                }
                FeedbackAnswer::Command(input) => {
                    client.skip_feedback();
                    input
                }
                answer => {
                    answer_feedback(client, answer).await;
                    continue;
                }
            }
        } else {
            parse_input(&line)
        };

        match input {
            Input::Empty => {}
            Input::Message(text) => match client.send(&text).await {
                Ok(outcome) => {
                    print_exchange(&outcome);
                    if client.feedback_prompt_open() {
                        print_feedback_prompt();
                    }
                }
                Err(ChatError::Throttled) | Err(ChatError::Busy) => {
                    println!("{}", "Slow down a little, that message was not sent".yellow());
                }
                Err(e) => println!("{}", format_error(&e.to_string())),
            },
            Input::New => {
                client.new_chat();
                println!("{}", "Started a new conversation".dimmed());
            }
            Input::History => print!("{}", format_history(&client.history())),
            Input::Continue(id) => match client.continue_session(&id) {
                LoadOutcome::Loaded(view) => {
                    for message in &view.messages {
                        println!("{}", format_message(message));
                    }
                }
                LoadOutcome::NotFound => println!("{}", format!("No saved conversation {id}").yellow()),
            },
            Input::Relationship(rel) => {
                client.set_relationship(rel);
                println!("{}", format!("Relationship set to {rel}").dimmed());
            }
            Input::Feedback => {
                client.open_feedback();
                print_feedback_prompt();
            }
            Input::Help => println!("{HELP}"),
            Input::Invalid(reason) => println!("{}", reason.yellow()),
            Input::Quit => break,
        }
    }
    Ok(())
}

async fn answer_feedback<A, F>(client: &mut ChatClient<A, F>, answer: FeedbackAnswer)
where
    A: AnalysisService,
    F: FeedbackSink,
{
    let (rating, comment) = match answer {
        FeedbackAnswer::Skip => {
            client.skip_feedback();
            println!("{}", "Feedback skipped".dimmed());
            return;
        }
        FeedbackAnswer::Rating { rating, comment } => (rating, comment),
        FeedbackAnswer::Invalid | FeedbackAnswer::Command(_) => {
            println!("{}", "Enter a rating from 1 to 5, or an empty line to skip".yellow());
            return;
        }
    };
    match client.submit_feedback(rating, &comment).await {
        Ok(SubmitOutcome::Delivered) => println!("{}", "Thank you for your feedback!".green()),
        Ok(SubmitOutcome::Queued) => {
            println!("{}", "Thank you! Feedback will be sent when the service is reachable".green())
        }
        Ok(SubmitOutcome::Dropped) => {
            warn!("feedback could not be delivered or queued");
            println!("{}", format_error("feedback could not be saved"));
        }
        Err(e) => println!("{}", e.to_string().yellow()),
    }
}

fn print_exchange(outcome: &ExchangeOutcome) {
    let user = render_message(outcome.user.kind, &outcome.user.content, outcome.user.timestamp);
    println!("{}", format_message(&user));
    match &outcome.reply {
        Reply::Analysis(result) => print!("{}", format_analysis(result)),
        Reply::Error(text) => println!("{}", text.bright_red()),
    }
}

fn print_feedback_prompt() {
    println!(
        "{}",
        "How helpful was this conversation? Rate 1-5, optionally followed by a comment (empty line skips)"
            .bright_yellow()
    );
}

fn print_prompt(feedback: bool) {
    let marker = if feedback { "rating> " } else { "> " };
    print!("{}", marker.bright_cyan());
    let _ = io::stdout().flush();
}
