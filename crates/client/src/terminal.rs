//! Line-oriented terminal front-end around [`ChatView`].

use std::sync::Arc;

use parley_storage::{SqliteStorage, Storage};
use parley_webhook::WebhookClient;
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;

use crate::chat::events::ChatCommand;
use crate::chat::message_list::{CHAIN_OF_THOUGHT_HEADER, TranscriptRow};
use crate::chat::presence::THINKING_PHRASE_ROTATION;
use crate::chat::sidebar::EMPTY_SESSIONS_LABEL;
use crate::chat::view::{ChatOptions, ChatView};
use crate::error::{OpenStorageSnafu, SettingsSnafu, StartupError, TerminalSnafu, WebhookSnafu};
use crate::settings::Settings;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const TRANSCRIPT_LINES: usize = 20;
const SCREEN_COLUMNS: usize = 80;

const HELP_TEXT: &str = "\
Type a message and press enter to send it.
  /new         start a new conversation
  /list        list conversations
  /open <n>    open conversation number n
  /delete <n>  delete conversation number n
  /cancel      stop waiting for a reply
  /quit        exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    New,
    List,
    Open(usize),
    Delete(usize),
    Cancel,
    Quit,
    Help,
    Unknown(String),
}

/// Parses one line of user input. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Send(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let index = parts.next().and_then(|raw| raw.parse::<usize>().ok());

    let input = match (name, index) {
        ("new", _) => Input::New,
        ("list", _) => Input::List,
        ("open", Some(index)) if index > 0 => Input::Open(index),
        ("delete", Some(index)) if index > 0 => Input::Delete(index),
        ("cancel", _) => Input::Cancel,
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        _ => Input::Unknown(line.to_string()),
    };
    Some(input)
}

/// Opens storage and the webhook client from `settings` and runs until `/quit` or end of input.
pub async fn run(settings: Settings) -> Result<(), StartupError> {
    settings.validate().context(SettingsSnafu {
        stage: "terminal-validate-settings",
    })?;

    let store = Arc::new(
        SqliteStorage::open(&settings.database_url)
            .await
            .context(OpenStorageSnafu {
                stage: "terminal-open-storage",
            })?,
    );
    let dispatcher = Arc::new(WebhookClient::new(settings.webhook_config()).context(
        WebhookSnafu {
            stage: "terminal-webhook-client",
        },
    )?);
    tracing::info!("sending messages to {}", dispatcher.url());

    let options = ChatOptions {
        feed: settings.feed_config(),
        reply_timeout: settings.reply_timeout(),
    };
    let (mut view, mut events) = ChatView::new(store, dispatcher, options);
    view.set_viewport(SCREEN_COLUMNS, TRANSCRIPT_LINES);
    view.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut presence_ticker = tokio::time::interval(THINKING_PHRASE_ROTATION);
    presence_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    write_screen(&mut stdout, &render_screen(&view, None)).await?;

    loop {
        let mut notice = None;
        let redraw = tokio::select! {
            line = lines.next_line() => {
                let line = line.context(TerminalSnafu { stage: "terminal-read-line" })?;
                let Some(line) = line else {
                    break;
                };
                match parse_input(&line) {
                    None => false,
                    Some(Input::Quit) => break,
                    Some(input) => {
                        notice = handle_input(&mut view, input).await;
                        true
                    }
                }
            }
            Some(event) = events.recv() => {
                view.apply_event(event);
                false
            }
            _ = presence_ticker.tick() => {
                let timed_out = view.check_reply_timeout(chrono::Utc::now());
                if view.show_thinking_indicator() {
                    view.advance_thinking_phrase();
                    true
                } else {
                    timed_out
                }
            }
        };

        if view.apply_pending_scroll().is_some() || redraw {
            write_screen(&mut stdout, &render_screen(&view, notice.as_deref())).await?;
        }
    }

    tracing::info!("terminal session ended");
    Ok(())
}

/// Runs one input line. Any new input dismisses the previous error.
async fn handle_input<S: Storage + 'static>(view: &mut ChatView<S>, input: Input) -> Option<String> {
    view.clear_error();
    match input {
        Input::Send(content) => view.handle_command(ChatCommand::Send(content)).await,
        Input::New => view.handle_command(ChatCommand::NewChat).await,
        Input::Open(index) => match session_at(view, index) {
            Some(session_id) => {
                view.handle_command(ChatCommand::SelectSession(session_id))
                    .await
            }
            None => return Some(format!("no conversation number {index}")),
        },
        Input::Delete(index) => match session_at(view, index) {
            Some(session_id) => {
                view.handle_command(ChatCommand::DeleteSession(session_id))
                    .await
            }
            None => return Some(format!("no conversation number {index}")),
        },
        Input::Cancel => view.handle_command(ChatCommand::CancelWaiting).await,
        Input::List => return Some(render_session_list(view)),
        Input::Help => return Some(HELP_TEXT.to_string()),
        Input::Unknown(raw) => return Some(format!("unknown command '{raw}', try /help")),
        Input::Quit => {}
    }
    None
}

fn session_at<S: Storage + 'static>(
    view: &ChatView<S>,
    index: usize,
) -> Option<parley_storage::SessionId> {
    view.sessions()
        .get(index.checked_sub(1)?)
        .map(|session| session.id)
}

async fn write_screen(stdout: &mut tokio::io::Stdout, screen: &str) -> Result<(), StartupError> {
    stdout
        .write_all(screen.as_bytes())
        .await
        .context(TerminalSnafu {
            stage: "terminal-write-screen",
        })?;
    stdout.flush().await.context(TerminalSnafu {
        stage: "terminal-flush-screen",
    })
}

pub fn render_session_list<S: Storage + 'static>(view: &ChatView<S>) -> String {
    let items = view.session_items();
    if items.is_empty() {
        return EMPTY_SESSIONS_LABEL.to_string();
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let marker = if item.is_active { '*' } else { ' ' };
            format!(
                "{marker} {:>2}. {}  ({})",
                index + 1,
                item.title,
                item.date_label
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_screen<S: Storage + 'static>(view: &ChatView<S>, notice: Option<&str>) -> String {
    let mut lines = Vec::new();
    let title = view
        .active_session()
        .map_or("parley", |session| session.title.as_str());
    lines.push(format!("== {title} =="));

    let list = view.message_list();
    if let Some((headline, hint)) = list.placeholder() {
        lines.push(String::new());
        lines.push(headline.to_string());
        lines.push(hint.to_string());
    }
    for row in list.rows() {
        render_row(row, &mut lines);
    }
    if let Some(phrase) = list.thinking_phrase() {
        lines.push(format!("... {phrase}..."));
    }

    let skip = lines.len().saturating_sub(TRANSCRIPT_LINES + 1);
    let mut screen = String::from(CLEAR_SCREEN);
    for line in lines.iter().skip(skip) {
        screen.push_str(line);
        screen.push('\n');
    }

    if let Some(error) = view.last_error() {
        screen.push_str(&format!("! {error}\n"));
    }
    if let Some(notice) = notice {
        screen.push_str(notice);
        screen.push('\n');
    }
    screen.push_str(if view.input_enabled() {
        "> "
    } else {
        "(waiting for reply, /cancel to stop) > "
    });
    screen
}

fn render_row(row: &TranscriptRow, lines: &mut Vec<String>) {
    match row {
        TranscriptRow::User {
            content,
            timestamp_label,
            ..
        } => {
            lines.push(format!("[{timestamp_label}] You"));
            lines.extend(content.lines().map(|line| format!("  {line}")));
        }
        TranscriptRow::Agent {
            content,
            timestamp_label,
            ..
        } => {
            lines.push(format!("[{timestamp_label}] Agent"));
            lines.extend(content.lines().map(|line| format!("  {line}")));
        }
        TranscriptRow::ChainOfThought {
            step_label, steps, ..
        } => {
            lines.push(format!("{CHAIN_OF_THOUGHT_HEADER} ({step_label})"));
            for step in steps {
                let connector = if step.is_last { "`-" } else { "|-" };
                let mut step_lines = step.content.lines();
                if let Some(first) = step_lines.next() {
                    lines.push(format!("  {connector} {first}"));
                }
                let indent = if step.is_last { "    " } else { "  | " };
                lines.extend(step_lines.map(|line| format!("{indent} {line}")));
            }
        }
    }
    lines.push(String::new());
}
