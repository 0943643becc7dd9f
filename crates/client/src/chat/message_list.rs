use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hasher;

use chrono::{DateTime, Local, TimeZone};

use crate::chat::grouping::{GroupKind, MessageGroup, group_messages};
use crate::chat::message::{Message, MessageId};
use crate::chat::scroll_manager::{ScrollCommand, ScrollManager, TranscriptChange};
use crate::markdown::markdown_to_html;

pub const EMPTY_TRANSCRIPT_TITLE: &str = "Start a conversation";
pub const EMPTY_TRANSCRIPT_HINT: &str = "Send a message to get started";
pub const CHAIN_OF_THOUGHT_HEADER: &str = "Chain of Thought";

const DEFAULT_VIEWPORT_COLUMNS: usize = 80;
const DEFAULT_VIEWPORT_LINES: usize = 24;
const ROW_HEADER_LINES: usize = 1;
const ROW_GAP_LINES: usize = 1;
const THINKING_ROW_LINES: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub id: MessageId,
    pub content: String,
    pub html: String,
    pub is_first: bool,
    pub is_last: bool,
}

/// One visual row of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptRow {
    User {
        id: MessageId,
        content: String,
        timestamp_label: String,
    },
    Agent {
        id: MessageId,
        content: String,
        html: String,
        timestamp_label: String,
    },
    ChainOfThought {
        key: MessageId,
        step_label: String,
        steps: Vec<ChainStep>,
    },
}

impl TranscriptRow {
    pub fn key(&self) -> MessageId {
        match self {
            Self::User { id, .. } | Self::Agent { id, .. } => *id,
            Self::ChainOfThought { key, .. } => *key,
        }
    }

    fn layout_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self {
            Self::User { content, .. } => {
                hasher.write_u8(0);
                hasher.write(content.as_bytes());
            }
            Self::Agent { html, .. } => {
                hasher.write_u8(1);
                hasher.write(html.as_bytes());
            }
            Self::ChainOfThought { steps, .. } => {
                hasher.write_u8(2);
                for step in steps {
                    hasher.write(step.id.as_uuid().as_bytes());
                    hasher.write(step.html.as_bytes());
                }
            }
        }
        hasher.finish()
    }

    fn estimated_lines(&self, columns: usize) -> usize {
        let body = match self {
            Self::User { content, .. } | Self::Agent { content, .. } => {
                estimate_text_lines(content, columns)
            }
            Self::ChainOfThought { steps, .. } => steps
                .iter()
                .map(|step| estimate_text_lines(&step.content, columns))
                .sum(),
        };
        ROW_HEADER_LINES + body + ROW_GAP_LINES
    }
}

struct HtmlCacheEntry {
    content_hash: u64,
    html: String,
}

/// Turns a transcript into display rows and reports what changed to the scroll controller.
pub struct MessageList {
    rows: Vec<TranscriptRow>,
    thinking_phrase: Option<&'static str>,
    scroll_manager: ScrollManager,
    html_cache: HashMap<MessageId, HtmlCacheEntry>,
    viewport_columns: usize,
    viewport_lines: usize,
}

impl MessageList {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            thinking_phrase: None,
            scroll_manager: ScrollManager::new(),
            html_cache: HashMap::new(),
            viewport_columns: DEFAULT_VIEWPORT_COLUMNS,
            viewport_lines: DEFAULT_VIEWPORT_LINES,
        }
    }

    pub fn rows(&self) -> &[TranscriptRow] {
        &self.rows
    }

    /// The indicator phrase while the thinking row is visible.
    pub fn thinking_phrase(&self) -> Option<&'static str> {
        self.thinking_phrase
    }

    /// Title and hint shown in place of an empty transcript.
    pub fn placeholder(&self) -> Option<(&'static str, &'static str)> {
        (self.rows.is_empty() && self.thinking_phrase.is_none())
            .then_some((EMPTY_TRANSCRIPT_TITLE, EMPTY_TRANSCRIPT_HINT))
    }

    pub fn scroll_manager(&self) -> &ScrollManager {
        &self.scroll_manager
    }

    pub fn set_viewport(&mut self, columns: usize, lines: usize) {
        self.viewport_columns = columns.max(1);
        self.viewport_lines = lines.max(1);
        self.update_extent();
    }

    /// Rebuilds rows from the full transcript.
    pub fn set_transcript(&mut self, messages: &[Message], thinking_phrase: Option<&'static str>) {
        let previous_hashes = self
            .rows
            .iter()
            .map(|row| (row.key(), row.layout_hash()))
            .collect::<HashMap<_, _>>();

        let groups = group_messages(messages);
        let rows = groups
            .iter()
            .filter_map(|group| self.build_row(group))
            .collect::<Vec<_>>();

        let active_ids = messages
            .iter()
            .map(|message| message.id)
            .collect::<HashSet<_>>();
        self.html_cache.retain(|id, _| active_ids.contains(id));

        let mutated_in_place = rows.iter().any(|row| {
            previous_hashes
                .get(&row.key())
                .is_some_and(|previous| *previous != row.layout_hash())
        });

        self.rows = rows;
        self.thinking_phrase = thinking_phrase;
        self.scroll_manager
            .sync(self.rows.len(), self.thinking_phrase.is_some());
        if mutated_in_place {
            self.scroll_manager.notify(TranscriptChange::ContentMutated);
        }
        self.update_extent();
    }

    /// Swaps the indicator phrase without touching layout.
    pub fn set_thinking_phrase(&mut self, phrase: &'static str) {
        if self.thinking_phrase.is_some() {
            self.thinking_phrase = Some(phrase);
        }
    }

    pub fn reset_scroll_tracking(&mut self) {
        self.scroll_manager.reset();
    }

    pub fn apply_pending_scroll(&mut self) -> Option<ScrollCommand> {
        self.scroll_manager.apply_pending_scroll()
    }

    fn build_row(&mut self, group: &MessageGroup<'_>) -> Option<TranscriptRow> {
        let first = group.messages.first()?;
        let row = match group.kind {
            GroupKind::UserTurn => TranscriptRow::User {
                id: first.id,
                content: first.content.clone(),
                timestamp_label: timestamp_label(&first.created_at.with_timezone(&Local)),
            },
            GroupKind::AgentFinal => TranscriptRow::Agent {
                id: first.id,
                content: first.content.clone(),
                html: self.html_for(first),
                timestamp_label: timestamp_label(&first.created_at.with_timezone(&Local)),
            },
            GroupKind::ChainOfThought => {
                let last_index = group.len() - 1;
                let steps = group
                    .messages
                    .iter()
                    .enumerate()
                    .map(|(index, message)| ChainStep {
                        id: message.id,
                        content: message.content.clone(),
                        html: self.html_for(message),
                        is_first: index == 0,
                        is_last: index == last_index,
                    })
                    .collect();
                TranscriptRow::ChainOfThought {
                    key: first.id,
                    step_label: group.step_label(),
                    steps,
                }
            }
        };
        Some(row)
    }

    fn html_for(&mut self, message: &Message) -> String {
        let content_hash = content_hash(message);
        let entry = self
            .html_cache
            .entry(message.id)
            .or_insert_with(|| HtmlCacheEntry {
                content_hash,
                html: render_html(message),
            });

        if entry.content_hash != content_hash {
            entry.content_hash = content_hash;
            entry.html = render_html(message);
        }
        entry.html.clone()
    }

    fn update_extent(&mut self) {
        let mut total_lines = self
            .rows
            .iter()
            .map(|row| row.estimated_lines(self.viewport_columns))
            .sum::<usize>();
        if self.thinking_phrase.is_some() {
            total_lines += THINKING_ROW_LINES;
        }

        let max_offset = total_lines.saturating_sub(self.viewport_lines);
        self.scroll_manager.set_max_offset(max_offset as f32);
    }
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a message time like `9:05 AM`.
pub fn timestamp_label<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%-I:%M %p").to_string()
}

fn render_html(message: &Message) -> String {
    match &message.content_html {
        Some(html) if !html.trim().is_empty() => html.clone(),
        _ => markdown_to_html(&message.content),
    }
}

fn content_hash(message: &Message) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(message.content.as_bytes());
    if let Some(html) = &message.content_html {
        hasher.write_u8(1);
        hasher.write(html.as_bytes());
    }
    hasher.finish()
}

fn estimate_text_lines(content: &str, columns: usize) -> usize {
    if content.is_empty() {
        return 1;
    }

    let columns = columns.max(1);
    let mut line_count = 0usize;
    for line in content.lines() {
        let char_count = line.chars().count().max(1);
        line_count += char_count.div_ceil(columns);
    }

    if content.ends_with('\n') {
        line_count += 1;
    }

    line_count.max(1)
}
