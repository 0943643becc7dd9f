use crate::chat::message::{Message, MessageId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    UserTurn,
    AgentFinal,
    ChainOfThought,
}

/// A derived display group borrowing a contiguous run of the transcript.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageGroup<'a> {
    pub kind: GroupKind,
    pub messages: &'a [Message],
}

impl<'a> MessageGroup<'a> {
    fn new(kind: GroupKind, messages: &'a [Message]) -> Self {
        Self { kind, messages }
    }

    /// Stable identity for diffing: the id of the group's first message.
    pub fn key(&self) -> Option<MessageId> {
        self.messages.first().map(|message| message.id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn step_label(&self) -> String {
        match self.messages.len() {
            1 => "1 step".to_string(),
            count => format!("{count} steps"),
        }
    }
}

/// Partitions an ordered transcript into display groups.
///
/// Consecutive intermediate agent messages collapse into one chain-of-thought group; every
/// user message and every final agent message gets a group of its own. Groups appear in
/// transcript order and together cover every message exactly once.
pub fn group_messages(messages: &[Message]) -> Vec<MessageGroup<'_>> {
    let mut groups = Vec::new();
    let mut pending_chain_start: Option<usize> = None;

    for (index, message) in messages.iter().enumerate() {
        if message.is_intermediate() {
            pending_chain_start.get_or_insert(index);
            continue;
        }

        if let Some(start) = pending_chain_start.take() {
            groups.push(MessageGroup::new(
                GroupKind::ChainOfThought,
                &messages[start..index],
            ));
        }

        let kind = match message.role {
            Role::User => GroupKind::UserTurn,
            Role::Agent => GroupKind::AgentFinal,
        };
        groups.push(MessageGroup::new(kind, &messages[index..=index]));
    }

    // An unterminated chain is still shown: the agent is mid-reasoning.
    if let Some(start) = pending_chain_start {
        groups.push(MessageGroup::new(
            GroupKind::ChainOfThought,
            &messages[start..],
        ));
    }

    groups
}
