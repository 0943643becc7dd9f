use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

use crate::chat::message::{Message, Role, SessionId};

/// How long each thinking phrase stays on screen.
pub const THINKING_PHRASE_ROTATION: Duration = Duration::from_secs(2);

pub const THINKING_PHRASES: [&str; 40] = [
    "Frolicking",
    "Meandering",
    "Pondering",
    "Contemplating",
    "Musing",
    "Ruminating",
    "Cogitating",
    "Deliberating",
    "Wandering",
    "Exploring",
    "Discovering",
    "Unraveling",
    "Deciphering",
    "Analyzing",
    "Synthesizing",
    "Connecting dots",
    "Following threads",
    "Diving deep",
    "Brewing ideas",
    "Crafting thoughts",
    "Weaving answers",
    "Gathering insights",
    "Piecing together",
    "Untangling",
    "Percolating",
    "Marinating",
    "Simmering",
    "Incubating",
    "Crystallizing",
    "Formulating",
    "Assembling",
    "Orchestrating",
    "Composing",
    "Constructing",
    "Architecting",
    "Brainstorming",
    "Ideating",
    "Conjuring",
    "Summoning wisdom",
    "Channeling creativity",
];

// Coprime with the phrase count so every phrase is visited once per cycle.
const PHRASE_STRIDE: usize = 7;

/// True while the agent is emitting intermediate steps.
pub fn is_thinking(messages: &[Message]) -> bool {
    messages
        .last()
        .is_some_and(|message| message.role == Role::Agent && message.is_final == Some(false))
}

pub fn show_indicator(messages: &[Message], loading: bool) -> bool {
    loading || is_thinking(messages)
}

pub fn thinking_phrase(tick: usize) -> &'static str {
    THINKING_PHRASES[tick.wrapping_mul(PHRASE_STRIDE) % THINKING_PHRASES.len()]
}

/// Optimistic loading flag raised when a user message goes out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AwaitingReply {
    pending: Option<(SessionId, DateTime<Utc>)>,
}

impl AwaitingReply {
    /// Stored timestamps have millisecond precision, so the send instant is truncated to match.
    pub fn start(&mut self, session_id: SessionId, now: DateTime<Utc>) {
        self.pending = Some((session_id, now.trunc_subsecs(3)));
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.pending.map(|(session_id, _)| session_id)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.pending.map(|(_, since)| since)
    }

    /// Without a timeout the flag never expires on its own.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Option<Duration>) -> bool {
        match (self.pending, timeout) {
            (Some((_, since)), Some(timeout)) => (now - since)
                .to_std()
                .is_ok_and(|waited| waited >= timeout),
            _ => false,
        }
    }

    /// Reconciles the flag with a transcript loaded from the store: a trailing user message
    /// means a reply is outstanding, a trailing agent message written after the flag was raised
    /// means it arrived. An empty transcript changes nothing.
    pub fn sync_with_transcript(
        &mut self,
        session_id: SessionId,
        messages: &[Message],
        now: DateTime<Utc>,
    ) {
        if self.session_id().is_some_and(|pending| pending != session_id) {
            self.clear();
        }

        let Some(last) = messages.last() else {
            return;
        };
        match last.role {
            Role::User => {
                if !self.is_active() {
                    self.start(session_id, now);
                }
            }
            Role::Agent => {
                if self.since().is_some_and(|since| since <= last.created_at) {
                    self.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::chat::message::datetime_from_unix_millis;

    fn session() -> SessionId {
        SessionId::new_v7()
    }

    #[test]
    fn thinking_requires_trailing_intermediate_agent_message() {
        let id = session();
        assert!(!is_thinking(&[]));
        assert!(is_thinking(&[
            Message::agent(id, 1, "a", Some(false)),
            Message::agent(id, 2, "b", Some(false)),
        ]));
        assert!(!is_thinking(&[
            Message::user(id, 1, "hi"),
            Message::agent(id, 2, "hello", Some(true)),
        ]));
        assert!(!is_thinking(&[Message::agent(id, 1, "hello", None)]));
        assert!(!is_thinking(&[
            Message::agent(id, 1, "step", Some(false)),
            Message::user(id, 2, "hurry"),
        ]));
    }

    #[test]
    fn indicator_covers_loading_and_thinking() {
        let id = session();
        let answered = [Message::user(id, 1, "hi"), Message::agent(id, 2, "yo", None)];
        assert!(!show_indicator(&answered, false));
        assert!(show_indicator(&answered, true));
        assert!(show_indicator(
            &[Message::agent(id, 1, "step", Some(false))],
            false
        ));
    }

    #[test]
    fn phrases_cycle_through_every_entry() {
        let seen = (0..THINKING_PHRASES.len())
            .map(thinking_phrase)
            .collect::<HashSet<_>>();
        assert_eq!(seen.len(), THINKING_PHRASES.len());
        assert_eq!(thinking_phrase(0), "Frolicking");
        assert_eq!(thinking_phrase(THINKING_PHRASES.len()), "Frolicking");
    }

    #[test]
    fn awaiting_reply_has_no_timeout_by_default() {
        let mut awaiting = AwaitingReply::default();
        let sent = Utc::now();
        awaiting.start(session(), sent);

        let much_later = sent + chrono::Duration::hours(24);
        assert!(!awaiting.is_expired(much_later, None));
        assert!(awaiting.is_expired(much_later, Some(Duration::from_secs(60))));
        assert!(!awaiting.is_expired(sent, Some(Duration::from_secs(60))));
    }

    #[test]
    fn transcript_sync_follows_the_last_message() {
        let id = session();
        let loaded = Utc::now().trunc_subsecs(3);
        let mut awaiting = AwaitingReply::default();

        awaiting.sync_with_transcript(id, &[Message::user(id, 1, "hi")], loaded);
        assert_eq!(awaiting.session_id(), Some(id));
        assert_eq!(awaiting.since(), Some(loaded));

        let later = loaded + chrono::Duration::seconds(5);
        awaiting.sync_with_transcript(id, &[Message::user(id, 1, "hi")], later);
        assert_eq!(awaiting.since(), Some(loaded));

        let mut step = Message::agent(id, 2, "step", Some(false));
        step.created_at = later;
        awaiting.sync_with_transcript(id, &[Message::user(id, 1, "hi"), step], later);
        assert!(!awaiting.is_active());
    }

    #[test]
    fn replies_older_than_the_send_keep_the_flag() {
        let id = session();
        let sent = Utc::now();
        let mut awaiting = AwaitingReply::default();
        awaiting.start(id, sent);

        awaiting.sync_with_transcript(id, &[], sent);
        assert!(awaiting.is_active());

        let mut old_reply = Message::agent(id, 1, "old", None);
        old_reply.created_at = sent - chrono::Duration::minutes(3);
        awaiting.sync_with_transcript(id, &[old_reply], sent);
        assert!(awaiting.is_active());

        let mut new_reply = Message::agent(id, 2, "new", None);
        new_reply.created_at = sent + chrono::Duration::milliseconds(800);
        awaiting.sync_with_transcript(id, &[new_reply], sent);
        assert!(!awaiting.is_active());
    }

    #[test]
    fn reply_stored_in_the_same_millisecond_clears_the_flag() {
        let id = session();
        let sent = DateTime::from_timestamp(1_714_555_800, 123_456_789).unwrap();
        let mut awaiting = AwaitingReply::default();
        awaiting.start(id, sent);
        assert_eq!(awaiting.since().unwrap().timestamp_millis(), 1_714_555_800_123);

        let mut reply = Message::agent(id, 1, "done", Some(true));
        reply.created_at = datetime_from_unix_millis(1_714_555_800_123);
        awaiting.sync_with_transcript(id, &[reply], sent);
        assert!(!awaiting.is_active());
    }

    #[test]
    fn switching_sessions_drops_the_flag() {
        let first = session();
        let second = session();
        let now = Utc::now();
        let mut awaiting = AwaitingReply::default();
        awaiting.start(first, now);

        awaiting.sync_with_transcript(second, &[], now);
        assert!(!awaiting.is_active());
    }
}
