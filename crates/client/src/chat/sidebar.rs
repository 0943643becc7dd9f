use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::chat::message::{Session, SessionId};

pub const EMPTY_SESSIONS_LABEL: &str = "No conversations yet";

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;
const RECENT_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionListItem {
    pub id: SessionId,
    pub title: String,
    pub date_label: String,
    pub is_active: bool,
}

/// Builds sidebar rows in the order the store returned them (most recently updated first).
pub fn session_list_items(
    sessions: &[Session],
    active_session_id: Option<SessionId>,
    now: DateTime<Utc>,
) -> Vec<SessionListItem> {
    sessions
        .iter()
        .map(|session| SessionListItem {
            id: session.id,
            title: session.title.clone(),
            date_label: relative_date_label(session.updated_at, now, &Local),
            is_active: Some(session.id) == active_session_id,
        })
        .collect()
}

/// Older dates are shown as a calendar day in `zone`.
pub fn relative_date_label<Tz>(updated_at: DateTime<Utc>, now: DateTime<Utc>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    // Elapsed-time buckets; timestamps from the future count as today.
    let age_days = (now - updated_at).num_milliseconds().max(0) / DAY_MILLIS;

    match age_days {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        days if days < RECENT_DAYS => format!("{days} days ago"),
        _ => updated_at.with_timezone(zone).format("%b %-d").to_string(),
    }
}
