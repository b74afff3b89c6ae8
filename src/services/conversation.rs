use chrono::{DateTime, Duration, Utc};

use crate::api::{RemoteMessage, RemoteSession};
use crate::models::{parse_server_timestamp, Message, MessageId, Sender, SessionSummary};
use crate::services::markdown::strip_emphasis;

const EMPTY_PREVIEW: &str = "New conversation";

/// Turn server records into messages sorted oldest-first.
///
/// Endpoints disagree on whether they return records newest-first or
/// oldest-first, so input order is never trusted. A record without a usable
/// timestamp is placed 1 ms per position after the nearest earlier record that
/// has one (or before the nearest later one), which keeps it where the server
/// put it. Only when no record has a timestamp does `received_at` anchor the
/// list. Ties sort the user before the bot, then by record id.
pub fn normalize_history(records: Vec<RemoteMessage>, received_at: DateTime<Utc>) -> Vec<Message> {
    let parsed: Vec<Option<DateTime<Utc>>> = records
        .iter()
        .map(|r| r.timestamp.as_deref().and_then(parse_server_timestamp))
        .collect();
    let times = fill_missing_timestamps(&parsed, received_at);

    let mut keyed: Vec<_> = records
        .into_iter()
        .zip(times)
        .enumerate()
        .map(|(index, (record, created_at))| {
            let sender = Sender::from_wire(&record.sender);
            let key = (created_at, !sender.is_user(), record.id.clone());
            (key, to_message(index, record, sender, created_at))
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, message)| message).collect()
}

fn fill_missing_timestamps(
    parsed: &[Option<DateTime<Utc>>],
    received_at: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let offset = |distance: usize| Duration::milliseconds(distance as i64);

    (0..parsed.len())
        .map(|index| {
            if let Some(time) = parsed[index] {
                return time;
            }
            let before = parsed[..index]
                .iter()
                .enumerate()
                .rev()
                .find_map(|(i, t)| t.map(|t| (i, t)));
            let after = parsed[index + 1..]
                .iter()
                .enumerate()
                .find_map(|(i, t)| t.map(|t| (index + 1 + i, t)));

            match (before, after) {
                (Some((i, time)), _) => time + offset(index - i),
                (None, Some((i, time))) => time - offset(i - index),
                (None, None) => received_at + offset(index),
            }
        })
        .collect()
}

fn to_message(
    index: usize,
    record: RemoteMessage,
    sender: Sender,
    created_at: DateTime<Utc>,
) -> Message {
    let record_id = match &record.id {
        Some(id) => id.to_string(),
        None => format!("idx{}", index),
    };
    let text = if sender.is_user() {
        record.message
    } else {
        strip_emphasis(&record.message)
    };

    Message::new(MessageId::server(&record_id, &sender), text, created_at, sender)
}

pub fn summarize(session: &RemoteSession, received_at: DateTime<Utc>) -> SessionSummary {
    let messages = normalize_history(session.messages.clone(), received_at);
    let preview = messages
        .iter()
        .find(|m| m.sender().is_user())
        .or_else(|| messages.first())
        .map(|m| truncate_preview(m.text()))
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string());

    SessionSummary {
        session_id: session.session_id.clone(),
        preview,
        message_count: session.message_count.unwrap_or(messages.len()),
    }
}

/// Truncate text to a short single-line preview.
pub fn truncate_preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.len() > 50 {
        let boundary = first_line
            .char_indices()
            .take_while(|(i, _)| *i < 47)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(47);
        format!("{}...", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}
