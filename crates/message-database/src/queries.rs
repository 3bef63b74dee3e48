//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside [`crate::AsyncDatabase::call`] or against a plain connection in tests.

use crate::{DatabaseError, DatabaseResult, Message, NewMessage, MAX_CONTENT_LEN};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

const MESSAGE_COLUMNS: &str =
    "id, recipient, content, sent, sent_at, message_id, created_at, updated_at";

/// Insert a new pending message.
pub fn insert_message(conn: &Connection, message: &NewMessage) -> DatabaseResult<Message> {
    if message.to.is_empty() {
        return Err(DatabaseError::InvalidData(
            "recipient cannot be empty".to_string(),
        ));
    }
    if message.content.chars().count() > MAX_CONTENT_LEN {
        return Err(DatabaseError::InvalidData(format!(
            "content exceeds {} characters",
            MAX_CONTENT_LEN
        )));
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (recipient, content, sent, message_id, created_at, updated_at)
         VALUES (?1, ?2, 0, '', ?3, ?3)",
        params![message.to, message.content, now],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, to = %message.to, "Inserted message");

    get_message(conn, id)?
        .ok_or_else(|| DatabaseError::NotFound("Message not found after insert".to_string()))
}

/// Get a message by ID.
pub fn get_message(conn: &Connection, id: i64) -> DatabaseResult<Option<Message>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM messages WHERE id = ?1",
        MESSAGE_COLUMNS
    ))?;

    let result = stmt.query_row(params![id], map_message);
    match result {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch up to `limit` unsent messages, oldest first.
pub fn fetch_pending(conn: &Connection, limit: usize) -> DatabaseResult<Vec<Message>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM messages WHERE sent = 0 ORDER BY id ASC LIMIT ?1",
        MESSAGE_COLUMNS
    ))?;

    let messages = stmt
        .query_map(params![limit], map_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Fetch every message marked as sent.
pub fn fetch_sent(conn: &Connection) -> DatabaseResult<Vec<Message>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM messages WHERE sent = 1 ORDER BY id ASC",
        MESSAGE_COLUMNS
    ))?;

    let messages = stmt
        .query_map([], map_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Persist the mutable fields of a message and bump `updated_at`.
pub fn save_message(conn: &Connection, message: &Message) -> DatabaseResult<()> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE messages
         SET recipient = ?1, content = ?2, sent = ?3, sent_at = ?4, message_id = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            message.to,
            message.content,
            message.sent,
            message.sent_at.map(|t| t.to_rfc3339()),
            message.message_id,
            now,
            message.id,
        ],
    )?;

    if updated == 0 {
        return Err(DatabaseError::NotFound(format!("Message {}", message.id)));
    }
    debug!(id = message.id, sent = message.sent, "Saved message");
    Ok(())
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        to: row.get(1)?,
        content: row.get(2)?,
        sent: row.get(3)?,
        sent_at: row.get::<_, Option<String>>(4)?.map(parse_datetime),
        message_id: row.get(5)?,
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
