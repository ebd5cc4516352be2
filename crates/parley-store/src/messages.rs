use parley_shared::models::Message;
use parley_shared::types::{ChannelId, Identity, MessageId};
use rusqlite::params;

use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::Result;

const SELECT_COLUMNS: &str = "SELECT id, sender, target, content, timestamp, is_group FROM messages";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender, target, content, timestamp, is_group)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.from.as_str(),
                message.to,
                message.content,
                encode_ts(&message.timestamp),
                message.is_group,
            ],
        )?;
        Ok(())
    }

    /// Store a group message only if its channel still exists. Returns
    /// `false`, with nothing written, when the channel is gone.
    pub fn insert_group_message(&self, message: &Message) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT INTO messages (id, sender, target, content, timestamp, is_group)
             SELECT ?1, ?2, ?3, ?4, ?5, 1
             WHERE EXISTS (SELECT 1 FROM groups WHERE id = ?3)",
            params![
                message.id.to_string(),
                message.from.as_str(),
                message.to,
                message.content,
                encode_ts(&message.timestamp),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Direct messages exchanged between `a` and `b`, in either direction,
    /// oldest first. Ties keep insertion order.
    pub fn direct_history(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE is_group = 0
               AND ((sender = ?1 AND target = ?2) OR (sender = ?2 AND target = ?1))
             ORDER BY timestamp ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages addressed to a group, oldest first.
    pub fn group_history(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE is_group = 1 AND target = ?1
             ORDER BY timestamp ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![channel_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    #[cfg(test)]
    pub(crate) fn count_messages(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let target: String = row.get(2)?;
    let content: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let is_group: bool = row.get(5)?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        from: Identity(sender),
        to: target,
        content,
        timestamp: decode_ts(4, &ts_str)?,
        is_group,
    })
}
