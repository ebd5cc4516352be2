//! CRUD operations for [`Group`] records and their membership.

use std::collections::BTreeSet;

use parley_shared::models::Group;
use parley_shared::types::{ChannelId, Identity};
use rusqlite::params;

use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};

/// Outcome of deleting a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupRemoval {
    /// Whether the group row existed and was deleted.
    pub group_removed: bool,
    /// Number of messages addressed to the group that were deleted.
    pub messages_removed: usize,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a group together with its membership rows.
    pub fn insert_group(&mut self, group: &Group) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO groups (id, name, creator, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                group.creator.as_str(),
                encode_ts(&group.created_at),
            ],
        )?;

        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO group_members (group_id, member) VALUES (?1, ?2)")?;
            for member in &group.members {
                stmt.execute(params![group.id.to_string(), member.as_str()])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single group by id.
    pub fn get_group(&self, id: ChannelId) -> Result<Group> {
        let (name, creator, created_str): (String, String, String) = self
            .conn()
            .query_row(
                "SELECT name, creator, created_at FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Group {
            id,
            name,
            creator: Identity(creator),
            members: self.group_members(id)?,
            created_at: decode_ts(2, &created_str)?,
        })
    }

    /// List every group `identity` belongs to, oldest first.
    pub fn list_groups_for_member(&self, identity: &Identity) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.creator, g.created_at
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.member = ?1
             ORDER BY g.created_at ASC",
        )?;

        let rows = stmt.query_map(params![identity.as_str()], |row| {
            let id_str: String = row.get(0)?;
            let name: String = row.get(1)?;
            let creator: String = row.get(2)?;
            let created_str: String = row.get(3)?;
            Ok((
                ChannelId(decode_uuid(0, &id_str)?),
                name,
                Identity(creator),
                decode_ts(3, &created_str)?,
            ))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (id, name, creator, created_at) = row?;
            groups.push(Group {
                id,
                name,
                creator,
                members: self.group_members(id)?,
                created_at,
            });
        }
        Ok(groups)
    }

    fn group_members(&self, id: ChannelId) -> Result<BTreeSet<Identity>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT member FROM group_members WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;

        let mut members = BTreeSet::new();
        for row in rows {
            members.insert(Identity(row?));
        }
        Ok(members)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group, its membership and every message addressed to it.
    pub fn delete_group(&mut self, id: ChannelId) -> Result<GroupRemoval> {
        let id_str = id.to_string();
        let tx = self.conn_mut().transaction()?;

        let messages = tx.execute(
            "DELETE FROM messages WHERE is_group = 1 AND target = ?1",
            params![id_str],
        )?;

        // ON DELETE CASCADE: group_members go with it
        let groups = tx.execute("DELETE FROM groups WHERE id = ?1", params![id_str])?;

        tx.commit()?;

        Ok(GroupRemoval {
            group_removed: groups > 0,
            messages_removed: messages,
        })
    }
}
