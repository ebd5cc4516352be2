//! CRUD operations for [`Contact`] records.

use std::collections::BTreeMap;

use parley_shared::models::{ordered_pair, Contact};
use parley_shared::types::{ContactId, Identity};
use rusqlite::{params, OptionalExtension};

use crate::database::{conversion_failure, decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};

/// Outcome of deleting a contact pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactRemoval {
    /// Whether a contact row existed and was deleted.
    pub contact_removed: bool,
    /// Number of direct messages between the pair that were deleted.
    pub messages_removed: usize,
}

const SELECT_COLUMNS: &str =
    "SELECT id, peer_low, peer_high, invite_code, display_names, created_at FROM contacts";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a contact unless one already exists for the same pair.
    ///
    /// Returns the stored row: the new contact, or the pre-existing one when
    /// the pair was already present.
    pub fn insert_contact(&self, contact: &Contact) -> Result<Contact> {
        let [low, high] = &contact.peers;
        let names = serde_json::to_string(&contact.display_names)?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO contacts
                 (id, peer_low, peer_high, invite_code, display_names, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                contact.id.to_string(),
                low.as_str(),
                high.as_str(),
                contact.invite_code,
                names,
                encode_ts(&contact.created_at),
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(a = %low, b = %high, "contact pair already stored");
        }

        self.find_contact(low, high)?.ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Look up the contact for an unordered pair.
    pub fn find_contact(&self, a: &Identity, b: &Identity) -> Result<Option<Contact>> {
        let [low, high] = ordered_pair(a.clone(), b.clone());

        let contact = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE peer_low = ?1 AND peer_high = ?2"),
                params![low.as_str(), high.as_str()],
                row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    /// List every contact `identity` is part of, oldest first.
    pub fn list_contacts_for(&self, identity: &Identity) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE peer_low = ?1 OR peer_high = ?1
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![identity.as_str()], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete the contact for an unordered pair together with every direct
    /// message exchanged between the two identities.
    pub fn delete_contact(&mut self, a: &Identity, b: &Identity) -> Result<ContactRemoval> {
        let [low, high] = ordered_pair(a.clone(), b.clone());

        let tx = self.conn_mut().transaction()?;

        let contacts = tx.execute(
            "DELETE FROM contacts WHERE peer_low = ?1 AND peer_high = ?2",
            params![low.as_str(), high.as_str()],
        )?;

        let messages = tx.execute(
            "DELETE FROM messages
             WHERE is_group = 0
               AND ((sender = ?1 AND target = ?2) OR (sender = ?2 AND target = ?1))",
            params![low.as_str(), high.as_str()],
        )?;

        tx.commit()?;

        Ok(ContactRemoval {
            contact_removed: contacts > 0,
            messages_removed: messages,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id_str: String = row.get(0)?;
    let low: String = row.get(1)?;
    let high: String = row.get(2)?;
    let invite_code: String = row.get(3)?;
    let names_json: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    let display_names: BTreeMap<Identity, String> =
        serde_json::from_str(&names_json).map_err(|e| conversion_failure(4, e))?;

    Ok(Contact {
        id: ContactId(decode_uuid(0, &id_str)?),
        peers: [Identity(low), Identity(high)],
        invite_code,
        display_names,
        created_at: decode_ts(5, &created_str)?,
    })
}
