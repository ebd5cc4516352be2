//! Durable record models and the projections pushed to clients.
//!
//! Records are owned by the persistence layer; the relay only reads and
//! writes them through its gateway and never caches them beyond a single
//! request/response cycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ContactId, Identity, MessageId};

/// Current time, truncated to the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A mutual-messaging relationship between exactly two identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Unique contact identifier.
    pub id: ContactId,
    /// The two identities, in ascending order.
    pub peers: [Identity; 2],
    /// Invite code that established the relationship.
    pub invite_code: String,
    /// Name each identity displays for its peer, keyed by the viewer.
    pub display_names: BTreeMap<Identity, String>,
    /// When the contact was created.
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// Build a new contact from an accepted invite.
    ///
    /// `display_name` is the name `accepter` chose for `inviter`; the
    /// inviter side starts without a name and falls back to the peer
    /// identity when projected.
    pub fn new(
        accepter: Identity,
        inviter: Identity,
        invite_code: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        let mut display_names = BTreeMap::new();
        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            display_names.insert(accepter.clone(), name.trim().to_string());
        }

        Self {
            id: ContactId::new(),
            peers: ordered_pair(accepter, inviter),
            invite_code: invite_code.into(),
            display_names,
            created_at: now(),
        }
    }

    pub fn involves(&self, identity: &Identity) -> bool {
        self.peers.contains(identity)
    }

    /// The opposite side of the pair, or `None` if `identity` is not a peer.
    pub fn other(&self, identity: &Identity) -> Option<&Identity> {
        match &self.peers {
            [a, b] if a == identity => Some(b),
            [a, b] if b == identity => Some(a),
            _ => None,
        }
    }

    /// Project this contact as seen by `viewer`.
    pub fn view_for(&self, viewer: &Identity) -> Option<ContactView> {
        let other = self.other(viewer)?.clone();
        let display_name = self
            .display_names
            .get(viewer)
            .cloned()
            .unwrap_or_else(|| other.to_string());

        Some(ContactView {
            id: self.id,
            peers: self.peers.clone(),
            other_user: other,
            display_name,
        })
    }
}

/// Sort two identities so an unordered pair has one canonical form.
pub fn ordered_pair(a: Identity, b: Identity) -> [Identity; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Per-viewer projection of a [`Contact`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: ContactId,
    pub peers: [Identity; 2],
    pub other_user: Identity,
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named broadcast group with a membership set fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Channel identifier; also the `to` target of group messages.
    pub id: ChannelId,
    /// Human-readable group name.
    pub name: String,
    /// Identity that created the group (the only one allowed to delete it).
    pub creator: Identity,
    /// Member identities; always contains `creator`.
    pub members: BTreeSet<Identity>,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Build a new group. The creator is always a member and duplicates
    /// in `members` collapse.
    pub fn new(
        creator: Identity,
        name: impl Into<String>,
        members: impl IntoIterator<Item = Identity>,
    ) -> Self {
        let mut members: BTreeSet<Identity> = members.into_iter().collect();
        members.insert(creator.clone());

        Self {
            id: ChannelId::new(),
            name: name.into(),
            creator,
            members,
            created_at: now(),
        }
    }

    pub fn is_member(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn view(&self) -> GroupView {
        GroupView {
            id: self.id,
            name: self.name.clone(),
            creator: self.creator.clone(),
            members: self.members.iter().cloned().collect(),
        }
    }
}

/// Client-facing projection of a [`Group`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: ChannelId,
    pub name: String,
    pub creator: Identity,
    pub members: Vec<Identity>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single persisted chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Sender identity.
    pub from: Identity,
    /// Peer identity for direct messages, channel id for group messages.
    pub to: String,
    /// Plain message content.
    pub content: String,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether `to` names a channel.
    pub is_group: bool,
}

impl Message {
    pub fn direct(from: Identity, to: &Identity, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            from,
            to: to.to_string(),
            content: content.into(),
            timestamp: now(),
            is_group: false,
        }
    }

    pub fn group(from: Identity, channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            from,
            to: channel_id.to_string(),
            content: content.into(),
            timestamp: now(),
            is_group: true,
        }
    }

    /// The target channel of a group message.
    pub fn channel_id(&self) -> Option<ChannelId> {
        if self.is_group {
            self.to.parse().ok()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Combined contacts + groups view pushed to one identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub contacts: Vec<ContactView>,
    pub groups: Vec<GroupView>,
}
