//! Channel membership and live subscriptions.
//!
//! Group membership is durable and owned by the gateway. What lives here is
//! a cache of which live connections should receive a channel's traffic. It
//! decides delivery targets only; membership questions always go back to
//! the gateway.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parley_shared::constants::{MAX_GROUP_MEMBERS, MAX_GROUP_NAME_LEN};
use parley_shared::models::Group;
use parley_shared::protocol::{GroupDeleted, ServerEvent};
use parley_shared::types::{ChannelId, ConnectionId, Identity};
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::{RelayError, Result};
use crate::gateway::Gateway;
use crate::presence::PresenceRegistry;

pub struct ChannelMembership {
    gateway: Arc<dyn Gateway>,
    presence: Arc<PresenceRegistry>,
    subscriptions: DashMap<ChannelId, HashMap<ConnectionId, ConnectionHandle>>,
    /// Bumped by every channel deletion, after the store delete and before
    /// the subscriptions are dropped.
    deletions: AtomicU64,
}

impl ChannelMembership {
    pub fn new(gateway: Arc<dyn Gateway>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            gateway,
            presence,
            subscriptions: DashMap::new(),
            deletions: AtomicU64::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Channel lifecycle
    // ------------------------------------------------------------------

    /// Persist a new channel and subscribe every live member to it.
    ///
    /// The creator is always a member; duplicates collapse.
    pub async fn create_channel(
        &self,
        creator: Identity,
        name: &str,
        members: Vec<Identity>,
    ) -> Result<Group> {
        if creator.is_blank() {
            return Err(RelayError::BadRequest("creator must not be empty".into()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(RelayError::BadRequest("group name must not be empty".into()));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(RelayError::BadRequest(format!(
                "group name exceeds {MAX_GROUP_NAME_LEN} characters"
            )));
        }
        if members.iter().any(Identity::is_blank) {
            return Err(RelayError::BadRequest("member must not be empty".into()));
        }

        let group = Group::new(creator, name, members);
        if group.members.len() > MAX_GROUP_MEMBERS {
            return Err(RelayError::BadRequest(format!(
                "group exceeds {MAX_GROUP_MEMBERS} members"
            )));
        }

        let group = self.gateway.create_group(group).await?;

        let mut live = 0;
        for member in &group.members {
            if let Some(conn) = self.presence.lookup(member) {
                self.subscribe(group.id, conn);
                live += 1;
            }
        }

        info!(
            channel = %group.id,
            creator = %group.creator,
            members = group.members.len(),
            live,
            "group created"
        );
        Ok(group)
    }

    /// Delete a channel. Only its creator may do so.
    ///
    /// Every member with a live connection gets `group-deleted`, whether or
    /// not that connection was subscribed. Returns the deleted record.
    pub async fn delete_channel(&self, channel_id: ChannelId, requester: &Identity) -> Result<Group> {
        let group = self
            .gateway
            .find_group(channel_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("group {channel_id}")))?;

        if &group.creator != requester {
            return Err(RelayError::Forbidden(
                "only the group creator can delete it".into(),
            ));
        }

        let removal = self.gateway.delete_group(channel_id).await?;
        self.deletions.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.remove(&channel_id);

        let event = ServerEvent::GroupDeleted(GroupDeleted { channel_id });
        for member in &group.members {
            if let Some(conn) = self.presence.lookup(member) {
                conn.send(event.clone());
            }
        }

        info!(
            channel = %channel_id,
            by = %requester,
            messages = removal.messages_removed,
            "group deleted"
        );
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe a freshly bound connection to every channel its identity
    /// belongs to.
    ///
    /// Nothing is left installed if the connection lost its binding while
    /// this ran, and channels deleted meanwhile are dropped again. Returns
    /// the number of channels subscribed.
    pub async fn subscribe_on_connect(
        &self,
        identity: &Identity,
        conn: &ConnectionHandle,
    ) -> Result<usize> {
        let epoch = self.deletions.load(Ordering::SeqCst);
        let groups = self.gateway.groups_for(identity).await?;

        if !self.presence.is_bound(identity, conn.id()) {
            debug!(identity = %identity, conn = %conn.id(), "binding gone before subscribe");
            return Ok(0);
        }

        for group in &groups {
            self.subscribe(group.id, conn.clone());
        }

        // disconnect unbinds before it unsubscribes
        if !self.presence.is_bound(identity, conn.id()) {
            self.unsubscribe_connection(conn.id());
            debug!(identity = %identity, conn = %conn.id(), "binding gone while subscribing");
            return Ok(0);
        }

        if self.deletions.load(Ordering::SeqCst) == epoch {
            return Ok(groups.len());
        }

        let current: HashSet<ChannelId> = match self.gateway.groups_for(identity).await {
            Ok(current) => current.into_iter().map(|g| g.id).collect(),
            Err(e) => {
                self.unsubscribe_connection(conn.id());
                return Err(e.into());
            }
        };

        let mut subscribed = 0;
        for group in &groups {
            if current.contains(&group.id) {
                subscribed += 1;
            } else {
                self.unsubscribe(group.id, conn.id());
                debug!(channel = %group.id, conn = %conn.id(), "channel deleted while subscribing");
            }
        }
        Ok(subscribed)
    }

    pub fn subscribe(&self, channel_id: ChannelId, conn: ConnectionHandle) {
        self.subscriptions
            .entry(channel_id)
            .or_default()
            .insert(conn.id(), conn);
    }

    fn unsubscribe(&self, channel_id: ChannelId, conn_id: ConnectionId) {
        self.subscriptions.remove_if_mut(&channel_id, |_, subs| {
            subs.remove(&conn_id);
            subs.is_empty()
        });
    }

    /// Drop every subscription held by a connection. Returns how many were
    /// removed.
    pub fn unsubscribe_connection(&self, conn_id: ConnectionId) -> usize {
        let mut removed = 0;
        self.subscriptions.retain(|_, subs| {
            if subs.remove(&conn_id).is_some() {
                removed += 1;
            }
            !subs.is_empty()
        });
        removed
    }

    pub fn subscribers(&self, channel_id: ChannelId) -> Vec<ConnectionHandle> {
        self.subscriptions
            .get(&channel_id)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, channel_id: ChannelId, conn_id: ConnectionId) -> bool {
        self.subscriptions
            .get(&channel_id)
            .is_some_and(|subs| subs.contains_key(&conn_id))
    }

    /// Send `event` to every connection subscribed to a channel, pruning
    /// connections whose transport is gone. Returns the number of
    /// connections the event was queued on.
    pub fn fanout(&self, channel_id: ChannelId, event: &ServerEvent) -> usize {
        let Some(mut subs) = self.subscriptions.get_mut(&channel_id) else {
            return 0;
        };

        subs.retain(|_, conn| !conn.is_closed());
        subs.values()
            .filter(|conn| conn.send(event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, Harness};

    fn group_ids(events: &[ServerEvent]) -> Vec<ChannelId> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::GroupDeleted(d) => Some(d.channel_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_includes_creator_and_subscribes_live_members() {
        let h = Harness::new();
        let (a, _rx_a) = h.online("A");
        let (b, _rx_b) = h.online("B");

        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["A".into(), "B".into(), "C".into()])
            .await
            .unwrap();

        let members: Vec<&str> = group.members.iter().map(Identity::as_str).collect();
        assert_eq!(members, ["A", "B", "C"]);
        assert!(h.membership.is_subscribed(group.id, a.id()));
        assert!(h.membership.is_subscribed(group.id, b.id()));
        assert_eq!(h.membership.subscribers(group.id).len(), 2);
    }

    #[tokio::test]
    async fn test_create_adds_missing_creator() {
        let h = Harness::new();
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into()])
            .await
            .unwrap();
        assert!(group.is_member(&"A".into()));
        assert_eq!(group.members.len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let h = Harness::new();
        let blank_name = h
            .membership
            .create_channel("A".into(), "   ", Vec::new())
            .await;
        assert!(matches!(blank_name, Err(RelayError::BadRequest(_))));

        let long_name = "x".repeat(MAX_GROUP_NAME_LEN + 1);
        let too_long = h
            .membership
            .create_channel("A".into(), &long_name, Vec::new())
            .await;
        assert!(matches!(too_long, Err(RelayError::BadRequest(_))));

        let too_many: Vec<Identity> = (0..MAX_GROUP_MEMBERS)
            .map(|i| Identity::new(format!("user-{i}")))
            .collect();
        let crowded = h.membership.create_channel("A".into(), "Big", too_many).await;
        assert!(matches!(crowded, Err(RelayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_is_creator_only() {
        let h = Harness::new();
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into()])
            .await
            .unwrap();

        let err = h
            .membership
            .delete_channel(group.id, &"B".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Forbidden(_)));

        let missing = h
            .membership
            .delete_channel(ChannelId::new(), &"A".into())
            .await
            .unwrap_err();
        assert!(matches!(missing, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_notifies_members_regardless_of_subscription() {
        let h = Harness::new();
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into(), "C".into()])
            .await
            .unwrap();

        // B connects after creation and never runs subscribe_on_connect
        let (b, mut rx_b) = h.online("B");
        let (_a, mut rx_a) = h.online("A");
        assert!(!h.membership.is_subscribed(group.id, b.id()));

        h.membership
            .delete_channel(group.id, &"A".into())
            .await
            .unwrap();

        assert_eq!(group_ids(&drain(&mut rx_a)), vec![group.id]);
        assert_eq!(group_ids(&drain(&mut rx_b)), vec![group.id]);
        assert!(h.membership.subscribers(group.id).is_empty());
        assert!(h.gateway.find_group(group.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_on_connect_restores_channels() {
        let h = Harness::new();
        let first = h
            .membership
            .create_channel("A".into(), "One", vec!["B".into()])
            .await
            .unwrap();
        let second = h
            .membership
            .create_channel("C".into(), "Two", vec!["B".into()])
            .await
            .unwrap();

        let (b, _rx) = h.online("B");
        let count = h
            .membership
            .subscribe_on_connect(&"B".into(), &b)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert!(h.membership.is_subscribed(first.id, b.id()));
        assert!(h.membership.is_subscribed(second.id, b.id()));
    }

    #[tokio::test]
    async fn test_subscribe_on_connect_skips_unbound_connection() {
        let h = Harness::new();
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into()])
            .await
            .unwrap();

        let (b, _rx) = h.online("B");
        h.presence.unbind(b.id());

        let count = h
            .membership
            .subscribe_on_connect(&"B".into(), &b)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(!h.membership.is_subscribed(group.id, b.id()));
    }

    #[tokio::test]
    async fn test_subscribe_on_connect_drops_channel_deleted_meanwhile() {
        let h = Harness::scripted();
        let doomed = h
            .membership
            .create_channel("A".into(), "Doomed", vec!["B".into()])
            .await
            .unwrap();
        let kept = h
            .membership
            .create_channel("C".into(), "Kept", vec!["B".into()])
            .await
            .unwrap();
        let (b, _rx) = h.online("B");

        // The delete commits after B's membership query was answered
        let membership = h.membership.clone();
        let doomed_id = doomed.id;
        h.after_next_groups_for(async move {
            membership
                .delete_channel(doomed_id, &"A".into())
                .await
                .unwrap();
        });

        let count = h
            .membership
            .subscribe_on_connect(&"B".into(), &b)
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert!(h.membership.is_subscribed(kept.id, b.id()));
        assert!(!h.membership.is_subscribed(doomed.id, b.id()));
        assert!(h.membership.subscribers(doomed.id).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_on_connect_leaves_nothing_after_disconnect() {
        let h = Harness::scripted();
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into()])
            .await
            .unwrap();
        let (b, _rx) = h.online("B");

        let presence = h.presence.clone();
        let membership = h.membership.clone();
        let conn_id = b.id();
        h.after_next_groups_for(async move {
            presence.unbind(conn_id);
            membership.unsubscribe_connection(conn_id);
        });

        let count = h
            .membership
            .subscribe_on_connect(&"B".into(), &b)
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(h.membership.subscribers(group.id).is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_connection_and_fanout_pruning() {
        let h = Harness::new();
        let (a, _rx_a) = h.online("A");
        let (b, rx_b) = h.online("B");
        let group = h
            .membership
            .create_channel("A".into(), "Team", vec!["B".into()])
            .await
            .unwrap();

        drop(rx_b);
        let event = ServerEvent::GroupDeleted(GroupDeleted {
            channel_id: group.id,
        });
        assert_eq!(h.membership.fanout(group.id, &event), 1);
        assert!(!h.membership.is_subscribed(group.id, b.id()));

        assert_eq!(h.membership.unsubscribe_connection(a.id()), 1);
        assert!(h.membership.subscribers(group.id).is_empty());
        assert_eq!(h.membership.fanout(group.id, &event), 0);
    }
}
