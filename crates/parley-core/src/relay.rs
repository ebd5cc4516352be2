//! The relay facade: what a transport talks to.
//!
//! A transport opens a connection, feeds it [`ClientEvent`]s and forwards
//! whatever arrives on the returned receiver. Failures are reported to the
//! originating connection only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parley_shared::models::{Contact, Group, Message, Snapshot};
use parley_shared::protocol::{ClientEvent, GroupError, OperationError, SendMessage, ServerEvent};
use parley_shared::types::{ChannelId, ConnectionId, Identity};
use parley_store::ContactRemoval;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::connection::ConnectionHandle;
use crate::contacts::ContactSync;
use crate::error::{RelayError, Result};
use crate::gateway::Gateway;
use crate::membership::ChannelMembership;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;

/// Cheaply clonable handle to the relay core.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

struct Inner {
    presence: Arc<PresenceRegistry>,
    membership: Arc<ChannelMembership>,
    contacts: ContactSync,
    router: MessageRouter,
    next_connection: AtomicU64,
}

impl Relay {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let membership = Arc::new(ChannelMembership::new(gateway.clone(), presence.clone()));
        let contacts = ContactSync::new(gateway.clone(), presence.clone());
        let router = MessageRouter::new(gateway, presence.clone(), membership.clone());

        Self {
            inner: Arc::new(Inner {
                presence,
                membership,
                contacts,
                router,
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub fn membership(&self) -> &ChannelMembership {
        &self.inner.membership
    }

    pub fn online_count(&self) -> usize {
        self.inner.presence.online_count()
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Allocate a connection with an outbound queue of `capacity` events.
    pub fn open_connection(&self, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        ConnectionHandle::channel(id, capacity)
    }

    /// Bind `conn` to `identity`, restore its channel subscriptions and send
    /// it a snapshot.
    pub async fn identify(&self, conn: &ConnectionHandle, identity: Identity) -> Result<()> {
        if identity.is_blank() {
            return Err(RelayError::BadRequest("identity must not be empty".into()));
        }

        // A connection switching identity keeps nothing from the old one.
        if let Some(previous) = self.inner.presence.identity_of(conn.id()) {
            if previous != identity {
                self.inner.membership.unsubscribe_connection(conn.id());
            }
        }

        if let Some(displaced) = self.inner.presence.bind(identity.clone(), conn.clone()) {
            self.inner.membership.unsubscribe_connection(displaced.id());
        }

        let channels = self
            .inner
            .membership
            .subscribe_on_connect(&identity, conn)
            .await?;
        self.inner.contacts.push_snapshot(&identity).await?;

        info!(identity = %identity, conn = %conn.id(), channels, "identified");
        Ok(())
    }

    /// Tear down everything the relay holds for a connection. Safe to call
    /// for connections that never identified or were already replaced.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Option<Identity> {
        let identity = self.inner.presence.unbind(conn_id);
        let dropped = self.inner.membership.unsubscribe_connection(conn_id);

        match &identity {
            Some(identity) => info!(identity = %identity, conn = %conn_id, subscriptions = dropped, "disconnected"),
            None => debug!(conn = %conn_id, "anonymous connection closed"),
        }
        identity
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    /// Handle one inbound event from `conn`.
    ///
    /// Any failure is answered on `conn` with `group-error` for group
    /// operations and `error` for everything else.
    pub async fn handle_event(&self, conn: &ConnectionHandle, event: ClientEvent) {
        let operation = event.name();
        let group_operation = matches!(
            &event,
            ClientEvent::CreateGroup(_)
                | ClientEvent::DeleteGroup(_)
                | ClientEvent::SendMessage(SendMessage { is_group: true, .. })
        );

        let result = match event {
            ClientEvent::Identify(identity) => self.identify(conn, identity).await,
            ClientEvent::RequestContacts(identity) => self.request_contacts(&identity).await,
            ClientEvent::AcceptInvite(req) => self
                .accept_invite(req.from, req.to, req.display_name, &req.invite_code)
                .await
                .map(drop),
            ClientEvent::CreateGroup(req) => self
                .create_group(req.creator, &req.name, req.members)
                .await
                .map(drop),
            ClientEvent::DeleteGroup(req) => self
                .delete_group(req.channel_id, &req.identity)
                .await
                .map(drop),
            ClientEvent::SendMessage(req) => self.send_message(req).await.map(drop),
            ClientEvent::DeleteContact(req) => self
                .delete_contact(&req.identity, &req.peer)
                .await
                .map(drop),
        };

        if let Err(e) = result {
            match &e {
                RelayError::Persistence(inner) => {
                    error!(conn = %conn.id(), operation, error = %inner, "operation failed");
                }
                other => debug!(conn = %conn.id(), operation, error = %other, "operation rejected"),
            }

            let reply = if group_operation {
                ServerEvent::GroupError(GroupError {
                    error: e.client_message(),
                })
            } else {
                ServerEvent::Error(OperationError {
                    operation: operation.to_string(),
                    error: e.client_message(),
                })
            };
            conn.send(reply);
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub async fn request_contacts(&self, identity: &Identity) -> Result<()> {
        self.inner.contacts.push_snapshot(identity).await.map(drop)
    }

    pub async fn snapshot(&self, identity: &Identity) -> Result<Snapshot> {
        self.inner.contacts.build_snapshot(identity).await
    }

    /// Establish a contact and refresh both sides.
    pub async fn accept_invite(
        &self,
        from: Identity,
        to: Identity,
        display_name: Option<String>,
        invite_code: &str,
    ) -> Result<Contact> {
        let contact = self
            .inner
            .contacts
            .accept_invite(from, to, display_name, invite_code)
            .await?;
        self.inner
            .contacts
            .push_snapshot_to_many(contact.peers.clone())
            .await;
        Ok(contact)
    }

    pub async fn delete_contact(&self, identity: &Identity, peer: &Identity) -> Result<ContactRemoval> {
        self.inner.contacts.delete_contact(identity, peer).await
    }

    /// Create a group, announce it to live members and refresh their
    /// snapshots.
    pub async fn create_group(
        &self,
        creator: Identity,
        name: &str,
        members: Vec<Identity>,
    ) -> Result<Group> {
        let group = self
            .inner
            .membership
            .create_channel(creator, name, members)
            .await?;

        let event = ServerEvent::GroupCreated(group.view());
        for member in &group.members {
            if let Some(conn) = self.inner.presence.lookup(member) {
                conn.send(event.clone());
            }
        }

        self.inner
            .contacts
            .push_snapshot_to_many(group.members.iter().cloned())
            .await;
        Ok(group)
    }

    pub async fn delete_group(&self, channel_id: ChannelId, requester: &Identity) -> Result<Group> {
        let group = self
            .inner
            .membership
            .delete_channel(channel_id, requester)
            .await?;

        self.inner
            .contacts
            .push_snapshot_to_many(group.members.iter().cloned())
            .await;
        Ok(group)
    }

    /// Route a `send-message` payload as a direct or group message.
    pub async fn send_message(&self, req: SendMessage) -> Result<Message> {
        if req.is_group {
            let channel_id: ChannelId = req
                .to
                .parse()
                .map_err(|_| RelayError::BadRequest(format!("invalid group id: {}", req.to)))?;
            self.inner
                .router
                .send_group(req.from, channel_id, req.content)
                .await
        } else {
            self.inner
                .router
                .send_direct(req.from, Identity::new(req.to), req.content)
                .await
        }
    }

    pub async fn history(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>> {
        self.inner.router.fetch_history(a, b).await
    }

    pub async fn group_history(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        self.inner.router.fetch_group_history(channel_id).await
    }
}
