//! Contact establishment and contact/group snapshots.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use parley_shared::models::{Contact, Snapshot};
use parley_shared::protocol::{ContactDeleted, ServerEvent};
use parley_shared::types::Identity;
use parley_store::ContactRemoval;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::gateway::Gateway;
use crate::presence::PresenceRegistry;

pub struct ContactSync {
    gateway: Arc<dyn Gateway>,
    presence: Arc<PresenceRegistry>,
}

impl ContactSync {
    pub fn new(gateway: Arc<dyn Gateway>, presence: Arc<PresenceRegistry>) -> Self {
        Self { gateway, presence }
    }

    /// Establish a contact between `from` (the accepter) and `to` (the
    /// inviter).
    ///
    /// Idempotent per unordered pair: if the contact already exists it is
    /// reused as is. Either way both live sides get `new-contact` with their
    /// own view of it.
    pub async fn accept_invite(
        &self,
        from: Identity,
        to: Identity,
        display_name: Option<String>,
        invite_code: &str,
    ) -> Result<Contact> {
        if from.is_blank() || to.is_blank() {
            return Err(RelayError::BadRequest("identity must not be empty".into()));
        }
        if from == to {
            return Err(RelayError::BadRequest(
                "cannot accept your own invite".into(),
            ));
        }

        let contact = match self.gateway.find_contact(&from, &to).await? {
            Some(existing) => {
                debug!(from = %from, to = %to, contact = %existing.id, "contact already exists");
                existing
            }
            None => {
                let contact = Contact::new(from.clone(), to.clone(), invite_code, display_name);
                let stored = self.gateway.create_contact(contact).await?;
                info!(from = %from, to = %to, contact = %stored.id, "contact created");
                stored
            }
        };

        for side in &contact.peers {
            let Some(view) = contact.view_for(side) else {
                continue;
            };
            if let Some(conn) = self.presence.lookup(side) {
                conn.send(ServerEvent::NewContact(view));
            }
        }

        Ok(contact)
    }

    /// Current contacts and groups of `identity`, as that identity sees
    /// them.
    pub async fn build_snapshot(&self, identity: &Identity) -> Result<Snapshot> {
        let contacts = self.gateway.contacts_for(identity).await?;
        let groups = self.gateway.groups_for(identity).await?;

        Ok(Snapshot {
            contacts: contacts
                .iter()
                .filter_map(|c| c.view_for(identity))
                .collect(),
            groups: groups.iter().map(|g| g.view()).collect(),
        })
    }

    /// Send a fresh snapshot to `identity` if it is online.
    ///
    /// Returns whether a snapshot was queued. Offline identities get nothing;
    /// they receive a snapshot when they next identify.
    pub async fn push_snapshot(&self, identity: &Identity) -> Result<bool> {
        if self.presence.lookup(identity).is_none() {
            return Ok(false);
        }

        let snapshot = self.build_snapshot(identity).await?;

        // Look up again: the binding may have changed while querying.
        match self.presence.lookup(identity) {
            Some(conn) => Ok(conn.send(ServerEvent::UpdateContacts(snapshot))),
            None => Ok(false),
        }
    }

    /// Push snapshots to several identities concurrently. A failure for one
    /// identity is logged and does not affect the others.
    pub async fn push_snapshot_to_many<I>(&self, identities: I)
    where
        I: IntoIterator<Item = Identity>,
    {
        let unique: BTreeSet<Identity> = identities.into_iter().collect();

        let results = join_all(unique.iter().map(|identity| self.push_snapshot(identity))).await;

        for (identity, result) in unique.iter().zip(results) {
            if let Err(e) = result {
                warn!(identity = %identity, error = %e, "snapshot push failed");
            }
        }
    }

    /// Remove the contact between `identity` and `peer` together with their
    /// direct message history.
    ///
    /// Deleting a pair that has no contact is not an error. Live sides get
    /// `contact-deleted` and a fresh snapshot.
    pub async fn delete_contact(&self, identity: &Identity, peer: &Identity) -> Result<ContactRemoval> {
        if identity.is_blank() || peer.is_blank() {
            return Err(RelayError::BadRequest("identity must not be empty".into()));
        }

        let removal = self.gateway.delete_contact(identity, peer).await?;
        info!(
            identity = %identity,
            peer = %peer,
            removed = removal.contact_removed,
            messages = removal.messages_removed,
            "contact deleted"
        );

        if removal.contact_removed {
            for (side, other) in [(identity, peer), (peer, identity)] {
                if let Some(conn) = self.presence.lookup(side) {
                    conn.send(ServerEvent::ContactDeleted(ContactDeleted {
                        deleted_user_id: other.clone(),
                    }));
                }
            }
        }

        self.push_snapshot_to_many([identity.clone(), peer.clone()])
            .await;
        Ok(removal)
    }
}
