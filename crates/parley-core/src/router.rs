//! Message persistence and delivery.
//!
//! A message is persisted before any delivery is attempted. Delivery is
//! best effort: each live connection gets the event at most once and
//! offline recipients only see the message through history.

use std::sync::Arc;

use parley_shared::constants::MAX_MESSAGE_SIZE;
use parley_shared::models::Message;
use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ChannelId, Identity};
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::gateway::Gateway;
use crate::membership::ChannelMembership;
use crate::presence::PresenceRegistry;

pub struct MessageRouter {
    gateway: Arc<dyn Gateway>,
    presence: Arc<PresenceRegistry>,
    membership: Arc<ChannelMembership>,
}

impl MessageRouter {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        presence: Arc<PresenceRegistry>,
        membership: Arc<ChannelMembership>,
    ) -> Self {
        Self {
            gateway,
            presence,
            membership,
        }
    }

    /// Persist a direct message, deliver it to `to` and echo it back to
    /// `from`. The echo carries the server-assigned id and timestamp.
    pub async fn send_direct(&self, from: Identity, to: Identity, content: String) -> Result<Message> {
        if from.is_blank() || to.is_blank() {
            return Err(RelayError::BadRequest("identity must not be empty".into()));
        }
        validate_content(&content)?;

        let message = self
            .gateway
            .insert_message(Message::direct(from, &to, content))
            .await?;

        let event = ServerEvent::ReceiveMessage(message.clone());
        let delivered = self.deliver(&to, &event);
        let echoed = message.from != to && self.deliver(&message.from, &event);

        debug!(
            from = %message.from,
            to = %to,
            id = %message.id,
            delivered,
            echoed,
            "direct message routed"
        );
        Ok(message)
    }

    /// Persist a group message and deliver it to every connection
    /// subscribed to the channel.
    ///
    /// The channel must exist when the message is written; nothing is
    /// persisted otherwise, including when a delete lands first.
    pub async fn send_group(
        &self,
        from: Identity,
        channel_id: ChannelId,
        content: String,
    ) -> Result<Message> {
        if from.is_blank() {
            return Err(RelayError::BadRequest("identity must not be empty".into()));
        }
        validate_content(&content)?;

        let message = self
            .gateway
            .insert_group_message(Message::group(from, channel_id, content))
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("group {channel_id}")))?;

        let delivered = self
            .membership
            .fanout(channel_id, &ServerEvent::ReceiveMessage(message.clone()));

        debug!(
            from = %message.from,
            channel = %channel_id,
            id = %message.id,
            delivered,
            "group message routed"
        );
        Ok(message)
    }

    /// Direct messages between two identities, oldest first.
    pub async fn fetch_history(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>> {
        Ok(self.gateway.direct_history(a, b).await?)
    }

    pub async fn fetch_group_history(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        Ok(self.gateway.group_history(channel_id).await?)
    }

    fn deliver(&self, identity: &Identity, event: &ServerEvent) -> bool {
        match self.presence.lookup(identity) {
            Some(conn) => conn.send(event.clone()),
            None => false,
        }
    }
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(RelayError::BadRequest("message must not be empty".into()));
    }
    if content.len() > MAX_MESSAGE_SIZE {
        return Err(RelayError::BadRequest(format!(
            "message exceeds {MAX_MESSAGE_SIZE} bytes"
        )));
    }
    Ok(())
}
