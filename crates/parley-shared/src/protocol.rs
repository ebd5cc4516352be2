use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;
use crate::models::{ContactView, GroupView, Message, Snapshot};
use crate::types::{ChannelId, Identity};

/// Largest text frame accepted from a client: one maximal message plus
/// room for its envelope.
pub const MAX_FRAME_SIZE: usize = MAX_MESSAGE_SIZE + 4096;

/// Events a client sends over its connection.
///
/// On the wire every event is a JSON object `{"event": "<name>", "data": ...}`.
/// Disconnect is implicit (the socket closes) and has no frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind this connection to an identity
    Identify(Identity),

    /// Ask for a fresh contacts + groups snapshot
    RequestContacts(Identity),

    /// Accept an invite and establish a contact
    AcceptInvite(AcceptInvite),

    /// Create a broadcast group
    CreateGroup(CreateGroup),

    /// Delete a broadcast group (creator only)
    DeleteGroup(DeleteGroup),

    /// Send a direct or group message
    SendMessage(SendMessage),

    /// Remove a contact and its direct message history
    DeleteContact(DeleteContact),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvite {
    /// The identity accepting the invite
    pub from: Identity,
    /// The identity that issued the invite
    pub to: Identity,
    /// Name `from` wants to display for `to`
    #[serde(default)]
    pub display_name: Option<String>,
    pub invite_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    pub creator: Identity,
    pub name: String,
    #[serde(default)]
    pub members: Vec<Identity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteGroup {
    pub channel_id: ChannelId,
    /// Identity requesting the deletion
    pub identity: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub from: Identity,
    /// Peer identity, or channel id when `is_group` is set
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteContact {
    pub identity: Identity,
    pub peer: Identity,
}

/// Events the relay pushes to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full contacts + groups snapshot
    UpdateContacts(Snapshot),

    /// Lightweight notice that a contact was established
    NewContact(ContactView),

    /// A contact was removed by either side
    ContactDeleted(ContactDeleted),

    /// A group the recipient belongs to was created
    GroupCreated(GroupView),

    /// A group the recipient belonged to was deleted
    GroupDeleted(GroupDeleted),

    /// A persisted direct or group message
    ReceiveMessage(Message),

    /// A group operation failed
    GroupError(GroupError),

    /// Any other operation failed
    Error(OperationError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactDeleted {
    /// The peer the recipient is no longer in contact with
    pub deleted_user_id: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeleted {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupError {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationError {
    /// Name of the inbound event that failed
    pub operation: String,
    pub error: String,
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Identify(_) => "identify",
            ClientEvent::RequestContacts(_) => "request-contacts",
            ClientEvent::AcceptInvite(_) => "accept-invite",
            ClientEvent::CreateGroup(_) => "create-group",
            ClientEvent::DeleteGroup(_) => "delete-group",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::DeleteContact(_) => "delete-contact",
        }
    }

    /// Decode a text frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UpdateContacts(_) => "update-contacts",
            ServerEvent::NewContact(_) => "new-contact",
            ServerEvent::ContactDeleted(_) => "contact-deleted",
            ServerEvent::GroupCreated(_) => "group-created",
            ServerEvent::GroupDeleted(_) => "group-deleted",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::GroupError(_) => "group-error",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}
