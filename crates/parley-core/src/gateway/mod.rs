//! Persistence gateway: the commands the relay issues against durable
//! storage.
//!
//! The relay never caches records; every operation reads what it needs
//! through this trait and forgets it once the operation is done.

mod sqlite;

use async_trait::async_trait;
use parley_shared::models::{Contact, Group, Message};
use parley_shared::types::{ChannelId, Identity};
use parley_store::{ContactRemoval, GroupRemoval, StoreError};
use thiserror::Error;

pub use sqlite::SqliteGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The blocking task running the command failed or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    // -- Contacts --

    /// Store a contact. When the pair already exists the stored contact is
    /// returned unchanged.
    async fn create_contact(&self, contact: Contact) -> Result<Contact, GatewayError>;

    async fn find_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Option<Contact>, GatewayError>;

    async fn contacts_for(&self, identity: &Identity) -> Result<Vec<Contact>, GatewayError>;

    /// Delete the contact for a pair and every direct message between them.
    async fn delete_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<ContactRemoval, GatewayError>;

    // -- Groups --

    async fn create_group(&self, group: Group) -> Result<Group, GatewayError>;

    async fn find_group(&self, id: ChannelId) -> Result<Option<Group>, GatewayError>;

    async fn groups_for(&self, identity: &Identity) -> Result<Vec<Group>, GatewayError>;

    /// Delete a group and every message addressed to it.
    async fn delete_group(&self, id: ChannelId) -> Result<GroupRemoval, GatewayError>;

    // -- Messages --

    async fn insert_message(&self, message: Message) -> Result<Message, GatewayError>;

    /// Store a group message in the same step that checks its channel
    /// exists. `None` means the channel is gone and nothing was written.
    async fn insert_group_message(
        &self,
        message: Message,
    ) -> Result<Option<Message>, GatewayError>;

    /// Direct messages between `a` and `b`, oldest first.
    async fn direct_history(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Vec<Message>, GatewayError>;

    /// Messages addressed to a group, oldest first.
    async fn group_history(&self, id: ChannelId) -> Result<Vec<Message>, GatewayError>;
}
