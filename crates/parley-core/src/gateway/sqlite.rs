use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_shared::models::{Contact, Group, Message};
use parley_shared::types::{ChannelId, Identity};
use parley_store::{ContactRemoval, Database, GroupRemoval, StoreError};

use super::{Gateway, GatewayError};

/// [`Gateway`] backed by a single SQLite connection.
///
/// Every command runs on the blocking thread pool so async tasks never wait
/// on SQLite directly.
#[derive(Clone)]
pub struct SqliteGateway {
    db: Arc<Mutex<Database>>,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database at `path`, or the platform default when `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, GatewayError> {
        let db = match path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Self::new(db))
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&mut Database) -> parley_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let mut db = db.lock();
            f(&mut db)
        })
        .await
        .map_err(|e| GatewayError::Task(e.to_string()))?;

        Ok(result?)
    }
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn create_contact(&self, contact: Contact) -> Result<Contact, GatewayError> {
        self.with_db(move |db| db.insert_contact(&contact)).await
    }

    async fn find_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Option<Contact>, GatewayError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.find_contact(&a, &b)).await
    }

    async fn contacts_for(&self, identity: &Identity) -> Result<Vec<Contact>, GatewayError> {
        let identity = identity.clone();
        self.with_db(move |db| db.list_contacts_for(&identity)).await
    }

    async fn delete_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<ContactRemoval, GatewayError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.delete_contact(&a, &b)).await
    }

    async fn create_group(&self, group: Group) -> Result<Group, GatewayError> {
        self.with_db(move |db| {
            db.insert_group(&group)?;
            Ok(group)
        })
        .await
    }

    async fn find_group(&self, id: ChannelId) -> Result<Option<Group>, GatewayError> {
        self.with_db(move |db| match db.get_group(id) {
            Ok(group) => Ok(Some(group)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn groups_for(&self, identity: &Identity) -> Result<Vec<Group>, GatewayError> {
        let identity = identity.clone();
        self.with_db(move |db| db.list_groups_for_member(&identity))
            .await
    }

    async fn delete_group(&self, id: ChannelId) -> Result<GroupRemoval, GatewayError> {
        self.with_db(move |db| db.delete_group(id)).await
    }

    async fn insert_message(&self, message: Message) -> Result<Message, GatewayError> {
        self.with_db(move |db| {
            db.insert_message(&message)?;
            Ok(message)
        })
        .await
    }

    async fn insert_group_message(
        &self,
        message: Message,
    ) -> Result<Option<Message>, GatewayError> {
        self.with_db(move |db| Ok(db.insert_group_message(&message)?.then_some(message)))
            .await
    }

    async fn direct_history(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Vec<Message>, GatewayError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.direct_history(&a, &b)).await
    }

    async fn group_history(&self, id: ChannelId) -> Result<Vec<Message>, GatewayError> {
        self.with_db(move |db| db.group_history(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_missing_group_is_none() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        assert!(gateway.find_group(ChannelId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");

        let group = Group::new("A".into(), "Team", vec!["B".into()]);
        {
            let gateway = SqliteGateway::open(Some(&path)).unwrap();
            gateway.create_group(group.clone()).await.unwrap();
        }

        let gateway = SqliteGateway::open(Some(&path)).unwrap();
        let loaded = gateway.find_group(group.id).await.unwrap().unwrap();
        assert_eq!(loaded, group);
        assert_eq!(gateway.groups_for(&"B".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_contact_converges() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let first = gateway
            .create_contact(Contact::new("A".into(), "B".into(), "c1", None))
            .await
            .unwrap();
        let second = gateway
            .create_contact(Contact::new("B".into(), "A".into(), "c2", None))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(gateway.contacts_for(&"A".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_group_message_for_deleted_group_is_rejected() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let group = gateway
            .create_group(Group::new("A".into(), "Team", vec!["B".into()]))
            .await
            .unwrap();

        let stored = gateway
            .insert_group_message(Message::group("B".into(), group.id, "hi"))
            .await
            .unwrap();
        assert!(stored.is_some());

        gateway.delete_group(group.id).await.unwrap();
        let late = gateway
            .insert_group_message(Message::group("B".into(), group.id, "late"))
            .await
            .unwrap();
        assert!(late.is_none());
        assert!(gateway.group_history(group.id).await.unwrap().is_empty());
    }
}
