//! Test fixtures shared by the component tests.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use parley_shared::models::{Contact, Group, Message};
use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ChannelId, ConnectionId, Identity};
use parley_store::{ContactRemoval, GroupRemoval};
use tokio::sync::mpsc;

use crate::connection::ConnectionHandle;
use crate::contacts::ContactSync;
use crate::gateway::{Gateway, GatewayError, SqliteGateway};
use crate::membership::ChannelMembership;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;

/// Every queued event, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// In-memory gateway whose every command can be made to fail, and which
/// can run a task in the middle of an operation to stage an interleaving.
pub struct ScriptedGateway {
    inner: SqliteGateway,
    fail: AtomicBool,
    after_groups_for: Mutex<Option<BoxFuture<'static, ()>>>,
    before_message_write: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            inner: SqliteGateway::open_in_memory().unwrap(),
            fail: AtomicBool::new(false),
            after_groups_for: Mutex::new(None),
            before_message_write: Mutex::new(None),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Run `task` once the next `groups_for` query has been answered.
    pub fn after_next_groups_for(&self, task: impl Future<Output = ()> + Send + 'static) {
        *self.after_groups_for.lock() = Some(Box::pin(task));
    }

    /// Run `task` right before the next message reaches the store.
    pub fn before_next_message_write(&self, task: impl Future<Output = ()> + Send + 'static) {
        *self.before_message_write.lock() = Some(Box::pin(task));
    }

    async fn run_staged(slot: &Mutex<Option<BoxFuture<'static, ()>>>) {
        let task = slot.lock().take();
        if let Some(task) = task {
            task.await;
        }
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(GatewayError::Task("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn create_contact(&self, contact: Contact) -> Result<Contact, GatewayError> {
        self.check()?;
        self.inner.create_contact(contact).await
    }

    async fn find_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Option<Contact>, GatewayError> {
        self.check()?;
        self.inner.find_contact(a, b).await
    }

    async fn contacts_for(&self, identity: &Identity) -> Result<Vec<Contact>, GatewayError> {
        self.check()?;
        self.inner.contacts_for(identity).await
    }

    async fn delete_contact(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<ContactRemoval, GatewayError> {
        self.check()?;
        self.inner.delete_contact(a, b).await
    }

    async fn create_group(&self, group: Group) -> Result<Group, GatewayError> {
        self.check()?;
        self.inner.create_group(group).await
    }

    async fn find_group(&self, id: ChannelId) -> Result<Option<Group>, GatewayError> {
        self.check()?;
        self.inner.find_group(id).await
    }

    async fn groups_for(&self, identity: &Identity) -> Result<Vec<Group>, GatewayError> {
        self.check()?;
        let groups = self.inner.groups_for(identity).await?;
        Self::run_staged(&self.after_groups_for).await;
        Ok(groups)
    }

    async fn delete_group(&self, id: ChannelId) -> Result<GroupRemoval, GatewayError> {
        self.check()?;
        self.inner.delete_group(id).await
    }

    async fn insert_message(&self, message: Message) -> Result<Message, GatewayError> {
        self.check()?;
        Self::run_staged(&self.before_message_write).await;
        self.inner.insert_message(message).await
    }

    async fn insert_group_message(
        &self,
        message: Message,
    ) -> Result<Option<Message>, GatewayError> {
        self.check()?;
        Self::run_staged(&self.before_message_write).await;
        self.inner.insert_group_message(message).await
    }

    async fn direct_history(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Vec<Message>, GatewayError> {
        self.check()?;
        self.inner.direct_history(a, b).await
    }

    async fn group_history(&self, id: ChannelId) -> Result<Vec<Message>, GatewayError> {
        self.check()?;
        self.inner.group_history(id).await
    }
}

/// The four components wired together over one gateway, without the
/// `Relay` orchestration on top.
pub struct Harness {
    pub gateway: Arc<dyn Gateway>,
    pub presence: Arc<PresenceRegistry>,
    pub membership: Arc<ChannelMembership>,
    pub contacts: ContactSync,
    pub router: MessageRouter,
    scripted: Option<Arc<ScriptedGateway>>,
    next_conn: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        let gateway: Arc<dyn Gateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
        Self::build(gateway, None)
    }

    /// Harness over a [`ScriptedGateway`].
    pub fn scripted() -> Self {
        let scripted = Arc::new(ScriptedGateway::new());
        let gateway: Arc<dyn Gateway> = scripted.clone();
        Self::build(gateway, Some(scripted))
    }

    fn build(gateway: Arc<dyn Gateway>, scripted: Option<Arc<ScriptedGateway>>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let membership = Arc::new(ChannelMembership::new(gateway.clone(), presence.clone()));
        Self {
            contacts: ContactSync::new(gateway.clone(), presence.clone()),
            router: MessageRouter::new(gateway.clone(), presence.clone(), membership.clone()),
            gateway,
            presence,
            membership,
            scripted,
            next_conn: AtomicU64::new(1),
        }
    }

    fn script(&self) -> &ScriptedGateway {
        self.scripted
            .as_deref()
            .expect("harness was not built with Harness::scripted")
    }

    pub fn fail(&self, fail: bool) {
        self.script().set_failing(fail);
    }

    pub fn after_next_groups_for(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.script().after_next_groups_for(task);
    }

    pub fn before_next_message_write(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.script().before_next_message_write(task);
    }

    /// Open a connection and bind it to `identity`. No channel
    /// subscriptions are set up.
    pub fn online(&self, identity: &str) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let (conn, rx) = ConnectionHandle::channel(id, 64);
        self.presence.bind(identity.into(), conn.clone());
        (conn, rx)
    }
}
