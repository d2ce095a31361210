//! Broker engine
//!
//! `Broker` owns every registry: users, queues, routes, channels and live
//! connections. Queues, routes and channels are kept in insertion order and
//! addressed by id; relations between them (declarations, subscriptions,
//! bindings) are stored as ids on both sides and unwound explicitly when
//! either side goes away.
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to sit behind `Arc<Mutex<Broker>>`
//!   (see [`SharedBroker`]). Each request is handled start to finish under
//!   the lock, so every mutation is atomic with respect to other clients.
//! - Outbound packets are handed to each connection's unbounded channel;
//!   the transport task owning the socket does the writing, so the lock is
//!   never held across network I/O.
//! - Periodic work (expiry, redelivery, memory checks, idle eviction,
//!   snapshots) is driven by the loops in [`super::timers`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::channel::Channel;
use super::list::KeyList;
use super::message::{Message, TagGenerator};
use super::object::Object;
use super::queue::{Queue, QueueEvent, SubscribeMode};
use super::route::Route;
use super::user::{Permissions, User, UserRegistry, UserStore};
use super::{ChannelId, ConnectionId, QueueId, RouteId};
use crate::client::Connection;
use crate::persistence::{self, PendingSave, Storage};
use crate::protocol::{BodyWriter, Command, EventKind, response};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{BrokerError, StorageError};

pub type SharedBroker = Arc<Mutex<Broker>>;

/// Locks the shared broker, recovering the guard if a previous holder
/// panicked.
pub fn lock_broker(shared: &SharedBroker) -> MutexGuard<'_, Broker> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Flag bits of the flush command.
pub mod flush {
    pub const USERS: u32 = 1 << 0;
    pub const QUEUES: u32 = 1 << 1;
    pub const ROUTES: u32 = 1 << 2;
    pub const CHANNELS: u32 = 1 << 3;
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub admin_name: String,
    pub admin_password: String,
    /// Bytes of retained payload above which pushes are refused; 0 disables.
    pub max_memory: u64,
    pub max_clients: usize,
    /// Idle time after which a connection is evicted; 0 disables.
    pub client_timeout_ms: u64,
    /// Snapshot file; `None` disables persistence.
    pub storage_path: Option<PathBuf>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            admin_name: "admin".to_string(),
            admin_password: "admin".to_string(),
            max_memory: 0,
            max_clients: 16384,
            client_timeout_ms: 0,
            storage_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub uptime_secs: u64,
    pub used_memory: u64,
    pub clients: usize,
    pub users: usize,
    pub queues: usize,
    pub routes: usize,
    pub channels: usize,
}

/// Result of one pass of the queue updater.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    pub expired: usize,
    pub requeued: usize,
}

#[derive(Debug)]
pub struct Broker {
    clock: Arc<dyn Clock>,
    options: BrokerOptions,
    tags: TagGenerator,
    users: Box<dyn UserStore>,
    queues: KeyList<QueueId, Queue>,
    routes: KeyList<RouteId, Route>,
    channels: KeyList<ChannelId, Channel>,
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
    started_at_ms: u64,
    out_of_memory: bool,
    storage: Option<Storage>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerOptions::default())
    }
}

fn name_field(name: &str) -> Vec<u8> {
    let mut body = BodyWriter::new();
    body.name(name);
    body.finish().to_vec()
}

impl Broker {
    pub fn new(options: BrokerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Builds a broker and installs the admin user with full, immutable
    /// permissions.
    pub fn with_clock(options: BrokerOptions, clock: Arc<dyn Clock>) -> Self {
        let mut users = UserRegistry::new();
        let admin = User::new(&options.admin_name, &options.admin_password, Permissions::SUPER);
        if let Err(e) = users.insert(admin) {
            warn!("Failed to install admin user: {e}");
        }

        let storage = options.storage_path.clone().map(Storage::new);
        let started_at_ms = clock.now_ms();

        Self {
            clock,
            options,
            tags: TagGenerator::new(),
            users: Box::new(users),
            queues: KeyList::new(),
            routes: KeyList::new(),
            channels: KeyList::new(),
            connections: HashMap::new(),
            next_id: 1,
            started_at_ms,
            out_of_memory: false,
            storage,
        }
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn expiry(&self, expire_ms: u32) -> u64 {
        if expire_ms == 0 {
            0
        } else {
            self.now_ms() + u64::from(expire_ms)
        }
    }

    // ---------------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------------

    pub fn register_connection(&mut self, sender: UnboundedSender<Object>) -> ConnectionId {
        let id = ConnectionId(self.next_id());
        let now = self.now_ms();
        self.connections.insert(id, Connection::new(id, sender, now));
        debug!("{id} registered");
        id
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn at_capacity(&self) -> bool {
        self.connections.len() >= self.options.max_clients
    }

    pub fn permissions(&self, id: ConnectionId) -> Option<Permissions> {
        self.connections.get(&id).map(|c| c.perm)
    }

    pub fn touch(&mut self, id: ConnectionId) {
        let now = self.now_ms();
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.touch(now);
        }
    }

    /// Queues `object` on the connection's outbound channel.
    pub fn send_to(&self, id: ConnectionId, object: Object) {
        if let Some(conn) = self.connections.get(&id) {
            conn.send(object);
        }
    }

    /// Tears a connection down, undoing every declaration and subscription
    /// it holds. Dropping its sender ends the transport task.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(mut conn) = self.connections.remove(&id) else {
            return false;
        };
        let links = conn.take_links();

        let mut touched_queues: Vec<QueueId> = Vec::new();
        for qid in &links.subscribed {
            if let Some(queue) = self.queues.get_mut(qid) {
                queue.unsubscribe(id);
                touched_queues.push(*qid);
            }
        }
        for qid in &links.declared {
            if let Some(queue) = self.queues.get_mut(qid) {
                queue.undeclare(id);
                touched_queues.push(*qid);
            }
        }
        touched_queues.sort();
        touched_queues.dedup();
        for qid in touched_queues {
            self.auto_delete_queue(qid);
        }

        let mut touched_channels: Vec<ChannelId> = Vec::new();
        for (cid, topics) in &links.topics {
            if let Some(channel) = self.channels.get_mut(cid) {
                for topic in topics {
                    if channel.unsubscribe(id, topic).is_err() {
                        warn!("{id} was not subscribed to topic {topic} on {cid}");
                    }
                }
                touched_channels.push(*cid);
            }
        }
        for (cid, patterns) in &links.patterns {
            if let Some(channel) = self.channels.get_mut(cid) {
                for pattern in patterns {
                    if channel.punsubscribe(id, pattern).is_err() {
                        warn!("{id} was not subscribed to pattern {pattern} on {cid}");
                    }
                }
                touched_channels.push(*cid);
            }
        }
        touched_channels.sort();
        touched_channels.dedup();
        for cid in touched_channels {
            self.auto_delete_channel(cid);
        }

        debug!("{id} removed");
        true
    }

    /// Removes connections idle for longer than the client timeout.
    pub fn evict_idle(&mut self) -> Vec<ConnectionId> {
        let timeout = self.options.client_timeout_ms;
        if timeout == 0 {
            return Vec::new();
        }

        let now = self.now_ms();
        let idle: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| now.saturating_sub(c.last_activity_ms()) > timeout)
            .map(|c| c.id)
            .collect();

        for id in &idle {
            info!("{id} idle for more than {timeout} ms, closing");
            self.remove_connection(*id);
        }
        idle
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub fn users_mut(&mut self) -> &mut dyn UserStore {
        self.users.as_mut()
    }

    /// Gives the connection the permissions of the matching user.
    pub fn authenticate(
        &mut self,
        conn: ConnectionId,
        name: &str,
        password: &str,
    ) -> Result<Permissions, BrokerError> {
        let perm = self
            .users
            .find(name, Some(password))
            .map(|u| u.perm)
            .ok_or(BrokerError::NotFound)?;
        let connection = self.connections.get_mut(&conn).ok_or(BrokerError::NotFound)?;
        connection.perm = perm;
        debug!("{conn} authenticated as '{name}'");
        Ok(perm)
    }

    // ---------------------------------------------------------------------
    // Queues
    // ---------------------------------------------------------------------

    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        self.queues.get(&id)
    }

    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.queues
            .find_by(|_, q| q.name() == name)
            .map(|(id, _)| *id)
    }

    pub fn queue_by_name(&self, name: &str) -> Option<&Queue> {
        self.queue_id(name).and_then(|id| self.queues.get(&id))
    }

    fn queue_mut(&mut self, id: QueueId) -> Result<&mut Queue, BrokerError> {
        self.queues.get_mut(&id).ok_or(BrokerError::NotFound)
    }

    pub fn create_queue(
        &mut self,
        name: &str,
        max_messages: u32,
        max_message_size: u32,
        flags: u32,
    ) -> Result<QueueId, BrokerError> {
        if self.queue_id(name).is_some() {
            return Err(BrokerError::Conflict("queue already exists"));
        }
        let id = QueueId(self.next_id());
        let queue = Queue::new(id, name, max_messages, max_message_size, flags)?;
        self.queues.insert(id, queue);
        debug!("queue '{name}' created");
        Ok(id)
    }

    pub fn declare_queue(&mut self, conn: ConnectionId, name: &str) -> Result<QueueId, BrokerError> {
        let id = self.queue_id(name).ok_or(BrokerError::NotFound)?;
        let connection = self.connections.get_mut(&conn).ok_or(BrokerError::NotFound)?;
        connection.add_declared(id);
        self.queue_mut(id)?.declare(conn);
        Ok(id)
    }

    /// Resolves a queue the connection has declared.
    fn declared_queue(&self, conn: ConnectionId, name: &str) -> Result<QueueId, BrokerError> {
        let id = self.queue_id(name).ok_or(BrokerError::NotFound)?;
        let declared = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.has_declared(id));
        if declared {
            Ok(id)
        } else {
            Err(BrokerError::NotDeclared)
        }
    }

    pub fn push_queue(
        &mut self,
        conn: ConnectionId,
        name: &str,
        payload: Object,
        expire_ms: u32,
    ) -> Result<(), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        if self.out_of_memory {
            return Err(BrokerError::OutOfMemory);
        }
        let expires_at = self.expiry(expire_ms);
        self.push_into(id, payload, expires_at)
    }

    fn push_into(&mut self, id: QueueId, object: Object, expires_at: u64) -> Result<(), BrokerError> {
        let now = self.now_ms();
        let tag = self.tags.next(now);
        let queue = self.queue_mut(id)?;
        let events = queue.push(Message::new(tag, object, expires_at))?;
        let name = queue.name().to_string();
        self.deliver_queue_events(&name, events);
        Ok(())
    }

    /// Appends a message loaded from a snapshot, with a fresh tag.
    pub fn restore_message(
        &mut self,
        id: QueueId,
        object: Object,
        expires_at: u64,
    ) -> Result<(), BrokerError> {
        let now = self.now_ms();
        let tag = self.tags.next(now);
        self.queue_mut(id)?
            .restore(Message::new(tag, object, expires_at))
            .map_err(BrokerError::from)
    }

    pub fn get_queue(&mut self, conn: ConnectionId, name: &str) -> Result<(u64, Object), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        let now = self.now_ms();
        self.queue_mut(id)?
            .get(now)
            .map(|m| (m.tag, m.object.clone()))
            .ok_or(BrokerError::NoData)
    }

    pub fn pop_queue(
        &mut self,
        conn: ConnectionId,
        name: &str,
        confirm_timeout_ms: u32,
    ) -> Result<(u64, Object), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        let now = self.now_ms();
        self.queue_mut(id)?
            .pop(now, confirm_timeout_ms)
            .map(|m| (m.tag, m.object.clone()))
            .ok_or(BrokerError::NoData)
    }

    pub fn confirm_queue(&mut self, conn: ConnectionId, name: &str, tag: u64) -> Result<(), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        self.queue_mut(id)?.confirm(tag)?;
        Ok(())
    }

    pub fn subscribe_queue(
        &mut self,
        conn: ConnectionId,
        name: &str,
        mode: SubscribeMode,
    ) -> Result<(), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        let queue = self.queue_mut(id)?;
        let events = queue.subscribe(conn, mode)?;
        let name = queue.name().to_string();
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.add_subscribed(id);
        }
        self.deliver_queue_events(&name, events);
        Ok(())
    }

    pub fn unsubscribe_queue(&mut self, conn: ConnectionId, name: &str) -> Result<(), BrokerError> {
        let id = self.declared_queue(conn, name)?;
        if !self.queue_mut(id)?.unsubscribe(conn) {
            return Err(BrokerError::NotFound);
        }
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.remove_subscribed(id);
        }
        Ok(())
    }

    pub fn purge_queue(&mut self, conn: ConnectionId, name: &str) -> Result<usize, BrokerError> {
        let id = self.declared_queue(conn, name)?;
        Ok(self.queue_mut(id)?.purge())
    }

    pub fn rename_queue(&mut self, from: &str, to: &str) -> Result<(), BrokerError> {
        let id = self.queue_id(from).ok_or(BrokerError::NotFound)?;
        if self.queue_id(to).is_some() {
            return Err(BrokerError::BadValue);
        }
        self.queue_mut(id)?.rename(to);
        Ok(())
    }

    pub fn delete_queue(&mut self, name: &str) -> Result<(), BrokerError> {
        let id = self.queue_id(name).ok_or(BrokerError::NotFound)?;
        self.remove_queue(id);
        Ok(())
    }

    fn auto_delete_queue(&mut self, id: QueueId) {
        let Some(queue) = self.queues.get(&id) else {
            return;
        };
        if queue.is_auto_delete() && queue.is_unused() {
            info!("queue '{}' auto-deleted", queue.name());
            self.remove_queue(id);
        }
    }

    fn remove_queue(&mut self, id: QueueId) {
        let Some(queue) = self.queues.remove(&id) else {
            return;
        };

        let mut routes: Vec<RouteId> = queue.bindings().iter().map(|(r, _)| *r).collect();
        routes.sort();
        routes.dedup();
        for rid in routes {
            if let Some(route) = self.routes.get_mut(&rid) {
                route.unbind_queue(id);
            }
            self.auto_delete_route(rid);
        }

        for conn in queue.declared().into_iter().chain(queue.subscribers()) {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.forget_queue(id);
            }
        }

        debug!(
            "queue '{}' removed with {} pending and {} in-flight messages",
            queue.name(),
            queue.len(),
            queue.in_flight_len()
        );
    }

    fn deliver_queue_events(&self, queue_name: &str, events: Vec<QueueEvent>) {
        if events.is_empty() {
            return;
        }
        let prefix = name_field(queue_name);
        let opcode = Command::QueueSubscribe as u8;

        for event in events {
            match event {
                QueueEvent::Notify { conn } => {
                    let head = response::event_head(opcode, EventKind::Notify, &prefix, None);
                    self.send_to(conn, head);
                }
                QueueEvent::Message { conn, object } => {
                    let head =
                        response::event_head(opcode, EventKind::Message, &prefix, Some(&object));
                    self.send_to(conn, head);
                    self.send_to(conn, object);
                }
            }
        }
    }

    /// One updater pass: drop expired messages and requeue overdue ones in
    /// every queue, notifying subscribers of queues that got data back.
    pub fn process_queues(&mut self) -> Reclaimed {
        let now = self.now_ms();
        let mut reclaimed = Reclaimed::default();
        let mut notifications = Vec::new();

        for queue in self.queues.values_mut() {
            reclaimed.expired += queue.reclaim_expired(now);
            let requeued = queue.reclaim_unconfirmed(now);
            if requeued > 0 {
                reclaimed.requeued += requeued;
                notifications.push((queue.name().to_string(), queue.notify_all()));
            }
        }

        for (name, events) in notifications {
            self.deliver_queue_events(&name, events);
        }
        reclaimed
    }

    // ---------------------------------------------------------------------
    // Routes
    // ---------------------------------------------------------------------

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn route_id(&self, name: &str) -> Option<RouteId> {
        self.routes
            .find_by(|_, r| r.name() == name)
            .map(|(id, _)| *id)
    }

    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.route_id(name).and_then(|id| self.routes.get(&id))
    }

    pub fn create_route(&mut self, name: &str, flags: u32) -> Result<RouteId, BrokerError> {
        if self.route_id(name).is_some() {
            return Err(BrokerError::Conflict("route already exists"));
        }
        let id = RouteId(self.next_id());
        self.routes.insert(id, Route::new(id, name, flags)?);
        debug!("route '{name}' created");
        Ok(id)
    }

    pub fn bind(&mut self, route: &str, queue: &str, key: &str) -> Result<(), BrokerError> {
        let rid = self.route_id(route).ok_or(BrokerError::NotFound)?;
        let qid = self.queue_id(queue).ok_or(BrokerError::NotFound)?;
        if let Some(route) = self.routes.get_mut(&rid) {
            route.bind(qid, key);
        }
        self.queue_mut(qid)?.add_binding(rid, key);
        Ok(())
    }

    pub fn unbind(&mut self, route: &str, queue: &str, key: &str) -> Result<(), BrokerError> {
        let rid = self.route_id(route).ok_or(BrokerError::NotFound)?;
        let qid = self.queue_id(queue).ok_or(BrokerError::NotFound)?;
        self.routes
            .get_mut(&rid)
            .ok_or(BrokerError::NotFound)?
            .unbind(qid, key)?;
        self.queue_mut(qid)?.remove_binding(rid, key);
        self.auto_delete_route(rid);
        Ok(())
    }

    /// Pushes `payload` into the queues bound under `key`. Every target gets
    /// its own message and tag around the shared payload.
    pub fn push_route(
        &mut self,
        route: &str,
        key: &str,
        payload: Object,
        expire_ms: u32,
    ) -> Result<(), BrokerError> {
        if self.out_of_memory {
            return Err(BrokerError::OutOfMemory);
        }
        let rid = self.route_id(route).ok_or(BrokerError::NotFound)?;
        let targets = self
            .routes
            .get_mut(&rid)
            .and_then(|r| r.targets(key))
            .ok_or(BrokerError::NotFound)?;

        let expires_at = self.expiry(expire_ms);
        let mut failed = 0usize;
        for qid in targets {
            if let Err(e) = self.push_into(qid, payload.clone(), expires_at) {
                debug!("route '{route}' push into {qid} failed: {e}");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(BrokerError::Conflict("push into a bound queue failed"));
        }
        Ok(())
    }

    pub fn rename_route(&mut self, from: &str, to: &str) -> Result<(), BrokerError> {
        let id = self.route_id(from).ok_or(BrokerError::NotFound)?;
        if self.route_id(to).is_some() {
            return Err(BrokerError::BadValue);
        }
        if let Some(route) = self.routes.get_mut(&id) {
            route.rename(to);
        }
        Ok(())
    }

    pub fn delete_route(&mut self, name: &str) -> Result<(), BrokerError> {
        let id = self.route_id(name).ok_or(BrokerError::NotFound)?;
        self.remove_route(id);
        Ok(())
    }

    fn auto_delete_route(&mut self, id: RouteId) {
        let Some(route) = self.routes.get(&id) else {
            return;
        };
        if route.is_auto_delete() && route.is_unused() {
            info!("route '{}' auto-deleted", route.name());
            self.remove_route(id);
        }
    }

    fn remove_route(&mut self, id: RouteId) {
        let Some(route) = self.routes.remove(&id) else {
            return;
        };
        for (_, qid) in route.bindings() {
            if let Some(queue) = self.queues.get_mut(&qid) {
                queue.remove_route(id);
            }
        }
        debug!("route '{}' removed", route.name());
    }

    // ---------------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------------

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .find_by(|_, c| c.name() == name)
            .map(|(id, _)| *id)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        self.channel_id(name).and_then(|id| self.channels.get(&id))
    }

    pub fn create_channel(&mut self, name: &str, flags: u32) -> Result<ChannelId, BrokerError> {
        if self.channel_id(name).is_some() {
            return Err(BrokerError::Conflict("channel already exists"));
        }
        let id = ChannelId(self.next_id());
        self.channels.insert(id, Channel::new(id, name, flags)?);
        debug!("channel '{name}' created");
        Ok(id)
    }

    fn channel_mut(&mut self, name: &str) -> Result<&mut Channel, BrokerError> {
        let id = self.channel_id(name).ok_or(BrokerError::NotFound)?;
        self.channels.get_mut(&id).ok_or(BrokerError::NotFound)
    }

    pub fn subscribe_channel(&mut self, conn: ConnectionId, name: &str, topic: &str) -> Result<(), BrokerError> {
        let channel = self.channel_mut(name)?;
        channel.subscribe(conn, topic);
        let cid = channel.id;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.add_topic(cid, topic);
        }
        Ok(())
    }

    pub fn psubscribe_channel(&mut self, conn: ConnectionId, name: &str, pattern: &str) -> Result<(), BrokerError> {
        let channel = self.channel_mut(name)?;
        channel.psubscribe(conn, pattern);
        let cid = channel.id;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.add_pattern(cid, pattern);
        }
        Ok(())
    }

    pub fn unsubscribe_channel(&mut self, conn: ConnectionId, name: &str, topic: &str) -> Result<(), BrokerError> {
        let channel = self.channel_mut(name)?;
        channel.unsubscribe(conn, topic)?;
        let cid = channel.id;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.remove_topic(cid, topic);
        }
        self.auto_delete_channel(cid);
        Ok(())
    }

    pub fn punsubscribe_channel(&mut self, conn: ConnectionId, name: &str, pattern: &str) -> Result<(), BrokerError> {
        let channel = self.channel_mut(name)?;
        channel.punsubscribe(conn, pattern)?;
        let cid = channel.id;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.remove_pattern(cid, pattern);
        }
        self.auto_delete_channel(cid);
        Ok(())
    }

    /// Fans `payload` out to the channel's subscribers; returns how many
    /// deliveries were made.
    pub fn publish(&mut self, name: &str, topic: &str, payload: Object) -> Result<usize, BrokerError> {
        if self.out_of_memory {
            return Err(BrokerError::OutOfMemory);
        }
        let channel = self.channel_mut(name)?;
        let deliveries = channel.publish(topic);

        let mut prefix = BodyWriter::new();
        prefix.name(channel.name()).topic(topic);
        let prefix = prefix.finish();

        for delivery in &deliveries {
            let head = match &delivery.pattern {
                None => response::event_head(
                    Command::ChannelSubscribe as u8,
                    EventKind::Message,
                    &prefix,
                    Some(&payload),
                ),
                Some(pattern) => {
                    let mut with_pattern = BodyWriter::with_capacity(prefix.len() + 32);
                    with_pattern.bytes(&prefix).topic(pattern);
                    response::event_head(
                        Command::ChannelPsubscribe as u8,
                        EventKind::Message,
                        &with_pattern.finish(),
                        Some(&payload),
                    )
                }
            };
            self.send_to(delivery.conn, head);
            self.send_to(delivery.conn, payload.clone());
        }

        Ok(deliveries.len())
    }

    pub fn rename_channel(&mut self, from: &str, to: &str) -> Result<(), BrokerError> {
        let id = self.channel_id(from).ok_or(BrokerError::NotFound)?;
        if self.channel_id(to).is_some() {
            return Err(BrokerError::BadValue);
        }
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.rename(to);
        }
        Ok(())
    }

    pub fn delete_channel(&mut self, name: &str) -> Result<(), BrokerError> {
        let id = self.channel_id(name).ok_or(BrokerError::NotFound)?;
        self.remove_channel(id);
        Ok(())
    }

    fn auto_delete_channel(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get(&id) else {
            return;
        };
        if channel.is_auto_delete() && channel.is_unused() {
            info!("channel '{}' auto-deleted", channel.name());
            self.remove_channel(id);
        }
    }

    fn remove_channel(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.remove(&id) else {
            return;
        };
        for conn in channel.connections() {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.forget_channel(id);
            }
        }
        debug!("channel '{}' removed", channel.name());
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    /// Removes every entity of the kinds selected by `what` (see [`flush`]).
    /// Immutable users always survive.
    pub fn flush(&mut self, what: u32) {
        if what & flush::CHANNELS != 0 {
            let ids: Vec<ChannelId> = self.channels.keys().copied().collect();
            ids.into_iter().for_each(|id| self.remove_channel(id));
        }
        if what & flush::ROUTES != 0 {
            let ids: Vec<RouteId> = self.routes.keys().copied().collect();
            ids.into_iter().for_each(|id| self.remove_route(id));
        }
        if what & flush::QUEUES != 0 {
            let ids: Vec<QueueId> = self.queues.keys().copied().collect();
            ids.into_iter().for_each(|id| self.remove_queue(id));
        }
        if what & flush::USERS != 0 {
            let removed = self.users.clear_mutable();
            debug!("flushed {removed} users");
        }
        info!("flush completed (flags {what:#x})");
    }

    /// Payload bytes retained by all queues.
    pub fn used_memory(&self) -> u64 {
        self.queues.values().map(|q| q.retained_bytes() as u64).sum()
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    /// Refreshes the out-of-memory flag against the configured ceiling.
    pub fn check_memory(&mut self) -> bool {
        let used = self.used_memory();
        let limit = self.options.max_memory;
        let over = limit != 0 && used > limit;

        if over != self.out_of_memory {
            if over {
                warn!("Memory limit reached ({used} > {limit} bytes), refusing pushes");
            } else {
                info!("Memory usage back under the limit ({used} bytes)");
            }
        }
        self.out_of_memory = over;
        over
    }

    pub fn stats(&self) -> Stats {
        Stats {
            uptime_secs: self.now_ms().saturating_sub(self.started_at_ms) / 1000,
            used_memory: self.used_memory(),
            clients: self.connections.len(),
            users: self.users.len(),
            queues: self.queues.len(),
            routes: self.routes.len(),
            channels: self.channels.len(),
        }
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Writes a snapshot, either inline or on the background worker.
    pub fn save(&mut self, background: bool) -> Result<(), BrokerError> {
        if self.storage.is_none() {
            return Err(BrokerError::Conflict("persistence is disabled"));
        }
        let snapshot = persistence::capture(self);
        let Some(storage) = self.storage.as_mut() else {
            return Err(BrokerError::Conflict("persistence is disabled"));
        };

        let result = if background {
            storage.save_in_background(snapshot)
        } else {
            storage.save(&snapshot)
        };

        result.map_err(|e| {
            error!("Snapshot save failed: {e}");
            match e {
                StorageError::Busy => BrokerError::Conflict("a background save is already running"),
                _ => BrokerError::Conflict("snapshot save failed"),
            }
        })
    }

    /// Reports the outcome of a finished background save, if any.
    pub fn poll_background_save(&mut self) -> Option<Result<(), StorageError>> {
        self.storage.as_mut().and_then(Storage::poll)
    }

    pub fn is_saving(&self) -> bool {
        self.storage.as_ref().is_some_and(Storage::is_saving)
    }

    /// Takes the running background save so the caller can await it
    /// after releasing the broker lock.
    pub fn take_background_save(&mut self) -> Option<PendingSave> {
        self.storage.as_mut().and_then(Storage::take_pending)
    }
}
