//! The `persistence` module makes durable queues, routes and channels
//! survive restarts.
//!
//! The broker state is captured into an immutable [`Snapshot`], which is
//! then written either inline or on the background [`SnapshotWorker`]. On
//! startup the snapshot is decoded and replayed through the same broker
//! constructors used at runtime, so loaded data passes the same checks as
//! live requests. Users marked immutable (the configured admin) and
//! entities without the durable flag are never written.

pub mod snapshot;
pub mod worker;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::broker::Broker;
use crate::broker::user::{Permissions, User};
use crate::utils::error::{BrokerError, StorageError};
use crate::utils::validate::{self, Charset};

pub use snapshot::{
    ChannelRecord, MessageRecord, QueueRecord, RouteRecord, Snapshot, UserRecord, read_snapshot,
    write_snapshot,
};
pub use worker::{PendingSave, SnapshotWorker};

/// Where snapshots go, plus the worker writing them in the background.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    worker: SnapshotWorker,
}

impl Storage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            worker: SnapshotWorker::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_saving(&self) -> bool {
        self.worker.is_busy()
    }

    /// Writes inline. Refused while a background write is still running,
    /// since both would use the same temporary file.
    pub fn save(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.poll();
        if self.worker.is_busy() {
            return Err(StorageError::Busy);
        }
        write_snapshot(&self.path, snapshot)?;
        info!("Snapshot saved to {}", self.path.display());
        Ok(())
    }

    pub fn save_in_background(&mut self, snapshot: Snapshot) -> Result<(), StorageError> {
        self.poll();
        self.worker.spawn(self.path.clone(), snapshot)?;
        info!("Background snapshot started");
        Ok(())
    }

    /// Reports a finished background write, logging its outcome.
    pub fn poll(&mut self) -> Option<Result<(), StorageError>> {
        let result = self.worker.poll()?;
        match &result {
            Ok(()) => info!("Background snapshot saved to {}", self.path.display()),
            Err(e) => warn!("Background snapshot failed: {e}"),
        }
        Some(result)
    }

    /// Hands over a running background write; used on shutdown.
    pub fn take_pending(&mut self) -> Option<PendingSave> {
        self.worker.take()
    }
}

fn corrupt(what: &str, err: BrokerError) -> StorageError {
    StorageError::Corrupt(format!("{what}: {err}"))
}

/// Copies the durable part of the broker state.
pub fn capture(broker: &Broker) -> Snapshot {
    let users = broker
        .users()
        .list()
        .into_iter()
        .filter(|u| !u.perm.is_immutable())
        .map(|u| UserRecord {
            name: u.name.clone(),
            password: u.password.clone(),
            perm: u.perm.0,
        })
        .collect();

    let queues = broker
        .queues()
        .filter(|q| q.is_durable())
        .map(|q| QueueRecord {
            name: q.name().to_string(),
            max_messages: q.max_messages(),
            max_message_size: q.max_message_size(),
            flags: q.flags(),
            messages: q
                .messages()
                .map(|m| MessageRecord {
                    expires_at: m.expires_at,
                    payload: m.object.clone(),
                })
                .collect(),
        })
        .collect();

    let routes = broker
        .routes()
        .filter(|r| r.is_durable())
        .map(|r| {
            let mut keys: Vec<(String, Vec<String>)> = Vec::new();
            for (key, qid) in r.bindings() {
                let Some(queue) = broker.queue(qid) else {
                    continue;
                };
                match keys.last_mut() {
                    Some((last, queues)) if last == key => queues.push(queue.name().to_string()),
                    _ => keys.push((key.to_string(), vec![queue.name().to_string()])),
                }
            }
            RouteRecord {
                name: r.name().to_string(),
                flags: r.flags(),
                keys,
            }
        })
        .collect();

    let channels = broker
        .channels()
        .filter(|c| c.is_durable())
        .map(|c| ChannelRecord {
            name: c.name().to_string(),
            flags: c.flags(),
        })
        .collect();

    Snapshot {
        users,
        queues,
        routes,
        channels,
    }
}

/// Rebuilds entities from `snapshot`. Expired messages are dropped and
/// bindings to queues that no longer exist are skipped.
pub fn restore(broker: &mut Broker, snapshot: Snapshot) -> Result<(), StorageError> {
    let now = broker.now_ms();

    for user in snapshot.users {
        if !validate::is_valid_credential(&user.name, Charset::Name)
            || !validate::is_valid_credential(&user.password, Charset::Plain)
        {
            return Err(StorageError::Corrupt(format!("invalid user '{}'", user.name)));
        }
        let record = User::new(&user.name, &user.password, Permissions(user.perm));
        if let Err(e) = broker.users_mut().insert(record) {
            warn!("Skipping stored user '{}': {e}", user.name);
        }
    }

    for queue in snapshot.queues {
        let id = broker
            .create_queue(&queue.name, queue.max_messages, queue.max_message_size, queue.flags)
            .map_err(|e| corrupt(&format!("queue '{}'", queue.name), e))?;
        for message in queue.messages {
            if message.expires_at != 0 && message.expires_at <= now {
                continue;
            }
            broker
                .restore_message(id, message.payload, message.expires_at)
                .map_err(|e| corrupt(&format!("message in queue '{}'", queue.name), e))?;
        }
    }

    for route in snapshot.routes {
        broker
            .create_route(&route.name, route.flags)
            .map_err(|e| corrupt(&format!("route '{}'", route.name), e))?;
        for (key, queues) in route.keys {
            if !validate::is_valid_topic(&key, Charset::Plain) {
                return Err(StorageError::Corrupt(format!(
                    "invalid key '{key}' in route '{}'",
                    route.name
                )));
            }
            for queue in queues {
                if broker.queue_id(&queue).is_none() {
                    warn!("Route '{}' key '{key}': queue '{queue}' is gone, skipping", route.name);
                    continue;
                }
                broker
                    .bind(&route.name, &queue, &key)
                    .map_err(|e| corrupt(&format!("binding in route '{}'", route.name), e))?;
            }
        }
    }

    for channel in snapshot.channels {
        broker
            .create_channel(&channel.name, channel.flags)
            .map_err(|e| corrupt(&format!("channel '{}'", channel.name), e))?;
    }

    Ok(())
}

/// Loads the snapshot at `path` into `broker`. A missing file is not an
/// error and yields `Ok(false)`.
pub fn load_into(broker: &mut Broker, path: &Path) -> Result<bool, StorageError> {
    if !path.exists() {
        info!("No snapshot at {}, starting empty", path.display());
        return Ok(false);
    }
    let snapshot = read_snapshot(path)?;
    restore(broker, snapshot)?;

    let stats = broker.stats();
    info!(
        "Snapshot loaded from {}: {} queues, {} routes, {} channels",
        path.display(),
        stats.queues,
        stats.routes,
        stats.channels
    );
    Ok(true)
}

#[cfg(test)]
mod tests;
