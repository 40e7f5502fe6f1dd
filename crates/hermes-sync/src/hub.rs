//! The synchronization hub supervisor.
//!
//! One supervisor task owns the connection registry. Everything else talks
//! to it through three channels: `register`, `unregister`, and `broadcast`.
//! Count queries read a snapshot behind a readers-writer lock that only the
//! supervisor writes after each mutation.

use std::collections::HashMap;
use std::sync::Arc;

use hermes_core::{ShutdownSignal, SyncConfig, TaskTracker};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{ClientHandle, ConnectionId, Transport};
use crate::envelope::Envelope;
use crate::error::{SyncError, SyncResult};

/// Capacity of the register and unregister channels.
///
/// These carry rare control messages; the broadcast channel uses the
/// configured buffer size instead.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// A point-in-time view of the registry, readable without touching the
/// supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Connections currently registered.
    pub client_count: usize,
    /// Duplex (WebSocket) connections.
    pub duplex_count: usize,
    /// One-way (SSE) connections.
    pub stream_count: usize,
    /// Connections registered over the hub's lifetime.
    pub total_registered: usize,
    /// Connections dropped for falling behind.
    pub total_dropped: usize,
}

struct Inboxes {
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Envelope>,
}

/// The single-process in-memory broker behind `/ws` and `/events`.
pub struct SyncHub {
    config: RwLock<SyncConfig>,
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Envelope>,
    inboxes: Mutex<Option<Inboxes>>,
    snapshot: RwLock<HubSnapshot>,
    shutdown: ShutdownSignal,
    tasks: TaskTracker,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncHub {
    /// Creates a hub. Call [`SyncHub::start`] to spawn its supervisor.
    #[must_use]
    pub fn new(config: SyncConfig) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.buffer_size.max(1));

        Arc::new(Self {
            config: RwLock::new(config),
            register_tx,
            unregister_tx,
            broadcast_tx,
            inboxes: Mutex::new(Some(Inboxes {
                register_rx,
                unregister_rx,
                broadcast_rx,
            })),
            snapshot: RwLock::new(HubSnapshot::default()),
            shutdown: ShutdownSignal::new(),
            tasks: TaskTracker::new(),
            supervisor: Mutex::new(None),
        })
    }

    /// Reapplies a configuration snapshot.
    ///
    /// The new buffer size applies to connections accepted from now on;
    /// existing queues keep the capacity they were created with.
    pub fn configure(&self, config: SyncConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Spawns the supervisor and heartbeat tasks. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Some(inboxes) = self.inboxes.lock().take() else {
            return;
        };

        let hub = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _token = hub.tasks.acquire();
            hub.supervise(inboxes).await;
        });
        *self.supervisor.lock() = Some(handle);

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let _token = hub.tasks.acquire();
            hub.run_heartbeat().await;
        });

        info!("sync hub started");
    }

    /// Registers a new subscriber with the supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once shutdown has begun.
    pub async fn register(&self, handle: ClientHandle) -> SyncResult<()> {
        if self.shutdown.is_triggered() {
            return Err(SyncError::NotRunning);
        }
        self.register_tx
            .send(handle)
            .await
            .map_err(|_| SyncError::NotRunning)
    }

    /// Asks the supervisor to remove a connection. Removal is idempotent.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Pushes an envelope onto the broadcast channel.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once the supervisor has exited.
    pub async fn broadcast(&self, envelope: Envelope) -> SyncResult<()> {
        self.broadcast_tx
            .send(envelope)
            .await
            .map_err(|_| SyncError::NotRunning)
    }

    /// Broadcasts an agent status change to subscribers of the subject.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once the supervisor has exited.
    pub async fn broadcast_agent_status(
        &self,
        subject_id: &str,
        status: &str,
        message: &str,
    ) -> SyncResult<()> {
        self.broadcast(Envelope::agent_status(subject_id, status, message))
            .await
    }

    /// Broadcasts a message update to subscribers of the subject.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once the supervisor has exited.
    pub async fn broadcast_message_update(
        &self,
        message_id: &str,
        content: &str,
        status: &str,
        subject_id: &str,
    ) -> SyncResult<()> {
        self.broadcast(Envelope::message_update(
            message_id, content, status, subject_id,
        ))
        .await
    }

    /// Broadcasts a session update to subscribers of the session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once the supervisor has exited.
    pub async fn broadcast_session_update(
        &self,
        session_id: &str,
        status: &str,
        data: serde_json::Value,
    ) -> SyncResult<()> {
        self.broadcast(Envelope::session_update(session_id, status, data))
            .await
    }

    /// Broadcasts an error event to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] once the supervisor has exited.
    pub async fn broadcast_error(&self, code: &str, message: &str, details: &str) -> SyncResult<()> {
        self.broadcast(Envelope::error(code, message, details)).await
    }

    /// Returns the sender used by reader tasks to unregister themselves.
    #[must_use]
    pub fn unregister_sender(&self) -> mpsc::Sender<ConnectionId> {
        self.unregister_tx.clone()
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.snapshot.read().client_count
    }

    /// Returns a point-in-time registry snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HubSnapshot {
        *self.snapshot.read()
    }

    /// Returns the tracker that counts per-connection tasks.
    #[must_use]
    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Returns the hub's shutdown signal, for per-connection tasks.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Shuts the hub down: stops accepting registrations, drains pending
    /// broadcasts best-effort, closes every outbound queue, and waits for
    /// per-connection tasks to exit or the deadline to pass.
    ///
    /// Returns `true` if everything drained within the deadline.
    pub async fn stop(&self, deadline: std::time::Duration) -> bool {
        self.shutdown.trigger();

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                warn!("hub supervisor did not exit within the shutdown deadline");
                return false;
            }
        }

        if tokio::time::timeout(deadline, self.tasks.wait_idle())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.active(),
                "connection tasks still running at shutdown deadline",
            );
            return false;
        }
        true
    }

    async fn supervise(&self, mut inboxes: Inboxes) {
        let mut registry: HashMap<ConnectionId, ClientHandle> = HashMap::new();

        loop {
            tokio::select! {
                Some(handle) = inboxes.register_rx.recv() => {
                    self.handle_register(&mut registry, handle);
                }
                Some(id) = inboxes.unregister_rx.recv() => {
                    self.handle_unregister(&mut registry, id);
                }
                Some(envelope) = inboxes.broadcast_rx.recv() => {
                    self.deliver(&mut registry, envelope);
                }
                _ = self.shutdown.recv() => break,
            }
        }

        // Drain pending broadcasts best-effort before closing the queues.
        while let Ok(envelope) = inboxes.broadcast_rx.try_recv() {
            self.deliver(&mut registry, envelope);
        }

        let remaining = registry.len();
        registry.clear();
        self.publish_snapshot(&registry);
        info!(connections = remaining, "sync hub shut down");
    }

    fn handle_register(&self, registry: &mut HashMap<ConnectionId, ClientHandle>, handle: ClientHandle) {
        let id = handle.id();
        let welcome = Envelope::welcome(&id.to_string());
        let enqueue = handle.try_enqueue(welcome);

        debug!(connection_id = %id, transport = %handle.transport(), "connection registered");
        registry.insert(id, handle);

        if enqueue.is_err() {
            // A connection that cannot even take its welcome is useless.
            registry.remove(&id);
            warn!(connection_id = %id, "dropped connection that rejected its welcome envelope");
        }

        let mut snapshot = self.snapshot.write();
        snapshot.total_registered += 1;
        drop(snapshot);
        self.publish_snapshot(registry);
    }

    fn handle_unregister(&self, registry: &mut HashMap<ConnectionId, ClientHandle>, id: ConnectionId) {
        if registry.remove(&id).is_some() {
            debug!(connection_id = %id, "connection unregistered");
            self.publish_snapshot(registry);
        }
    }

    /// Fans an envelope out to every matching connection.
    ///
    /// A full or closed outbound queue unregisters the connection before
    /// the next envelope is processed, so a slow consumer never adds
    /// latency for anyone else.
    fn deliver(&self, registry: &mut HashMap<ConnectionId, ClientHandle>, envelope: Envelope) {
        let mut dropped: Vec<ConnectionId> = Vec::new();

        for (id, handle) in registry.iter() {
            if !handle.wants(&envelope) {
                continue;
            }
            if handle.try_enqueue(envelope.clone()).is_err() {
                dropped.push(*id);
            }
        }

        if !dropped.is_empty() {
            for id in &dropped {
                registry.remove(id);
                warn!(connection_id = %id, "dropped slow consumer");
            }
            self.snapshot.write().total_dropped += dropped.len();
            self.publish_snapshot(registry);
        }
    }

    fn publish_snapshot(&self, registry: &HashMap<ConnectionId, ClientHandle>) {
        let mut duplex = 0;
        let mut stream = 0;
        for handle in registry.values() {
            match handle.transport() {
                Transport::Duplex => duplex += 1,
                Transport::EventStream => stream += 1,
            }
        }

        let mut snapshot = self.snapshot.write();
        snapshot.client_count = registry.len();
        snapshot.duplex_count = duplex;
        snapshot.stream_count = stream;
    }

    async fn run_heartbeat(&self) {
        loop {
            let interval = self.config.read().heartbeat_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if self.broadcast(Envelope::heartbeat()).await.is_err() {
                        break;
                    }
                }
                _ = self.shutdown.recv() => break,
            }
        }
        debug!("heartbeat task stopped");
    }
}
