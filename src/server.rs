//! Authoritative coordinator: total ordering, index rewriting, accept/reject
//! broadcast.
//!
//! ```text
//! Client A ──┐                        ┌──► accepted(m) ──► every client
//!            ├──► pending FIFO ──► process ──┤
//! Client B ──┘         │                     └──► rejected(id, group)
//!                      │
//!            ┌─────────┴──────────┐
//!            │ failed-group set   │  (dependent messages elided silently)
//!            │ history[1..=v]     │  (accepted update + RowShift each)
//!            │ authoritative table│
//!            └────────────────────┘
//! ```
//!
//! The total order over edits is exactly arrival order in the pending
//! queue. A message whose baseline predates the current version has its
//! positional indices rewritten through a [`ShiftContext`] folded from every
//! accepted update after that baseline, then applies or rejects atomically.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 9
//! (total order broadcast).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::client::ClientHandle;
use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};
use crate::table::Table;
use crate::update::{RowShift, ShiftContext};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Processing cadence. `0` drains the pending queue on every receive;
    /// any larger value defers draining to an explicit [`SyncServer::tick`],
    /// batching whatever arrived in between. The value does not change
    /// semantics, only batching.
    pub process_delay: u64,
    /// Maximum simultaneously connected clients.
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { process_delay: 0, max_clients: 100 }
    }
}

/// Server statistics, snapshotted via [`SyncServer::stats`].
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_clients: usize,
    pub messages_received: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Messages dropped silently because their group had already failed.
    pub elided: u64,
}

/// One accepted update: the broadcast message (post-transform, with its
/// assigned version) plus the row-shift bookkeeping its apply produced.
struct HistoryEntry {
    message: SyncMessage,
    shift: RowShift,
}

/// The coordinator. Owns the authoritative table and the accepted history;
/// clients register a [`ClientHandle`] on connect and receive `sync`,
/// `accepted`, and `rejected` callbacks.
pub struct SyncServer {
    config: ServerConfig,
    table: Table,
    /// Accepted updates; `history[i]` holds version `i + 1`.
    history: Vec<HistoryEntry>,
    pending: VecDeque<SyncMessage>,
    /// Groups with at least one rejection. Monotone: later members of a
    /// failed group are elided without a broadcast.
    failed_groups: HashSet<Uuid>,
    clients: HashMap<Uuid, ClientHandle>,
    stats: ServerStats,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            table: Table::new(),
            history: Vec::new(),
            pending: VecDeque::new(),
            failed_groups: HashSet::new(),
            clients: HashMap::new(),
            stats: ServerStats::default(),
        }
    }

    /// Create with default configuration (immediate processing).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// The version of the newest accepted update; `0` for the empty state.
    pub fn current_version(&self) -> u64 {
        self.history.len() as u64
    }

    /// Owned deep copy of the authoritative table.
    pub fn snapshot(&self) -> Table {
        self.table.snapshot()
    }

    /// The authoritative table in the contractual JSON shape.
    pub fn table_json(&self) -> String {
        self.table.to_json()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ───────────────────────────────────────────────────────────────
    // Client lifecycle
    // ───────────────────────────────────────────────────────────────

    /// Register a client and deliver a snapshot of the current state. After
    /// this call the client is synced to the server's current version.
    pub fn connected(
        &mut self,
        info: PeerInfo,
        handle: ClientHandle,
    ) -> Result<(), ProtocolError> {
        if self.clients.len() >= self.config.max_clients
            && !self.clients.contains_key(&info.peer_id)
        {
            return Err(ProtocolError::ServerFull { max_clients: self.config.max_clients });
        }
        log::info!(
            "peer {} ({}) connected at version {}",
            info.name,
            info.peer_id,
            self.current_version()
        );
        self.clients.insert(info.peer_id, Arc::clone(&handle));
        self.stats.total_connections += 1;
        self.stats.active_clients = self.clients.len();

        handle.lock().unwrap().sync(self.table.snapshot(), self.current_version());
        Ok(())
    }

    /// Remove a client from the connected set. No other state changes; the
    /// client will receive a full sync on its next connect.
    pub fn disconnected(&mut self, peer_id: Uuid) {
        if self.clients.remove(&peer_id).is_some() {
            log::info!("peer {peer_id} disconnected");
        }
        self.stats.active_clients = self.clients.len();
    }

    // ───────────────────────────────────────────────────────────────
    // Message intake and processing
    // ───────────────────────────────────────────────────────────────

    /// Enqueue a message. With `process_delay == 0` the queue is drained
    /// immediately; otherwise it waits for the next [`tick`](Self::tick).
    pub fn receive(&mut self, message: SyncMessage) {
        self.stats.messages_received += 1;
        self.pending.push_back(message);
        if self.config.process_delay == 0 {
            self.process_pending();
        }
    }

    /// Drain the pending queue. The host drives this when a non-zero
    /// `process_delay` is configured.
    pub fn tick(&mut self) {
        self.process_pending();
    }

    fn process_pending(&mut self) {
        while let Some(mut message) = self.pending.pop_front() {
            if self.failed_groups.contains(&message.group_id) {
                log::debug!(
                    "eliding {} message {} (group {} already failed)",
                    message.update.label(),
                    message.message_id,
                    message.group_id
                );
                self.stats.elided += 1;
                continue;
            }

            if message.update.needs_transform() {
                let ctx = self.shift_context_since(message.version);
                log::trace!(
                    "transforming message {} through {} shift records",
                    message.message_id,
                    ctx.len()
                );
                if let Err(e) = message.update.transform(&ctx) {
                    log::warn!("transform conflict for message {}: {e}", message.message_id);
                    self.reject(&message);
                    continue;
                }
            }

            match message.update.apply(&mut self.table) {
                Ok(shift) => self.accept(message, shift),
                Err(e) => {
                    log::warn!(
                        "merge conflict for {} message {}: {e}",
                        message.update.label(),
                        message.message_id
                    );
                    self.reject(&message);
                }
            }
            debug_assert!(self.table.is_consistent());
        }
    }

    /// Fold the shift contributions of every accepted update strictly after
    /// `baseline` into a fresh context.
    fn shift_context_since(&self, baseline: u64) -> ShiftContext {
        let mut ctx = ShiftContext::new();
        for entry in self.history.iter().skip(baseline as usize) {
            entry.shift.record(&mut ctx);
        }
        ctx
    }

    fn accept(&mut self, mut message: SyncMessage, shift: RowShift) {
        message.version = self.current_version() + 1;
        self.stats.accepted += 1;
        log::debug!(
            "accepted {} message {} as version {}",
            message.update.label(),
            message.message_id,
            message.version
        );
        self.history.push(HistoryEntry { message: message.clone(), shift });
        self.broadcast_accepted(message);
    }

    fn reject(&mut self, message: &SyncMessage) {
        self.failed_groups.insert(message.group_id);
        self.stats.rejected += 1;
        for handle in self.clients.values() {
            handle.lock().unwrap().rejected(message.message_id, message.group_id);
        }
    }

    /// Deliver an acceptance to every connected client. A client whose
    /// replay fails has violated the protocol and is dropped; it can
    /// recover by reconnecting for a full sync.
    fn broadcast_accepted(&mut self, message: SyncMessage) {
        let mut dead = Vec::new();
        for (peer_id, handle) in &self.clients {
            if let Err(e) = handle.lock().unwrap().accepted(message.clone()) {
                log::error!(
                    "peer {peer_id} failed replaying version {}: {e}; dropping",
                    message.version
                );
                dead.push(*peer_id);
            }
        }
        for peer_id in dead {
            self.clients.remove(&peer_id);
        }
        self.stats.active_clients = self.clients.len();
    }
}
