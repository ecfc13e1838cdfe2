//! Client node: local mirror, offline outbox, and server callbacks.
//!
//! A client mirrors the authoritative table at its last synced version and
//! never applies its own edits optimistically: the mirror changes only on
//! `sync` and `accepted` callbacks from the coordinator. Edits made while
//! offline wait in an [`Outbox`] and are replayed in order on reconnect.
//!
//! ```text
//!            edit method
//!                 │
//!        ┌────────┴────────┐
//!   online│                │offline
//!        ▼                 ▼
//!  server.receive()    outbox.enqueue()
//!        │                 │
//!        │   come_online   │
//!        │◄────────────────┘  (drained in order)
//!        ▼
//!  accepted/rejected broadcast ──► mirror / event log
//! ```
//!
//! Messages authored between two group rotations share a group id; the
//! group rotates when a sync carries a strictly newer version (a new
//! baseline) and on every accepted broadcast.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, SyncEvent, SyncMessage};
use crate::server::SyncServer;
use crate::table::{CellType, Table};
use crate::update::TableUpdate;

/// Shared coordinator handle, as handed to clients.
pub type SharedServer = Arc<Mutex<SyncServer>>;

/// Shared client state, as registered with the coordinator for callbacks.
pub type ClientHandle = Arc<Mutex<ClientState>>;

/// Default bound on pending offline edits.
const DEFAULT_OUTBOX_CAPACITY: usize = 10_000;

// ───────────────────────────────────────────────────────────────────
// Outbox
// ───────────────────────────────────────────────────────────────────

/// FIFO of messages authored while offline, replayed on reconnection.
pub struct Outbox {
    queue: VecDeque<SyncMessage>,
    max_size: usize,
}

impl Outbox {
    /// Create an outbox with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self { queue: VecDeque::with_capacity(max_size.min(1024)), max_size }
    }

    /// Queue a message for later replay. Returns `false` when full.
    pub fn enqueue(&mut self, message: SyncMessage) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(message);
        true
    }

    /// Drain all queued messages in send order.
    pub fn drain(&mut self) -> Vec<SyncMessage> {
        self.queue.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncMessage> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

// ───────────────────────────────────────────────────────────────────
// Client state (callback side)
// ───────────────────────────────────────────────────────────────────

/// The mirror-side state of a client. While connected, the coordinator
/// holds a [`ClientHandle`] to this and delivers `sync`, `accepted`, and
/// `rejected` into it; the owning [`SyncClient`] drives everything else.
pub struct ClientState {
    info: PeerInfo,
    mirror: Table,
    outbox: Outbox,
    version: u64,
    group_id: Uuid,
    online: bool,
    events: Vec<SyncEvent>,
}

impl ClientState {
    pub(crate) fn new(info: PeerInfo) -> Self {
        Self {
            info,
            mirror: Table::new(),
            outbox: Outbox::new(DEFAULT_OUTBOX_CAPACITY),
            version: 0,
            group_id: Uuid::new_v4(),
            online: false,
            events: Vec::new(),
        }
    }

    /// Full-state sync from the coordinator. A strictly newer version is a
    /// new baseline, so the dependency group rotates.
    pub(crate) fn sync(&mut self, table: Table, version: u64) {
        self.mirror = table;
        if version > self.version {
            self.group_id = Uuid::new_v4();
        }
        self.version = version;
        self.events.push(SyncEvent::Synced { version });
        log::debug!("peer {} synced to version {version}", self.info.name);
    }

    /// An accepted broadcast. Must arrive exactly in version order; the
    /// replay must succeed because the coordinator already validated and
    /// transformed the update against the state this mirror equals.
    pub(crate) fn accepted(&mut self, message: SyncMessage) -> Result<(), ProtocolError> {
        if message.version != self.version + 1 {
            return Err(ProtocolError::OutOfOrder {
                current: self.version,
                got: message.version,
            });
        }
        message.update.apply(&mut self.mirror)?;
        self.version = message.version;
        self.group_id = Uuid::new_v4();
        self.events.push(SyncEvent::Accepted {
            message_id: message.message_id,
            version: message.version,
        });
        Ok(())
    }

    /// A rejected broadcast. Nothing was applied anywhere, so there is
    /// nothing to roll back; the event is recorded for the host.
    pub(crate) fn rejected(&mut self, message_id: Uuid, group_id: Uuid) {
        log::debug!(
            "peer {} saw rejection of message {message_id} (group {group_id})",
            self.info.name
        );
        self.events.push(SyncEvent::Rejected { message_id, group_id });
    }

    /// The table this client would show its host right now: the mirror
    /// when online, the mirror with the outbox replayed best-effort when
    /// offline. Replay failures are skipped; they will fail at the server
    /// too.
    pub(crate) fn materialized(&self) -> Table {
        let mut view = self.mirror.snapshot();
        if !self.online {
            for message in self.outbox.iter() {
                if message.update.apply(&mut view).is_err() {
                    log::trace!(
                        "outbox message {} does not apply locally",
                        message.message_id
                    );
                }
            }
        }
        view
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn mirror(&self) -> &Table {
        &self.mirror
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }
}

// ───────────────────────────────────────────────────────────────────
// Client API
// ───────────────────────────────────────────────────────────────────

/// A collaborating client node.
///
/// Edit methods wrap the corresponding [`TableUpdate`] in a message stamped
/// with the client's baseline version and current group id, then either
/// send it (online) or queue it (offline). They return the fresh message id
/// so the host can correlate later `Rejected` events.
pub struct SyncClient {
    state: ClientHandle,
    server: SharedServer,
}

impl SyncClient {
    /// Create a client that starts offline with an empty mirror.
    pub fn new(info: PeerInfo, server: SharedServer) -> Self {
        Self { state: Arc::new(Mutex::new(ClientState::new(info))), server }
    }

    /// Create a client and immediately come online.
    pub fn online(info: PeerInfo, server: SharedServer) -> Result<Self, ProtocolError> {
        let client = Self::new(info, server);
        client.come_online()?;
        Ok(client)
    }

    /// Register with the coordinator (receiving a full sync), then deliver
    /// every queued message in send order.
    pub fn come_online(&self) -> Result<(), ProtocolError> {
        let info = self.state.lock().unwrap().info.clone();
        let mut server = self.server.lock().unwrap();
        server.connected(info, Arc::clone(&self.state))?;

        let drained = {
            let mut state = self.state.lock().unwrap();
            state.online = true;
            state.outbox.drain()
        };
        for message in drained {
            server.receive(message);
        }
        Ok(())
    }

    /// Deregister from the coordinator. Pending edits stay queued.
    pub fn go_offline(&self) {
        let peer_id = self.state.lock().unwrap().info.peer_id;
        self.server.lock().unwrap().disconnected(peer_id);
        self.state.lock().unwrap().online = false;
    }

    /// The materialized view in the contractual JSON shape: the mirror when
    /// online, mirror plus outbox when offline.
    pub fn get_data(&self) -> String {
        self.state.lock().unwrap().materialized().to_json()
    }

    // Edit methods, one per update variant.

    pub fn create_row(&self, row: impl Into<String>) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::CreateRow { row: row.into() })
    }

    pub fn destroy_row(&self, row: impl Into<String>) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::DestroyRow { row: row.into() })
    }

    pub fn move_row(&self, row: impl Into<String>, target: usize) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::MoveRow { row: row.into(), target })
    }

    pub fn create_column(
        &self,
        column: impl Into<String>,
        cell_type: CellType,
    ) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::CreateColumn { column: column.into(), cell_type })
    }

    pub fn destroy_column(&self, column: impl Into<String>) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::DestroyColumn { column: column.into() })
    }

    pub fn update_column_type(
        &self,
        column: impl Into<String>,
        cell_type: CellType,
    ) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::UpdateColumnType { column: column.into(), cell_type })
    }

    pub fn update_text_cell(
        &self,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::UpdateTextCell {
            row: row.into(),
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn update_number_cell(
        &self,
        row: impl Into<String>,
        column: impl Into<String>,
        value: f64,
    ) -> Result<Uuid, ProtocolError> {
        self.submit(TableUpdate::UpdateNumberCell {
            row: row.into(),
            column: column.into(),
            value,
        })
    }

    fn submit(&self, update: TableUpdate) -> Result<Uuid, ProtocolError> {
        let (message, online) = {
            let state = self.state.lock().unwrap();
            (SyncMessage::new(state.version, state.group_id, update), state.online)
        };
        let message_id = message.message_id;
        if online {
            self.server.lock().unwrap().receive(message);
        } else {
            let mut state = self.state.lock().unwrap();
            let capacity = state.outbox.capacity();
            if !state.outbox.enqueue(message) {
                return Err(ProtocolError::OutboxFull { capacity });
            }
        }
        Ok(message_id)
    }

    // Introspection.

    pub fn peer_id(&self) -> Uuid {
        self.state.lock().unwrap().info.peer_id
    }

    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    pub fn group_id(&self) -> Uuid {
        self.state.lock().unwrap().group_id
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().unwrap().online
    }

    pub fn outbox_len(&self) -> usize {
        self.state.lock().unwrap().outbox.len()
    }

    /// Drain recorded sync events (can be called repeatedly).
    pub fn take_events(&self) -> Vec<SyncEvent> {
        self.state.lock().unwrap().take_events()
    }

    /// The shared state handle, as registered with the coordinator.
    pub fn handle(&self) -> ClientHandle {
        Arc::clone(&self.state)
    }
}
