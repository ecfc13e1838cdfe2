//! # gridsync — collaborative tabular-data engine
//!
//! A proof-of-concept engine for multiplayer editing of a typed,
//! spreadsheet-like table. Clients edit against a local mirror, go offline
//! and accumulate edits, and reconcile through an authoritative coordinator
//! that totally orders every edit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   in-process calls   ┌─────────────┐
//! │ SyncClient  │ ◄──────────────────► │ SyncServer  │
//! │ (per user)  │  receive / callbacks │ (authority) │
//! └──────┬──────┘                      └──────┬──────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌─────────────┐
//! │ Table       │                      │ Table       │
//! │ (mirror)    │                      │ + history   │
//! └──────┬──────┘                      └──────┬──────┘
//!        │                                    │
//! ┌──────┴──────┐                     ┌───────┴───────┐
//! │ Outbox      │                     │ ShiftContext  │
//! │ (offline)   │                     │ (index rewrite)│
//! └─────────────┘                     └───────────────┘
//! ```
//!
//! The coordinator assigns each accepted edit a version, rewrites stale row
//! indices through shift contexts, rejects whole dependency groups when one
//! member conflicts, and broadcasts every outcome so that all online
//! clients converge on the same table.
//!
//! ## Modules
//!
//! - [`table`] — the typed table model and its contractual JSON view
//! - [`update`] — the eight-variant update taxonomy and shift-context
//!   index rewriting
//! - [`protocol`] — sync messages, peer identity, events, wire codec
//! - [`server`] — the authoritative coordinator
//! - [`client`] — the client node with mirror and offline outbox

pub mod client;
pub mod protocol;
pub mod server;
pub mod table;
pub mod update;

// Re-exports for convenience
pub use client::{ClientHandle, Outbox, SharedServer, SyncClient};
pub use protocol::{PeerInfo, ProtocolError, SyncEvent, SyncMessage};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use table::{CellType, CellValue, ColumnId, RowId, Table};
pub use update::{RowShift, ShiftContext, ShiftRecord, TableUpdate, UpdateError};
