//! Every step, the engine serialises the store into a [`Snapshot`] and hands it to a
//! [`PersistenceQueue`]. A single background thread writes the snapshots to an append-only dump,
//! so the physics loop never waits on I/O unless it asked for backpressure with
//! [`QueuePolicy::Block`].
//!
//! The dump starts with a [`DumpHeader`] and holds one frame per step, see [`format`].

/// Binary dump layout, encoding and decoding.
pub mod format;
/// Snapshot queue and background writer.
pub mod queue;

pub use format::{DumpHeader, DumpReader};
pub use queue::{PersistenceQueue, QueuePolicy, Snapshot, WriterReport};
