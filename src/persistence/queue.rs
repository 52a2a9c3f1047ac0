use crate::{
    error::{Error, Result},
    math::Float,
    persistence::format::{encode_frame, DumpHeader},
    storage::ParticleStore,
};
use flume::{Receiver, Sender, TrySendError};
use serde::Deserialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    thread::JoinHandle,
};

/// Serialised state of a store at the end of a step.
///
/// The bytes are a deep copy of the store: the engine keeps mutating the store while the
/// snapshot waits in the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Index of the step the snapshot was taken after, starting at zero.
    pub step: u64,
    /// Encoded frame, written verbatim.
    pub bytes: Vec<u8>,
}

impl Snapshot {
    /// Creates a new [`Snapshot`] from already encoded bytes.
    #[inline]
    pub fn new(step: u64, bytes: Vec<u8>) -> Self {
        Self { step, bytes }
    }

    /// Encodes the current state of the store.
    pub fn capture<S: Float, const D: usize>(
        step: u64,
        store: &ParticleStore<S, D>,
        with_mass: bool,
    ) -> Self {
        let mut bytes = Vec::new();
        encode_frame(store, with_mass, &mut bytes);
        Self { step, bytes }
    }
}

/// What the producer does when the queue holds as many snapshots as its capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// The queue grows without limit and the producer never waits.
    #[default]
    Unbounded,
    /// The producer waits until the writer has made room.
    Block {
        /// Maximum number of pending snapshots.
        capacity: usize,
    },
    /// The producer discards the oldest pending snapshot to make room.
    DropOldest {
        /// Maximum number of pending snapshots.
        capacity: usize,
    },
}

impl QueuePolicy {
    /// Returns the maximum number of pending snapshots, `None` if unbounded.
    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        match *self {
            Self::Unbounded => None,
            Self::Block { capacity } | Self::DropOldest { capacity } => Some(capacity),
        }
    }
}

/// Statistics of a finished persistence queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Number of snapshots written to the sink.
    pub snapshots_written: u64,
    /// Number of bytes written to the sink, excluding the header.
    pub bytes_written: u64,
    /// Number of snapshots discarded by the producer.
    pub dropped: u64,
}

/// FIFO of [`Snapshot`]s drained into a sink by one background writer thread.
///
/// Snapshots are written verbatim in the order they were enqueued. The writer flushes the sink
/// whenever it has caught up with the producer. After a write failure it keeps draining the
/// queue without writing, so the producer is never blocked, and the failure is reported by
/// [`finish`](PersistenceQueue::finish).
///
/// Dropping the queue drains it the same way and logs the outcome.
#[derive(Debug)]
pub struct PersistenceQueue {
    sender: Option<Sender<Snapshot>>,
    evictor: Option<Receiver<Snapshot>>,
    policy: QueuePolicy,
    dropped: u64,
    writer: Option<JoinHandle<Result<WriterReport>>>,
}

impl PersistenceQueue {
    /// Name of the writer thread.
    pub const THREAD_NAME: &'static str = "particle-box-writer";

    /// Starts a writer thread draining the queue into the given sink.
    pub fn spawn<W: Write + Send + 'static>(sink: W, policy: QueuePolicy) -> Result<Self> {
        if policy.capacity() == Some(0) {
            return Err(Error::config("persistence queue capacity must be > 0"));
        }

        let (sender, receiver) = match policy.capacity() {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };
        let evictor = matches!(policy, QueuePolicy::DropOldest { .. }).then(|| receiver.clone());

        let writer = std::thread::Builder::new()
            .name(Self::THREAD_NAME.to_owned())
            .spawn(move || drain(sink, receiver))?;

        tracing::debug!(?policy, "persistence writer started");

        Ok(Self {
            sender: Some(sender),
            evictor,
            policy,
            dropped: 0,
            writer: Some(writer),
        })
    }

    /// Writes the header to the sink, then starts the writer thread.
    pub fn spawn_with_header<W: Write + Send + 'static, const D: usize>(
        mut sink: W,
        header: &DumpHeader<D>,
        policy: QueuePolicy,
    ) -> Result<Self> {
        header.write_to(&mut sink)?;
        Self::spawn(sink, policy)
    }

    /// Creates the dump file at `path`, writes its header and starts the writer thread.
    pub fn create<P: AsRef<Path>, const D: usize>(
        path: P,
        header: &DumpHeader<D>,
        policy: QueuePolicy,
    ) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "dump file created");
        Self::spawn_with_header(BufWriter::new(file), header, policy)
    }

    /// Returns the policy of the queue.
    #[inline]
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Returns the number of snapshots waiting to be written.
    #[inline]
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Returns the number of snapshots discarded so far.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Hands a snapshot over to the writer.
    ///
    /// Only waits under [`QueuePolicy::Block`] when the queue is full. Under
    /// [`QueuePolicy::DropOldest`], the oldest pending snapshot is discarded instead.
    pub fn enqueue(&mut self, snapshot: Snapshot) {
        let Some(sender) = &self.sender else {
            self.dropped += 1;
            return;
        };

        match self.policy {
            QueuePolicy::Unbounded | QueuePolicy::Block { .. } => {
                if let Err(flume::SendError(lost)) = sender.send(snapshot) {
                    tracing::error!(step = lost.step, "persistence writer is gone, snapshot lost");
                    self.dropped += 1;
                }
            }
            QueuePolicy::DropOldest { .. } => {
                let mut snapshot = snapshot;
                loop {
                    match sender.try_send(snapshot) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            let evicted = self.evictor.as_ref().and_then(|r| r.try_recv().ok());
                            if let Some(oldest) = evicted {
                                tracing::warn!(
                                    step = oldest.step,
                                    "persistence queue full, dropping oldest snapshot"
                                );
                                self.dropped += 1;
                            }
                            snapshot = back;
                        }
                        Err(TrySendError::Disconnected(lost)) => {
                            tracing::error!(
                                step = lost.step,
                                "persistence writer is gone, snapshot lost"
                            );
                            self.dropped += 1;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Closes the queue, waits for the writer to write every pending snapshot and returns its
    /// report, or the first error it ran into.
    pub fn finish(mut self) -> Result<WriterReport> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<WriterReport> {
        self.sender = None;
        self.evictor = None;

        let report = match self.writer.take() {
            Some(writer) => writer.join().map_err(|_| Error::WriterPanicked)??,
            None => WriterReport::default(),
        };

        Ok(WriterReport {
            dropped: self.dropped,
            ..report
        })
    }
}

impl Drop for PersistenceQueue {
    fn drop(&mut self) {
        if self.writer.is_none() {
            return;
        }

        match self.shutdown() {
            Ok(report) => tracing::debug!(?report, "persistence queue drained on drop"),
            Err(e) => tracing::error!(error = %e, "persistence queue drained on drop"),
        }
    }
}

fn drain<W: Write>(mut sink: W, receiver: Receiver<Snapshot>) -> Result<WriterReport> {
    let mut report = WriterReport::default();
    let mut failure = None;
    let mut last_step = 0;

    for snapshot in receiver.iter() {
        if failure.is_some() {
            continue;
        }

        let written = sink.write_all(&snapshot.bytes).and_then(|()| {
            if receiver.is_empty() {
                sink.flush()
            } else {
                Ok(())
            }
        });

        match written {
            Ok(()) => {
                report.snapshots_written += 1;
                report.bytes_written += snapshot.bytes.len() as u64;
                last_step = snapshot.step;
            }
            Err(source) => {
                tracing::error!(
                    step = snapshot.step,
                    error = %source,
                    "failed to write snapshot, discarding the following ones"
                );
                failure = Some(Error::Persistence {
                    step: snapshot.step,
                    source,
                });
            }
        }
    }

    if failure.is_none() {
        if let Err(source) = sink.flush() {
            failure = Some(Error::Persistence {
                step: last_step,
                source,
            });
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            tracing::debug!(
                snapshots = report.snapshots_written,
                bytes = report.bytes_written,
                "persistence writer drained"
            );
            Ok(report)
        }
    }
}
