//! The FIFO ordering gate.
//!
//! Operations on a shard must become visible in the order they were
//! accepted, yet each may suspend while acquiring its B-tree view. The
//! gate decouples *entry order* from *execution*: a caller stamps in at
//! the [`FifoSource`] when the operation is accepted, then awaits its
//! ticket at the [`FifoSink`] just before touching the tree.
//!
//! # Epochs
//!
//! Each write opens a new epoch. A read stamped in epoch E may pass once
//! every write of an earlier epoch has released; reads within an epoch do
//! not order against each other. The write closing epoch E passes only
//! after the exact number of reads stamped before it in E have released,
//! so a write observes every earlier-accepted operation.
//!
//! # Dropped tickets
//!
//! A ticket is a move-only handle whose destructor releases its slot,
//! whether it was awaited, held through an operation, or abandoned after
//! a cancelled wait. Releases for epochs the sink has not reached yet are
//! banked and folded in as the sink advances, so a cancelled operation
//! never stalls the queue.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::ShardError;
use crate::interrupt::Interruptor;

// ============================================================================
// Source
// ============================================================================

/// An entry stamp for a read, issued at acceptance time.
#[derive(Debug, Clone, Copy)]
pub struct ReadStamp {
    epoch: u64,
}

/// An entry stamp for a write, issued at acceptance time.
#[derive(Debug, Clone, Copy)]
pub struct WriteStamp {
    epoch: u64,
    preceding_reads: u64,
}

#[derive(Debug, Default)]
struct SourceState {
    epoch: u64,
    reads_entered: u64,
}

/// Issues entry stamps in acceptance order.
#[derive(Debug, Default)]
pub struct FifoSource {
    state: Mutex<SourceState>,
}

impl FifoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_read(&self) -> ReadStamp {
        let mut state = self.state.lock().unwrap();
        state.reads_entered += 1;
        ReadStamp { epoch: state.epoch }
    }

    pub fn enter_write(&self) -> WriteStamp {
        let mut state = self.state.lock().unwrap();
        let stamp = WriteStamp {
            epoch: state.epoch,
            preceding_reads: state.reads_entered,
        };
        state.epoch += 1;
        state.reads_entered = 0;
        stamp
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Default)]
struct SinkState {
    /// The epoch currently draining.
    epoch: u64,
    /// Reads of the current epoch that have released.
    reads_released: u64,
    /// Read releases banked for future epochs.
    early_reads: HashMap<u64, u64>,
    /// Released writes by epoch, with their preceding-read counts.
    finished_writes: HashMap<u64, u64>,
}

/// Advances past every epoch whose write has released and whose reads
/// have all drained.
fn advance(state: &mut SinkState) {
    while let Some(&preceding_reads) = state.finished_writes.get(&state.epoch) {
        if state.reads_released != preceding_reads {
            break;
        }
        state.finished_writes.remove(&state.epoch);
        state.epoch += 1;
        state.reads_released = state.early_reads.remove(&state.epoch).unwrap_or(0);
    }
}

#[derive(Debug, Default)]
struct SinkShared {
    state: Mutex<SinkState>,
    notify: Notify,
}

/// Orders stamped operations for execution.
#[derive(Debug, Clone, Default)]
pub struct FifoSink {
    shared: Arc<SinkShared>,
}

impl FifoSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a read for ordering; the returned ticket must be
    /// awaited before the read touches the tree.
    pub fn exit_read(&self, stamp: ReadStamp) -> ReadTicket {
        ReadTicket {
            shared: Arc::clone(&self.shared),
            epoch: stamp.epoch,
        }
    }

    /// Registers a write for ordering.
    pub fn exit_write(&self, stamp: WriteStamp) -> WriteTicket {
        WriteTicket {
            shared: Arc::clone(&self.shared),
            epoch: stamp.epoch,
            preceding_reads: stamp.preceding_reads,
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// A read's place in line. Dropping it releases the slot.
#[derive(Debug)]
pub struct ReadTicket {
    shared: Arc<SinkShared>,
    epoch: u64,
}

impl ReadTicket {
    /// Waits until every earlier-epoch write has released, or the
    /// interruptor fires.
    pub async fn wait(&self, interruptor: &Interruptor) -> Result<(), ShardError> {
        loop {
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            {
                let state = self.shared.state.lock().unwrap();
                if state.epoch >= self.epoch {
                    return Ok(());
                }
            }
            tokio::select! {
                () = &mut notified => {}
                () = interruptor.fired() => return Err(ShardError::Interrupted),
            }
        }
    }
}

impl Drop for ReadTicket {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if self.epoch == state.epoch {
            state.reads_released += 1;
        } else {
            debug_assert!(self.epoch > state.epoch, "read released after its epoch closed");
            *state.early_reads.entry(self.epoch).or_default() += 1;
        }
        advance(&mut state);
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

/// A write's place in line. Dropping it releases the slot.
#[derive(Debug)]
pub struct WriteTicket {
    shared: Arc<SinkShared>,
    epoch: u64,
    preceding_reads: u64,
}

impl WriteTicket {
    /// Waits until this write's epoch is current and every read stamped
    /// before it has released, or the interruptor fires.
    pub async fn wait(&self, interruptor: &Interruptor) -> Result<(), ShardError> {
        loop {
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            {
                let state = self.shared.state.lock().unwrap();
                debug_assert!(state.epoch <= self.epoch, "write epoch already drained");
                if state.epoch == self.epoch && state.reads_released == self.preceding_reads {
                    return Ok(());
                }
            }
            tokio::select! {
                () = &mut notified => {}
                () = interruptor.fired() => return Err(ShardError::Interrupted),
            }
        }
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.finished_writes.insert(self.epoch, self.preceding_reads);
        advance(&mut state);
        drop(state);
        self.shared.notify.notify_waiters();
    }
}
