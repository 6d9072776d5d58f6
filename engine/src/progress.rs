//! Progress events emitted by a running batch.
//!
//! Workers publish immutable status snapshots onto a channel; a single
//! reporting loop (CLI, GUI, test harness) consumes them. This keeps the
//! engine decoupled from any UI technology without sharing mutable job
//! state across threads.
//!
//! Transitions for one job arrive in order (Running, then exactly one
//! terminal state); interleaving across different jobs is unspecified.

use crossbeam_channel::Sender;

use crate::model::{BatchSummary, ConversionJob};

/// One message on the progress channel.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Dispatch is about to begin
    BatchStarted { total: usize },
    /// A job changed state; carries a snapshot of the job
    JobChanged(ConversionJob),
    /// Every job has reached a terminal state
    BatchFinished(BatchSummary),
}

/// Send an event, ignoring a disconnected receiver so headless callers
/// may simply drop the receiving side.
pub(crate) fn emit(progress: Option<&Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(sender) = progress {
        let _ = sender.send(event);
    }
}
