use tokio::sync::mpsc;

use crate::aggregator::{AggregationSummary, PaginationProgress, ProgressSink};

/// Aggregation events
#[derive(Debug, Clone)]
pub enum ProgressEvent {
  /// Snapshot after a page attempt
  Progress(PaginationProgress),
  /// The run stopped
  Finished(AggregationSummary),
}

/// Progress sink that forwards every callback over a channel
#[derive(Clone)]
pub struct ChannelSink {
  tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
  fn on_progress(&self, progress: &PaginationProgress) {
    // A dropped receiver just means nobody is watching any more.
    let _ = self.tx.send(ProgressEvent::Progress(progress.clone()));
  }

  fn on_finished(&self, summary: &AggregationSummary) {
    let _ = self.tx.send(ProgressEvent::Finished(summary.clone()));
  }
}

/// Receiving end of a [`ChannelSink`]
pub struct ProgressEvents {
  rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressEvents {
  /// Create a connected sink and receiver
  pub fn channel() -> (ChannelSink, ProgressEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, ProgressEvents { rx })
  }

  /// Receive the next event; `None` once every sink is dropped
  pub async fn next(&mut self) -> Option<ProgressEvent> {
    self.rx.recv().await
  }
}
