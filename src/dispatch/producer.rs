//! Batch producer.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::request::Request;

/// Turns a fixed list of labels into queued requests.
#[derive(Debug, Clone, Default)]
pub struct Producer {
    labels: Vec<String>,
}

impl Producer {
    /// Create a producer for the given labels, in order.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of requests this producer will enqueue.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Enqueue every label in order, then close the queue.
    ///
    /// Returns the number of requests enqueued. This is less than `len()`
    /// only if the receiving side went away first.
    pub fn enqueue(self, tx: UnboundedSender<Request>) -> usize {
        let total = self.labels.len();
        let mut enqueued = 0;

        for (idx, label) in self.labels.into_iter().enumerate() {
            if tx.send(Request::new(idx + 1, label)).is_err() {
                warn!(
                    enqueued = enqueued,
                    dropped = total - enqueued,
                    "Dispatch queue closed before the batch was fully enqueued"
                );
                return enqueued;
            }
            enqueued += 1;
        }

        debug!(enqueued = enqueued, "Batch enqueued, closing queue");
        // Dropping the sender closes the queue
        drop(tx);
        enqueued
    }

    /// Run `enqueue` as its own task.
    pub fn spawn(self, tx: UnboundedSender<Request>) -> JoinHandle<usize> {
        tokio::spawn(async move { self.enqueue(tx) })
    }
}
