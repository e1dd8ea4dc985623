use dashmap::DashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::models::LogEvent;

/// `run_id -> Channel<LogEvent>` (spec.md §4.5). One writer (the scheduler's run
/// task), one reader (the SSE endpoint); creation/deletion serialized by the map.
///
/// The sender lives in `channels` for the run's lifetime; the receiver sits in
/// `pending_receivers` until the SSE endpoint takes ownership of it, which
/// naturally enforces "exactly one subscriber per run" (spec.md §4.5).
///
/// Log publishes use an unbounded channel so a slow subscriber never blocks the
/// runner (spec.md §5 "suspension points").
#[derive(Default)]
pub struct StreamHub {
    channels: DashMap<Uuid, UnboundedSender<LogEvent>>,
    pending_receivers: DashMap<Uuid, UnboundedReceiver<LogEvent>>,
}

impl StreamHub {
    pub fn new() -> Self {
        StreamHub {
            channels: DashMap::new(),
            pending_receivers: DashMap::new(),
        }
    }

    /// Inserts a fresh channel for `run_id`. The receiver is held until the
    /// SSE endpoint calls [`StreamHub::take_receiver`].
    pub fn create(&self, run_id: Uuid) {
        let (tx, rx) = unbounded_channel();
        self.channels.insert(run_id, tx);
        self.pending_receivers.insert(run_id, rx);
    }

    /// Takes ownership of the receiver for `run_id`, if it hasn't already been
    /// taken. Returns `None` if the run never existed or already has a
    /// subscriber (spec.md §4.5 "exactly one subscriber per run").
    pub fn take_receiver(&self, run_id: Uuid) -> Option<UnboundedReceiver<LogEvent>> {
        self.pending_receivers.remove(&run_id).map(|(_, rx)| rx)
    }

    /// Whether a live channel still exists for `run_id` — used by the scheduler
    /// to detect a disconnected/removed subscriber between steps (spec.md §4.1
    /// step 1, §5 cancellation sources).
    pub fn exists(&self, run_id: Uuid) -> bool {
        self.channels.contains_key(&run_id)
    }

    /// Publishes `event`. Returns `false` if the channel is gone (client
    /// disconnected and the SSE endpoint already removed it).
    pub fn publish(&self, run_id: Uuid, event: LogEvent) -> bool {
        match self.channels.get(&run_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Removes the channel — called by the SSE endpoint on disconnect or after
    /// draining `__END__`.
    pub fn remove(&self, run_id: Uuid) {
        self.channels.remove(&run_id);
        self.pending_receivers.remove(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStatus;

    #[test]
    fn publish_after_removal_reports_failure() {
        let hub = StreamHub::new();
        let run_id = Uuid::new_v4();
        hub.create(run_id);
        assert!(hub.exists(run_id));
        hub.remove(run_id);
        assert!(!hub.exists(run_id));
        let ev = LogEvent::new(run_id, "x", LogStatus::Pending, false);
        assert!(!hub.publish(run_id, ev));
    }

    #[test]
    fn receiver_can_only_be_taken_once() {
        let hub = StreamHub::new();
        let run_id = Uuid::new_v4();
        hub.create(run_id);
        assert!(hub.take_receiver(run_id).is_some());
        assert!(hub.take_receiver(run_id).is_none());
    }

    #[tokio::test]
    async fn published_events_preserve_order() {
        let hub = StreamHub::new();
        let run_id = Uuid::new_v4();
        hub.create(run_id);
        let mut rx = hub.take_receiver(run_id).unwrap();
        for step in ["a", "b", "c"] {
            hub.publish(run_id, LogEvent::new(run_id, step, LogStatus::Pending, false));
        }
        let mut seen = vec![];
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().step);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
