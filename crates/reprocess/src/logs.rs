use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::{LogEvent, LogReceiver};

/// Per-file log sequences fed by the engine's push stream
///
/// Cloning gives another handle to the same map. Lines are only ever
/// appended; within one path they keep emission order.
#[derive(Debug, Clone, Default)]
pub struct LogRouter {
    lines: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl LogRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the sequence of its path
    pub fn record(&self, event: LogEvent) {
        self.lock().entry(event.path).or_default().push(event.message);
    }

    /// Append a line produced outside the engine (scheduler notices)
    pub fn append(&self, path: &str, message: impl Into<String>) {
        self.lock()
            .entry(path.to_string())
            .or_default()
            .push(message.into());
    }

    /// Lines recorded for a path, oldest first
    pub fn get(&self, path: &str) -> Vec<String> {
        self.lock().get(path).cloned().unwrap_or_default()
    }

    pub fn len(&self, path: &str) -> usize {
        self.lock().get(path).map_or(0, |l| l.len())
    }

    pub fn clear(&self, path: &str) {
        self.lock().remove(path);
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Start draining an engine stream into this router
    ///
    /// Must be called inside a tokio runtime. The returned subscription owns
    /// the draining task.
    pub fn subscribe(&self, mut events: LogReceiver) -> LogSubscription {
        let router = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(ack) = flush_rx.recv() => {
                        while let Ok(event) = events.try_recv() {
                            router.record(event);
                        }
                        let _ = ack.send(());
                    }
                    event = events.recv() => match event {
                        Some(event) => router.record(event),
                        None => break,
                    },
                    _ = &mut stop_rx => {
                        // Keep what was already emitted, refuse anything newer
                        events.close();
                        while let Some(event) = events.recv().await {
                            router.record(event);
                        }
                        break;
                    }
                }
            }
            debug!("Log subscription finished");
        });

        LogSubscription {
            stop: Some(stop_tx),
            flush: LogFlush { requests: flush_tx },
            task: Some(task),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped subscription to an engine log stream
///
/// Released by [`LogSubscription::shutdown`], which waits until buffered
/// events are recorded, or by dropping it, which stops the task at once.
#[derive(Debug)]
pub struct LogSubscription {
    stop: Option<oneshot::Sender<()>>,
    flush: LogFlush,
    task: Option<JoinHandle<()>>,
}

/// Waits until a subscription has recorded every event already emitted
#[derive(Debug, Clone)]
pub struct LogFlush {
    requests: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl LogFlush {
    /// Returns at once if the subscription already ended
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.requests.send(ack_tx).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl LogSubscription {
    pub fn flusher(&self) -> LogFlush {
        self.flush.clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::log_channel;

    #[test]
    fn test_record_keeps_per_path_order() {
        let router = LogRouter::new();
        router.record(LogEvent::new("/a.mp4", "one"));
        router.record(LogEvent::new("/b.mp4", "other"));
        router.record(LogEvent::new("/a.mp4", "two"));

        assert_eq!(router.get("/a.mp4"), vec!["one", "two"]);
        assert_eq!(router.get("/b.mp4"), vec!["other"]);
        assert!(router.get("/c.mp4").is_empty());
    }

    #[test]
    fn test_clear_only_drops_one_path() {
        let router = LogRouter::new();
        router.append("/a.mp4", "x");
        router.append("/b.mp4", "y");
        router.clear("/a.mp4");

        assert_eq!(router.len("/a.mp4"), 0);
        assert_eq!(router.len("/b.mp4"), 1);

        router.clear_all();
        assert_eq!(router.len("/b.mp4"), 0);
    }

    #[tokio::test]
    async fn test_subscription_routes_interleaved_stream() {
        let router = LogRouter::new();
        let (tx, rx) = log_channel();
        let subscription = router.subscribe(rx);

        tx.emit("/a.mp4", "frame=1");
        tx.emit("/b.mp4", "frame=10");
        tx.emit("/a.mp4", "frame=2");
        tx.emit("/b.mp4", "frame=11");

        subscription.shutdown().await;

        assert_eq!(router.get("/a.mp4"), vec!["frame=1", "frame=2"]);
        assert_eq!(router.get("/b.mp4"), vec!["frame=10", "frame=11"]);

        // Nobody listens anymore; emitting must not panic
        tx.emit("/a.mp4", "late");
        assert_eq!(router.len("/a.mp4"), 2);
    }

    #[tokio::test]
    async fn test_flush_records_everything_already_emitted() {
        let router = LogRouter::new();
        let (tx, rx) = log_channel();
        let subscription = router.subscribe(rx);

        for i in 0..100 {
            tx.emit("/a.mp4", format!("frame={}", i));
        }
        subscription.flusher().flush().await;
        assert_eq!(router.len("/a.mp4"), 100);

        router.append("/a.mp4", "done");
        assert_eq!(router.get("/a.mp4").last().map(String::as_str), Some("done"));
        subscription.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_after_shutdown_returns() {
        let router = LogRouter::new();
        let (_tx, rx) = log_channel();
        let subscription = router.subscribe(rx);
        let flush = subscription.flusher();

        subscription.shutdown().await;
        flush.flush().await;
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let router = LogRouter::new();
        let (tx, rx) = log_channel();
        let subscription = router.subscribe(rx);

        tx.emit("/a.mp4", "last words");
        drop(tx);

        subscription.shutdown().await;
        assert_eq!(router.get("/a.mp4"), vec!["last words"]);
    }
}
