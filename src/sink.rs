//! Non-blocking hand-off of [`SessionEvent`]s to the display layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::SessionEvent;

/// Cloneable sender used by every producer of display updates.
///
/// Uses `try_send`: when the display falls behind, new events are dropped
/// rather than stalling the driver or the scheduler.  Every event fully
/// replaces the value it describes, so this only costs staleness.
#[derive(Clone)]
pub struct DisplaySink {
    tx: mpsc::Sender<SessionEvent>,
    dropped: Arc<AtomicU64>,
}

impl DisplaySink {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a sink and the receiving end handed to the display.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n <= 3 || n % 500 == 0 {
                    warn!("Display sink full, dropped {n} update(s) so far");
                }
            }
            Err(TrySendError::Closed(_)) => debug!("Display sink closed, update discarded"),
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for e in events {
            self.emit(e);
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(SessionEvent::Status(text.into()));
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.emit(SessionEvent::Warning(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(SessionEvent::Error(text.into()));
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sink_drops_instead_of_blocking() {
        let (sink, mut rx) = DisplaySink::channel(2);
        sink.status("a");
        sink.status("b");
        sink.status("c");
        assert_eq!(sink.dropped(), 1);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Status(s)) if s == "a"));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Status(s)) if s == "b"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_sink_is_silent() {
        let (sink, rx) = DisplaySink::channel(1);
        drop(rx);
        sink.warning("nobody listening");
        assert_eq!(sink.dropped(), 0);
    }
}
