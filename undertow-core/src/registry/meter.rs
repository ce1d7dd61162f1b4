//! Streamed-byte accounting for the one-time serving event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::commands::LifecycleMessage;
use crate::engine::SessionKey;

/// Counts bytes streamed for a session across all of its requests.
///
/// Every stream of a session shares the same counter, so the threshold is
/// crossed by exactly one `record` call no matter how many viewers there are.
#[derive(Debug, Clone)]
pub struct ServingMeter {
    session: SessionKey,
    streamed: Arc<AtomicU64>,
    threshold: u64,
    notifier: mpsc::UnboundedSender<LifecycleMessage>,
}

impl ServingMeter {
    pub(crate) fn new(
        session: SessionKey,
        streamed: Arc<AtomicU64>,
        threshold: u64,
        notifier: mpsc::UnboundedSender<LifecycleMessage>,
    ) -> Self {
        Self {
            session,
            streamed,
            threshold,
            notifier,
        }
    }

    /// Adds streamed bytes. Notifies the registry when this call crosses
    /// the threshold.
    pub fn record(&self, bytes: u64) {
        let before = self.streamed.fetch_add(bytes, Ordering::Relaxed);
        let after = before.saturating_add(bytes);

        if before < self.threshold && after >= self.threshold {
            let _ = self
                .notifier
                .send(LifecycleMessage::ServingThresholdCrossed {
                    session: self.session,
                });
        }
    }

    /// Total bytes streamed for the session so far.
    pub fn streamed(&self) -> u64 {
        self.streamed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::magnet::InfoHash;

    #[test]
    fn test_threshold_crossed_once_across_clones() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let session = SessionKey {
            info_hash: InfoHash::new([1; 20]),
            serial: 4,
        };
        let meter = ServingMeter::new(session, Arc::new(AtomicU64::new(0)), 100, sender);
        let other_stream = meter.clone();

        meter.record(60);
        assert!(receiver.try_recv().is_err());

        other_stream.record(60);
        assert_eq!(
            receiver.try_recv().unwrap(),
            LifecycleMessage::ServingThresholdCrossed { session }
        );

        meter.record(1000);
        assert!(receiver.try_recv().is_err());
        assert_eq!(meter.streamed(), 1120);
    }
}
