//! Cancellable lifecycle timers.
//!
//! A [`TimerSlot`] holds at most one pending timer. Arming spawns a task that
//! sleeps on the tokio clock and then posts a message back to the owner. A
//! timer that was cancelled after its message was already queued is caught by
//! the epoch check in [`TimerSlot::fire`].

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which lifecycle timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Metadata,
    Pause,
    Remove,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::Metadata => "metadata",
            TimerKind::Pause => "pause",
            TimerKind::Remove => "remove",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ArmedTimer {
    epoch: u64,
    task: JoinHandle<()>,
}

/// Slot for a single pending timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    armed: Option<ArmedTimer>,
    next_epoch: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer, replacing any pending one.
    ///
    /// After `delay` the message built by `message` is sent on `sender`. The
    /// epoch passed to `message` must be handed back to [`TimerSlot::fire`].
    pub fn arm<M, F>(&mut self, delay: Duration, sender: mpsc::UnboundedSender<M>, message: F) -> u64
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M + Send + 'static,
    {
        self.cancel();

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(message(epoch));
        });

        self.armed = Some(ArmedTimer { epoch, task });
        epoch
    }

    /// Cancels the pending timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Whether a message with this epoch belongs to the pending timer.
    pub fn accepts(&self, epoch: u64) -> bool {
        self.armed.as_ref().is_some_and(|timer| timer.epoch == epoch)
    }

    /// Consumes a fired timer.
    ///
    /// Returns false for messages from cancelled or replaced timers, which
    /// must be ignored.
    pub fn fire(&mut self, epoch: u64) -> bool {
        if self.accepts(epoch) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The three lifecycle timers of one session.
#[derive(Debug, Default)]
pub struct SessionTimers {
    pub metadata: TimerSlot,
    pub pause: TimerSlot,
    pub remove: TimerSlot,
}

impl SessionTimers {
    pub fn slot_mut(&mut self, kind: TimerKind) -> &mut TimerSlot {
        match kind {
            TimerKind::Metadata => &mut self.metadata,
            TimerKind::Pause => &mut self.pause,
            TimerKind::Remove => &mut self.remove,
        }
    }

    /// Cancels the pause and remove timers.
    pub fn cancel_idle(&mut self) {
        self.pause.cancel();
        self.remove.cancel();
    }

    pub fn cancel_all(&mut self) {
        self.metadata.cancel();
        self.cancel_idle();
    }
}
