//! Parent process watchdog.
//!
//! When Undertow is launched by a player it should not outlive it. The
//! watchdog polls the parent pid and triggers shutdown once it is gone.

use std::time::Duration;

use sysinfo::{Pid, System};

use crate::shutdown::ShutdownSignal;

/// Whether a process with this pid currently exists.
pub fn process_alive(system: &mut System, pid: u32) -> bool {
    system.refresh_process(Pid::from_u32(pid))
}

/// Polls `parent_pid` every `interval` until it exits or shutdown starts.
///
/// Triggers `shutdown` when the parent disappears.
pub async fn watch_parent(parent_pid: u32, interval: Duration, shutdown: ShutdownSignal) {
    let mut system = System::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::debug!("Watching parent process {}", parent_pid);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !process_alive(&mut system, parent_pid) {
                    tracing::info!("Parent process {} exited, shutting down", parent_pid);
                    shutdown.trigger();
                    return;
                }
            }
            _ = shutdown.wait() => return,
        }
    }
}
