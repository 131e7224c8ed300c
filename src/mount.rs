//! Watches for the point where the capture control can be attached.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::logging::debug_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountEvent {
    Available,
    Lost,
}

/// Polls `probe` on a background thread and reports each change in its
/// answer. The first poll that finds the mount point reports `Available`.
pub struct MountObserver {
    events: Receiver<MountEvent>,
    stop: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MountObserver {
    pub fn spawn<P>(probe: P, interval: Duration) -> Self
    where
        P: Fn() -> bool + Send + 'static,
    {
        let (event_tx, event_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let handle = thread::spawn(move || watch(probe, interval, event_tx, stop_rx));
        Self {
            events: event_rx,
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    pub fn events(&self) -> &Receiver<MountEvent> {
        &self.events
    }

    /// Blocks until the mount point is reported available, or `timeout`
    /// passes.
    pub fn wait_available(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(MountEvent::Available) => return true,
                Ok(MountEvent::Lost) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MountObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch<P>(probe: P, interval: Duration, events: Sender<MountEvent>, stop: Receiver<()>)
where
    P: Fn() -> bool,
{
    let mut mounted = false;
    loop {
        let present = probe();
        if present != mounted {
            mounted = present;
            let event = if present {
                MountEvent::Available
            } else {
                MountEvent::Lost
            };
            debug_log("mount", format!("{event:?}"));
            if events.send(event).is_err() {
                break;
            }
        }
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            default(interval) => {}
        }
    }
}
