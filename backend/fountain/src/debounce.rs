use std::time::Duration;

use tokio::{sync::mpsc::Sender, task::JoinHandle, time::sleep};

/// Cancellable delayed task signalling the owner once the window elapses.
///
/// Each restart bumps the generation. An elapsed signal is only honoured if
/// it carries the current generation, so a signal already queued before a
/// cancel is ignored.
pub struct DebounceTimer {
    elapsed: Sender<u64>,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(elapsed: Sender<u64>) -> Self {
        Self {
            elapsed,
            generation: 0,
            pending: None,
        }
    }

    pub fn restart(&mut self, delay: Duration) {
        self.cancel();

        let generation = self.generation;
        let elapsed = self.elapsed.clone();

        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = elapsed.send(generation).await;
        }));
    }

    /// Aborting an idle or finished timer is a no-op.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);

        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Consumes an elapsed signal, returning whether it belongs to the live timer.
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && generation == self.generation {
            self.pending = None;
            return true;
        }

        false
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
