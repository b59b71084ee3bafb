//! # Fill-Session Accumulator
//!
//! Control loop between the button, the pump and the persistence side.
//!
//! ```text
//! Idle --press--> Filling --release--> Draining --debounce elapsed--> Idle (flush)
//!                    ^                     |
//!                    +-------press---------+
//! ```
//!
//! - The loop task owns the session, only it increments liters
//! - Releasing starts the debounce timer, pressing again cancels it and keeps accumulating
//! - On expiry the delta is taken out of the session before any I/O, then flushed on its own task
//! - Flushes are serialized by one async mutex which also holds the carry-over of failed flushes
use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::{Mutex, mpsc},
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    debounce::DebounceTimer,
    event::{FillEvent, Totals},
    gpio::{Button, Pump},
    session::{FILL_RATE_PER_TICK, Session},
};

pub type FlushError = Box<dyn std::error::Error + Send + Sync>;

/// Persistence and broadcast side of the loop.
#[async_trait]
pub trait SessionSink: Send + Sync + 'static {
    /// Persists a delta, returning the department totals after the write.
    ///
    /// `Err` means the delta did not land and gets carried over.
    /// `Ok(None)` means it landed but the totals could not be read back.
    async fn flush(&self, liters: f64) -> Result<Option<Totals>, FlushError>;

    async fn announce(&self, event: FillEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Idle,
    Filling,
    Draining,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll: Duration,
    pub tick: Duration,
    pub debounce: Duration,
    pub fill_rate_per_tick: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            tick: Duration::from_secs(1),
            debounce: Duration::from_secs(3),
            fill_rate_per_tick: FILL_RATE_PER_TICK,
        }
    }
}

pub struct Accumulator<B, P, S> {
    button: B,
    pump: P,
    sink: Arc<S>,
    timing: Timing,
    state: FillState,
    session: Session,
    carry: Arc<Mutex<f64>>,
}

impl<B, P, S> Accumulator<B, P, S>
where
    B: Button,
    P: Pump,
    S: SessionSink,
{
    pub fn new(button: B, pump: P, sink: Arc<S>, timing: Timing) -> Self {
        Self {
            button,
            pump,
            sink,
            timing,
            state: FillState::Idle,
            session: Session::default(),
            carry: Arc::new(Mutex::new(0.0)),
        }
    }

    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let (elapsed_tx, mut elapsed_rx) = mpsc::channel(4);
        let mut debounce = DebounceTimer::new(elapsed_tx);
        tokio::pin!(shutdown);

        info!("Fountain loop started");

        loop {
            let wait = match self.state {
                FillState::Filling => self.timing.tick,
                FillState::Idle | FillState::Draining => self.timing.poll,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                Some(generation) = elapsed_rx.recv() => {
                    if debounce.accept(generation) && self.state == FillState::Draining {
                        self.state = FillState::Idle;
                        self.flush();
                    }
                }
                _ = sleep(wait) => self.step(&mut debounce).await,
            }
        }

        debounce.cancel();
        self.switch_pump(false);

        if !self.session.is_empty() {
            warn!(
                "Dropping unflushed session of {:.3} L on shutdown",
                self.session.liters()
            );
        }

        info!("Fountain loop stopped");
    }

    async fn step(&mut self, debounce: &mut DebounceTimer) {
        let pressed = self.button.is_pressed();

        match (self.state, pressed) {
            (FillState::Idle | FillState::Draining, true) => {
                debounce.cancel();
                self.switch_pump(true);
                self.session.begin(Utc::now());
                self.state = FillState::Filling;

                self.sink.announce(FillEvent::Started).await;
                self.fill_tick().await;
            }
            (FillState::Filling, true) => self.fill_tick().await,
            (FillState::Filling, false) => {
                self.switch_pump(false);
                self.state = FillState::Draining;

                self.sink.announce(FillEvent::Stopped).await;
                debounce.restart(self.timing.debounce);
            }
            (FillState::Idle | FillState::Draining, false) => {}
        }
    }

    async fn fill_tick(&mut self) {
        self.session.add(self.timing.fill_rate_per_tick);

        self.sink
            .announce(FillEvent::Progress(self.session.liters()))
            .await;
    }

    fn switch_pump(&mut self, on: bool) {
        if let Err(e) = self.pump.set_active(on) {
            warn!("Failed to switch pump {}: {e}", if on { "on" } else { "off" });
        }
    }

    fn flush(&mut self) {
        let session = self.session.take();
        let sink = self.sink.clone();
        let carry = self.carry.clone();

        debug!(
            "Flushing session of {:.3} L started at {:?}",
            session.liters(),
            session.started_at()
        );

        tokio::spawn(async move {
            let mut carry = carry.lock().await;
            let liters = *carry + session.liters();

            match sink.flush(liters).await {
                Ok(department) => {
                    *carry = 0.0;
                    info!("Flushed {liters:.3} L");

                    if let Some(department) = department {
                        sink.announce(FillEvent::DepartmentUpdated(department))
                            .await;
                    }
                    sink.announce(FillEvent::UpdateDone).await;
                }
                Err(e) => {
                    *carry = liters;
                    warn!("Flush of {liters:.3} L failed, carrying over: {e}");
                }
            }
        });
    }
}
