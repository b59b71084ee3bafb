//! # Device
//!
//! Wires the fountain loop to the server: flushes land in the daily counters
//! and every fill event is fanned out through the hub.
//!
//! `GPIO_MODE=off` runs the server without a loop, `rpi` drives the real pins
//! and needs a build with the `rpi` feature.
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fountain::{
    Accumulator, FillEvent, FlushError, SessionSink, Timing, Totals,
    gpio::{Button, Pump},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::{Config, GpioMode},
    counters::Counters,
    hub::Hub,
    utils::today,
};

pub struct FountainSink {
    counters: Arc<Counters>,
    hub: Arc<Hub>,
}

impl FountainSink {
    pub fn new(counters: Arc<Counters>, hub: Arc<Hub>) -> Self {
        Self { counters, hub }
    }
}

#[async_trait]
impl SessionSink for FountainSink {
    async fn flush(&self, liters: f64) -> Result<Option<Totals>, FlushError> {
        let department = self.counters.flush(today(), liters).await?;

        Ok(department.map(|department| department.totals()))
    }

    async fn announce(&self, event: FillEvent) {
        self.hub.broadcast(&event);
    }
}

/// Running fountain loop.
pub struct Device {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Device {
    pub fn spawn<B: Button, P: Pump>(button: B, pump: P, sink: FountainSink) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let accumulator = Accumulator::new(button, pump, Arc::new(sink), Timing::default());

        let task = tokio::spawn(accumulator.run(async move {
            let _ = stopped.await;
        }));

        Self { stop, task }
    }

    /// Stops the loop and waits until the pump is off.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());

        if let Err(e) = self.task.await {
            warn!("Fountain loop ended abnormally: {e}");
        }
    }
}

pub fn start(config: &Config, sink: FountainSink) -> Result<Option<Device>> {
    match config.gpio_mode {
        GpioMode::Off => {
            info!("GPIO disabled, fountain loop not started");
            Ok(None)
        }
        GpioMode::Rpi => start_rpi(config, sink).map(Some),
    }
}

#[cfg(feature = "rpi")]
fn start_rpi(config: &Config, sink: FountainSink) -> Result<Device> {
    use fountain::gpio::rpi::{RpiButton, RpiPump};

    let button = RpiButton::new(config.button_pin)?;
    let pump = RpiPump::new(config.pump_pin, config.pump_active_low)?;
    info!(
        "Fountain {} on button BCM {} and pump BCM {}",
        config.device_id(),
        config.button_pin,
        config.pump_pin
    );

    Ok(Device::spawn(button, pump, sink))
}

#[cfg(not(feature = "rpi"))]
fn start_rpi(_config: &Config, _sink: FountainSink) -> Result<Device> {
    anyhow::bail!("GPIO_MODE=rpi requires a build with the `rpi` feature")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fountain::gpio::{SimulatedButton, SimulatedPump};
    use tokio::time::sleep;

    use super::*;
    use crate::database::{MemoryStore, ReadAfterWriteFails, Store};

    fn sink() -> (Arc<Counters>, Arc<Hub>, FountainSink) {
        sink_over(Arc::new(MemoryStore::new()))
    }

    fn sink_over(store: Arc<dyn Store>) -> (Arc<Counters>, Arc<Hub>, FountainSink) {
        let counters = Arc::new(Counters::new(store, "EPHEC01", "M02"));
        let hub = Arc::new(Hub::new());
        let sink = FountainSink::new(counters.clone(), hub.clone());
        (counters, hub, sink)
    }

    #[tokio::test]
    async fn flush_writes_todays_counter() {
        let (counters, _, sink) = sink();

        let department = sink.flush(1.5).await.unwrap().unwrap();

        assert_eq!(department.water_liters, 1.5);
        assert_eq!(department.plastic_grams, 63);
        assert_eq!(counters.machine(today()).await.unwrap().water_liters, 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn held_button_ends_in_one_flush_and_broadcast() {
        let (counters, hub, sink) = sink();
        let mut live = hub.subscribe_with(&FillEvent::Snapshot {
            machine: Totals::default(),
            department: Totals::default(),
        });

        let button = SimulatedButton::new();
        let pump = SimulatedPump::new();
        let device = Device::spawn(button.clone(), pump.clone(), sink);

        button.press();
        sleep(Duration::from_millis(2500)).await;
        assert!(pump.is_active());
        button.release();
        sleep(Duration::from_millis(5500)).await;

        let machine = counters.machine(today()).await.unwrap();
        assert!((machine.water_liters - 0.024).abs() < 1e-9);

        let mut frames = Vec::new();
        while let Ok(frame) = live.frames.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames[0], "init:0.0:0:0.0:0");
        assert_eq!(frames[1..5], ["start_fill", "0.008", "0.016", "0.024"]);
        assert_eq!(frames[5], "stop_fill");
        assert!(frames[6].starts_with("dept_update:"));
        assert_eq!(frames[7], "update_done");

        device.shutdown().await;
        assert!(!pump.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_count_once_when_totals_read_fails_after_write() {
        let (counters, _, sink) = sink_over(Arc::new(ReadAfterWriteFails::default()));

        let button = SimulatedButton::new();
        let pump = SimulatedPump::new();
        let device = Device::spawn(button.clone(), pump, sink);

        for _ in 0..2 {
            button.press();
            sleep(Duration::from_millis(500)).await;
            button.release();
            sleep(Duration::from_millis(5000)).await;
        }

        let machine = counters.machine(today()).await.unwrap();
        assert!(
            (machine.water_liters - 0.016).abs() < 1e-9,
            "stored {}",
            machine.water_liters
        );

        device.shutdown().await;
    }
}
