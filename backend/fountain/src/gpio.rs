//! # GPIO
//!
//! Poll-based view of the fountain hardware.
//!
//! - Button: digital input, pulled up, reads low while held
//! - Pump: digital output driving the relay, polarity depends on the wiring
//!
//! With a driver transistor between the pin and the relay input the logic is
//! inverted, so the relay polarity is configurable rather than hardcoded.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("GPIO pin {pin} unavailable: {reason}")]
    Unavailable { pin: u8, reason: String },
}

pub trait Button: Send + 'static {
    fn is_pressed(&mut self) -> bool;
}

pub trait Pump: Send + 'static {
    fn set_active(&mut self, on: bool) -> Result<(), GpioError>;
}

/// Output level for a requested relay state.
#[inline]
pub fn output_level(on: bool, active_low: bool) -> bool {
    on != active_low
}

/// In-process button, pressed and released through a shared handle.
#[derive(Clone, Default)]
pub struct SimulatedButton {
    pressed: Arc<AtomicBool>,
}

impl SimulatedButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }
}

impl Button for SimulatedButton {
    fn is_pressed(&mut self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

/// In-process pump recording the last requested state.
#[derive(Clone, Default)]
pub struct SimulatedPump {
    active: Arc<AtomicBool>,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Pump for SimulatedPump {
    fn set_active(&mut self, on: bool) -> Result<(), GpioError> {
        self.active.store(on, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(feature = "rpi")]
pub mod rpi {
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    use super::{Button, GpioError, Pump, output_level};

    pub struct RpiButton {
        pin: InputPin,
    }

    impl RpiButton {
        pub fn new(bcm: u8) -> Result<Self, GpioError> {
            let pin = Gpio::new()
                .and_then(|gpio| gpio.get(bcm))
                .map_err(|e| GpioError::Unavailable {
                    pin: bcm,
                    reason: e.to_string(),
                })?
                .into_input_pullup();

            Ok(Self { pin })
        }
    }

    impl Button for RpiButton {
        fn is_pressed(&mut self) -> bool {
            self.pin.is_low()
        }
    }

    pub struct RpiPump {
        pin: OutputPin,
        active_low: bool,
    }

    impl RpiPump {
        pub fn new(bcm: u8, active_low: bool) -> Result<Self, GpioError> {
            let pin = Gpio::new()
                .and_then(|gpio| gpio.get(bcm))
                .map_err(|e| GpioError::Unavailable {
                    pin: bcm,
                    reason: e.to_string(),
                })?
                .into_output();

            let mut pump = Self { pin, active_low };
            // start switched off whatever the polarity
            pump.set_active(false)?;

            Ok(pump)
        }
    }

    impl Pump for RpiPump {
        fn set_active(&mut self, on: bool) -> Result<(), GpioError> {
            if output_level(on, self.active_low) {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
            Ok(())
        }
    }
}
