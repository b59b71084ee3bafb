//! # Fountain
//!
//! Device side of the smart fountain: the GPIO adapter and the fill-session
//! accumulator driving it.
//!
//! The accumulator knows nothing about the store or the live-view sockets,
//! it talks to them through [`SessionSink`]. The server crate provides the
//! real sink, tests provide recording ones.
//!
//! ## Hardware
//! - Button on BCM 17, pulled up, pressed reads low
//! - Pump relay on BCM 27
//! - Real pins need the `rpi` feature, otherwise only the simulated pins are built
pub mod accumulator;
pub mod debounce;
pub mod event;
pub mod gpio;
pub mod session;

pub use accumulator::{Accumulator, FillState, FlushError, SessionSink, Timing};
pub use event::{FillEvent, Totals};
pub use session::{FILL_RATE_PER_TICK, GRAMS_PER_LITER, Session, plastic_grams};
