use chrono::{DateTime, Utc};

/// Liters dispensed per fill tick while the button is held.
pub const FILL_RATE_PER_TICK: f64 = 0.008;

/// Plastic saved per liter dispensed, in grams.
pub const GRAMS_PER_LITER: f64 = 42.0;

/// Plastic grams for a volume, rounded to the nearest gram.
pub fn plastic_grams(liters: f64) -> u64 {
    (liters * GRAMS_PER_LITER).round().max(0.0) as u64
}

/// One continuous use of the fountain, re-presses within the debounce
/// window included.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Session {
    liters: f64,
    started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn liters(&self) -> f64 {
        self.liters
    }

    pub fn plastic_grams(&self) -> u64 {
        plastic_grams(self.liters)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_empty(&self) -> bool {
        self.started_at.is_none()
    }

    /// Marks the session as started, keeping the original timestamp on re-press.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.started_at.get_or_insert(now);
    }

    pub fn add(&mut self, liters: f64) {
        if liters > 0.0 {
            self.liters += liters;
        }
    }

    /// Hands the accumulated delta over and resets to zero.
    pub fn take(&mut self) -> Session {
        std::mem::take(self)
    }
}
