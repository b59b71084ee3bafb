use std::{future::Future, time::Duration};

use chrono::{Local, NaiveDate};
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

pub const DAY_FORMAT: &str = "%Y-%m-%d";
const DAY_KEY_LEN: usize = 10;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Parses a `YYYY-MM-DD` key, anything else is not a day.
pub fn parse_day(key: &str) -> Option<NaiveDate> {
    if key.len() != DAY_KEY_LEN {
        return None;
    }

    NaiveDate::parse_from_str(key, DAY_FORMAT).ok()
}

pub fn number(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(0.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Retries transport failures (connect, timeout) with linear backoff.
///
/// Answers with any status are returned as-is, callers decide on those.
pub async fn with_retries<T, F, Fut>(retries: u32, mut attempt: F) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut tries = 0;

    loop {
        match attempt().await {
            Err(e) if tries < retries && (e.is_connect() || e.is_timeout()) => {
                tries += 1;
                warn!("Upstream attempt {tries} failed, retrying: {e}");
                sleep(Duration::from_millis(100 * tries as u64)).await;
            }
            result => return result,
        }
    }
}
