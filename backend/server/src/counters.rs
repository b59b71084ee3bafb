//! # Daily Counters
//!
//! Read-modify-write of the per-day counter of this fountain.
//!
//! ## Record
//!
//! `/{date}/{department}/{serial}`
//! - `waterLiters`: cumulative liters for the day
//! - `plasticRecycledGrams`: `round(waterLiters × 42)`
//! - `lastTransaction`: liters and grams of the latest flush
//!
//! Absent records read as zero. Concurrent writers on the same record are
//! last-writer-wins, each fountain only writes its own record.
use std::sync::Arc;

use chrono::NaiveDate;
use fountain::{Totals, plastic_grams};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::{
    database::{Store, StoreError},
    utils::{day_key, number},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub water_liters: f64,
    #[serde(default)]
    pub plastic_recycled_grams: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounter {
    #[serde(default)]
    pub water_liters: f64,
    #[serde(default)]
    pub plastic_recycled_grams: f64,
    #[serde(default)]
    pub last_transaction: Transaction,
}

impl DailyCounter {
    pub fn totals(&self) -> Totals {
        Totals {
            water_liters: self.water_liters,
            plastic_grams: self.plastic_recycled_grams.round().max(0.0) as u64,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentTotals {
    pub water_liters: f64,
    pub plastic_recycled_grams: f64,
}

impl DepartmentTotals {
    /// Sums every fountain record of one department subtree.
    pub fn from_subtree(subtree: Option<&Value>) -> Self {
        let mut totals = Self::default();

        if let Some(Value::Object(fountains)) = subtree {
            for record in fountains.values() {
                totals.water_liters += number(record.get("waterLiters"));
                totals.plastic_recycled_grams += number(record.get("plasticRecycledGrams"));
            }
        }

        totals
    }

    pub fn totals(&self) -> Totals {
        Totals {
            water_liters: self.water_liters,
            plastic_grams: self.plastic_recycled_grams.round().max(0.0) as u64,
        }
    }
}

pub struct Counters {
    store: Arc<dyn Store>,
    department: String,
    serial: String,
}

impl Counters {
    pub fn new(store: Arc<dyn Store>, department: &str, serial: &str) -> Self {
        Self {
            store,
            department: department.to_string(),
            serial: serial.to_string(),
        }
    }

    fn department_path(&self, date: NaiveDate) -> String {
        format!("/{}/{}", day_key(date), self.department)
    }

    fn machine_path(&self, date: NaiveDate) -> String {
        format!("{}/{}", self.department_path(date), self.serial)
    }

    pub async fn machine(&self, date: NaiveDate) -> Result<DailyCounter, StoreError> {
        match self.store.get(&self.machine_path(date)).await? {
            Some(record) => parse_counter(record),
            None => Ok(DailyCounter::default()),
        }
    }

    pub async fn department(&self, date: NaiveDate) -> Result<DepartmentTotals, StoreError> {
        let subtree = self.store.get(&self.department_path(date)).await?;

        Ok(DepartmentTotals::from_subtree(subtree.as_ref()))
    }

    /// Fountain and department totals for the live-view handshake.
    pub async fn snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<(DailyCounter, DepartmentTotals), StoreError> {
        let subtree = self.store.get(&self.department_path(date)).await?;

        let machine = match subtree.as_ref().and_then(|dept| dept.get(&self.serial)) {
            Some(record) => parse_counter(record.clone())?,
            None => DailyCounter::default(),
        };

        Ok((machine, DepartmentTotals::from_subtree(subtree.as_ref())))
    }

    /// Adds a session delta to the day's counter.
    ///
    /// Returns the department totals after the write, or `None` when the write
    /// landed but the totals could not be read back.
    pub async fn flush(
        &self,
        date: NaiveDate,
        liters: f64,
    ) -> Result<Option<DepartmentTotals>, StoreError> {
        let previous = self.machine(date).await?;
        let water_liters = previous.water_liters + liters;

        let mut fields = Map::new();
        fields.insert("waterLiters".to_string(), json!(water_liters));
        fields.insert(
            "plasticRecycledGrams".to_string(),
            json!(plastic_grams(water_liters)),
        );
        fields.insert(
            "lastTransaction".to_string(),
            json!({
                "waterLiters": liters,
                "plasticRecycledGrams": plastic_grams(liters),
            }),
        );

        self.store.update(&self.machine_path(date), fields).await?;
        info!(
            "Counter {} now at {water_liters:.3} L",
            self.machine_path(date)
        );

        match self.department(date).await {
            Ok(department) => Ok(Some(department)),
            Err(e) => {
                warn!("Department totals unavailable after flush: {e}");
                Ok(None)
            }
        }
    }
}

fn parse_counter(record: Value) -> Result<DailyCounter, StoreError> {
    serde_json::from_value(record).map_err(|e| StoreError::Shape(e.to_string()))
}
