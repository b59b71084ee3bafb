//! # Dashboard Aggregation
//!
//! Read-only views over the whole store tree, computed in memory from one read of `/`.
//!
//! - `users` and `logs` are never counted
//! - Counter records live two levels under a top-level key: `{key}/{department}/{serial}`
//! - The graph only keeps top-level keys shaped like `YYYY-MM-DD`
use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::utils::{day_key, number, parse_day, round_to};

const EXCLUDED_NAMESPACES: [&str; 2] = ["users", "logs"];
const GROWTH_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StatsTotal {
    pub active_fountains: usize,
    pub total_water: f64,
    pub total_plastic: f64,
    pub growth: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FountainGraph {
    pub dates: Vec<String>,
    pub water_consumed: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FountainSummary {
    pub department: String,
    pub serial: String,
    pub water_liters: f64,
    pub plastic_grams: f64,
    pub last_active: Option<String>,
}

struct Record<'a> {
    key: &'a str,
    department: &'a str,
    serial: &'a str,
    fields: &'a Value,
}

fn records(root: &Value) -> Vec<Record<'_>> {
    let mut records = Vec::new();

    let Some(top) = root.as_object() else {
        return records;
    };

    for (key, departments) in top {
        if EXCLUDED_NAMESPACES.contains(&key.as_str()) {
            continue;
        }

        for (department, fountains) in children(departments) {
            for (serial, fields) in children(fountains) {
                if fields.is_object() {
                    records.push(Record {
                        key,
                        department,
                        serial,
                        fields,
                    });
                }
            }
        }
    }

    records
}

fn children(value: &Value) -> impl Iterator<Item = (&str, &Value)> {
    value
        .as_object()
        .into_iter()
        .flat_map(Map::iter)
        .map(|(key, child)| (key.as_str(), child))
}

/// Water summed per day, days in ascending order.
fn daily_water(root: &Value) -> BTreeMap<NaiveDate, f64> {
    let mut days = BTreeMap::new();

    for record in records(root) {
        if let Some(day) = parse_day(record.key) {
            *days.entry(day).or_insert(0.0) += number(record.fields.get("waterLiters"));
        }
    }

    days
}

pub fn stats_total(root: &Value, today: NaiveDate) -> StatsTotal {
    let mut stats = StatsTotal::default();
    let mut fountains = BTreeSet::new();

    for record in records(root) {
        stats.total_water += number(record.fields.get("waterLiters"));
        stats.total_plastic += number(record.fields.get("plasticRecycledGrams"));
        fountains.insert((record.department, record.serial));
    }

    stats.active_fountains = fountains.len();
    stats.total_water = round_to(stats.total_water, 2);
    stats.total_plastic = round_to(stats.total_plastic, 0);
    stats.growth = growth(&daily_water(root), today);

    stats
}

/// Percent change of water between the last two week-long windows ending today.
fn growth(days: &BTreeMap<NaiveDate, f64>, today: NaiveDate) -> f64 {
    let current_start = today - Duration::days(GROWTH_WINDOW_DAYS - 1);
    let previous_start = current_start - Duration::days(GROWTH_WINDOW_DAYS);

    let current: f64 = days.range(current_start..=today).map(|(_, water)| water).sum();
    let previous: f64 = days
        .range(previous_start..current_start)
        .map(|(_, water)| water)
        .sum();

    if previous <= 0.0 {
        return 0.0;
    }

    round_to((current - previous) / previous * 100.0, 1)
}

/// Per-day water of the last transactions, optionally limited to the last `days` days.
pub fn fountain_graph(root: &Value, today: NaiveDate, days: Option<u32>) -> FountainGraph {
    let since = days.map(|days| today - Duration::days(i64::from(days.max(1)) - 1));
    let mut series: BTreeMap<NaiveDate, f64> = BTreeMap::new();

    for record in records(root) {
        let Some(day) = parse_day(record.key) else {
            continue;
        };
        if since.is_some_and(|since| day < since || day > today) {
            continue;
        }

        let last = record
            .fields
            .get("lastTransaction")
            .and_then(|transaction| transaction.get("waterLiters"));
        *series.entry(day).or_insert(0.0) += number(last);
    }

    let mut graph = FountainGraph::default();
    for (day, water) in series {
        graph.dates.push(day.format("%-d %b").to_string());
        graph.water_consumed.push(round_to(water, 1));
    }

    graph
}

pub fn fountains(root: &Value) -> Vec<FountainSummary> {
    let mut summaries: BTreeMap<(&str, &str), FountainSummary> = BTreeMap::new();

    for record in records(root) {
        let summary = summaries
            .entry((record.department, record.serial))
            .or_insert_with(|| FountainSummary {
                department: record.department.to_string(),
                serial: record.serial.to_string(),
                water_liters: 0.0,
                plastic_grams: 0.0,
                last_active: None,
            });

        summary.water_liters += number(record.fields.get("waterLiters"));
        summary.plastic_grams += number(record.fields.get("plasticRecycledGrams"));

        if let Some(day) = parse_day(record.key) {
            let key = day_key(day);
            if summary.last_active.as_ref().is_none_or(|last| *last < key) {
                summary.last_active = Some(key);
            }
        }
    }

    summaries
        .into_values()
        .map(|mut summary| {
            summary.water_liters = round_to(summary.water_liters, 2);
            summary
        })
        .collect()
}
