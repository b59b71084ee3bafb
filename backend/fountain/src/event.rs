//! # Live Frames
//!
//! Plain text frames pushed to live-view subscribers.
//!
//! - `init:<liters>:<grams>:<deptLiters>:<deptGrams>` on connect, liters always carry a decimal point
//! - `start_fill` when the pump starts
//! - `<liters>` with three decimals on every fill tick
//! - `stop_fill` when the button is released
//! - `dept_update:<deptLiters>:<deptGrams>` after a flush
//! - `update_done` once the flush is fully announced
use std::fmt;

/// Cumulative liters and grams for one counter or an aggregate of counters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Totals {
    pub water_liters: f64,
    pub plastic_grams: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FillEvent {
    Snapshot { machine: Totals, department: Totals },
    Started,
    Progress(f64),
    Stopped,
    DepartmentUpdated(Totals),
    UpdateDone,
}

impl fmt::Display for FillEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillEvent::Snapshot {
                machine,
                department,
            } => write!(
                f,
                "init:{:?}:{}:{:?}:{}",
                machine.water_liters,
                machine.plastic_grams,
                department.water_liters,
                department.plastic_grams
            ),
            FillEvent::Started => f.write_str("start_fill"),
            FillEvent::Progress(liters) => write!(f, "{liters:.3}"),
            FillEvent::Stopped => f.write_str("stop_fill"),
            FillEvent::DepartmentUpdated(totals) => write!(
                f,
                "dept_update:{:?}:{}",
                totals.water_liters, totals.plastic_grams
            ),
            FillEvent::UpdateDone => f.write_str("update_done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_dashboard_protocol() {
        let machine = Totals {
            water_liters: 1.5,
            plastic_grams: 63,
        };
        let department = Totals {
            water_liters: 2.0,
            plastic_grams: 84,
        };

        assert_eq!(
            FillEvent::Snapshot {
                machine,
                department
            }
            .to_string(),
            "init:1.5:63:2.0:84"
        );
        assert_eq!(FillEvent::Progress(0.016).to_string(), "0.016");
        assert_eq!(
            FillEvent::DepartmentUpdated(department).to_string(),
            "dept_update:2.0:84"
        );
        assert_eq!(FillEvent::Started.to_string(), "start_fill");
        assert_eq!(FillEvent::UpdateDone.to_string(), "update_done");
    }
}
