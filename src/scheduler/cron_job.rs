//! Cron parsing and the per-scan-mode timer task.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::task_queue::{TaskEntry, TaskQueue};
use crate::error::EngineError;
use crate::model::ScanMode;

/// Parse a cron expression. Five-field expressions (min..dow) get a leading
/// `0` seconds field; six and seven-field ones are taken as is.
pub fn parse_cron(expression: &str) -> Result<Schedule, EngineError> {
    let field_count = expression.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {}", expression.trim()),
        6 | 7 => expression.trim().to_string(),
        _ => {
            return Err(EngineError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5, 6 or 7 fields, found {field_count}"),
            })
        }
    };
    Schedule::from_str(&normalized).map_err(|e| EngineError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First occurrence strictly after `after`.
#[must_use]
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Spawn a task that pushes `scan_mode` onto `queue` at every occurrence.
///
/// The task ends on its own once the schedule has no further occurrence.
pub(crate) fn spawn_cron_job(scan_mode: ScanMode, schedule: Schedule, queue: Arc<TaskQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(fire_at) = next_fire(&schedule, now) else {
                debug!(scan_mode = %scan_mode.id, "Cron schedule has no further occurrence");
                return;
            };
            let wait = (fire_at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            trace!(scan_mode = %scan_mode.id, at = %fire_at, "Cron job fired");
            queue.add(TaskEntry::ScanMode(scan_mode.clone()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_fields_get_seconds() {
        let schedule = parse_cron("*/5 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 30).unwrap();
        assert_eq!(
            next_fire(&schedule, start),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap())
        );
    }

    #[test]
    fn test_six_fields_accepted() {
        let schedule = parse_cron("*/10 * * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(
            next_fire(&schedule, start),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap())
        );
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(parse_cron("not a cron"), Err(EngineError::InvalidCron { .. })));
        assert!(matches!(parse_cron("* *"), Err(EngineError::InvalidCron { .. })));
        assert!(matches!(parse_cron("99 * * * *"), Err(EngineError::InvalidCron { .. })));
    }
}
