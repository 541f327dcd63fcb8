use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::DailyStat;
use crate::store::Store;

/// Two-hour ceiling on minutes credited per student per calendar date.
pub const DAILY_CAP_MINUTES: i64 = 120;

/// Portion of `duration` that still fits under the cap given what is
/// already banked for the day. Sessions past the cap contribute 0 minutes
/// but are still counted.
pub fn capped_increment(existing_minutes: i64, duration_minutes: i64) -> i64 {
    duration_minutes
        .min(DAILY_CAP_MINUTES - existing_minutes)
        .max(0)
}

pub fn capped_total(existing_minutes: i64, duration_minutes: i64) -> i64 {
    existing_minutes + capped_increment(existing_minutes, duration_minutes)
}

/// Sole writer of `DailyStat`. Called by the ledger on every check-out and
/// by maintenance when it rebuilds a day.
pub async fn record_completed_session(
    store: &dyn Store,
    student: Uuid,
    date: NaiveDate,
    duration_minutes: i64,
) -> Result<DailyStat> {
    let stat = store
        .apply_completed_session(student, date, duration_minutes.max(0))
        .await?;
    tracing::debug!(
        %student,
        %date,
        duration_minutes,
        daily_minutes = stat.total_minutes,
        daily_sessions = stat.total_sessions,
        "daily stats updated"
    );
    Ok(stat)
}
