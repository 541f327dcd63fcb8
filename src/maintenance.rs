use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::aggregate::DAILY_CAP_MINUTES;
use crate::error::Result;
use crate::store::Store;

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct MaintenanceReport {
    pub stale_sessions_closed: usize,
    pub sessions_capped: usize,
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(last_second))
}

/// Close sessions still open on a previous calendar day. The synthetic
/// check-out is min(check-in + 2h, end of that day), so a forgotten tap can
/// never bank more than the daily cap or bleed into the next day.
pub async fn close_stale_sessions(store: &dyn Store, today: NaiveDate) -> Result<usize> {
    let mut closed = 0;
    for session in store.open_sessions_before(today).await? {
        let check_out = (session.check_in_time + Duration::hours(2)).min(end_of_day(session.date));
        let duration = (check_out - session.check_in_time).num_minutes().max(0);

        if store
            .close_session(session.id, check_out, duration)
            .await?
            .is_some()
        {
            store
                .recompute_daily_stat(session.student_id, session.date)
                .await?;
            closed += 1;
            tracing::info!(
                session = %session.id,
                date = %session.date,
                duration_minutes = duration,
                "closed stale session"
            );
        }
    }
    Ok(closed)
}

/// Truncate closed sessions on previous days that exceed the daily cap and
/// rebuild the affected day.
pub async fn cap_previous_days(store: &dyn Store, today: NaiveDate) -> Result<usize> {
    let mut capped = 0;
    for session in store
        .long_closed_sessions_before(today, DAILY_CAP_MINUTES)
        .await?
    {
        let check_out = session.check_in_time + Duration::minutes(DAILY_CAP_MINUTES);
        if store
            .rewrite_session(session.id, check_out, DAILY_CAP_MINUTES)
            .await?
            .is_some()
        {
            store
                .recompute_daily_stat(session.student_id, session.date)
                .await?;
            capped += 1;
            tracing::info!(
                session = %session.id,
                date = %session.date,
                old_duration_minutes = session.duration_minutes,
                "capped overlong session"
            );
        }
    }
    Ok(capped)
}

pub async fn run_daily_maintenance(store: &dyn Store) -> Result<MaintenanceReport> {
    let today = Utc::now().date_naive();
    Ok(MaintenanceReport {
        stale_sessions_closed: close_stale_sessions(store, today).await?,
        sessions_capped: cap_previous_days(store, today).await?,
    })
}
