use std::collections::{HashMap, HashSet};

use chrono::{Days, NaiveDate};

use crate::error::Result;
use crate::models::{
    DailyStat, ExportReport, ExportRow, HeatmapCell, Session, StatsResponse, Student, Summary,
};
use crate::store::Store;

/// Heatmap window when the caller gives no range.
const DEFAULT_HEATMAP_DAYS: u64 = 365;

/// 0: nothing, 1: 1-30min, 2: 31-60min, 3: 61-90min, 4: 91+ min.
pub fn intensity_level(minutes: i64) -> u8 {
    match minutes {
        m if m <= 0 => 0,
        m if m <= 30 => 1,
        m if m <= 60 => 2,
        m if m <= 90 => 3,
        _ => 4,
    }
}

/// One cell per calendar day in `[from, to]`, zero-filled where the student
/// has no recorded minutes.
pub fn heatmap_series(stats: &[DailyStat], from: NaiveDate, to: NaiveDate) -> Vec<HeatmapCell> {
    let by_date: HashMap<NaiveDate, i64> =
        stats.iter().map(|d| (d.date, d.total_minutes)).collect();

    let mut cells = Vec::new();
    let mut day = from;
    while day <= to {
        let minutes = by_date.get(&day).copied().unwrap_or(0);
        cells.push(HeatmapCell {
            date: day,
            minutes,
            level: intensity_level(minutes),
        });
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    cells
}

/// Consecutive active days ending today. `active_dates` must be sorted
/// ascending and hold only days with minutes > 0. A student who did not
/// train today has no current streak.
pub fn current_streak(active_dates: &[NaiveDate], today: NaiveDate) -> i64 {
    let mut streak = 0;
    let mut expected = today;
    for date in active_dates.iter().rev() {
        if *date != expected {
            break;
        }
        streak += 1;
        expected = match expected.pred_opt() {
            Some(prev) => prev,
            None => break,
        };
    }
    streak
}

pub fn longest_streak(active_dates: &[NaiveDate]) -> i64 {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for date in active_dates {
        run = match prev {
            Some(p) if p.succ_opt() == Some(*date) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(*date);
    }
    longest
}

/// Aggregate over closed sessions and the daily ledger. Active sessions are
/// invisible here until they close.
pub fn summarize(sessions: &[Session], daily: &[DailyStat], today: NaiveDate) -> Summary {
    let closed: Vec<&Session> = sessions.iter().filter(|s| !s.is_active()).collect();

    let total_sessions = closed.len() as i64;
    // cap-adjusted: the daily ledger already applied the 120-minute limit
    let total_minutes = daily.iter().map(|d| d.total_minutes).sum();
    let longest_session_minutes = closed.iter().map(|s| s.duration_minutes).max().unwrap_or(0);
    let average_session_minutes = if closed.is_empty() {
        0
    } else {
        let sum: i64 = closed.iter().map(|s| s.duration_minutes).sum();
        (sum as f64 / closed.len() as f64).round() as i64
    };
    let total_days_active = closed
        .iter()
        .map(|s| s.date)
        .collect::<HashSet<_>>()
        .len() as i64;

    let active_dates: Vec<NaiveDate> = daily
        .iter()
        .filter(|d| d.total_minutes > 0)
        .map(|d| d.date)
        .collect();

    Summary {
        total_sessions,
        total_minutes,
        average_session_minutes,
        longest_session_minutes,
        total_days_active,
        current_streak_days: current_streak(&active_dates, today),
        longest_streak_days: longest_streak(&active_dates),
    }
}

/// Full read-side projection for one student: summary plus the heatmap for
/// the trailing year. Mutates nothing.
pub async fn student_stats(
    store: &dyn Store,
    student: &Student,
    today: NaiveDate,
) -> Result<StatsResponse> {
    let sessions = store.closed_sessions(student.id).await?;
    let daily = store.daily_stats(student.id).await?;

    let from = today
        .checked_sub_days(Days::new(DEFAULT_HEATMAP_DAYS))
        .unwrap_or(today);

    Ok(StatsResponse {
        student: student.clone(),
        summary: summarize(&sessions, &daily, today),
        heatmap: heatmap_series(&daily, from, today),
    })
}

// --- export projections for the external PDF renderer ---

pub fn export_row(student: &Student, session: &Session) -> ExportRow {
    ExportRow {
        student_id: student.student_id.clone(),
        name: student.full_name(),
        block_section: student.block_section.clone(),
        date: session.date,
        check_in_time: session.check_in_time,
        check_out_time: session.check_out_time,
        duration_minutes: session.duration_minutes,
    }
}

pub fn export_report(rows: Vec<ExportRow>) -> ExportReport {
    let total_minutes = rows.iter().map(|r| r.duration_minutes).sum();
    ExportReport {
        total_sessions: rows.len(),
        total_minutes,
        rows,
    }
}

/// All closed sessions for one student, optionally bounded by dates.
pub async fn user_report(
    store: &dyn Store,
    student: &Student,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<ExportReport> {
    let sessions = store.closed_sessions_between(student.id, from, to).await?;
    let rows = sessions.iter().map(|s| export_row(student, s)).collect();
    Ok(export_report(rows))
}

/// Every closed session on one calendar date, across all students.
pub async fn day_report(store: &dyn Store, date: NaiveDate) -> Result<ExportReport> {
    let pairs = store.sessions_on_date(date).await?;
    let rows = pairs.iter().map(|(st, s)| export_row(st, s)).collect();
    Ok(export_report(rows))
}

/// Every closed session for one block/section, optionally bounded by dates.
pub async fn block_report(
    store: &dyn Store,
    block: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<ExportReport> {
    let pairs = store.sessions_for_block(block, from, to).await?;
    let rows = pairs.iter().map(|(st, s)| export_row(st, s)).collect();
    Ok(export_report(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stat(student: Uuid, d: NaiveDate, minutes: i64, sessions: i64) -> DailyStat {
        DailyStat {
            student_id: student,
            date: d,
            total_minutes: minutes,
            total_sessions: sessions,
        }
    }

    fn closed(student: Uuid, d: NaiveDate, minutes: i64) -> Session {
        let check_in = Utc.from_utc_datetime(&d.and_hms_opt(9, 0, 0).unwrap());
        Session {
            id: Uuid::new_v4(),
            student_id: student,
            check_in_time: check_in,
            check_out_time: Some(check_in + chrono::Duration::minutes(minutes)),
            duration_minutes: minutes,
            date: d,
        }
    }

    #[test]
    fn levels_follow_the_buckets() {
        assert_eq!(intensity_level(0), 0);
        assert_eq!(intensity_level(1), 1);
        assert_eq!(intensity_level(30), 1);
        assert_eq!(intensity_level(31), 2);
        assert_eq!(intensity_level(60), 2);
        assert_eq!(intensity_level(61), 3);
        assert_eq!(intensity_level(90), 3);
        assert_eq!(intensity_level(91), 4);
        assert_eq!(intensity_level(120), 4);
    }

    #[test]
    fn heatmap_is_zero_filled_over_the_whole_range() {
        let student = Uuid::new_v4();
        let stats = vec![stat(student, date(2025, 3, 10), 120, 3)];
        let cells = heatmap_series(&stats, date(2025, 3, 1), date(2025, 3, 31));

        assert_eq!(cells.len(), 31);
        let active: Vec<&HeatmapCell> = cells.iter().filter(|c| c.minutes > 0).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].date, date(2025, 3, 10));
        assert_eq!(active[0].minutes, 120);
        assert_eq!(active[0].level, 4);
        assert!(cells.iter().filter(|c| c.minutes == 0).all(|c| c.level == 0));
    }

    #[test]
    fn current_streak_requires_activity_today() {
        let today = date(2025, 3, 10);
        let dates = vec![date(2025, 3, 8), date(2025, 3, 9), today];
        assert_eq!(current_streak(&dates, today), 3);

        // last visit was yesterday: no current streak
        let stale = vec![date(2025, 3, 8), date(2025, 3, 9)];
        assert_eq!(current_streak(&stale, today), 0);
    }

    #[test]
    fn current_streak_breaks_on_a_gap() {
        let today = date(2025, 3, 10);
        let dates = vec![date(2025, 3, 6), date(2025, 3, 7), date(2025, 3, 9), today];
        assert_eq!(current_streak(&dates, today), 2);
    }

    #[test]
    fn longest_streak_spans_gaps() {
        let dates = vec![
            date(2025, 3, 1),
            date(2025, 3, 2),
            date(2025, 3, 3),
            date(2025, 3, 7),
            date(2025, 3, 8),
        ];
        assert_eq!(longest_streak(&dates), 3);
        assert_eq!(longest_streak(&[]), 0);
    }

    #[test]
    fn summary_totals_come_from_the_daily_ledger() {
        let student = Uuid::new_v4();
        let d1 = date(2025, 3, 10);
        let sessions = vec![
            closed(student, d1, 90),
            closed(student, d1, 60),
            closed(student, d1, 30),
        ];
        // aggregator capped the day at 120 even though raw sessions sum to 180
        let daily = vec![stat(student, d1, 120, 3)];

        let summary = summarize(&sessions, &daily, d1);
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.total_minutes, 120);
        assert_eq!(summary.average_session_minutes, 60);
        assert_eq!(summary.longest_session_minutes, 90);
        assert_eq!(summary.total_days_active, 1);
        assert_eq!(summary.current_streak_days, 1);
    }

    #[test]
    fn active_sessions_do_not_count() {
        let student = Uuid::new_v4();
        let d1 = date(2025, 3, 10);
        let mut open = closed(student, d1, 0);
        open.check_out_time = None;

        let summary = summarize(&[closed(student, d1, 45), open], &[stat(student, d1, 45, 1)], d1);
        assert_eq!(summary.total_sessions, 1);
        assert_eq!(summary.longest_session_minutes, 45);
        assert_eq!(summary.average_session_minutes, 45);
    }
}
