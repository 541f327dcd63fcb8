use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use gymtrack::error::Error;
use gymtrack::ledger::Ledger;
use gymtrack::maintenance;
use gymtrack::memory::MemStore;
use gymtrack::models::{PeCourse, RegisterStudentReq, Student, TapAction};
use gymtrack::registry;
use gymtrack::stats;
use gymtrack::store::Store;

fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn req(student_id: &str, rfid: &str, block: &str) -> RegisterStudentReq {
    RegisterStudentReq {
        student_id: student_id.into(),
        rfid: rfid.into(),
        first_name: "Juan".into(),
        last_name: "Dela Cruz".into(),
        pe_course: PeCourse::PeduOne,
        block_section: block.into(),
    }
}

async fn setup() -> (Arc<dyn Store>, Arc<Ledger>, Student) {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let ledger = Arc::new(Ledger::new(store.clone()));
    let student = registry::register(store.as_ref(), req("2023-123456", "RFID-001", "STEM241"))
        .await
        .unwrap();
    (store, ledger, student)
}

#[tokio::test]
async fn first_tap_checks_in_second_checks_out() {
    let (store, ledger, student) = setup().await;

    let tap1 = ledger
        .handle_tap("2023-123456", ts(2025, 3, 10, 9, 0))
        .await
        .unwrap();
    assert_eq!(tap1.action, TapAction::CheckIn);
    assert!(tap1.session.is_active());
    assert_eq!(tap1.daily_minutes, 0);

    let tap2 = ledger
        .handle_tap("2023-123456", ts(2025, 3, 10, 10, 30))
        .await
        .unwrap();
    assert_eq!(tap2.action, TapAction::CheckOut);
    assert_eq!(tap2.session.duration_minutes, 90);
    assert_eq!(tap2.daily_minutes, 90);
    assert_eq!(tap2.remaining_daily_minutes, 30);

    let stat = store
        .daily_stat(student.id, day(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_minutes, 90);
    assert_eq!(stat.total_sessions, 1);
}

#[tokio::test]
async fn daily_minutes_cap_at_120_but_sessions_keep_counting() {
    let (store, ledger, student) = setup().await;

    // 09:00-10:30 -> 90 banked
    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 9, 0)).await.unwrap();
    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 10, 30)).await.unwrap();

    // 14:00-15:00 -> 60 more, only 30 fit under the cap
    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 14, 0)).await.unwrap();
    let tap = ledger.handle_tap("RFID-001", ts(2025, 3, 10, 15, 0)).await.unwrap();
    assert_eq!(tap.session.duration_minutes, 60); // session itself not truncated
    assert_eq!(tap.daily_minutes, 120);
    assert_eq!(tap.remaining_daily_minutes, 0);

    let stat = store
        .daily_stat(student.id, day(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_minutes, 120);
    assert_eq!(stat.total_sessions, 2);

    // a third 30-minute session adds nothing to minutes
    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 16, 0)).await.unwrap();
    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 16, 30)).await.unwrap();

    let stat = store
        .daily_stat(student.id, day(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_minutes, 120);
    assert_eq!(stat.total_sessions, 3);
}

#[tokio::test]
async fn taps_strictly_alternate() {
    let (_store, ledger, _student) = setup().await;

    let mut expected = TapAction::CheckIn;
    for i in 0..8 {
        let tap = ledger
            .handle_tap("2023-123456", ts(2025, 3, 10, 8, 0) + Duration::minutes(i * 10))
            .await
            .unwrap();
        assert_eq!(tap.action, expected);
        expected = match expected {
            TapAction::CheckIn => TapAction::CheckOut,
            TapAction::CheckOut => TapAction::CheckIn,
        };
    }
}

#[tokio::test]
async fn simultaneous_taps_never_open_two_sessions() {
    let (store, ledger, student) = setup().await;

    let now = ts(2025, 3, 10, 9, 0);
    let l1 = ledger.clone();
    let l2 = ledger.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { l1.handle_tap("2023-123456", now).await }),
        tokio::spawn(async move { l2.handle_tap("2023-123456", now).await }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    // serialized: one checked in, the other observed ACTIVE and checked out
    let mut actions = vec![a.action, b.action];
    actions.sort_by_key(|x| *x == TapAction::CheckOut);
    assert_eq!(actions, vec![TapAction::CheckIn, TapAction::CheckOut]);

    assert!(store.active_session(student.id).await.unwrap().is_none());
    let stat = store
        .daily_stat(student.id, day(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_sessions, 1);
}

#[tokio::test]
async fn clock_skew_closes_with_zero_duration() {
    let (store, ledger, student) = setup().await;

    ledger.handle_tap("RFID-001", ts(2025, 3, 10, 10, 0)).await.unwrap();
    // reader clock jumped backwards
    let tap = ledger.handle_tap("RFID-001", ts(2025, 3, 10, 9, 0)).await.unwrap();
    assert_eq!(tap.action, TapAction::CheckOut);
    assert_eq!(tap.session.duration_minutes, 0);

    let stat = store
        .daily_stat(student.id, day(2025, 3, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_minutes, 0);
    assert_eq!(stat.total_sessions, 1);
}

#[tokio::test]
async fn unknown_identifier_is_rejected() {
    let (_store, ledger, _student) = setup().await;
    let err = ledger
        .handle_tap("9999-999999", ts(2025, 3, 10, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownIdentity(_)));
}

#[tokio::test]
async fn registration_enforces_format_and_uniqueness() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());

    let err = registry::register(store.as_ref(), req("23-123456", "R1", "CS231"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));

    registry::register(store.as_ref(), req("2023-123456", "R1", "CS231"))
        .await
        .unwrap();

    let err = registry::register(store.as_ref(), req("2023-123456", "R2", "CS231"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateIdentity(_)));

    let err = registry::register(store.as_ref(), req("2023-654321", "R1", "CS231"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateIdentity(_)));
}

#[tokio::test]
async fn lookup_works_by_id_and_rfid() {
    let (_store, ledger, _student) = setup().await;

    let tap1 = ledger.handle_tap("RFID-001", ts(2025, 3, 10, 9, 0)).await.unwrap();
    assert_eq!(tap1.action, TapAction::CheckIn);
    // the other credential toggles the same session
    let tap2 = ledger.handle_tap("2023-123456", ts(2025, 3, 10, 9, 45)).await.unwrap();
    assert_eq!(tap2.action, TapAction::CheckOut);
    assert_eq!(tap2.session.duration_minutes, 45);
}

#[tokio::test]
async fn stats_match_the_three_session_day() {
    let (store, ledger, student) = setup().await;

    for (start, end) in [(9, 0, 10, 30), (14, 0, 15, 0), (16, 0, 16, 30)]
        .map(|(h1, m1, h2, m2)| (ts(2025, 3, 10, h1, m1), ts(2025, 3, 10, h2, m2)))
    {
        ledger.handle_tap("RFID-001", start).await.unwrap();
        ledger.handle_tap("RFID-001", end).await.unwrap();
    }

    let today = day(2025, 3, 10);
    let resp = stats::student_stats(store.as_ref(), &student, today).await.unwrap();

    assert_eq!(resp.summary.total_sessions, 3);
    assert_eq!(resp.summary.total_minutes, 120); // cap-adjusted
    assert_eq!(resp.summary.longest_session_minutes, 90);
    assert_eq!(resp.summary.average_session_minutes, 60);
    assert_eq!(resp.summary.current_streak_days, 1);
    assert_eq!(resp.summary.longest_streak_days, 1);

    let active: Vec<_> = resp.heatmap.iter().filter(|c| c.minutes > 0).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].date, today);
    assert_eq!(active[0].minutes, 120);
    assert_eq!(active[0].level, 4);
    assert!(resp.heatmap.iter().filter(|c| c.minutes == 0).all(|c| c.level == 0));

    // reading stats is idempotent
    let again = stats::student_stats(store.as_ref(), &student, today).await.unwrap();
    assert_eq!(again.summary, resp.summary);
    assert_eq!(again.heatmap, resp.heatmap);

    // totals equal the sum over DailyStat rows
    let daily_sum: i64 = store
        .daily_stats(student.id)
        .await
        .unwrap()
        .iter()
        .map(|d| d.total_minutes)
        .sum();
    assert_eq!(resp.summary.total_minutes, daily_sum);
}

#[tokio::test]
async fn streak_spans_consecutive_days() {
    let (store, ledger, student) = setup().await;

    for d in 8..=10 {
        ledger.handle_tap("RFID-001", ts(2025, 3, d, 9, 0)).await.unwrap();
        ledger.handle_tap("RFID-001", ts(2025, 3, d, 10, 0)).await.unwrap();
    }
    // gap on the 11th, one more on the 12th
    ledger.handle_tap("RFID-001", ts(2025, 3, 12, 9, 0)).await.unwrap();
    ledger.handle_tap("RFID-001", ts(2025, 3, 12, 9, 30)).await.unwrap();

    let resp = stats::student_stats(store.as_ref(), &student, day(2025, 3, 12))
        .await
        .unwrap();
    assert_eq!(resp.summary.current_streak_days, 1);
    assert_eq!(resp.summary.longest_streak_days, 3);
    assert_eq!(resp.summary.total_days_active, 4);
}

#[tokio::test]
async fn export_reports_filter_by_scope() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let ledger = Arc::new(Ledger::new(store.clone()));
    let alice = registry::register(store.as_ref(), req("2023-111111", "R-A", "STEM241"))
        .await
        .unwrap();
    registry::register(store.as_ref(), req("2023-222222", "R-B", "CS231"))
        .await
        .unwrap();

    ledger.handle_tap("R-A", ts(2025, 3, 10, 9, 0)).await.unwrap();
    ledger.handle_tap("R-A", ts(2025, 3, 10, 10, 0)).await.unwrap();
    ledger.handle_tap("R-B", ts(2025, 3, 10, 9, 30)).await.unwrap();
    ledger.handle_tap("R-B", ts(2025, 3, 10, 10, 30)).await.unwrap();
    ledger.handle_tap("R-A", ts(2025, 3, 11, 9, 0)).await.unwrap();
    ledger.handle_tap("R-A", ts(2025, 3, 11, 9, 40)).await.unwrap();

    let by_day = stats::day_report(store.as_ref(), day(2025, 3, 10)).await.unwrap();
    assert_eq!(by_day.total_sessions, 2);
    assert_eq!(by_day.total_minutes, 120);

    let by_block = stats::block_report(store.as_ref(), "STEM241", None, None)
        .await
        .unwrap();
    assert_eq!(by_block.total_sessions, 2);
    assert!(by_block.rows.iter().all(|r| r.block_section == "STEM241"));

    let by_user = stats::user_report(
        store.as_ref(),
        &alice,
        Some(day(2025, 3, 11)),
        Some(day(2025, 3, 11)),
    )
    .await
    .unwrap();
    assert_eq!(by_user.total_sessions, 1);
    assert_eq!(by_user.total_minutes, 40);

    let blocks = store.distinct_blocks().await.unwrap();
    assert_eq!(blocks, vec!["CS231".to_string(), "STEM241".to_string()]);
}

#[tokio::test]
async fn stale_sessions_are_closed_at_cap_or_end_of_day() {
    let (store, ledger, student) = setup().await;

    // forgot to tap out on the 9th
    ledger.handle_tap("RFID-001", ts(2025, 3, 9, 20, 0)).await.unwrap();

    let closed = maintenance::close_stale_sessions(store.as_ref(), day(2025, 3, 10))
        .await
        .unwrap();
    assert_eq!(closed, 1);

    assert!(store.active_session(student.id).await.unwrap().is_none());
    let stat = store
        .daily_stat(student.id, day(2025, 3, 9))
        .await
        .unwrap()
        .unwrap();
    // check-in + 2h comes before end of day
    assert_eq!(stat.total_minutes, 120);
    assert_eq!(stat.total_sessions, 1);

    // the toggle works again afterwards
    let tap = ledger.handle_tap("RFID-001", ts(2025, 3, 10, 9, 0)).await.unwrap();
    assert_eq!(tap.action, TapAction::CheckIn);
}

#[tokio::test]
async fn overlong_past_sessions_are_truncated() {
    let (store, _ledger, student) = setup().await;

    // a 5-hour session recorded on a previous day (e.g. imported data)
    let check_in = ts(2025, 3, 9, 9, 0);
    let session = gymtrack::models::Session {
        id: uuid::Uuid::new_v4(),
        student_id: student.id,
        check_in_time: check_in,
        check_out_time: None,
        duration_minutes: 0,
        date: day(2025, 3, 9),
    };
    store.insert_active_session(&session).await.unwrap();
    store
        .close_session(session.id, check_in + Duration::minutes(300), 300)
        .await
        .unwrap();

    let capped = maintenance::cap_previous_days(store.as_ref(), day(2025, 3, 10))
        .await
        .unwrap();
    assert_eq!(capped, 1);

    let stat = store
        .daily_stat(student.id, day(2025, 3, 9))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stat.total_minutes, 120);

    let sessions = store.closed_sessions(student.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].duration_minutes, 120);
}
