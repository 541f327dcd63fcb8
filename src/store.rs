use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DailyStat, Session, Student};

/// Persistence collaborator. The toggle and aggregation logic never talk to
/// a database directly; they go through this trait so the core runs the same
/// against Postgres and against the in-memory store used by tests.
///
/// Atomicity contract: `insert_active_session` fails with `Error::Conflict`
/// when the student already has an open session, `close_session` returns
/// `None` when the session was already closed by a concurrent tap, and
/// `apply_completed_session` is an atomic read-modify-write per
/// (student, date).
#[async_trait]
pub trait Store: Send + Sync {
    // students
    async fn insert_student(&self, student: &Student) -> Result<()>;
    /// Lookup by student id or rfid; active students only.
    async fn find_student(&self, identifier: &str) -> Result<Option<Student>>;
    async fn distinct_blocks(&self) -> Result<Vec<String>>;

    // sessions
    async fn active_session(&self, student: Uuid) -> Result<Option<Session>>;
    async fn insert_active_session(&self, session: &Session) -> Result<()>;
    /// Close an open session; `None` if it was not open anymore.
    async fn close_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>>;
    /// Rewrite check-out and duration regardless of state (maintenance only).
    async fn rewrite_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>>;
    async fn closed_sessions(&self, student: Uuid) -> Result<Vec<Session>>;
    async fn closed_sessions_between(
        &self,
        student: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Session>>;
    async fn sessions_on_date(&self, date: NaiveDate) -> Result<Vec<(Student, Session)>>;
    async fn sessions_for_block(
        &self,
        block: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<(Student, Session)>>;
    async fn open_sessions_before(&self, date: NaiveDate) -> Result<Vec<Session>>;
    async fn long_closed_sessions_before(
        &self,
        date: NaiveDate,
        longer_than_minutes: i64,
    ) -> Result<Vec<Session>>;

    // daily stats
    /// Capped increment + unconditional session count bump, atomically.
    async fn apply_completed_session(
        &self,
        student: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<DailyStat>;
    async fn daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<Option<DailyStat>>;
    async fn daily_stats(&self, student: Uuid) -> Result<Vec<DailyStat>>;
    /// Rebuild one (student, date) row from its closed sessions.
    async fn recompute_daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<DailyStat>;
}
