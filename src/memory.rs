use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::aggregate::{capped_total, DAILY_CAP_MINUTES};
use crate::error::{Error, Result};
use crate::models::{DailyStat, Session, Student};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    students: HashMap<Uuid, Student>,
    sessions: HashMap<Uuid, Session>,
    daily: HashMap<(Uuid, NaiveDate), DailyStat>,
}

/// In-memory store. Backs the test suite and the zero-configuration dev
/// mode; one `RwLock` over all tables makes every operation atomic.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_student(&self, student: &Student) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let taken = inner
            .students
            .values()
            .any(|s| s.student_id == student.student_id || s.rfid == student.rfid);
        if taken {
            return Err(Error::DuplicateIdentity(student.student_id.clone()));
        }
        inner.students.insert(student.id, student.clone());
        Ok(())
    }

    async fn find_student(&self, identifier: &str) -> Result<Option<Student>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .students
            .values()
            .find(|s| s.is_active && (s.student_id == identifier || s.rfid == identifier))
            .cloned())
    }

    async fn distinct_blocks(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let mut blocks: Vec<String> = inner
            .students
            .values()
            .filter(|s| s.is_active)
            .map(|s| s.block_section.clone())
            .collect();
        blocks.sort();
        blocks.dedup();
        Ok(blocks)
    }

    async fn active_session(&self, student: Uuid) -> Result<Option<Session>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .sessions
            .values()
            .find(|s| s.student_id == student && s.is_active())
            .cloned())
    }

    async fn insert_active_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let already_open = inner
            .sessions
            .values()
            .any(|s| s.student_id == session.student_id && s.is_active());
        if already_open {
            return Err(Error::Conflict);
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn close_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>> {
        let mut inner = self.inner.write().unwrap();
        match inner.sessions.get_mut(&id) {
            Some(s) if s.is_active() => {
                s.check_out_time = Some(check_out);
                s.duration_minutes = duration_minutes;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn rewrite_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>> {
        let mut inner = self.inner.write().unwrap();
        match inner.sessions.get_mut(&id) {
            Some(s) => {
                s.check_out_time = Some(check_out);
                s.duration_minutes = duration_minutes;
                Ok(Some(s.clone()))
            }
            None => Ok(None),
        }
    }

    async fn closed_sessions(&self, student: Uuid) -> Result<Vec<Session>> {
        self.closed_sessions_between(student, None, None).await
    }

    async fn closed_sessions_between(
        &self,
        student: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Session>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.student_id == student && !s.is_active())
            .filter(|s| from.map_or(true, |d| s.date >= d) && to.map_or(true, |d| s.date <= d))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.check_in_time);
        Ok(out)
    }

    async fn sessions_on_date(&self, date: NaiveDate) -> Result<Vec<(Student, Session)>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<(Student, Session)> = inner
            .sessions
            .values()
            .filter(|s| s.date == date && !s.is_active())
            .filter_map(|s| {
                inner
                    .students
                    .get(&s.student_id)
                    .map(|st| (st.clone(), s.clone()))
            })
            .collect();
        out.sort_by_key(|(_, s)| s.check_in_time);
        Ok(out)
    }

    async fn sessions_for_block(
        &self,
        block: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<(Student, Session)>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<(Student, Session)> = inner
            .sessions
            .values()
            .filter(|s| !s.is_active())
            .filter(|s| from.map_or(true, |d| s.date >= d) && to.map_or(true, |d| s.date <= d))
            .filter_map(|s| {
                inner
                    .students
                    .get(&s.student_id)
                    .filter(|st| st.is_active && st.block_section == block)
                    .map(|st| (st.clone(), s.clone()))
            })
            .collect();
        out.sort_by_key(|(_, s)| s.check_in_time);
        Ok(out)
    }

    async fn open_sessions_before(&self, date: NaiveDate) -> Result<Vec<Session>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.is_active() && s.date < date)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.check_in_time);
        Ok(out)
    }

    async fn long_closed_sessions_before(
        &self,
        date: NaiveDate,
        longer_than_minutes: i64,
    ) -> Result<Vec<Session>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| !s.is_active() && s.date < date && s.duration_minutes > longer_than_minutes)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.check_in_time);
        Ok(out)
    }

    async fn apply_completed_session(
        &self,
        student: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<DailyStat> {
        let mut inner = self.inner.write().unwrap();
        let stat = inner
            .daily
            .entry((student, date))
            .or_insert_with(|| DailyStat {
                student_id: student,
                date,
                total_minutes: 0,
                total_sessions: 0,
            });
        stat.total_minutes = capped_total(stat.total_minutes, duration_minutes);
        stat.total_sessions += 1;
        Ok(stat.clone())
    }

    async fn daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<Option<DailyStat>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.daily.get(&(student, date)).cloned())
    }

    async fn daily_stats(&self, student: Uuid) -> Result<Vec<DailyStat>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<DailyStat> = inner
            .daily
            .values()
            .filter(|d| d.student_id == student)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.date);
        Ok(out)
    }

    async fn recompute_daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<DailyStat> {
        let mut inner = self.inner.write().unwrap();
        let (minutes, count) = inner
            .sessions
            .values()
            .filter(|s| s.student_id == student && s.date == date && !s.is_active())
            .fold((0i64, 0i64), |(m, c), s| (m + s.duration_minutes, c + 1));
        let stat = DailyStat {
            student_id: student,
            date,
            total_minutes: minutes.min(DAILY_CAP_MINUTES),
            total_sessions: count,
        };
        inner.daily.insert((student, date), stat.clone());
        Ok(stat)
    }
}
