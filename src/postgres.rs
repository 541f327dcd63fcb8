use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use crate::aggregate::DAILY_CAP_MINUTES;
use crate::error::{Error, Result};
use crate::models::{DailyStat, Session, Student};
use crate::store::Store;

pub type Db = Pool<Postgres>;

/// Postgres-backed store. Concurrency guarantees lean on the schema: a
/// partial unique index keeps one open session per student, and the capped
/// daily write is a single upsert.
#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = Pool::<Postgres>::connect(url).await?;
        Ok(PgStore { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.into()))?;
        Ok(())
    }

    async fn students_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Student>> {
        let students = sqlx::query_as::<_, Student>(
            "SELECT * FROM gym_students WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(students.into_iter().map(|s| (s.id, s)).collect())
    }

    fn zip_students(
        sessions: Vec<Session>,
        students: HashMap<Uuid, Student>,
    ) -> Vec<(Student, Session)> {
        sessions
            .into_iter()
            .filter_map(|s| students.get(&s.student_id).map(|st| (st.clone(), s)))
            .collect()
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_student(&self, student: &Student) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO gym_students
                (id, student_id, rfid, first_name, last_name, pe_course, block_section, registered_at, is_active)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(student.id)
        .bind(&student.student_id)
        .bind(&student.rfid)
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(student.pe_course)
        .bind(&student.block_section)
        .bind(student.registered_at)
        .bind(student.is_active)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(Error::DuplicateIdentity(student.student_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_student(&self, identifier: &str) -> Result<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(
            "SELECT * FROM gym_students WHERE (student_id = $1 OR rfid = $1) AND is_active",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(student)
    }

    async fn distinct_blocks(&self) -> Result<Vec<String>> {
        let blocks = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT block_section FROM gym_students WHERE is_active ORDER BY block_section",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(blocks)
    }

    async fn active_session(&self, student: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM gym_sessions WHERE student_id = $1 AND check_out_time IS NULL",
        )
        .bind(student)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn insert_active_session(&self, session: &Session) -> Result<()> {
        // idx_gym_sessions_one_active rejects a second open session
        let res = sqlx::query(
            r#"
            INSERT INTO gym_sessions (id, student_id, check_in_time, check_out_time, duration_minutes, date)
            VALUES ($1,$2,$3,NULL,0,$4)
            "#,
        )
        .bind(session.id)
        .bind(session.student_id)
        .bind(session.check_in_time)
        .bind(session.date)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn close_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            UPDATE gym_sessions
            SET check_out_time = $2, duration_minutes = $3
            WHERE id = $1 AND check_out_time IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(check_out)
        .bind(duration_minutes)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn rewrite_session(
        &self,
        id: Uuid,
        check_out: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            UPDATE gym_sessions
            SET check_out_time = $2, duration_minutes = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(check_out)
        .bind(duration_minutes)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn closed_sessions(&self, student: Uuid) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM gym_sessions
            WHERE student_id = $1 AND check_out_time IS NOT NULL
            ORDER BY check_in_time
            "#,
        )
        .bind(student)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn closed_sessions_between(
        &self,
        student: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM gym_sessions
            WHERE student_id = $1 AND check_out_time IS NOT NULL
              AND date >= COALESCE($2, date) AND date <= COALESCE($3, date)
            ORDER BY check_in_time
            "#,
        )
        .bind(student)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn sessions_on_date(&self, date: NaiveDate) -> Result<Vec<(Student, Session)>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM gym_sessions
            WHERE date = $1 AND check_out_time IS NOT NULL
            ORDER BY check_in_time
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.student_id).collect();
        let students = self.students_by_ids(&ids).await?;
        Ok(Self::zip_students(sessions, students))
    }

    async fn sessions_for_block(
        &self,
        block: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<(Student, Session)>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT s.* FROM gym_sessions s
            JOIN gym_students st ON st.id = s.student_id
            WHERE st.block_section = $1 AND st.is_active
              AND s.check_out_time IS NOT NULL
              AND s.date >= COALESCE($2, s.date) AND s.date <= COALESCE($3, s.date)
            ORDER BY s.check_in_time
            "#,
        )
        .bind(block)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.student_id).collect();
        let students = self.students_by_ids(&ids).await?;
        Ok(Self::zip_students(sessions, students))
    }

    async fn open_sessions_before(&self, date: NaiveDate) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM gym_sessions
            WHERE check_out_time IS NULL AND date < $1
            ORDER BY check_in_time
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn long_closed_sessions_before(
        &self,
        date: NaiveDate,
        longer_than_minutes: i64,
    ) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM gym_sessions
            WHERE date < $1 AND check_out_time IS NOT NULL AND duration_minutes > $2
            ORDER BY check_in_time
            "#,
        )
        .bind(date)
        .bind(longer_than_minutes)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn apply_completed_session(
        &self,
        student: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<DailyStat> {
        let stat = sqlx::query_as::<_, DailyStat>(
            r#"
            INSERT INTO gym_daily_stats (student_id, date, total_minutes, total_sessions)
            VALUES ($1, $2, LEAST($3, $4), 1)
            ON CONFLICT (student_id, date) DO UPDATE
            SET total_minutes = LEAST(gym_daily_stats.total_minutes + $3, $4),
                total_sessions = gym_daily_stats.total_sessions + 1
            RETURNING *
            "#,
        )
        .bind(student)
        .bind(date)
        .bind(duration_minutes)
        .bind(DAILY_CAP_MINUTES)
        .fetch_one(&self.pool)
        .await?;
        Ok(stat)
    }

    async fn daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<Option<DailyStat>> {
        let stat = sqlx::query_as::<_, DailyStat>(
            "SELECT * FROM gym_daily_stats WHERE student_id = $1 AND date = $2",
        )
        .bind(student)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stat)
    }

    async fn daily_stats(&self, student: Uuid) -> Result<Vec<DailyStat>> {
        let stats = sqlx::query_as::<_, DailyStat>(
            "SELECT * FROM gym_daily_stats WHERE student_id = $1 ORDER BY date",
        )
        .bind(student)
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn recompute_daily_stat(&self, student: Uuid, date: NaiveDate) -> Result<DailyStat> {
        let stat = sqlx::query_as::<_, DailyStat>(
            r#"
            INSERT INTO gym_daily_stats (student_id, date, total_minutes, total_sessions)
            SELECT $1, $2,
                   LEAST(COALESCE(SUM(duration_minutes), 0), $3)::bigint,
                   COUNT(*)::bigint
            FROM gym_sessions
            WHERE student_id = $1 AND date = $2 AND check_out_time IS NOT NULL
            ON CONFLICT (student_id, date) DO UPDATE
            SET total_minutes = EXCLUDED.total_minutes,
                total_sessions = EXCLUDED.total_sessions
            RETURNING *
            "#,
        )
        .bind(student)
        .bind(date)
        .bind(DAILY_CAP_MINUTES)
        .fetch_one(&self.pool)
        .await?;
        Ok(stat)
    }
}
