use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aggregate::{self, DAILY_CAP_MINUTES};
use crate::error::{Error, Result};
use crate::models::{Session, Student, TapAction, TapResponse};
use crate::registry;
use crate::store::Store;

/// How many times a tap is replayed when it loses a race against another tap
/// for the same student before the conflict is surfaced.
const TAP_RETRIES: u32 = 3;

/// The session ledger. A tap toggles the student between NO_SESSION and
/// ACTIVE; there is no third state. All taps for one student are serialized
/// through a per-student async mutex so two simultaneous taps can never both
/// open (or both close) a session. Taps for different students share nothing.
pub struct Ledger {
    store: Arc<dyn Store>,
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Ledger {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn student_lock(&self, student: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(student)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn handle_tap(&self, identifier: &str, now: DateTime<Utc>) -> Result<TapResponse> {
        let student = registry::lookup(self.store.as_ref(), identifier).await?;

        let lock = self.student_lock(student.id);
        let _guard = lock.lock().await;

        let mut attempt = 0;
        let (action, session) = loop {
            match self.toggle(&student, now).await {
                Err(Error::Conflict) if attempt < TAP_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        student_id = %student.student_id,
                        attempt,
                        "tap raced with a concurrent tap, retrying"
                    );
                }
                other => break other?,
            }
        };

        self.build_response(&student, action, session).await
    }

    /// One read-modify-write of the toggle, run under the student's lock.
    async fn toggle(&self, student: &Student, now: DateTime<Utc>) -> Result<(TapAction, Session)> {
        if let Some(open) = self.store.active_session(student.id).await? {
            let raw = (now - open.check_in_time).num_minutes();
            let duration = if raw < 0 {
                // clock skew: keep the event, credit nothing
                tracing::warn!(
                    student_id = %student.student_id,
                    check_in = %open.check_in_time,
                    check_out = %now,
                    "check-out before check-in, closing with zero duration"
                );
                0
            } else {
                raw
            };

            match self.store.close_session(open.id, now, duration).await? {
                Some(closed) => {
                    aggregate::record_completed_session(
                        self.store.as_ref(),
                        student.id,
                        closed.date,
                        duration,
                    )
                    .await?;
                    tracing::info!(
                        student_id = %student.student_id,
                        duration_minutes = duration,
                        "checked out"
                    );
                    Ok((TapAction::CheckOut, closed))
                }
                // someone closed it between our read and write
                None => Err(Error::Conflict),
            }
        } else {
            let session = Session {
                id: Uuid::new_v4(),
                student_id: student.id,
                check_in_time: now,
                check_out_time: None,
                duration_minutes: 0,
                date: now.date_naive(),
            };
            self.store.insert_active_session(&session).await?;
            tracing::info!(student_id = %student.student_id, "checked in");
            Ok((TapAction::CheckIn, session))
        }
    }

    async fn build_response(
        &self,
        student: &Student,
        action: TapAction,
        session: Session,
    ) -> Result<TapResponse> {
        let daily_minutes = self
            .store
            .daily_stat(student.id, session.date)
            .await?
            .map_or(0, |d| d.total_minutes);
        let total_minutes = self
            .store
            .daily_stats(student.id)
            .await?
            .iter()
            .map(|d| d.total_minutes)
            .sum();

        Ok(TapResponse {
            action,
            session,
            daily_minutes,
            remaining_daily_minutes: (DAILY_CAP_MINUTES - daily_minutes).max(0),
            total_minutes,
        })
    }
}
