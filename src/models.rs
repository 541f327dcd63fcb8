use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// PE course enrollment, stored as the `pe_course` enum type in Postgres.
#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "pe_course")]
pub enum PeCourse {
    #[sqlx(rename = "PEDUONE")]
    #[serde(rename = "PEDUONE")]
    PeduOne,
    #[sqlx(rename = "PEDUTWO")]
    #[serde(rename = "PEDUTWO")]
    PeduTwo,
    #[sqlx(rename = "PEDUTRI")]
    #[serde(rename = "PEDUTRI")]
    PeduTri,
    #[sqlx(rename = "PEDUFOR")]
    #[serde(rename = "PEDUFOR")]
    PeduFor,
    #[sqlx(rename = "N/A")]
    #[serde(rename = "N/A")]
    NotEnrolled,
}

impl Default for PeCourse {
    fn default() -> Self {
        PeCourse::NotEnrolled
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub student_id: String, // format 20YY-NNNNNN, e.g. "2023-123456"
    pub rfid: String,
    pub first_name: String,
    pub last_name: String,
    pub pe_course: PeCourse,
    pub block_section: String,
    pub registered_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One ledger entry. Active iff `check_out_time` is null; `duration_minutes`
/// stays 0 until the session is closed.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub student_id: Uuid,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub date: NaiveDate, // calendar date of the check-in
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.check_out_time.is_none()
    }
}

/// Per-(student, date) aggregate. `total_minutes` is capped at the daily
/// limit; `total_sessions` counts every completed session uncapped.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct DailyStat {
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub total_minutes: i64,
    pub total_sessions: i64,
}

// --- API payloads ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterStudentReq {
    pub student_id: String,
    pub rfid: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub pe_course: PeCourse,
    pub block_section: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TapReq {
    pub identifier: String,
    /// Defaults to the server clock when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TapAction {
    CheckIn,
    CheckOut,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TapResponse {
    pub action: TapAction,
    pub session: Session,
    pub daily_minutes: i64,
    pub remaining_daily_minutes: i64,
    pub total_minutes: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusResponse {
    pub student: Student,
    pub has_active_session: bool,
    pub daily_minutes: i64,
    pub remaining_daily_minutes: i64,
    pub can_check_in: bool,
}

/// One cell of the calendar heatmap. `level` is the 0-4 intensity bucket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeatmapCell {
    pub date: NaiveDate,
    pub minutes: i64,
    pub level: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total_sessions: i64,
    pub total_minutes: i64,
    pub average_session_minutes: i64,
    pub longest_session_minutes: i64,
    pub total_days_active: i64,
    pub current_streak_days: i64,
    pub longest_streak_days: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatsResponse {
    pub student: Student,
    pub summary: Summary,
    pub heatmap: Vec<HeatmapCell>,
}

/// One tabular row handed to the external PDF renderer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExportRow {
    pub student_id: String,
    pub name: String,
    pub block_section: String,
    pub date: NaiveDate,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExportReport {
    pub rows: Vec<ExportRow>,
    pub total_sessions: usize,
    pub total_minutes: i64,
}
