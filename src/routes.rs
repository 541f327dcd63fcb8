use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::aggregate::DAILY_CAP_MINUTES;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::maintenance::{self, MaintenanceReport};
use crate::models::*;
use crate::registry;
use crate::stats;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let ledger = Arc::new(Ledger::new(store.clone()));
        AppState { store, ledger }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/students", post(register_student))
        .route("/api/tap", post(tap))
        .route("/api/students/:identifier/status", get(student_status))
        .route("/api/students/:identifier/stats", get(student_stats))
        .route("/api/export", get(export))
        .route("/api/blocks", get(blocks))
        .route("/api/maintenance/daily", post(run_maintenance))
        .with_state(state)
}

async fn register_student(
    State(state): State<AppState>,
    Json(req): Json<RegisterStudentReq>,
) -> Result<(StatusCode, Json<Student>)> {
    let student = registry::register(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn tap(
    State(state): State<AppState>,
    Json(req): Json<TapReq>,
) -> Result<Json<TapResponse>> {
    let now = req.timestamp.unwrap_or_else(Utc::now);
    let resp = state.ledger.handle_tap(&req.identifier, now).await?;
    Ok(Json(resp))
}

async fn student_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<StatusResponse>> {
    let student = registry::lookup(state.store.as_ref(), &identifier).await?;
    let active = state.store.active_session(student.id).await?;
    let daily_minutes = state
        .store
        .daily_stat(student.id, Utc::now().date_naive())
        .await?
        .map_or(0, |d| d.total_minutes);
    let remaining = (DAILY_CAP_MINUTES - daily_minutes).max(0);

    Ok(Json(StatusResponse {
        has_active_session: active.is_some(),
        daily_minutes,
        remaining_daily_minutes: remaining,
        can_check_in: active.is_none() && remaining > 0,
        student,
    }))
}

async fn student_stats(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<StatsResponse>> {
    let student = registry::lookup(state.store.as_ref(), &identifier).await?;
    let resp = stats::student_stats(state.store.as_ref(), &student, Utc::now().date_naive()).await?;
    Ok(Json(resp))
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ExportScope {
    User,
    Day,
    Block,
}

#[derive(Deserialize, Debug)]
struct ExportParams {
    scope: ExportScope,
    student_id: Option<String>,
    date: Option<NaiveDate>,
    block: Option<String>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
}

async fn export(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Result<Json<ExportReport>> {
    let store = state.store.as_ref();
    let report = match params.scope {
        ExportScope::User => {
            let ident = params
                .student_id
                .ok_or(Error::MissingParameter("student_id"))?;
            let student = registry::lookup(store, &ident).await?;
            stats::user_report(store, &student, params.date_from, params.date_to).await?
        }
        ExportScope::Day => {
            let date = params.date.ok_or(Error::MissingParameter("date"))?;
            stats::day_report(store, date).await?
        }
        ExportScope::Block => {
            let block = params.block.ok_or(Error::MissingParameter("block"))?;
            stats::block_report(store, &block, params.date_from, params.date_to).await?
        }
    };
    Ok(Json(report))
}

async fn blocks(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let blocks = state.store.distinct_blocks().await?;
    Ok(Json(serde_json::json!({ "blocks": blocks })))
}

async fn run_maintenance(State(state): State<AppState>) -> Result<Json<MaintenanceReport>> {
    let report = maintenance::run_daily_maintenance(state.store.as_ref()).await?;
    Ok(Json(report))
}
