use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, Service, ServiceCount};
use crate::services::booking;
use crate::services::calendar::format_slot;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/appointments
#[derive(Serialize)]
pub struct AppointmentResponse {
    id: i64,
    subject_id: i64,
    full_name: String,
    phone: String,
    service_id: i64,
    service_name: String,
    slot: String,
    reminder_24h: bool,
    reminder_2h: bool,
    reminder_30m: bool,
}

impl From<Appointment> for AppointmentResponse {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            subject_id: a.subject_id,
            full_name: a.full_name,
            phone: a.phone,
            service_id: a.service_id,
            service_name: a.service_name,
            slot: format_slot(&a.slot),
            reminder_24h: a.reminder_24h,
            reminder_2h: a.reminder_2h,
            reminder_30m: a.reminder_30m,
        }
    }
}

pub async fn get_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppointmentResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let appointments = {
        let db = state.db()?;
        booking::list_all(&db)?
    };

    Ok(Json(appointments.into_iter().map(Into::into).collect()))
}

// POST /api/admin/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<AppointmentResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let cancelled = {
        let db = state.db()?;
        booking::cancel(&db, id)?
    };

    Ok(Json(cancelled.into()))
}

// GET /api/admin/services
pub async fn get_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Service>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let services = {
        let db = state.db()?;
        queries::list_all_services(&db)?
    };

    Ok(Json(services))
}

// GET /api/admin/stats
#[derive(Serialize)]
pub struct StatsResponse {
    month: String,
    monthly_count: i64,
    per_service: Vec<ServiceCount>,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = chrono::Local::now().naive_local();
    let (start, end) = booking::month_bounds(&now);
    let (monthly_count, per_service) = {
        let db = state.db()?;
        (
            booking::count_in_period(&db, &start, &end)?,
            booking::per_service_counts(&db)?,
        )
    };

    Ok(Json(StatsResponse {
        month: start.format("%Y-%m").to_string(),
        monthly_count,
        per_service,
    }))
}
