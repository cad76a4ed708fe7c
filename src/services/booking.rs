use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, NewAppointment, ServiceCount};
use crate::services::calendar::{format_slot, SlotCalendar};

/// Commits a reservation. The UNIQUE index on `slot_timestamp` is the only
/// guard against double-booking: the insert either wins the slot or fails with
/// a constraint violation, which is reported as [`AppError::Conflict`].
pub fn try_book(
    conn: &Connection,
    calendar: &SlotCalendar,
    new: &NewAppointment,
) -> Result<Appointment, AppError> {
    if !calendar.is_on_grid(&new.slot) {
        return Err(AppError::Validation(format!(
            "{} is not a bookable slot",
            format_slot(&new.slot)
        )));
    }

    let service = queries::get_service(conn, new.service_id)?
        .filter(|s| s.active)
        .ok_or_else(|| AppError::NotFound(format!("service {}", new.service_id)))?;
    if service.is_walk_in() {
        return Err(AppError::Validation(format!(
            "{} is walk-in only",
            service.name
        )));
    }

    let id = match queries::insert_appointment(conn, new) {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            tracing::info!(slot = %format_slot(&new.slot), subject = new.subject_id, "slot already taken");
            return Err(AppError::Conflict {
                slot: format_slot(&new.slot),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let appointment = queries::get_appointment(conn, id)?
        .ok_or_else(|| anyhow::anyhow!("appointment {id} vanished after insert"))?;

    tracing::info!(
        appointment_id = id,
        subject = new.subject_id,
        service = %appointment.service_name,
        slot = %format_slot(&appointment.slot),
        "appointment booked"
    );
    Ok(appointment)
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// First free grid slot strictly after `preferred` (and after `now`), scanning
/// the rest of `preferred`'s day and the `days` following days.
pub fn find_next_available(
    conn: &Connection,
    calendar: &SlotCalendar,
    preferred: &NaiveDateTime,
    now: &NaiveDateTime,
    days: u32,
) -> anyhow::Result<Option<NaiveDateTime>> {
    let first_day = preferred.date();
    let last_day = first_day + Duration::days(days as i64);

    let booked: HashSet<NaiveDateTime> = queries::booked_slots_between(
        conn,
        &first_day.and_time(NaiveTime::MIN),
        &end_of_day(last_day),
    )?
    .into_iter()
    .collect();

    let next = first_day
        .iter_days()
        .take(days as usize + 1)
        .flat_map(|date| calendar.grid_for(date))
        .find(|slot| slot > preferred && slot > now && !booked.contains(slot));
    Ok(next)
}

/// Grid slots on `date` after `now` that nobody holds yet.
pub fn free_slots_on(
    conn: &Connection,
    calendar: &SlotCalendar,
    date: NaiveDate,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<NaiveDateTime>> {
    let booked: HashSet<NaiveDateTime> =
        booked_slots_on(conn, date)?.into_iter().collect();
    Ok(calendar
        .slots_for(date, *now)
        .filter(|slot| !booked.contains(slot))
        .collect())
}

pub fn booked_slots_on(conn: &Connection, date: NaiveDate) -> anyhow::Result<Vec<NaiveDateTime>> {
    queries::booked_slots_between(conn, &date.and_time(NaiveTime::MIN), &end_of_day(date))
}

/// Hard delete. Any subject may cancel any appointment id.
pub fn cancel(conn: &Connection, appointment_id: i64) -> Result<Appointment, AppError> {
    let appointment = queries::get_appointment(conn, appointment_id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;

    if !queries::delete_appointment(conn, appointment_id)? {
        // Deleted between the lookup and the delete.
        return Err(AppError::NotFound(format!("appointment {appointment_id}")));
    }

    tracing::info!(
        appointment_id,
        subject = appointment.subject_id,
        slot = %format_slot(&appointment.slot),
        "appointment cancelled"
    );
    Ok(appointment)
}

pub fn list_for_subject(conn: &Connection, subject_id: i64) -> Result<Vec<Appointment>, AppError> {
    Ok(queries::appointments_for_subject(conn, subject_id)?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<Appointment>, AppError> {
    Ok(queries::all_appointments(conn)?)
}

/// Appointments with `start <= slot < end`.
pub fn count_in_period(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> Result<i64, AppError> {
    Ok(queries::count_in_range(conn, start, end)?)
}

pub fn per_service_counts(conn: &Connection) -> Result<Vec<ServiceCount>, AppError> {
    Ok(queries::service_counts(conn)?)
}

/// `[first of the month, first of next month)` around `now`.
pub fn month_bounds(now: &NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let date = now.date();
    let start = date.with_day(1).unwrap_or(date);
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .unwrap_or(start + Duration::days(31));
    (start.and_time(NaiveTime::MIN), next.and_time(NaiveTime::MIN))
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}
