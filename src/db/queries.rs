use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{Appointment, NewAppointment, PriceRange, ReminderTier, Service, ServiceCount};
use crate::services::calendar::{format_slot, parse_slot};

// ── Services ──

const SERVICE_COLUMNS: &str = "id, name, min_price, max_price, active";

fn parse_service_row(row: &rusqlite::Row) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        price: PriceRange {
            min: row.get(2)?,
            max: row.get(3)?,
        },
        active: row.get::<_, i32>(4)? != 0,
    })
}

pub fn list_active_services(conn: &Connection) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE active = 1 ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map([], parse_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn list_all_services(conn: &Connection) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map([], parse_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

/// Looks a service up by id, including soft-deleted ones.
pub fn get_service(conn: &Connection, id: i64) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
            params![id],
            parse_service_row,
        )
        .optional()?;
    Ok(service)
}

pub fn insert_service(conn: &Connection, name: &str, price: PriceRange) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO services (name, min_price, max_price) VALUES (?1, ?2, ?3)",
        params![name, price.min, price.max],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_service_price(conn: &Connection, id: i64, price: PriceRange) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET min_price = ?1, max_price = ?2 WHERE id = ?3",
        params![price.min, price.max, id],
    )?;
    Ok(count > 0)
}

/// Soft delete: appointments keep pointing at the row.
pub fn deactivate_service(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET active = 0 WHERE id = ?1 AND active = 1",
        params![id],
    )?;
    Ok(count > 0)
}

// ── Appointments ──

const APPOINTMENT_SELECT: &str = "SELECT a.id, a.subject_id, a.full_name, a.phone, a.service_id, s.name, a.slot_timestamp, \
     a.reminder_24h, a.reminder_2h, a.reminder_30m \
     FROM appointments a JOIN services s ON s.id = a.service_id";

fn parse_appointment_row(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
    let slot_str: String = row.get(6)?;
    let slot = parse_slot(&slot_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("malformed slot timestamp: {slot_str}").into(),
        )
    })?;

    Ok(Appointment {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        full_name: row.get(2)?,
        phone: row.get(3)?,
        service_id: row.get(4)?,
        service_name: row.get(5)?,
        slot,
        reminder_24h: row.get::<_, i32>(7)? != 0,
        reminder_2h: row.get::<_, i32>(8)? != 0,
        reminder_30m: row.get::<_, i32>(9)? != 0,
    })
}

fn collect_appointments(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, parse_appointment_row)?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row?);
    }
    Ok(appointments)
}

/// Plain insert. Double-booking is rejected by the UNIQUE index on
/// `slot_timestamp`, surfacing as a constraint violation.
pub fn insert_appointment(conn: &Connection, new: &NewAppointment) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO appointments (subject_id, full_name, phone, service_id, slot_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new.subject_id,
            new.full_name,
            new.phone,
            new.service_id,
            format_slot(&new.slot),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_appointment(conn: &Connection, id: i64) -> anyhow::Result<Option<Appointment>> {
    let appointment = conn
        .query_row(
            &format!("{APPOINTMENT_SELECT} WHERE a.id = ?1"),
            params![id],
            parse_appointment_row,
        )
        .optional()?;
    Ok(appointment)
}

pub fn delete_appointment(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn appointments_for_subject(conn: &Connection, subject_id: i64) -> anyhow::Result<Vec<Appointment>> {
    collect_appointments(
        conn,
        &format!("{APPOINTMENT_SELECT} WHERE a.subject_id = ?1 ORDER BY a.slot_timestamp ASC"),
        params![subject_id],
    )
}

pub fn all_appointments(conn: &Connection) -> anyhow::Result<Vec<Appointment>> {
    collect_appointments(
        conn,
        &format!("{APPOINTMENT_SELECT} ORDER BY a.slot_timestamp ASC"),
        [],
    )
}

/// Appointments whose slot is strictly after `now`.
pub fn upcoming_appointments(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<Vec<Appointment>> {
    collect_appointments(
        conn,
        &format!("{APPOINTMENT_SELECT} WHERE a.slot_timestamp > ?1 ORDER BY a.slot_timestamp ASC"),
        params![format_slot(now)],
    )
}

/// Number of appointments with `start <= slot < end`.
pub fn count_in_range(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE slot_timestamp >= ?1 AND slot_timestamp < ?2",
        params![format_slot(start), format_slot(end)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Appointment counts per service, including services with none.
pub fn service_counts(conn: &Connection) -> anyhow::Result<Vec<ServiceCount>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, COUNT(a.id)
         FROM services s
         LEFT JOIN appointments a ON a.service_id = s.id
         WHERE s.active = 1 OR a.id IS NOT NULL
         GROUP BY s.id, s.name
         ORDER BY s.id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ServiceCount {
            service_id: row.get(0)?,
            service_name: row.get(1)?,
            count: row.get(2)?,
        })
    })?;

    let mut counts = vec![];
    for row in rows {
        counts.push(row?);
    }
    Ok(counts)
}

/// Booked slots with `start <= slot <= end`, ascending.
pub fn booked_slots_between(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<NaiveDateTime>> {
    let mut stmt = conn.prepare(
        "SELECT slot_timestamp FROM appointments
         WHERE slot_timestamp >= ?1 AND slot_timestamp <= ?2
         ORDER BY slot_timestamp ASC",
    )?;
    let rows = stmt.query_map(params![format_slot(start), format_slot(end)], |row| {
        row.get::<_, String>(0)
    })?;

    let mut slots = vec![];
    for row in rows {
        let raw = row?;
        match parse_slot(&raw) {
            Some(slot) => slots.push(slot),
            None => tracing::warn!(slot = %raw, "skipping malformed slot timestamp"),
        }
    }
    Ok(slots)
}

/// Flips one reminder flag from unset to set. Returns `true` only for the
/// caller that performed the flip, so a tier is claimed at most once.
pub fn claim_reminder(conn: &Connection, id: i64, tier: ReminderTier) -> anyhow::Result<bool> {
    let column = tier.column();
    let count = conn.execute(
        &format!("UPDATE appointments SET {column} = 1 WHERE id = ?1 AND {column} = 0"),
        params![id],
    )?;
    Ok(count > 0)
}
