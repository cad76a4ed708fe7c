use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use tokio::task::JoinHandle;

use crate::db::queries;
use crate::models::{Appointment, ReminderTier, Reply};
use crate::services::calendar::format_slot;
use crate::services::messaging::MessagingProvider;
use crate::state::lock_db;

/// Periodic sweep over upcoming appointments, sending the 24 h, 2 h and
/// 30 min reminders. Holds its own storage and messaging handles and runs at
/// most one sweep at a time.
pub struct ReminderScheduler {
    db: Arc<Mutex<Connection>>,
    messaging: Arc<dyn MessagingProvider>,
    in_flight: AtomicBool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub sent: usize,
    pub failed: usize,
    /// Another sweep was still running, nothing was done.
    pub skipped: bool,
}

/// Tiers whose flag is unset and for which `slot - offset <= now < slot`.
pub fn due_tiers(appointment: &Appointment, now: &NaiveDateTime) -> Vec<ReminderTier> {
    if *now >= appointment.slot {
        return vec![];
    }
    ReminderTier::ALL
        .into_iter()
        .filter(|tier| !appointment.reminder_sent(*tier))
        .filter(|tier| appointment.slot - tier.offset() <= *now)
        .collect()
}

pub fn reminder_text(appointment: &Appointment, tier: ReminderTier) -> String {
    format!(
        "Reminder: {}, your {} appointment is in {}, at {}.",
        appointment.full_name,
        appointment.service_name,
        tier.lead_time(),
        format_slot(&appointment.slot),
    )
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReminderScheduler {
    pub fn new(db: Arc<Mutex<Connection>>, messaging: Arc<dyn MessagingProvider>) -> Self {
        Self {
            db,
            messaging,
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn sweep(&self, now: NaiveDateTime) -> anyhow::Result<SweepReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reminder sweep already running, skipping tick");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let appointments = {
            let db = lock_db(&self.db)?;
            queries::upcoming_appointments(&db, &now)?
        };

        let mut report = SweepReport::default();
        for appointment in &appointments {
            for tier in due_tiers(appointment, &now) {
                // Claim before delivery: a tier is never sent twice, at the
                // cost of losing it if delivery then fails.
                let claimed = lock_db(&self.db)
                    .map_err(anyhow::Error::from)
                    .and_then(|db| queries::claim_reminder(&db, appointment.id, tier));
                match claimed {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(
                            appointment_id = appointment.id,
                            tier = tier.as_str(),
                            error = %e,
                            "failed to claim reminder, will retry next sweep"
                        );
                        continue;
                    }
                }

                let reply = Reply::text(appointment.subject_id, reminder_text(appointment, tier));
                match self.messaging.send_message(&reply).await {
                    Ok(()) => {
                        report.sent += 1;
                        tracing::info!(
                            appointment_id = appointment.id,
                            subject = appointment.subject_id,
                            tier = tier.as_str(),
                            "reminder sent"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            appointment_id = appointment.id,
                            tier = tier.as_str(),
                            error = %e,
                            "failed to deliver reminder"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Sweeps every `period` until the runtime shuts down.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let now = chrono::Local::now().naive_local();
                match self.sweep(now).await {
                    Ok(report) if report.sent > 0 || report.failed > 0 => {
                        tracing::info!(sent = report.sent, failed = report.failed, "reminder sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "reminder sweep failed"),
                }
            }
        })
    }
}
