use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: i64,
    pub subject_id: i64,
    pub full_name: String,
    pub phone: String,
    pub service_id: i64,
    pub service_name: String,
    pub slot: NaiveDateTime,
    pub reminder_24h: bool,
    pub reminder_2h: bool,
    pub reminder_30m: bool,
}

impl Appointment {
    pub fn reminder_sent(&self, tier: ReminderTier) -> bool {
        match tier {
            ReminderTier::DayBefore => self.reminder_24h,
            ReminderTier::TwoHours => self.reminder_2h,
            ReminderTier::HalfHour => self.reminder_30m,
        }
    }
}

/// Fields collected by the conversation before a commit.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub subject_id: i64,
    pub full_name: String,
    pub phone: String,
    pub service_id: i64,
    pub slot: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTier {
    DayBefore,
    TwoHours,
    HalfHour,
}

impl ReminderTier {
    pub const ALL: [ReminderTier; 3] = [
        ReminderTier::DayBefore,
        ReminderTier::TwoHours,
        ReminderTier::HalfHour,
    ];

    pub fn offset(&self) -> chrono::Duration {
        match self {
            ReminderTier::DayBefore => chrono::Duration::hours(24),
            ReminderTier::TwoHours => chrono::Duration::hours(2),
            ReminderTier::HalfHour => chrono::Duration::minutes(30),
        }
    }

    /// Column holding this tier's flag. Only ever interpolated from this
    /// fixed set, never from input.
    pub fn column(&self) -> &'static str {
        match self {
            ReminderTier::DayBefore => "reminder_24h",
            ReminderTier::TwoHours => "reminder_2h",
            ReminderTier::HalfHour => "reminder_30m",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderTier::DayBefore => "24h",
            ReminderTier::TwoHours => "2h",
            ReminderTier::HalfHour => "30m",
        }
    }

    pub fn lead_time(&self) -> &'static str {
        match self {
            ReminderTier::DayBefore => "1 day",
            ReminderTier::TwoHours => "2 hours",
            ReminderTier::HalfHour => "30 minutes",
        }
    }
}

/// Per-service appointment count for the statistics view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceCount {
    pub service_id: i64,
    pub service_name: String,
    pub count: i64,
}
