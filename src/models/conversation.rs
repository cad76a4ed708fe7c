use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// Current step of a subject's dialogue. Customer and admin steps share one
/// machine; admin variants are only entered when the subject has
/// [`Role::Admin`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    AwaitingPhone,
    AwaitingFullName,
    AwaitingServiceName,
    AwaitingServicePrice { name: String },
    AwaitingEditPrice { service_id: i64 },
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::AwaitingPhone => "awaiting_phone",
            Stage::AwaitingFullName => "awaiting_full_name",
            Stage::AwaitingServiceName => "awaiting_service_name",
            Stage::AwaitingServicePrice { .. } => "awaiting_service_price",
            Stage::AwaitingEditPrice { .. } => "awaiting_edit_price",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Stage::AwaitingServiceName
                | Stage::AwaitingServicePrice { .. }
                | Stage::AwaitingEditPrice { .. }
        )
    }
}

/// In-memory dialogue state for one subject. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub subject_id: i64,
    pub stage: Stage,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub service_id: Option<i64>,
    pub pending_slot: Option<NaiveDateTime>,
}

impl Session {
    pub fn new(subject_id: i64) -> Self {
        Self {
            subject_id,
            stage: Stage::Idle,
            phone: None,
            full_name: None,
            service_id: None,
            pending_slot: None,
        }
    }

    pub fn clear(&mut self) {
        *self = Session::new(self.subject_id);
    }

    pub fn is_blank(&self) -> bool {
        self.stage == Stage::Idle
            && self.phone.is_none()
            && self.full_name.is_none()
            && self.service_id.is_none()
            && self.pending_slot.is_none()
    }

    /// Phone, full name and service, once all three are collected.
    pub fn booking_details(&self) -> Option<(&str, &str, i64)> {
        match (&self.phone, &self.full_name, self.service_id) {
            (Some(phone), Some(name), Some(service_id)) => {
                Some((phone.as_str(), name.as_str(), service_id))
            }
            _ => None,
        }
    }
}
