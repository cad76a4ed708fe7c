use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::services::calendar::{format_slot, parse_slot};

/// An inbound event as handed over by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEvent {
    pub subject: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Free text, including slash commands.
    Text { text: String },
    /// A pressed button carrying an action token.
    Action { data: String },
    /// A shared contact card.
    Contact { phone: String },
}

impl InboundEvent {
    pub fn text(subject: i64, text: &str) -> Self {
        Self {
            subject,
            payload: EventPayload::Text {
                text: text.to_string(),
            },
        }
    }

    pub fn action(subject: i64, data: &str) -> Self {
        Self {
            subject,
            payload: EventPayload::Action {
                data: data.to_string(),
            },
        }
    }

    pub fn contact(subject: i64, phone: &str) -> Self {
        Self {
            subject,
            payload: EventPayload::Contact {
                phone: phone.to_string(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Text { .. } => "text",
            EventPayload::Action { .. } => "action",
            EventPayload::Contact { .. } => "contact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Admin,
    Stats,
    MyAppointments,
}

impl Command {
    /// Recognises `/start`, `/admin`, `/stats` and `/my_appointments`,
    /// tolerating a trailing `@botname`.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let word = word.strip_prefix('/')?;
        let name = word.split('@').next().unwrap_or(word);
        match name {
            "start" => Some(Command::Start),
            "admin" => Some(Command::Admin),
            "stats" => Some(Command::Stats),
            "my_appointments" => Some(Command::MyAppointments),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MainMenu,
    MyAppointments,
    Service(i64),
    QueueRegister(i64),
    ShowDay(NaiveDate),
    SelectTime(NaiveDateTime),
    ConfirmTime(NaiveDateTime),
    RejectTime,
    ChangeDay,
    Cancel(i64),
    AdminMenu,
    AdminStats,
    ManageServices,
    EditServices,
    AllAppointments,
    AddService,
    EditService(i64),
    DeleteService(i64),
}

impl Action {
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        let action = match data {
            "main_menu" | "change_service" => Action::MainMenu,
            "my_appointments" => Action::MyAppointments,
            "reject_time" => Action::RejectTime,
            "change_day" | "change_time" => Action::ChangeDay,
            "admin_menu" => Action::AdminMenu,
            "admin_stats" => Action::AdminStats,
            "manage_services" => Action::ManageServices,
            "edit_services" => Action::EditServices,
            "all_appointments" => Action::AllAppointments,
            "add_service" => Action::AddService,
            _ => return Self::parse_parameterised(data),
        };
        Some(action)
    }

    fn parse_parameterised(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix("queue_register_") {
            return rest.parse().ok().map(Action::QueueRegister);
        }
        if let Some(rest) = data.strip_prefix("show_day_") {
            return NaiveDate::parse_from_str(rest, "%Y-%m-%d")
                .ok()
                .map(Action::ShowDay);
        }
        if let Some(rest) = data.strip_prefix("select_time_") {
            return parse_slot(rest).map(Action::SelectTime);
        }
        if let Some(rest) = data.strip_prefix("confirm_time_") {
            return parse_slot(rest).map(Action::ConfirmTime);
        }
        if let Some(rest) = data.strip_prefix("edit_service_") {
            return rest.parse().ok().map(Action::EditService);
        }
        if let Some(rest) = data.strip_prefix("delete_service_") {
            return rest.parse().ok().map(Action::DeleteService);
        }
        if let Some(rest) = data.strip_prefix("service_") {
            return rest.parse().ok().map(Action::Service);
        }
        if let Some(rest) = data.strip_prefix("cancel_") {
            return rest.parse().ok().map(Action::Cancel);
        }
        None
    }

    /// Wire token understood by [`Action::parse`].
    pub fn token(&self) -> String {
        match self {
            Action::MainMenu => "main_menu".to_string(),
            Action::MyAppointments => "my_appointments".to_string(),
            Action::Service(id) => format!("service_{id}"),
            Action::QueueRegister(id) => format!("queue_register_{id}"),
            Action::ShowDay(date) => format!("show_day_{}", date.format("%Y-%m-%d")),
            Action::SelectTime(slot) => format!("select_time_{}", format_slot(slot)),
            Action::ConfirmTime(slot) => format!("confirm_time_{}", format_slot(slot)),
            Action::RejectTime => "reject_time".to_string(),
            Action::ChangeDay => "change_day".to_string(),
            Action::Cancel(id) => format!("cancel_{id}"),
            Action::AdminMenu => "admin_menu".to_string(),
            Action::AdminStats => "admin_stats".to_string(),
            Action::ManageServices => "manage_services".to_string(),
            Action::EditServices => "edit_services".to_string(),
            Action::AllAppointments => "all_appointments".to_string(),
            Action::AddService => "add_service".to_string(),
            Action::EditService(id) => format!("edit_service_{id}"),
            Action::DeleteService(id) => format!("delete_service_{id}"),
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Action::AdminMenu
                | Action::AdminStats
                | Action::ManageServices
                | Action::EditServices
                | Action::AllAppointments
                | Action::AddService
                | Action::EditService(_)
                | Action::DeleteService(_)
        )
    }
}
