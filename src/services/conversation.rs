use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Action, Appointment, Command, EventPayload, InboundEvent, NewAppointment, PriceRange, Reply,
    ReplyOption, Role, Service, Session, Stage,
};
use crate::services::booking;
use crate::services::calendar::format_slot;
use crate::state::AppState;

const APOLOGY: &str = "Sorry, something went wrong on our side. Please try again later.";
const TIMES_PER_ROW: usize = 4;

/// Advances `event.subject`'s conversation by one event and returns the
/// replies to deliver. Events for the same subject are handled one at a time.
///
/// Unrecoverable failures clear the subject's session before being returned;
/// use [`error_reply`] to turn any error into something the subject can read.
pub async fn handle_event(
    state: &Arc<AppState>,
    event: InboundEvent,
    now: NaiveDateTime,
) -> Result<Vec<Reply>, AppError> {
    let subject = event.subject;
    let role = state.config.role_of(subject);
    let kind = event.kind();

    let result = {
        let mut session = state.sessions.lock(subject).await;
        tracing::info!(subject, kind, stage = session.stage.as_str(), "handling event");

        let result = match state.db() {
            Ok(conn) => Turn {
                conn: &conn,
                config: &state.config,
                session: &mut *session,
                role,
                now,
            }
            .dispatch(event.payload),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if !e.is_recoverable() {
                session.clear();
            }
        }
        result
    };
    state.sessions.release(subject);

    result
}

/// What the subject sees when handling an event failed.
pub fn error_reply(subject: i64, err: &AppError) -> Reply {
    let text = match err {
        AppError::Validation(msg) => format!("Sorry, {msg}."),
        AppError::Conflict { slot } => format!("Sorry, {slot} is already taken."),
        AppError::NotFound(what) => format!("Sorry, {what} was not found."),
        AppError::Unauthorized => "This command is for admins only.".to_string(),
        _ => APOLOGY.to_string(),
    };
    Reply::text(subject, text).with_row(vec![ReplyOption::new("Main menu", &Action::MainMenu)])
}

/// One event's worth of work against a locked session and connection.
struct Turn<'a> {
    conn: &'a Connection,
    config: &'a AppConfig,
    session: &'a mut Session,
    role: Role,
    now: NaiveDateTime,
}

impl Turn<'_> {
    fn subject(&self) -> i64 {
        self.session.subject_id
    }

    fn dispatch(&mut self, payload: EventPayload) -> Result<Vec<Reply>, AppError> {
        match payload {
            EventPayload::Text { text } => match Command::parse(&text) {
                Some(command) => self.on_command(command),
                None => self.on_text(text.trim()),
            },
            EventPayload::Contact { phone } => self.on_contact(&phone),
            EventPayload::Action { data } => {
                let action = Action::parse(&data)
                    .ok_or_else(|| AppError::Validation(format!("unknown action {data:?}")))?;
                if action.requires_admin() && self.role != Role::Admin {
                    tracing::warn!(subject = self.subject(), action = %data, "admin action refused");
                    return Err(AppError::Unauthorized);
                }
                self.on_action(action)
            }
        }
    }

    fn on_command(&mut self, command: Command) -> Result<Vec<Reply>, AppError> {
        match command {
            Command::Start => {
                self.session.clear();
                Ok(vec![self.main_menu()?])
            }
            Command::Admin => {
                self.require_admin()?;
                Ok(vec![self.admin_menu()])
            }
            Command::Stats => {
                self.require_admin()?;
                Ok(vec![self.stats()?])
            }
            Command::MyAppointments => Ok(vec![self.my_appointments()?]),
        }
    }

    fn on_text(&mut self, text: &str) -> Result<Vec<Reply>, AppError> {
        let stage = self.session.stage.clone();
        if stage.is_admin() && self.role != Role::Admin {
            self.session.clear();
            return Err(AppError::Unauthorized);
        }

        match stage {
            Stage::Idle => Ok(vec![Reply::text(
                self.subject(),
                "Unknown command. Send /start to begin.",
            )]),
            Stage::AwaitingPhone => {
                if is_valid_phone(text) {
                    Ok(vec![self.accept_phone(text.to_string())])
                } else {
                    Ok(vec![Reply::text(
                        self.subject(),
                        "Invalid format. Enter your number as +998XXXXXXXXX or use the button below.",
                    )
                    .requesting_contact()])
                }
            }
            Stage::AwaitingFullName => {
                if is_valid_full_name(text) {
                    self.session.full_name = Some(text.to_string());
                    self.session.stage = Stage::Idle;
                    Ok(vec![self.day_picker()])
                } else {
                    Ok(vec![Reply::text(
                        self.subject(),
                        "Your full name must be at least 5 characters long. Please try again:",
                    )])
                }
            }
            Stage::AwaitingServiceName => {
                if text.is_empty() {
                    return Ok(vec![Reply::text(self.subject(), "Enter the new service name:")]);
                }
                self.session.stage = Stage::AwaitingServicePrice {
                    name: text.to_string(),
                };
                Ok(vec![Reply::text(
                    self.subject(),
                    "Service name saved.\n\nNow enter the price in UZS (e.g. 150000 or 50000-150000):",
                )])
            }
            Stage::AwaitingServicePrice { name } => {
                let Some(price) = PriceRange::parse(text) else {
                    return Ok(vec![price_reprompt(self.subject())]);
                };
                self.session.stage = Stage::Idle;
                let reply = match queries::insert_service(self.conn, &name, price) {
                    Ok(id) => {
                        tracing::info!(service_id = id, name = %name, "service added");
                        format!("Service added: {name} - {}", price.to_display())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, name = %name, "failed to add service");
                        "Failed to add the service.".to_string()
                    }
                };
                Ok(vec![Reply::text(self.subject(), reply), manage_services_menu(self.subject())])
            }
            Stage::AwaitingEditPrice { service_id } => {
                let Some(price) = PriceRange::parse(text) else {
                    return Ok(vec![price_reprompt(self.subject())]);
                };
                self.session.stage = Stage::Idle;
                let reply = match queries::update_service_price(self.conn, service_id, price) {
                    Ok(true) => {
                        tracing::info!(service_id, "service price updated");
                        format!("Price updated: {}", price.to_display())
                    }
                    Ok(false) => format!("Service {service_id} no longer exists."),
                    Err(e) => {
                        tracing::error!(error = %e, service_id, "failed to update price");
                        "Failed to update the service.".to_string()
                    }
                };
                Ok(vec![Reply::text(self.subject(), reply), manage_services_menu(self.subject())])
            }
        }
    }

    fn on_contact(&mut self, phone: &str) -> Result<Vec<Reply>, AppError> {
        if self.session.stage != Stage::AwaitingPhone {
            return Ok(vec![Reply::text(
                self.subject(),
                "I wasn't expecting a phone number. Send /start to begin.",
            )]);
        }
        match normalize_contact_phone(phone) {
            Some(phone) => Ok(vec![self.accept_phone(phone)]),
            None => Ok(vec![Reply::text(
                self.subject(),
                "That contact has no usable phone number. Enter it as +998XXXXXXXXX or share it again.",
            )
            .requesting_contact()]),
        }
    }

    fn accept_phone(&mut self, phone: String) -> Reply {
        let text = format!(
            "Phone number received: {phone}\n\nNow enter your full name (at least 5 characters):"
        );
        self.session.phone = Some(phone);
        self.session.stage = Stage::AwaitingFullName;
        Reply::text(self.subject(), text)
    }

    fn on_action(&mut self, action: Action) -> Result<Vec<Reply>, AppError> {
        match action {
            Action::MainMenu => Ok(vec![self.main_menu()?]),
            Action::MyAppointments => Ok(vec![self.my_appointments()?]),
            Action::Service(id) => Ok(vec![self.service_card(id)?]),
            Action::QueueRegister(id) => {
                let service = self.bookable_service(id)?;
                self.session.service_id = Some(service.id);
                self.session.stage = Stage::AwaitingPhone;
                Ok(vec![Reply::text(
                    self.subject(),
                    format!(
                        "To book {} enter your phone number.\n\nFormat: +998XXXXXXXXX\n\nOr share it with the button below:",
                        service.name
                    ),
                )
                .requesting_contact()])
            }
            Action::ShowDay(date) => {
                if self.session.booking_details().is_none() {
                    return Ok(vec![self.out_of_order()]);
                }
                Ok(vec![self.times_for(date)?])
            }
            Action::SelectTime(slot) => {
                let Some((_, _, service_id)) = self.session.booking_details() else {
                    return Ok(vec![self.out_of_order()]);
                };
                self.check_slot(&slot)?;
                let service = self.service(service_id)?;
                self.session.pending_slot = Some(slot);
                Ok(vec![confirmation_prompt(
                    self.subject(),
                    &slot,
                    &service,
                    "Confirm your appointment?",
                )])
            }
            Action::ConfirmTime(slot) => self.confirm(slot),
            Action::RejectTime => {
                self.session.clear();
                Ok(vec![
                    Reply::text(self.subject(), "Booking cancelled."),
                    self.main_menu()?,
                ])
            }
            Action::ChangeDay => {
                if self.session.booking_details().is_none() {
                    return Ok(vec![self.out_of_order()]);
                }
                self.session.pending_slot = None;
                Ok(vec![self.day_picker()])
            }
            Action::Cancel(id) => {
                booking::cancel(self.conn, id)?;
                Ok(vec![
                    Reply::text(self.subject(), "Appointment cancelled."),
                    self.my_appointments()?,
                ])
            }
            Action::AdminMenu => Ok(vec![self.admin_menu()]),
            Action::AdminStats => Ok(vec![self.stats()?]),
            Action::ManageServices => Ok(vec![manage_services_menu(self.subject())]),
            Action::EditServices => Ok(vec![self.edit_services()?]),
            Action::AllAppointments => Ok(vec![self.all_appointments()?]),
            Action::AddService => {
                self.session.stage = Stage::AwaitingServiceName;
                Ok(vec![Reply::text(self.subject(), "Enter the new service name:")])
            }
            Action::EditService(id) => {
                let service = self.service(id)?;
                self.session.stage = Stage::AwaitingEditPrice { service_id: id };
                Ok(vec![Reply::text(
                    self.subject(),
                    format!(
                        "Service: {}\nCurrent price: {}\n\nEnter the new price:",
                        service.name,
                        service.price.to_display()
                    ),
                )])
            }
            Action::DeleteService(id) => {
                if !queries::deactivate_service(self.conn, id)? {
                    return Err(AppError::NotFound(format!("service {id}")));
                }
                tracing::info!(service_id = id, "service deactivated");
                Ok(vec![
                    Reply::text(self.subject(), "Service removed from the catalog."),
                    manage_services_menu(self.subject()),
                ])
            }
        }
    }

    fn confirm(&mut self, slot: NaiveDateTime) -> Result<Vec<Reply>, AppError> {
        let Some((phone, full_name, service_id)) = self.session.booking_details() else {
            return Ok(vec![self.out_of_order()]);
        };
        self.check_slot(&slot)?;

        let request = NewAppointment {
            subject_id: self.subject(),
            full_name: full_name.to_string(),
            phone: phone.to_string(),
            service_id,
            slot,
        };

        match booking::try_book(self.conn, &self.config.calendar, &request) {
            Ok(appointment) => {
                self.session.clear();
                Ok(vec![self.booked(&appointment)])
            }
            Err(AppError::Conflict { .. }) => {
                let next = booking::find_next_available(
                    self.conn,
                    &self.config.calendar,
                    &slot,
                    &self.now,
                    self.config.next_available_days,
                )?
                .filter(|next| {
                    self.config
                        .calendar
                        .is_selectable_day(next.date(), self.now.date())
                });
                match next {
                    Some(next) => {
                        let service = self.service(service_id)?;
                        self.session.pending_slot = Some(next);
                        Ok(vec![confirmation_prompt(
                            self.subject(),
                            &next,
                            &service,
                            &format!(
                                "Sorry, {} is already taken. The next free time is below. Book it?",
                                format_slot(&slot)
                            ),
                        )])
                    }
                    None => {
                        self.session.pending_slot = None;
                        Ok(vec![Reply::text(
                            self.subject(),
                            "Sorry, that time is taken and there are no free times nearby. Please pick another day.",
                        )
                        .with_row(vec![ReplyOption::new("Change day", &Action::ChangeDay)])])
                    }
                }
            }
            Err(e) => {
                self.session.clear();
                Err(e)
            }
        }
    }

    fn check_slot(&self, slot: &NaiveDateTime) -> Result<(), AppError> {
        if !self.config.calendar.is_on_grid(slot) {
            return Err(AppError::Validation(format!(
                "{} is not a bookable time",
                format_slot(slot)
            )));
        }
        if *slot <= self.now {
            return Err(AppError::Validation(format!(
                "{} has already passed",
                format_slot(slot)
            )));
        }
        if !self.config.calendar.is_selectable_day(slot.date(), self.now.date()) {
            return Err(AppError::Validation(format!(
                "{} is outside the booking window",
                format_slot(slot)
            )));
        }
        Ok(())
    }

    fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    fn out_of_order(&mut self) -> Reply {
        tracing::info!(subject = self.subject(), "booking step out of order, resetting");
        self.session.clear();
        Reply::text(
            self.subject(),
            "Your booking details are incomplete. Please choose a service and start again.",
        )
        .with_row(vec![ReplyOption::new("Main menu", &Action::MainMenu)])
    }

    fn service(&self, id: i64) -> Result<Service, AppError> {
        queries::get_service(self.conn, id)?
            .filter(|s| s.active)
            .ok_or_else(|| AppError::NotFound(format!("service {id}")))
    }

    fn bookable_service(&self, id: i64) -> Result<Service, AppError> {
        let service = self.service(id)?;
        if service.is_walk_in() {
            return Err(AppError::Validation(format!(
                "{} is walk-in only and needs no appointment",
                service.name
            )));
        }
        Ok(service)
    }

    fn main_menu(&self) -> Result<Reply, AppError> {
        let services = queries::list_active_services(self.conn)?;
        let mut reply = Reply::text(self.subject(), "Welcome! Choose a dental service:");
        for service in &services {
            let label = if service.is_walk_in() {
                service.name.clone()
            } else {
                format!("{} ({})", service.name, service.price.to_display())
            };
            reply = reply.with_row(vec![ReplyOption::new(label, &Action::Service(service.id))]);
        }
        Ok(reply.with_row(vec![ReplyOption::new(
            "My appointments",
            &Action::MyAppointments,
        )]))
    }

    fn service_card(&self, id: i64) -> Result<Reply, AppError> {
        let service = self.service(id)?;
        if service.is_walk_in() {
            let mut text = format!(
                "{}\n\nFree of charge and without an appointment. Come by during opening hours.",
                service.name
            );
            if !self.config.clinic_contact.is_empty() {
                text.push_str("\n\n");
                text.push_str(&self.config.clinic_contact);
            }
            return Ok(Reply::text(self.subject(), text)
                .with_row(vec![ReplyOption::new("Main menu", &Action::MainMenu)]));
        }

        Ok(Reply::text(
            self.subject(),
            format!("{}\nPrice: {}", service.name, service.price.to_display()),
        )
        .with_row(vec![
            ReplyOption::new("Book", &Action::QueueRegister(service.id)),
            ReplyOption::new("Other service", &Action::MainMenu),
        ]))
    }

    fn day_picker(&self) -> Reply {
        let calendar = &self.config.calendar;
        let mut reply = Reply::text(
            self.subject(),
            format!(
                "Choose a day for your appointment (next {} days):",
                calendar.horizon_days()
            ),
        );
        for date in calendar.days(self.now.date()) {
            reply = reply.with_row(vec![ReplyOption::new(
                date.format("%m/%d %a").to_string(),
                &Action::ShowDay(date),
            )]);
        }
        reply
    }

    fn times_for(&self, date: NaiveDate) -> Result<Reply, AppError> {
        if !self.config.calendar.is_selectable_day(date, self.now.date()) {
            return Err(AppError::Validation(format!(
                "{} is outside the booking window",
                date.format("%Y-%m-%d")
            )));
        }

        let free = booking::free_slots_on(self.conn, &self.config.calendar, date, &self.now)?;
        let text = if free.is_empty() {
            format!("No free times on {}.", date.format("%Y-%m-%d"))
        } else {
            format!("Free times on {}:", date.format("%Y-%m-%d"))
        };

        let mut reply = Reply::text(self.subject(), text);
        for chunk in free.chunks(TIMES_PER_ROW) {
            reply = reply.with_row(
                chunk
                    .iter()
                    .map(|slot| {
                        ReplyOption::new(slot.format("%H:%M").to_string(), &Action::SelectTime(*slot))
                    })
                    .collect(),
            );
        }
        Ok(reply.with_row(vec![ReplyOption::new("Change day", &Action::ChangeDay)]))
    }

    fn booked(&self, appointment: &Appointment) -> Reply {
        let mut text = format!(
            "Your appointment is booked!\n\nName: {}\nPhone: {}\nService: {}\nTime: {}\n",
            appointment.full_name,
            appointment.phone,
            appointment.service_name,
            format_slot(&appointment.slot),
        );
        if !self.config.clinic_contact.is_empty() {
            text.push('\n');
            text.push_str(&self.config.clinic_contact);
            text.push('\n');
        }
        text.push_str("\nReminders will be sent automatically.\n/my_appointments - view your appointments");
        Reply::text(self.subject(), text)
    }

    fn my_appointments(&self) -> Result<Reply, AppError> {
        let appointments = booking::list_for_subject(self.conn, self.subject())?;
        let back = vec![ReplyOption::new("Main menu", &Action::MainMenu)];
        if appointments.is_empty() {
            return Ok(Reply::text(self.subject(), "You have no appointments.").with_row(back));
        }

        let mut text = "Your appointments:\n".to_string();
        let mut reply = Reply::text(self.subject(), "");
        for appointment in &appointments {
            let slot = format_slot(&appointment.slot);
            text.push_str(&format!("\n{slot} - {}", appointment.service_name));
            reply = reply.with_row(vec![ReplyOption::new(
                format!("Cancel: {} - {slot}", appointment.service_name),
                &Action::Cancel(appointment.id),
            )]);
        }
        reply.text = text;
        Ok(reply.with_row(back))
    }

    fn admin_menu(&self) -> Reply {
        Reply::text(self.subject(), "Admin panel:").with_options(vec![
            vec![ReplyOption::new("Statistics", &Action::AdminStats)],
            vec![ReplyOption::new("Manage services", &Action::ManageServices)],
            vec![ReplyOption::new("All appointments", &Action::AllAppointments)],
            vec![ReplyOption::new("Main menu", &Action::MainMenu)],
        ])
    }

    fn stats(&self) -> Result<Reply, AppError> {
        let (start, end) = booking::month_bounds(&self.now);
        let monthly = booking::count_in_period(self.conn, &start, &end)?;
        let counts = booking::per_service_counts(self.conn)?;

        let mut text = format!(
            "Statistics\n\nAppointments in {}: {monthly}\n\nBy service:",
            start.format("%B %Y")
        );
        for count in &counts {
            text.push_str(&format!("\n{}: {}", count.service_name, count.count));
        }
        Ok(Reply::text(self.subject(), text)
            .with_row(vec![ReplyOption::new("Admin menu", &Action::AdminMenu)]))
    }

    fn edit_services(&self) -> Result<Reply, AppError> {
        let services = queries::list_active_services(self.conn)?;
        let mut reply = Reply::text(self.subject(), "Choose a service to edit:");
        for service in &services {
            reply = reply.with_row(vec![
                ReplyOption::new(
                    format!("{} ({})", service.name, service.price.to_display()),
                    &Action::EditService(service.id),
                ),
                ReplyOption::new("Delete", &Action::DeleteService(service.id)),
            ]);
        }
        Ok(reply.with_row(vec![ReplyOption::new("Back", &Action::ManageServices)]))
    }

    fn all_appointments(&self) -> Result<Reply, AppError> {
        let appointments = booking::list_all(self.conn)?;
        let text = if appointments.is_empty() {
            "No appointments yet.".to_string()
        } else {
            appointments
                .iter()
                .map(|a| {
                    format!(
                        "#{} {} {} - {} ({})",
                        a.id,
                        format_slot(&a.slot),
                        a.service_name,
                        a.full_name,
                        a.phone
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(Reply::text(self.subject(), text)
            .with_row(vec![ReplyOption::new("Admin menu", &Action::AdminMenu)]))
    }
}

fn manage_services_menu(subject: i64) -> Reply {
    Reply::text(subject, "Manage services:").with_options(vec![
        vec![ReplyOption::new("Add service", &Action::AddService)],
        vec![ReplyOption::new("Edit services", &Action::EditServices)],
        vec![ReplyOption::new("Admin menu", &Action::AdminMenu)],
    ])
}

fn confirmation_prompt(subject: i64, slot: &NaiveDateTime, service: &Service, lead: &str) -> Reply {
    Reply::text(
        subject,
        format!(
            "{lead}\n\nTime: {}\nService: {}",
            format_slot(slot),
            service.name
        ),
    )
    .with_row(vec![
        ReplyOption::new("Confirm", &Action::ConfirmTime(*slot)),
        ReplyOption::new("Cancel", &Action::RejectTime),
    ])
    .with_row(vec![ReplyOption::new("Other time", &Action::ChangeDay)])
}

fn price_reprompt(subject: i64) -> Reply {
    Reply::text(
        subject,
        "Invalid price. Enter a whole amount (150000) or a range (50000-150000):",
    )
}

/// `+998` followed by exactly nine digits.
pub fn is_valid_phone(input: &str) -> bool {
    input
        .trim()
        .strip_prefix("+998")
        .is_some_and(|rest| rest.len() == 9 && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Shared contacts arrive with or without the leading `+`.
fn normalize_contact_phone(raw: &str) -> Option<String> {
    let digits = raw.trim().trim_start_matches('+');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{digits}"))
}

pub fn is_valid_full_name(input: &str) -> bool {
    input.trim().chars().count() >= 5
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::db;
    use crate::services::calendar::{parse_slot, SlotCalendar};
    use crate::services::messaging::MessagingProvider;

    const ADMIN: i64 = 99;

    struct NullMessaging;

    #[async_trait]
    impl MessagingProvider for NullMessaging {
        async fn send_message(&self, _reply: &Reply) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_state() -> Arc<AppState> {
        let config = AppConfig {
            port: 0,
            database_url: ":memory:".to_string(),
            admin_token: "test-token".to_string(),
            admin_ids: vec![ADMIN],
            bot_token: String::new(),
            webhook_secret: String::new(),
            reminder_interval_secs: 1800,
            next_available_days: 2,
            calendar: SlotCalendar::default(),
            clinic_contact: "Call us: +998 90 123 45 67".to_string(),
        };
        let conn = db::init_db(":memory:").unwrap();
        Arc::new(AppState::new(conn, config, Arc::new(NullMessaging)))
    }

    fn now() -> NaiveDateTime {
        parse_slot("2025-06-09 09:00").unwrap()
    }

    async fn send(state: &Arc<AppState>, event: InboundEvent) -> Vec<Reply> {
        handle_event(state, event, now()).await.unwrap()
    }

    async fn stage_of(state: &Arc<AppState>, subject: i64) -> Stage {
        state
            .sessions
            .snapshot(subject)
            .await
            .map(|s| s.stage)
            .unwrap_or_default()
    }

    /// Walks a subject up to the point where a day can be picked.
    async fn register(state: &Arc<AppState>, subject: i64, service_id: i64) {
        send(state, InboundEvent::action(subject, &format!("queue_register_{service_id}"))).await;
        send(state, InboundEvent::text(subject, "+998901234567")).await;
        send(state, InboundEvent::text(subject, "Ali Valiyev")).await;
    }

    #[test]
    fn test_phone_and_name_rules() {
        assert!(is_valid_phone("+998901234567"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("+99890123456"));
        assert!(!is_valid_phone("+9989012345678"));
        assert!(!is_valid_phone("+998 90 123 45 67"));
        assert!(is_valid_full_name("Ali Valiyev"));
        assert!(!is_valid_full_name(" Ali "));
    }

    #[tokio::test]
    async fn test_phone_stage_transitions() {
        let state = test_state();
        let replies = send(&state, InboundEvent::action(1, "queue_register_2")).await;
        assert!(replies[0].request_contact);
        assert_eq!(stage_of(&state, 1).await, Stage::AwaitingPhone);

        let replies = send(&state, InboundEvent::text(1, "12345")).await;
        assert!(replies[0].text.contains("Invalid format"));
        assert_eq!(stage_of(&state, 1).await, Stage::AwaitingPhone);

        send(&state, InboundEvent::text(1, "+998901234567")).await;
        assert_eq!(stage_of(&state, 1).await, Stage::AwaitingFullName);
    }

    #[tokio::test]
    async fn test_contact_payload_accepted_while_awaiting_phone() {
        let state = test_state();
        send(&state, InboundEvent::action(1, "queue_register_2")).await;
        send(&state, InboundEvent::contact(1, "998901234567")).await;

        let session = state.sessions.snapshot(1).await.unwrap();
        assert_eq!(session.stage, Stage::AwaitingFullName);
        assert_eq!(session.phone.as_deref(), Some("+998901234567"));
    }

    #[tokio::test]
    async fn test_blank_contact_payload_reprompts() {
        let state = test_state();
        send(&state, InboundEvent::action(1, "queue_register_2")).await;

        for raw in ["  ", "+", "not a number"] {
            let replies = send(&state, InboundEvent::contact(1, raw)).await;
            assert!(replies[0].request_contact);
            let session = state.sessions.snapshot(1).await.unwrap();
            assert_eq!(session.stage, Stage::AwaitingPhone);
            assert!(session.phone.is_none());
        }

        send(&state, InboundEvent::contact(1, "+998901234567")).await;
        assert_eq!(stage_of(&state, 1).await, Stage::AwaitingFullName);
    }

    #[tokio::test]
    async fn test_name_stage_transitions() {
        let state = test_state();
        send(&state, InboundEvent::action(1, "queue_register_2")).await;
        send(&state, InboundEvent::text(1, "+998901234567")).await;

        send(&state, InboundEvent::text(1, "Ali")).await;
        assert_eq!(stage_of(&state, 1).await, Stage::AwaitingFullName);

        let replies = send(&state, InboundEvent::text(1, "Ali Valiyev")).await;
        assert_eq!(stage_of(&state, 1).await, Stage::Idle);
        let days: Vec<_> = replies[0].actions().collect();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], "show_day_2025-06-09");
        assert_eq!(days[1], "show_day_2025-06-10");
    }

    #[tokio::test]
    async fn test_full_booking_flow() {
        let state = test_state();
        let replies = send(&state, InboundEvent::action(1, "service_2")).await;
        assert!(replies[0].actions().any(|a| a == "queue_register_2"));

        register(&state, 1, 2).await;

        let replies = send(&state, InboundEvent::action(1, "show_day_2025-06-10")).await;
        assert!(replies[0]
            .actions()
            .any(|a| a == "select_time_2025-06-10 10:00"));

        let replies = send(&state, InboundEvent::action(1, "select_time_2025-06-10 10:00")).await;
        assert!(replies[0]
            .actions()
            .any(|a| a == "confirm_time_2025-06-10 10:00"));

        let replies = send(&state, InboundEvent::action(1, "confirm_time_2025-06-10 10:00")).await;
        assert!(replies[0].text.contains("booked"));
        assert!(replies[0].text.contains("Call us"));

        let appointments = booking::list_for_subject(&state.db().unwrap(), 1).unwrap();
        assert_eq!(appointments.len(), 1);
        let appt = &appointments[0];
        assert_eq!(appt.service_id, 2);
        assert_eq!(appt.slot, parse_slot("2025-06-10 10:00").unwrap());
        assert_eq!(appt.full_name, "Ali Valiyev");
        assert!(!appt.reminder_24h && !appt.reminder_2h && !appt.reminder_30m);

        // Session is cleared and dropped from the store.
        assert!(state.sessions.snapshot(1).await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_slot_action_aborts() {
        let state = test_state();
        let replies = send(&state, InboundEvent::action(1, "show_day_2025-06-10")).await;
        assert!(replies[0].text.contains("incomplete"));
        assert!(state.sessions.snapshot(1).await.is_none());

        send(&state, InboundEvent::action(2, "queue_register_2")).await;
        send(&state, InboundEvent::text(2, "+998901234567")).await;
        send(&state, InboundEvent::action(2, "confirm_time_2025-06-10 10:00")).await;
        assert!(state.sessions.snapshot(2).await.is_none());
        assert!(booking::list_all(&state.db().unwrap()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_offers_next_vacancy() {
        let state = test_state();
        register(&state, 1, 2).await;
        send(&state, InboundEvent::action(1, "confirm_time_2025-06-10 10:00")).await;

        register(&state, 2, 1).await;
        let replies = send(&state, InboundEvent::action(2, "confirm_time_2025-06-10 10:00")).await;
        assert!(replies[0].text.contains("already taken"));
        assert!(replies[0]
            .actions()
            .any(|a| a == "confirm_time_2025-06-10 10:30"));

        let session = state.sessions.snapshot(2).await.unwrap();
        assert_eq!(session.pending_slot, parse_slot("2025-06-10 10:30"));

        send(&state, InboundEvent::action(2, "confirm_time_2025-06-10 10:30")).await;
        assert_eq!(booking::list_all(&state.db().unwrap()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_past_and_off_grid_times_rejected() {
        let state = test_state();
        register(&state, 1, 2).await;

        let err = handle_event(&state, InboundEvent::action(1, "select_time_2025-06-09 09:00"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = handle_event(&state, InboundEvent::action(1, "confirm_time_2025-06-10 10:10"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Recoverable: the collected details survive.
        assert!(state.sessions.snapshot(1).await.unwrap().booking_details().is_some());
    }

    #[tokio::test]
    async fn test_day_outside_horizon_rejected() {
        let state = test_state();
        register(&state, 1, 2).await;
        let err = handle_event(&state, InboundEvent::action(1, "show_day_2025-06-20"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_crafted_slot_beyond_horizon_rejected() {
        let state = test_state();
        register(&state, 1, 2).await;

        for action in [
            "select_time_2030-01-01 10:00",
            "confirm_time_2030-01-01 10:00",
            "confirm_time_2025-06-16 10:00",
        ] {
            let err = handle_event(&state, InboundEvent::action(1, action), now())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(booking::list_all(&state.db().unwrap()).unwrap().is_empty());

        // Last day of the window is still bookable.
        let replies = send(&state, InboundEvent::action(1, "confirm_time_2025-06-15 10:00")).await;
        assert!(replies[0].text.contains("booked"));
    }

    #[tokio::test]
    async fn test_reject_time_and_start_clear_session() {
        let state = test_state();
        register(&state, 1, 2).await;
        send(&state, InboundEvent::action(1, "reject_time")).await;
        assert!(state.sessions.snapshot(1).await.is_none());

        send(&state, InboundEvent::action(1, "queue_register_2")).await;
        let replies = send(&state, InboundEvent::text(1, "/start")).await;
        assert!(replies[0].actions().any(|a| a == "service_1"));
        assert!(state.sessions.snapshot(1).await.is_none());
    }

    #[tokio::test]
    async fn test_walk_in_service_cannot_be_registered() {
        let state = test_state();
        let replies = send(&state, InboundEvent::action(1, "service_4")).await;
        assert!(!replies[0].actions().any(|a| a.starts_with("queue_register_")));

        let err = handle_event(&state, InboundEvent::action(1, "queue_register_4"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_from_my_appointments() {
        let state = test_state();
        register(&state, 1, 2).await;
        send(&state, InboundEvent::action(1, "confirm_time_2025-06-10 10:00")).await;

        let replies = send(&state, InboundEvent::text(1, "/my_appointments")).await;
        let cancel = replies[0]
            .actions()
            .find(|a| a.starts_with("cancel_"))
            .unwrap()
            .to_string();

        let replies = send(&state, InboundEvent::action(1, &cancel)).await;
        assert_eq!(replies[0].text, "Appointment cancelled.");
        assert!(booking::list_all(&state.db().unwrap()).unwrap().is_empty());

        let err = handle_event(&state, InboundEvent::action(1, &cancel), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_admin_refused() {
        let state = test_state();
        for event in [
            InboundEvent::text(1, "/admin"),
            InboundEvent::text(1, "/stats"),
            InboundEvent::action(1, "admin_menu"),
            InboundEvent::action(1, "add_service"),
            InboundEvent::action(1, "delete_service_1"),
        ] {
            let err = handle_event(&state, event, now()).await.unwrap_err();
            assert!(matches!(err, AppError::Unauthorized));
        }
        assert_eq!(stage_of(&state, 1).await, Stage::Idle);
        assert_eq!(
            queries::list_active_services(&state.db().unwrap()).unwrap().len(),
            4
        );
    }

    #[tokio::test]
    async fn test_admin_adds_service() {
        let state = test_state();
        send(&state, InboundEvent::action(ADMIN, "add_service")).await;
        assert_eq!(stage_of(&state, ADMIN).await, Stage::AwaitingServiceName);

        send(&state, InboundEvent::text(ADMIN, "Whitening")).await;
        assert_eq!(
            stage_of(&state, ADMIN).await,
            Stage::AwaitingServicePrice {
                name: "Whitening".to_string()
            }
        );

        let replies = send(&state, InboundEvent::text(ADMIN, "cheap")).await;
        assert!(replies[0].text.contains("Invalid price"));
        assert!(matches!(
            stage_of(&state, ADMIN).await,
            Stage::AwaitingServicePrice { .. }
        ));

        send(&state, InboundEvent::text(ADMIN, "300000-500000")).await;
        assert_eq!(stage_of(&state, ADMIN).await, Stage::Idle);

        let services = queries::list_active_services(&state.db().unwrap()).unwrap();
        let added = services.iter().find(|s| s.name == "Whitening").unwrap();
        assert_eq!(added.price, PriceRange { min: 300000, max: 500000 });
    }

    #[tokio::test]
    async fn test_admin_duplicate_service_resets_stage() {
        let state = test_state();
        send(&state, InboundEvent::action(ADMIN, "add_service")).await;
        send(&state, InboundEvent::text(ADMIN, "Filling")).await;
        let replies = send(&state, InboundEvent::text(ADMIN, "1000")).await;
        assert!(replies[0].text.contains("Failed"));
        assert_eq!(stage_of(&state, ADMIN).await, Stage::Idle);
    }

    #[tokio::test]
    async fn test_admin_edits_price() {
        let state = test_state();
        let replies = send(&state, InboundEvent::action(ADMIN, "edit_service_2")).await;
        assert!(replies[0].text.contains("Filling"));
        assert_eq!(
            stage_of(&state, ADMIN).await,
            Stage::AwaitingEditPrice { service_id: 2 }
        );

        send(&state, InboundEvent::text(ADMIN, "200000")).await;
        assert_eq!(stage_of(&state, ADMIN).await, Stage::Idle);
        let service = queries::get_service(&state.db().unwrap(), 2).unwrap().unwrap();
        assert_eq!(service.price, PriceRange::fixed(200000));
    }

    #[tokio::test]
    async fn test_admin_stats_and_soft_delete() {
        let state = test_state();
        register(&state, 1, 2).await;
        send(&state, InboundEvent::action(1, "confirm_time_2025-06-10 10:00")).await;

        let replies = send(&state, InboundEvent::text(ADMIN, "/stats")).await;
        assert!(replies[0].text.contains("Appointments in June 2025: 1"));
        assert!(replies[0].text.contains("Filling: 1"));

        send(&state, InboundEvent::action(ADMIN, "delete_service_2")).await;
        let replies = send(&state, InboundEvent::action(1, "main_menu")).await;
        assert!(!replies[0].actions().any(|a| a == "service_2"));

        let replies = send(&state, InboundEvent::action(ADMIN, "all_appointments")).await;
        assert!(replies[0].text.contains("Filling"));
    }

    #[test]
    fn test_error_reply_hides_internal_errors() {
        let reply = error_reply(1, &AppError::Persistence(anyhow::anyhow!("disk full")));
        assert_eq!(reply.text, APOLOGY);
        let reply = error_reply(1, &AppError::NotFound("appointment 5".to_string()));
        assert!(reply.text.contains("appointment 5"));
    }
}
