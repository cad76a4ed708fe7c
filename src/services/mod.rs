pub mod booking;
pub mod calendar;
pub mod conversation;
pub mod messaging;
pub mod reminders;
pub mod sessions;
