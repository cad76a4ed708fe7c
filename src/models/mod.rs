pub mod appointment;
pub mod conversation;
pub mod event;
pub mod reply;
pub mod service;

pub use appointment::{Appointment, NewAppointment, ReminderTier, ServiceCount};
pub use conversation::{Role, Session, Stage};
pub use event::{Action, Command, EventPayload, InboundEvent};
pub use reply::{Reply, ReplyOption};
pub use service::{PriceRange, Service};
