use std::env;

use chrono::NaiveTime;

use crate::models::Role;
use crate::services::calendar::SlotCalendar;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Subjects granted [`Role::Admin`].
    pub admin_ids: Vec<i64>,
    pub bot_token: String,
    pub webhook_secret: String,
    pub reminder_interval_secs: u64,
    /// Days past the preferred slot scanned for an alternative after a conflict.
    pub next_available_days: u32,
    pub calendar: SlotCalendar,
    pub clinic_contact: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let calendar = calendar_from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid calendar settings, using defaults");
            SlotCalendar::default()
        });

        Self {
            port: env_parse("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "dentbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            admin_ids: parse_id_list(&env::var("ADMIN_IDS").unwrap_or_default()),
            bot_token: env::var("BOT_TOKEN").unwrap_or_default(),
            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            reminder_interval_secs: env_parse("REMINDER_INTERVAL_SECS", 1800),
            next_available_days: env_parse("NEXT_AVAILABLE_DAYS", 2),
            calendar,
            clinic_contact: env::var("CLINIC_CONTACT").unwrap_or_default(),
        }
    }

    pub fn role_of(&self, subject: i64) -> Role {
        if self.admin_ids.contains(&subject) {
            Role::Admin
        } else {
            Role::Customer
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn calendar_from_env() -> anyhow::Result<SlotCalendar> {
    let open = env::var("BUSINESS_OPEN").unwrap_or_else(|_| "09:00".to_string());
    let close = env::var("BUSINESS_CLOSE").unwrap_or_else(|_| "18:00".to_string());
    SlotCalendar::new(
        NaiveTime::parse_from_str(open.trim(), "%H:%M")?,
        NaiveTime::parse_from_str(close.trim(), "%H:%M")?,
        env_parse("SLOT_MINUTES", 30),
        env_parse("BOOKING_HORIZON_DAYS", 7),
    )
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(value = part, "ignoring malformed admin id");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("8135506421, 42,,x"), vec![8135506421, 42]);
        assert!(parse_id_list("").is_empty());
    }

    #[test]
    fn test_role_of() {
        let config = AppConfig {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "t".to_string(),
            admin_ids: vec![1],
            bot_token: String::new(),
            webhook_secret: String::new(),
            reminder_interval_secs: 1800,
            next_available_days: 2,
            calendar: SlotCalendar::default(),
            clinic_contact: String::new(),
        };
        assert_eq!(config.role_of(1), Role::Admin);
        assert_eq!(config.role_of(2), Role::Customer);
    }
}
