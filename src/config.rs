use std::{env, net::SocketAddr};

use chrono::{FixedOffset, NaiveDate, Offset, Utc};

use crate::error::AppError;

/// Which [`Mailer`](crate::services::mailer::Mailer) the server wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    Log,
    Outbox,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub timezone: FixedOffset,
    pub mail_backend: MailBackend,
    pub mail_from: String,
    pub cron_token: Option<String>,
    pub scan_catch_up: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tripmate.db?mode=rwc".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            timezone: FixedOffset::east_opt(420 * 60).unwrap_or_else(|| Utc.fix()),
            mail_backend: MailBackend::Log,
            mail_from: "Tripmate <no-reply@example.com>".to_string(),
            cron_token: None,
            scan_catch_up: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://tripmate.db?mode=rwc".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let offset_minutes: i32 = env::var("APP_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|_| "420".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_UTC_OFFSET_MINUTES: {err}")))?;
        let timezone = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                AppError::Config(format!(
                    "APP_UTC_OFFSET_MINUTES out of range: {offset_minutes}"
                ))
            })?;

        let mail_backend = match env::var("MAIL_BACKEND")
            .unwrap_or_else(|_| "log".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "log" => MailBackend::Log,
            "outbox" => MailBackend::Outbox,
            other => {
                return Err(AppError::Config(format!(
                    "invalid MAIL_BACKEND: {other} (expected 'log' or 'outbox')"
                )))
            }
        };

        let mail_from =
            env::var("MAIL_FROM").unwrap_or_else(|_| "Tripmate <no-reply@example.com>".into());

        let cron_token = env::var("CRON_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let scan_catch_up = parse_flag("SCAN_CATCH_UP")?;

        Ok(Self {
            database_url,
            listen_addr,
            timezone,
            mail_backend,
            mail_from,
            cron_token,
            scan_catch_up,
        })
    }

    /// Calendar date in the configured timezone. Only the HTTP edge reads the
    /// wall clock; everything below takes the date as a parameter.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

fn parse_flag(name: &str) -> Result<bool, AppError> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(AppError::Config(format!("invalid {name}: {other}"))),
        },
    }
}
