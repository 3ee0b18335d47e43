use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to send email: {0}")]
    SendFailed(String),
    #[error("failed to queue email: {0}")]
    Outbox(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Outbound email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Trims, drops blanks and removes case-insensitive duplicates, keeping the
/// first spelling seen.
pub fn normalize_recipients<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter_map(|address| {
            let trimmed = address.as_ref().trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Sends `email` after normalising its recipients. Returns how many
/// addresses it went to; zero means nothing was sent.
pub async fn send_email(mailer: &dyn Mailer, mut email: OutgoingEmail) -> Result<usize, MailError> {
    email.to = normalize_recipients(&email.to);
    if email.to.is_empty() {
        debug!(subject = %email.subject, "no recipients, skipping email");
        return Ok(0);
    }
    mailer.send(&email).await?;
    Ok(email.to.len())
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!(
            from = %self.from,
            to = ?email.to,
            subject = %email.subject,
            "email (log backend)"
        );
        debug!(html = %email.html, "email body");
        Ok(())
    }
}

/// Queues messages in the `email_outbox` table; delivery is left to an
/// external relay that drains the table.
#[derive(Clone)]
pub struct OutboxMailer {
    db: DbPool,
    from: String,
}

impl OutboxMailer {
    pub fn new(db: DbPool, from: impl Into<String>) -> Self {
        Self {
            db,
            from: from.into(),
        }
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let recipients = email.to.join(",");
        sqlx::query(
            "INSERT INTO email_outbox (sender, recipients, subject, html, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.from)
        .bind(&recipients)
        .bind(&email.subject)
        .bind(&email.html)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        info!(to = ?email.to, subject = %email.subject, "email queued in outbox");
        Ok(())
    }
}
