use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Someone an email can be addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipient {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl Recipient {
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("a new member")
            .to_string()
    }
}
