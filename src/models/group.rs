use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const JOIN_CODE_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub group_id: i64,
    pub group_name: String,
    pub join_code: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

pub fn is_valid_join_code(code: &str) -> bool {
    let code = code.trim();
    code.len() == JOIN_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}
