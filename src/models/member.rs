use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MemberStatus {
    #[default]
    Pending,
    Joined,
    Cancelled,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "PENDING",
            MemberStatus::Joined => "JOINED",
            MemberStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user's participation in one trip. Rows are never deleted; leaving a
/// trip flips the status to `CANCELLED`.
///
/// The selected dates are kept as the raw stored text so that rows written by
/// other clients with malformed values still load; the availability
/// aggregator treats anything unparseable as "no preference".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripMember {
    pub trip_id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub status: MemberStatus,
    pub selected_start_date: Option<String>,
    pub selected_end_date: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TripMember {
    pub fn is_joined(&self) -> bool {
        self.status == MemberStatus::Joined
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.user_id)
    }
}
