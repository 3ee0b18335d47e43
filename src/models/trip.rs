use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub trip_id: i64,
    pub group_id: i64,
    pub trip_name: String,
    pub location: Option<String>,
    pub budget_per_person: i64,
    pub num_days: i64,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub join_deadline: NaiveDate,
    pub vote_close_date: Option<NaiveDate>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub join_deadline_notified: bool,
    pub trip_start_notified: bool,
    pub vote_close_notified: bool,
}

/// Everything the organiser submits when creating a trip. A trip with a
/// `vote_close_date` is a vote trip and picks its location from
/// `candidate_locations`; otherwise `location` is fixed up front.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrip {
    pub group_id: i64,
    pub trip_name: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub location: Option<String>,
    pub budget_per_person: i64,
    pub num_days: i64,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub join_deadline: NaiveDate,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub vote_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub candidate_locations: Vec<String>,
}

/// Where a trip stands on the join side of its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinPhase {
    Voting,
    JoinOpen,
    JoinClosed,
}

/// Join phase plus the independent "has started" boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripPhase {
    pub phase: JoinPhase,
    pub started: bool,
}

/// A date boundary on which a trip gets exactly one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    JoinDeadline,
    TripStart,
    VoteClose,
}

impl Milestone {
    pub const ALL: [Milestone; 3] = [
        Milestone::JoinDeadline,
        Milestone::TripStart,
        Milestone::VoteClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::JoinDeadline => "join_deadline",
            Milestone::TripStart => "trip_start",
            Milestone::VoteClose => "vote_close",
        }
    }

    /// Column in `trips` holding the boundary date.
    pub fn date_column(&self) -> &'static str {
        match self {
            Milestone::JoinDeadline => "join_deadline",
            Milestone::TripStart => "date_range_start",
            Milestone::VoteClose => "vote_close_date",
        }
    }

    /// Column in `trips` holding the idempotency flag.
    pub fn flag_column(&self) -> &'static str {
        match self {
            Milestone::JoinDeadline => "join_deadline_notified",
            Milestone::TripStart => "trip_start_notified",
            Milestone::VoteClose => "vote_close_notified",
        }
    }

    pub fn is_notified(&self, trip: &Trip) -> bool {
        match self {
            Milestone::JoinDeadline => trip.join_deadline_notified,
            Milestone::TripStart => trip.trip_start_notified,
            Milestone::VoteClose => trip.vote_close_notified,
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Trip {
    pub fn is_vote_trip(&self) -> bool {
        self.vote_close_date.is_some()
    }

    pub fn label(&self) -> String {
        if self.trip_name.trim().is_empty() {
            format!("Trip #{}", self.trip_id)
        } else {
            self.trip_name.clone()
        }
    }

    /// Voting closes on the close date itself.
    pub fn voting_open(&self, today: NaiveDate) -> bool {
        matches!(self.vote_close_date, Some(close) if today < close)
    }

    pub fn voting_closed(&self, today: NaiveDate) -> bool {
        matches!(self.vote_close_date, Some(close) if today >= close)
    }

    pub fn accepts_joins(&self, today: NaiveDate) -> bool {
        today <= self.join_deadline
    }

    pub fn has_started(&self, today: NaiveDate) -> bool {
        today >= self.date_range_start
    }

    pub fn phase(&self, today: NaiveDate) -> TripPhase {
        let phase = if self.voting_open(today) {
            JoinPhase::Voting
        } else if self.accepts_joins(today) {
            JoinPhase::JoinOpen
        } else {
            JoinPhase::JoinClosed
        };
        TripPhase {
            phase,
            started: self.has_started(today),
        }
    }

    /// A trip whose join deadline passed without a single confirmed member.
    pub fn is_failed(&self, today: NaiveDate, joined_members: usize) -> bool {
        !self.accepts_joins(today) && joined_members == 0
    }
}
