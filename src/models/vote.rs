use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripLocation {
    pub location_id: i64,
    pub trip_id: i64,
    pub location_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripVote {
    pub vote_id: i64,
    pub trip_id: i64,
    pub user_id: String,
    pub location_id: i64,
    pub voted_at: DateTime<Utc>,
}

/// Vote count for one candidate location.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct LocationTally {
    pub location_id: i64,
    pub location_name: String,
    pub votes: i64,
}

/// Picks the candidate with the most votes. Ties go to the lowest
/// `location_id`, i.e. the candidate entered first when the trip was created.
pub fn winning_location(tally: &[LocationTally]) -> Option<&LocationTally> {
    tally
        .iter()
        .filter(|entry| entry.votes > 0)
        .fold(None, |best: Option<&LocationTally>, entry| match best {
            Some(current)
                if current.votes > entry.votes
                    || (current.votes == entry.votes
                        && current.location_id < entry.location_id) =>
            {
                Some(current)
            }
            _ => Some(entry),
        })
}
