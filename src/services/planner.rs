use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        member::{MemberStatus, TripMember},
        trip::{NewTrip, Trip, TripPhase},
        vote::{LocationTally, TripVote},
    },
    services::{
        availability::{best_date_range, DateRange},
        lifecycle::{LifecycleEngine, VoteResolution},
        notifier::Notifier,
        store::TripStore,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct TripOverview {
    pub trip: Trip,
    pub lifecycle: TripPhase,
    pub failed: bool,
    pub members: Vec<TripMember>,
    pub best_dates: Option<DateRange>,
    pub my_status: Option<MemberStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteSummary {
    pub voting_open: bool,
    pub vote_close_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub tally: Vec<LocationTally>,
    pub my_vote: Option<i64>,
}

/// Checks a trip submission before anything is written.
pub fn validate_new_trip(new: &NewTrip) -> Result<(), AppError> {
    if new.trip_name.trim().is_empty() {
        return Err(AppError::bad_request("trip name is required"));
    }
    if new.budget_per_person < 0 {
        return Err(AppError::bad_request("budget per person cannot be negative"));
    }
    if new.num_days < 1 {
        return Err(AppError::bad_request("a trip lasts at least one day"));
    }
    if new.date_range_start > new.date_range_end {
        return Err(AppError::bad_request("the date range ends before it starts"));
    }
    let span = (new.date_range_end - new.date_range_start).num_days() + 1;
    if new.num_days > span {
        return Err(AppError::bad_request(format!(
            "a {}-day trip does not fit in a {span}-day date range",
            new.num_days
        )));
    }
    if new.join_deadline >= new.date_range_start {
        return Err(AppError::bad_request(
            "the join deadline must be before the trip starts",
        ));
    }

    match new.vote_close_date {
        Some(vote_close) => {
            let mut seen = HashSet::new();
            let distinct = new
                .candidate_locations
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .filter(|name| seen.insert(name.to_lowercase()))
                .count();
            if distinct != new.candidate_locations.len() || distinct < 2 {
                return Err(AppError::bad_request(
                    "a vote trip needs at least two distinct, non-empty locations",
                ));
            }
            if vote_close >= new.join_deadline {
                return Err(AppError::bad_request(
                    "voting must close before the join deadline",
                ));
            }
            if new.location.is_some() {
                return Err(AppError::bad_request(
                    "a vote trip picks its location by vote",
                ));
            }
        }
        None => {
            if new
                .location
                .as_deref()
                .map_or(true, |location| location.trim().is_empty())
            {
                return Err(AppError::bad_request("location is required"));
            }
        }
    }
    Ok(())
}

/// Request-scoped trip operations on behalf of one user.
#[derive(Clone)]
pub struct TripPlanner {
    store: TripStore,
    notifier: Notifier,
    lifecycle: LifecycleEngine,
}

impl TripPlanner {
    pub fn new(store: TripStore, notifier: Notifier, lifecycle: LifecycleEngine) -> Self {
        Self {
            store,
            notifier,
            lifecycle,
        }
    }

    async fn require_group_member(&self, group_id: i64, user_id: &str) -> Result<(), AppError> {
        if self.store.is_group_member(group_id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    async fn trip_for(&self, trip_id: i64, user_id: &str) -> Result<Trip, AppError> {
        let trip = self.store.require_trip(trip_id).await?;
        self.require_group_member(trip.group_id, user_id).await?;
        Ok(trip)
    }

    pub async fn create_trip(&self, user_id: &str, new: NewTrip) -> Result<Trip, AppError> {
        validate_new_trip(&new)?;
        if self.store.group(new.group_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        self.require_group_member(new.group_id, user_id).await?;

        let trip = self.store.create_trip(&new, user_id).await?;
        info!(trip_id = trip.trip_id, group_id = trip.group_id, vote = trip.is_vote_trip(), "trip created");

        if let Err(err) = self.notifier.trip_created(&trip).await {
            warn!(trip_id = trip.trip_id, error = %err, "trip created email failed");
        }
        Ok(trip)
    }

    pub async fn overview(
        &self,
        trip_id: i64,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<TripOverview, AppError> {
        let mut trip = self.trip_for(trip_id, user_id).await?;
        if trip.location.is_none() && trip.voting_closed(today) {
            if let Some(location) = self
                .lifecycle
                .resolve_vote_if_closed(trip_id, today)
                .await?
                .location()
            {
                trip.location = Some(location.to_string());
            }
        }

        let members = self.store.members(trip_id).await?;
        let joined = members.iter().filter(|m| m.is_joined()).count();
        let my_status = members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.status);
        Ok(TripOverview {
            lifecycle: trip.phase(today),
            failed: trip.is_failed(today, joined),
            best_dates: best_date_range(&members, trip.num_days),
            members,
            my_status,
            trip,
        })
    }

    pub async fn best_dates(&self, trip_id: i64, user_id: &str) -> Result<Option<DateRange>, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        let members = self.store.members(trip_id).await?;
        Ok(best_date_range(&members, trip.num_days))
    }

    pub async fn join(
        &self,
        trip_id: i64,
        user_id: &str,
        name: Option<&str>,
        today: NaiveDate,
    ) -> Result<TripMember, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        if !trip.accepts_joins(today) {
            return Err(AppError::conflict("joining this trip has closed"));
        }
        let name = name.map(str::trim).filter(|name| !name.is_empty());
        let was_joined = self
            .store
            .member(trip_id, user_id)
            .await?
            .is_some_and(|m| m.is_joined());
        let member = self
            .store
            .set_member_status(trip_id, user_id, MemberStatus::Joined, name)
            .await?;
        if was_joined {
            return Ok(member);
        }

        let mut joiner = self.store.recipient(user_id).await?;
        if joiner.full_name.is_none() {
            joiner.full_name = member.name.clone();
        }
        if let Err(err) = self.notifier.trip_joined(&trip, &joiner).await {
            warn!(trip_id, error = %err, "trip joined email failed");
        }
        Ok(member)
    }

    pub async fn cancel(
        &self,
        trip_id: i64,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<TripMember, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        if !trip.accepts_joins(today) {
            return Err(AppError::conflict(
                "cancelling is no longer possible after the join deadline",
            ));
        }
        if self.store.member(trip_id, user_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        self.store
            .set_member_status(trip_id, user_id, MemberStatus::Cancelled, None)
            .await
    }

    /// Records the member's dates. The range must be exactly `num_days` long
    /// and lie inside the trip's date range; the member becomes JOINED.
    pub async fn submit_availability(
        &self,
        trip_id: i64,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<TripMember, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        if !trip.accepts_joins(today) {
            return Err(AppError::conflict("joining this trip has closed"));
        }
        let selected = DateRange { start, end };
        if start > end || selected.days() != trip.num_days {
            return Err(AppError::bad_request(format!(
                "please pick exactly {} day(s)",
                trip.num_days
            )));
        }
        if start < trip.date_range_start || end > trip.date_range_end {
            return Err(AppError::bad_request(format!(
                "dates must be between {} and {}",
                trip.date_range_start, trip.date_range_end
            )));
        }
        let was_joined = self
            .store
            .member(trip_id, user_id)
            .await?
            .is_some_and(|m| m.is_joined());
        let member = self
            .store
            .set_member_availability(trip_id, user_id, start, end)
            .await?;

        if !was_joined {
            let mut joiner = self.store.recipient(user_id).await?;
            if joiner.full_name.is_none() {
                joiner.full_name = member.name.clone();
            }
            if let Err(err) = self.notifier.trip_joined(&trip, &joiner).await {
                warn!(trip_id, error = %err, "trip joined email failed");
            }
        }
        Ok(member)
    }

    pub async fn cast_vote(
        &self,
        trip_id: i64,
        user_id: &str,
        location_id: i64,
        today: NaiveDate,
    ) -> Result<TripVote, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        if !trip.is_vote_trip() {
            return Err(AppError::bad_request("this trip has a fixed location"));
        }
        if trip.location.is_some() || !trip.voting_open(today) {
            return Err(AppError::conflict("voting has closed"));
        }
        match self.store.member(trip_id, user_id).await? {
            Some(member) if member.status != MemberStatus::Cancelled => {}
            _ => return Err(AppError::Forbidden),
        }
        if self.store.location(trip_id, location_id).await?.is_none() {
            return Err(AppError::bad_request("unknown location for this trip"));
        }
        self.store.upsert_vote(trip_id, user_id, location_id).await
    }

    pub async fn votes(
        &self,
        trip_id: i64,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<VoteSummary, AppError> {
        let trip = self.trip_for(trip_id, user_id).await?;
        let tally = self.store.vote_tally(trip_id).await?;
        let my_vote = self
            .store
            .vote_of(trip_id, user_id)
            .await?
            .map(|vote| vote.location_id);
        Ok(VoteSummary {
            voting_open: trip.location.is_none() && trip.voting_open(today),
            vote_close_date: trip.vote_close_date,
            location: trip.location,
            tally,
            my_vote,
        })
    }

    pub async fn resolve_vote(
        &self,
        trip_id: i64,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<VoteResolution, AppError> {
        self.trip_for(trip_id, user_id).await?;
        self.lifecycle.resolve_vote_if_closed(trip_id, today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn fixed_trip() -> NewTrip {
        NewTrip {
            group_id: 1,
            trip_name: "Beach".into(),
            location: Some("Hua Hin".into()),
            budget_per_person: 2500,
            num_days: 3,
            date_range_start: day("2025-07-01"),
            date_range_end: day("2025-07-10"),
            join_deadline: day("2025-06-01"),
            vote_close_date: None,
            candidate_locations: Vec::new(),
        }
    }

    fn vote_trip() -> NewTrip {
        NewTrip {
            location: None,
            vote_close_date: Some(day("2025-05-20")),
            candidate_locations: vec!["Hua Hin".into(), "Krabi".into()],
            ..fixed_trip()
        }
    }

    fn rejected(new: NewTrip) -> bool {
        matches!(validate_new_trip(&new), Err(AppError::BadRequest(_)))
    }

    #[test]
    fn well_formed_trips_pass() {
        assert!(validate_new_trip(&fixed_trip()).is_ok());
        assert!(validate_new_trip(&vote_trip()).is_ok());
    }

    #[test]
    fn duration_must_fit_the_window() {
        assert!(rejected(NewTrip { num_days: 0, ..fixed_trip() }));
        assert!(rejected(NewTrip { num_days: 11, ..fixed_trip() }));
        assert!(validate_new_trip(&NewTrip { num_days: 10, ..fixed_trip() }).is_ok());
    }

    #[test]
    fn join_deadline_must_precede_start() {
        assert!(rejected(NewTrip { join_deadline: day("2025-07-01"), ..fixed_trip() }));
    }

    #[test]
    fn fixed_trip_needs_a_location() {
        assert!(rejected(NewTrip { location: None, ..fixed_trip() }));
        assert!(rejected(NewTrip { location: Some("  ".into()), ..fixed_trip() }));
    }

    #[test]
    fn vote_trip_needs_two_distinct_candidates() {
        assert!(rejected(NewTrip { candidate_locations: vec!["Krabi".into()], ..vote_trip() }));
        assert!(rejected(NewTrip {
            candidate_locations: vec!["Krabi".into(), "krabi ".into()],
            ..vote_trip()
        }));
        assert!(rejected(NewTrip {
            candidate_locations: vec!["Krabi".into(), "".into(), "Pai".into()],
            ..vote_trip()
        }));
    }

    #[test]
    fn vote_must_close_before_join_deadline() {
        assert!(rejected(NewTrip { vote_close_date: Some(day("2025-06-01")), ..vote_trip() }));
    }
}
