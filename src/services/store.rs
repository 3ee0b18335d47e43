use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        group::Group,
        member::{MemberStatus, TripMember},
        profile::{Profile, Recipient},
        trip::{Milestone, NewTrip, Trip},
        vote::{LocationTally, TripLocation, TripVote},
    },
};

const TRIP_COLUMNS: &str = "trip_id, group_id, trip_name, location, budget_per_person, num_days, \
     date_range_start, date_range_end, join_deadline, vote_close_date, created_by, created_at, \
     join_deadline_notified, trip_start_notified, vote_close_notified";

const MEMBER_COLUMNS: &str =
    "trip_id, user_id, name, status, selected_start_date, selected_end_date, updated_at";

/// Which trip members a recipient query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    Joined,
    NotCancelled,
}

impl MemberFilter {
    fn clause(&self) -> &'static str {
        match self {
            MemberFilter::Joined => "tm.status = 'JOINED'",
            MemberFilter::NotCancelled => "tm.status <> 'CANCELLED'",
        }
    }
}

/// State of the notification ledger row for one (trip, milestone).
#[derive(Debug, Clone, FromRow)]
pub struct NotificationAttempt {
    pub attempts: i64,
    pub last_attempt_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl NotificationAttempt {
    /// An attempt that neither completed nor recorded a failure was cut off
    /// mid-dispatch; its email may already have gone out.
    pub fn was_interrupted(&self) -> bool {
        self.completed_at.is_none() && self.last_error.is_none()
    }
}

/// Every query the service runs against the relational store.
#[derive(Clone)]
pub struct TripStore {
    db: DbPool,
}

impl TripStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    // ── profiles ──────────────────────────────────────────────

    pub async fn upsert_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<Profile, AppError> {
        sqlx::query(
            "INSERT INTO profiles (id, email, full_name, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 full_name = excluded.full_name,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(email)
        .bind(full_name)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        self.profile(user_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn profile(&self, user_id: &str) -> Result<Option<Profile>, AppError> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT id, email, full_name, updated_at FROM profiles WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(profile)
    }

    pub async fn recipient(&self, user_id: &str) -> Result<Recipient, AppError> {
        let profile = self.profile(user_id).await?;
        Ok(Recipient {
            user_id: user_id.to_string(),
            email: profile.as_ref().and_then(|p| p.email.clone()),
            full_name: profile.and_then(|p| p.full_name),
        })
    }

    // ── groups ────────────────────────────────────────────────

    pub async fn create_group(
        &self,
        name: &str,
        join_code: &str,
        created_by: &str,
    ) -> Result<Group, AppError> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let group_id = sqlx::query(
            "INSERT INTO groups (group_name, join_code, created_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(join_code)
        .bind(created_by)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)")
            .bind(group_id)
            .bind(created_by)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.group(group_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn group(&self, group_id: i64) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>(
            "SELECT group_id, group_name, join_code, created_by, created_at
             FROM groups WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(group)
    }

    pub async fn group_by_code(&self, join_code: &str) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>(
            "SELECT group_id, group_name, join_code, created_by, created_at
             FROM groups WHERE join_code = ?",
        )
        .bind(join_code)
        .fetch_optional(&self.db)
        .await?;
        Ok(group)
    }

    pub async fn group_name(&self, group_id: i64) -> Result<Option<String>, AppError> {
        let name = sqlx::query_scalar::<_, String>("SELECT group_name FROM groups WHERE group_id = ?")
            .bind(group_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(name)
    }

    /// Returns `false` when the user already was a member.
    pub async fn add_group_member(&self, group_id: i64, user_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)
             ON CONFLICT(group_id, user_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_group_member(&self, group_id: i64, user_id: &str) -> Result<bool, AppError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(found.is_some())
    }

    pub async fn group_recipients(&self, group_id: i64) -> Result<Vec<Recipient>, AppError> {
        let recipients = sqlx::query_as::<_, Recipient>(
            "SELECT gm.user_id AS user_id, p.email AS email, p.full_name AS full_name
             FROM group_members gm
             LEFT JOIN profiles p ON p.id = gm.user_id
             WHERE gm.group_id = ?
             ORDER BY gm.joined_at, gm.user_id",
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(recipients)
    }

    // ── trips ─────────────────────────────────────────────────

    /// Inserts the trip, its candidate locations and one PENDING member row
    /// per group member in a single transaction.
    pub async fn create_trip(&self, new: &NewTrip, created_by: &str) -> Result<Trip, AppError> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let trip_id = sqlx::query(
            "INSERT INTO trips (group_id, trip_name, location, budget_per_person, num_days,
                 date_range_start, date_range_end, join_deadline, vote_close_date,
                 created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.group_id)
        .bind(new.trip_name.trim())
        .bind(new.location.as_deref().map(str::trim))
        .bind(new.budget_per_person)
        .bind(new.num_days)
        .bind(new.date_range_start)
        .bind(new.date_range_end)
        .bind(new.join_deadline)
        .bind(new.vote_close_date)
        .bind(created_by)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if new.vote_close_date.is_some() {
            for name in &new.candidate_locations {
                sqlx::query("INSERT INTO trip_locations (trip_id, location_name) VALUES (?, ?)")
                    .bind(trip_id)
                    .bind(name.trim())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query(
            "INSERT INTO trip_members (trip_id, user_id, name, status, updated_at)
             SELECT ?, gm.user_id, p.full_name, 'PENDING', ?
             FROM group_members gm
             LEFT JOIN profiles p ON p.id = gm.user_id
             WHERE gm.group_id = ?",
        )
        .bind(trip_id)
        .bind(now)
        .bind(new.group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.trip(trip_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn trip(&self, trip_id: i64) -> Result<Option<Trip>, AppError> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = ?");
        let trip = sqlx::query_as::<_, Trip>(&sql)
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(trip)
    }

    pub async fn require_trip(&self, trip_id: i64) -> Result<Trip, AppError> {
        self.trip(trip_id).await?.ok_or(AppError::NotFound)
    }

    /// Trips whose boundary for `milestone` falls on `date` (or on or before
    /// it with `catch_up`) and whose flag is still unset.
    pub async fn trips_due(
        &self,
        milestone: Milestone,
        date: NaiveDate,
        catch_up: bool,
    ) -> Result<Vec<i64>, AppError> {
        let column = milestone.date_column();
        let flag = milestone.flag_column();
        let comparison = if catch_up { "<=" } else { "=" };
        let sql = format!(
            "SELECT trip_id FROM trips
             WHERE {column} IS NOT NULL AND {column} {comparison} ? AND COALESCE({flag}, 0) = 0
             ORDER BY trip_id"
        );
        let ids = sqlx::query_scalar::<_, i64>(&sql)
            .bind(date)
            .fetch_all(&self.db)
            .await?;
        Ok(ids)
    }

    /// Opens a ledger attempt for (trip, milestone) and returns the previous
    /// ledger state, if any.
    pub async fn begin_notification(
        &self,
        trip_id: i64,
        milestone: Milestone,
    ) -> Result<Option<NotificationAttempt>, AppError> {
        let mut tx = self.db.begin().await?;
        let previous = sqlx::query_as::<_, NotificationAttempt>(
            "SELECT attempts, last_attempt_at, completed_at, last_error
             FROM trip_notifications WHERE trip_id = ? AND kind = ?",
        )
        .bind(trip_id)
        .bind(milestone.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO trip_notifications (trip_id, kind, attempts, last_attempt_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT(trip_id, kind) DO UPDATE SET
                 attempts = attempts + 1,
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = NULL",
        )
        .bind(trip_id)
        .bind(milestone.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(previous)
    }

    pub async fn fail_notification(
        &self,
        trip_id: i64,
        milestone: Milestone,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE trip_notifications SET last_error = ? WHERE trip_id = ? AND kind = ?")
            .bind(error)
            .bind(trip_id)
            .bind(milestone.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Sets the trip's flag for `milestone` and closes the ledger attempt.
    /// The flag only ever goes from false to true.
    pub async fn mark_notified(&self, trip_id: i64, milestone: Milestone) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;
        let sql = format!("UPDATE trips SET {} = 1 WHERE trip_id = ?", milestone.flag_column());
        sqlx::query(&sql)
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE trip_notifications SET completed_at = ?, last_error = NULL
             WHERE trip_id = ? AND kind = ?",
        )
        .bind(Utc::now())
        .bind(trip_id)
        .bind(milestone.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn notification_attempt(
        &self,
        trip_id: i64,
        milestone: Milestone,
    ) -> Result<Option<NotificationAttempt>, AppError> {
        let attempt = sqlx::query_as::<_, NotificationAttempt>(
            "SELECT attempts, last_attempt_at, completed_at, last_error
             FROM trip_notifications WHERE trip_id = ? AND kind = ?",
        )
        .bind(trip_id)
        .bind(milestone.as_str())
        .fetch_optional(&self.db)
        .await?;
        Ok(attempt)
    }

    /// Writes the location only if none is set yet. Returns whether this call
    /// was the one that set it.
    pub async fn set_location_if_unset(&self, trip_id: i64, location: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE trips SET location = ? WHERE trip_id = ? AND location IS NULL")
                .bind(location)
                .bind(trip_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── members ───────────────────────────────────────────────

    pub async fn members(&self, trip_id: i64) -> Result<Vec<TripMember>, AppError> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM trip_members WHERE trip_id = ? ORDER BY updated_at, user_id"
        );
        let members = sqlx::query_as::<_, TripMember>(&sql)
            .bind(trip_id)
            .fetch_all(&self.db)
            .await?;
        Ok(members)
    }

    pub async fn member(&self, trip_id: i64, user_id: &str) -> Result<Option<TripMember>, AppError> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM trip_members WHERE trip_id = ? AND user_id = ?");
        let member = sqlx::query_as::<_, TripMember>(&sql)
            .bind(trip_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(member)
    }

    /// Upserts the member's status. A `None` name keeps whatever is stored.
    pub async fn set_member_status(
        &self,
        trip_id: i64,
        user_id: &str,
        status: MemberStatus,
        name: Option<&str>,
    ) -> Result<TripMember, AppError> {
        sqlx::query(
            "INSERT INTO trip_members (trip_id, user_id, name, status, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(trip_id, user_id) DO UPDATE SET
                 status = excluded.status,
                 name = COALESCE(excluded.name, trip_members.name),
                 updated_at = excluded.updated_at",
        )
        .bind(trip_id)
        .bind(user_id)
        .bind(name)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        self.member(trip_id, user_id).await?.ok_or(AppError::NotFound)
    }

    /// Stores the member's selected range and marks them JOINED.
    pub async fn set_member_availability(
        &self,
        trip_id: i64,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TripMember, AppError> {
        sqlx::query(
            "INSERT INTO trip_members
                 (trip_id, user_id, status, selected_start_date, selected_end_date, updated_at)
             VALUES (?, ?, 'JOINED', ?, ?, ?)
             ON CONFLICT(trip_id, user_id) DO UPDATE SET
                 status = 'JOINED',
                 selected_start_date = excluded.selected_start_date,
                 selected_end_date = excluded.selected_end_date,
                 updated_at = excluded.updated_at",
        )
        .bind(trip_id)
        .bind(user_id)
        .bind(start.format("%Y-%m-%d").to_string())
        .bind(end.format("%Y-%m-%d").to_string())
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        self.member(trip_id, user_id).await?.ok_or(AppError::NotFound)
    }

    /// Trip members joined with their profile. The member's own display name
    /// fills in when the profile has none.
    pub async fn trip_recipients(
        &self,
        trip_id: i64,
        filter: MemberFilter,
    ) -> Result<Vec<Recipient>, AppError> {
        let sql = format!(
            "SELECT tm.user_id AS user_id, p.email AS email,
                    COALESCE(p.full_name, tm.name) AS full_name
             FROM trip_members tm
             LEFT JOIN profiles p ON p.id = tm.user_id
             WHERE tm.trip_id = ? AND {}
             ORDER BY tm.updated_at, tm.user_id",
            filter.clause()
        );
        let recipients = sqlx::query_as::<_, Recipient>(&sql)
            .bind(trip_id)
            .fetch_all(&self.db)
            .await?;
        Ok(recipients)
    }

    // ── votes ─────────────────────────────────────────────────

    pub async fn locations(&self, trip_id: i64) -> Result<Vec<TripLocation>, AppError> {
        let locations = sqlx::query_as::<_, TripLocation>(
            "SELECT location_id, trip_id, location_name FROM trip_locations
             WHERE trip_id = ? ORDER BY location_id",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(locations)
    }

    pub async fn location(
        &self,
        trip_id: i64,
        location_id: i64,
    ) -> Result<Option<TripLocation>, AppError> {
        let location = sqlx::query_as::<_, TripLocation>(
            "SELECT location_id, trip_id, location_name FROM trip_locations
             WHERE trip_id = ? AND location_id = ?",
        )
        .bind(trip_id)
        .bind(location_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(location)
    }

    /// One vote per (trip, user); a later vote replaces the earlier one.
    pub async fn upsert_vote(
        &self,
        trip_id: i64,
        user_id: &str,
        location_id: i64,
    ) -> Result<TripVote, AppError> {
        sqlx::query(
            "INSERT INTO trip_votes (trip_id, user_id, location_id, voted_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(trip_id, user_id) DO UPDATE SET
                 location_id = excluded.location_id,
                 voted_at = excluded.voted_at",
        )
        .bind(trip_id)
        .bind(user_id)
        .bind(location_id)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        self.vote_of(trip_id, user_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn vote_of(&self, trip_id: i64, user_id: &str) -> Result<Option<TripVote>, AppError> {
        let vote = sqlx::query_as::<_, TripVote>(
            "SELECT vote_id, trip_id, user_id, location_id, voted_at FROM trip_votes
             WHERE trip_id = ? AND user_id = ?",
        )
        .bind(trip_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(vote)
    }

    /// Every candidate with its vote count, most votes first, then in the
    /// order candidates were entered.
    pub async fn vote_tally(&self, trip_id: i64) -> Result<Vec<LocationTally>, AppError> {
        let tally = sqlx::query_as::<_, LocationTally>(
            "SELECT l.location_id AS location_id, l.location_name AS location_name,
                    COUNT(v.vote_id) AS votes
             FROM trip_locations l
             LEFT JOIN trip_votes v ON v.location_id = l.location_id AND v.trip_id = l.trip_id
             WHERE l.trip_id = ?
             GROUP BY l.location_id, l.location_name
             ORDER BY votes DESC, l.location_id ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(tally)
    }
}
