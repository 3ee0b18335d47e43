//! Scheduled side of the trip lifecycle.
//!
//! An external scheduler calls [`LifecycleEngine::scan_and_notify`] once a
//! day with the calendar date to process. For each milestone the engine picks
//! the trips whose boundary date matches and whose flag is unset, sends the
//! matching notification and only then sets the flag. A trip whose dispatch
//! fails keeps its flag unset and is picked up again by the next scan; other
//! trips in the batch are unaffected.
//!
//! Sending and flagging are separate writes, so a crash in between re-sends
//! on the next scan. Delivery is at-least-once; the attempt ledger in
//! `trip_notifications` makes such a re-send visible in the logs.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    error::AppError,
    models::{trip::Milestone, vote::winning_location},
    services::{notifier::Notifier, store::TripStore},
};

/// Per-milestone counters in a scan report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MilestoneCounts {
    pub deadline: usize,
    pub start: usize,
    pub vote: usize,
}

impl MilestoneCounts {
    fn add(&mut self, milestone: Milestone, n: usize) {
        match milestone {
            Milestone::JoinDeadline => self.deadline += n,
            Milestone::TripStart => self.start += n,
            Milestone::VoteClose => self.vote += n,
        }
    }

    pub fn get(&self, milestone: Milestone) -> usize {
        match milestone {
            Milestone::JoinDeadline => self.deadline,
            Milestone::TripStart => self.start,
            Milestone::VoteClose => self.vote,
        }
    }

    pub fn total(&self) -> usize {
        self.deadline + self.start + self.vote
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub ok: bool,
    pub date: NaiveDate,
    /// Trips matched by the due query.
    pub scanned: MilestoneCounts,
    /// Recipients addressed.
    pub sent: MilestoneCounts,
    /// Trips whose flag this scan set.
    pub notified: MilestoneCounts,
    /// Trips (or whole milestone queries) that failed and will be retried.
    pub failed: MilestoneCounts,
    #[serde(rename = "totalSent")]
    pub total_sent: usize,
}

impl ScanReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            ok: true,
            date,
            scanned: MilestoneCounts::default(),
            sent: MilestoneCounts::default(),
            notified: MilestoneCounts::default(),
            failed: MilestoneCounts::default(),
            total_sent: 0,
        }
    }
}

/// Outcome of [`LifecycleEngine::resolve_vote_if_closed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoteResolution {
    /// Location was set before this call; nothing changed.
    AlreadyResolved { location: String },
    /// This call picked the winner and stored it.
    Resolved { location: String, votes: i64 },
    StillOpen { closes_on: NaiveDate },
    NoVotes,
    NotVoteTrip,
}

impl VoteResolution {
    pub fn location(&self) -> Option<&str> {
        match self {
            VoteResolution::AlreadyResolved { location }
            | VoteResolution::Resolved { location, .. } => Some(location),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct LifecycleEngine {
    store: TripStore,
    notifier: Notifier,
    catch_up: bool,
}

impl LifecycleEngine {
    /// With `catch_up` the due query also matches boundaries before the
    /// target date, so a missed scheduler run is made up by the next one.
    pub fn new(store: TripStore, notifier: Notifier, catch_up: bool) -> Self {
        Self {
            store,
            notifier,
            catch_up,
        }
    }

    pub async fn scan_and_notify(&self, target: NaiveDate) -> ScanReport {
        self.scan(target, &Milestone::ALL).await
    }

    pub async fn scan(&self, target: NaiveDate, milestones: &[Milestone]) -> ScanReport {
        let mut report = ScanReport::new(target);
        for &milestone in milestones {
            let due = match self.store.trips_due(milestone, target, self.catch_up).await {
                Ok(ids) => ids,
                Err(err) => {
                    error!(%milestone, date = %target, error = %err, "due-trip query failed");
                    report.failed.add(milestone, 1);
                    continue;
                }
            };
            report.scanned.add(milestone, due.len());

            for trip_id in due {
                match self.notify_trip(trip_id, milestone, target).await {
                    Ok(sent) => {
                        report.sent.add(milestone, sent);
                        report.notified.add(milestone, 1);
                    }
                    Err(err) => {
                        warn!(trip_id, %milestone, error = %err, "notification failed, will retry on next scan");
                        report.failed.add(milestone, 1);
                    }
                }
            }
        }
        report.total_sent = report.sent.total();
        info!(
            date = %target,
            scanned = ?report.scanned,
            sent = report.total_sent,
            failed = report.failed.total(),
            "lifecycle scan finished"
        );
        report
    }

    async fn notify_trip(
        &self,
        trip_id: i64,
        milestone: Milestone,
        target: NaiveDate,
    ) -> Result<usize, AppError> {
        if let Some(previous) = self.store.begin_notification(trip_id, milestone).await? {
            if previous.was_interrupted() {
                warn!(
                    trip_id,
                    %milestone,
                    attempts = previous.attempts,
                    last_attempt_at = %previous.last_attempt_at,
                    "previous dispatch did not finish, recipients may get a duplicate"
                );
            }
        }

        match self.dispatch(trip_id, milestone, target).await {
            Ok(sent) => {
                self.store.mark_notified(trip_id, milestone).await?;
                info!(trip_id, %milestone, sent, "milestone notified");
                Ok(sent)
            }
            Err(err) => {
                if let Err(ledger_err) = self
                    .store
                    .fail_notification(trip_id, milestone, &err.to_string())
                    .await
                {
                    warn!(trip_id, %milestone, error = %ledger_err, "could not record failed attempt");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        trip_id: i64,
        milestone: Milestone,
        target: NaiveDate,
    ) -> Result<usize, AppError> {
        match milestone {
            Milestone::JoinDeadline => self.notifier.join_deadline_digest(trip_id).await,
            Milestone::TripStart => self.notifier.start_reminder(trip_id).await,
            Milestone::VoteClose => {
                self.resolve_vote_if_closed(trip_id, target).await?;
                self.notifier.vote_close_digest(trip_id).await
            }
        }
    }

    /// Stores the winning location once voting has closed. Safe to call from
    /// any read path: once a location is set it is never re-rolled, even if
    /// votes change afterwards.
    pub async fn resolve_vote_if_closed(
        &self,
        trip_id: i64,
        today: NaiveDate,
    ) -> Result<VoteResolution, AppError> {
        let trip = self.store.require_trip(trip_id).await?;
        if let Some(location) = trip.location {
            return Ok(VoteResolution::AlreadyResolved { location });
        }
        let Some(closes_on) = trip.vote_close_date else {
            return Ok(VoteResolution::NotVoteTrip);
        };
        if today < closes_on {
            return Ok(VoteResolution::StillOpen { closes_on });
        }

        let tally = self.store.vote_tally(trip_id).await?;
        let Some(winner) = winning_location(&tally) else {
            return Ok(VoteResolution::NoVotes);
        };

        if self
            .store
            .set_location_if_unset(trip_id, &winner.location_name)
            .await?
        {
            info!(trip_id, location = %winner.location_name, votes = winner.votes, "vote resolved");
            return Ok(VoteResolution::Resolved {
                location: winner.location_name.clone(),
                votes: winner.votes,
            });
        }

        // Another caller set it between our read and write.
        let current = self.store.require_trip(trip_id).await?;
        Ok(VoteResolution::AlreadyResolved {
            location: current
                .location
                .unwrap_or_else(|| winner.location_name.clone()),
        })
    }
}
