use std::sync::Arc;

use askama::Template;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::{
    error::AppError,
    models::{
        profile::Recipient,
        trip::Trip,
        vote::{winning_location, LocationTally},
    },
    services::{
        availability::{best_date_range, member_range, DateRange},
        mailer::{send_email, Mailer, OutgoingEmail},
        store::{MemberFilter, TripStore},
    },
};

const GROUP_FALLBACK: &str = "your group";

#[derive(Template)]
#[template(path = "email/group_joined.html")]
struct GroupJoinedEmail<'a> {
    group: &'a str,
    joiner: &'a str,
}

#[derive(Template)]
#[template(path = "email/trip_created.html")]
struct TripCreatedEmail<'a> {
    group: &'a str,
    trip: &'a str,
    date_start: String,
    date_end: String,
    join_deadline: String,
    vote_close: Option<String>,
}

#[derive(Template)]
#[template(path = "email/trip_joined.html")]
struct TripJoinedEmail<'a> {
    group: &'a str,
    trip: &'a str,
    joiner: &'a str,
}

struct DigestMember {
    name: String,
    range: Option<String>,
}

#[derive(Template)]
#[template(path = "email/deadline_digest.html")]
struct DeadlineDigestEmail<'a> {
    group: &'a str,
    trip: &'a str,
    join_deadline: String,
    joined: Vec<DigestMember>,
    best_dates: Option<String>,
    location: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/start_reminder.html")]
struct StartReminderEmail<'a> {
    trip: &'a str,
    location: Option<&'a str>,
    date_start: String,
    date_end: String,
    num_days: i64,
    best_dates: Option<String>,
    budget: i64,
}

#[derive(Template)]
#[template(path = "email/vote_closed.html")]
struct VoteClosedEmail<'a> {
    group: &'a str,
    trip: &'a str,
    winner: Option<&'a str>,
    tally: Vec<LocationTally>,
    join_deadline: String,
}

fn format_day(day: NaiveDate) -> String {
    day.format("%d/%m/%Y").to_string()
}

fn format_range(range: DateRange) -> String {
    if range.start == range.end {
        format_day(range.start)
    } else {
        format!("{} – {}", format_day(range.start), format_day(range.end))
    }
}

fn addresses(recipients: &[Recipient]) -> Vec<String> {
    recipients.iter().filter_map(|r| r.email.clone()).collect()
}

/// Builds and sends every email the service produces. Each method reloads
/// the rows it needs, so a message always reflects the current state.
#[derive(Clone)]
pub struct Notifier {
    store: TripStore,
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(store: TripStore, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    async fn group_label(&self, group_id: i64) -> Result<String, AppError> {
        Ok(self
            .store
            .group_name(group_id)
            .await?
            .unwrap_or_else(|| GROUP_FALLBACK.to_string()))
    }

    async fn deliver(&self, to: Vec<String>, subject: String, html: String) -> Result<usize, AppError> {
        let sent = send_email(self.mailer.as_ref(), OutgoingEmail { to, subject, html }).await?;
        Ok(sent)
    }

    /// Tells the other group members that `joiner` arrived.
    pub async fn group_joined(&self, group_id: i64, joiner: &Recipient) -> Result<usize, AppError> {
        let members = self.store.group_recipients(group_id).await?;
        let recipients = exclude_joiner(members, joiner);
        if recipients.is_empty() {
            return Ok(0);
        }
        let group = self.group_label(group_id).await?;
        let display = joiner.display_name();
        let html = GroupJoinedEmail {
            group: &group,
            joiner: &display,
        }
        .render()?;
        let subject = format!("👋 {display} joined {group}");
        self.deliver(recipients, subject, html).await
    }

    pub async fn trip_created(&self, trip: &Trip) -> Result<usize, AppError> {
        let recipients = addresses(&self.store.group_recipients(trip.group_id).await?);
        if recipients.is_empty() {
            return Ok(0);
        }
        let group = self.group_label(trip.group_id).await?;
        let label = trip.label();
        let html = TripCreatedEmail {
            group: &group,
            trip: &label,
            date_start: format_day(trip.date_range_start),
            date_end: format_day(trip.date_range_end),
            join_deadline: format_day(trip.join_deadline),
            vote_close: trip.vote_close_date.map(format_day),
        }
        .render()?;
        let subject = format!("🆕 New trip in {group}: {label}");
        self.deliver(recipients, subject, html).await
    }

    /// Tells the trip's other JOINED members that `joiner` is in.
    pub async fn trip_joined(&self, trip: &Trip, joiner: &Recipient) -> Result<usize, AppError> {
        let joined = self.store.trip_recipients(trip.trip_id, MemberFilter::Joined).await?;
        let recipients = exclude_joiner(joined, joiner);
        if recipients.is_empty() {
            return Ok(0);
        }
        let group = self.group_label(trip.group_id).await?;
        let label = trip.label();
        let display = joiner.display_name();
        let html = TripJoinedEmail {
            group: &group,
            trip: &label,
            joiner: &display,
        }
        .render()?;
        let subject = format!("✅ {display} joined the trip: {label}");
        self.deliver(recipients, subject, html).await
    }

    /// Summary sent when joining closes: who is going and the best dates.
    /// Goes to every member who has not cancelled plus the organiser, so a
    /// trip nobody joined still produces one message.
    pub async fn join_deadline_digest(&self, trip_id: i64) -> Result<usize, AppError> {
        let trip = self.store.require_trip(trip_id).await?;
        let members = self.store.members(trip_id).await?;
        let mut recipients =
            addresses(&self.store.trip_recipients(trip_id, MemberFilter::NotCancelled).await?);
        if let Some(email) = self.store.recipient(&trip.created_by).await?.email {
            recipients.push(email);
        }

        let joined = members
            .iter()
            .filter(|m| m.is_joined())
            .map(|m| DigestMember {
                name: m.display_name().to_string(),
                range: member_range(m).map(format_range),
            })
            .collect::<Vec<_>>();
        let best = best_date_range(&members, trip.num_days).map(format_range);

        let group = self.group_label(trip.group_id).await?;
        let label = trip.label();
        debug!(trip_id, joined = joined.len(), "building join deadline digest");
        let subject = if joined.is_empty() {
            format!("⏰ Joining closed: {label} (nobody joined)")
        } else {
            format!("⏰ Joining closed: {label} ({} going)", joined.len())
        };
        let html = DeadlineDigestEmail {
            group: &group,
            trip: &label,
            join_deadline: format_day(trip.join_deadline),
            joined,
            best_dates: best,
            location: trip.location.as_deref(),
        }
        .render()?;
        self.deliver(recipients, subject, html).await
    }

    /// Morning-of reminder for everyone who JOINED.
    pub async fn start_reminder(&self, trip_id: i64) -> Result<usize, AppError> {
        let trip = self.store.require_trip(trip_id).await?;
        let recipients = addresses(&self.store.trip_recipients(trip_id, MemberFilter::Joined).await?);
        if recipients.is_empty() {
            return Ok(0);
        }
        let members = self.store.members(trip_id).await?;
        let label = trip.label();
        let html = StartReminderEmail {
            trip: &label,
            location: trip.location.as_deref(),
            date_start: format_day(trip.date_range_start),
            date_end: format_day(trip.date_range_end),
            num_days: trip.num_days,
            best_dates: best_date_range(&members, trip.num_days).map(format_range),
            budget: trip.budget_per_person,
        }
        .render()?;
        let subject = format!("🧳 {label} starts today");
        self.deliver(recipients, subject, html).await
    }

    /// Announces the vote result. Expects the vote to have been resolved
    /// already; falls back to the tally leader if the location is still unset.
    pub async fn vote_close_digest(&self, trip_id: i64) -> Result<usize, AppError> {
        let trip = self.store.require_trip(trip_id).await?;
        let recipients =
            addresses(&self.store.trip_recipients(trip_id, MemberFilter::NotCancelled).await?);
        if recipients.is_empty() {
            return Ok(0);
        }
        let tally = self.store.vote_tally(trip_id).await?;
        let winner = trip
            .location
            .clone()
            .or_else(|| winning_location(&tally).map(|w| w.location_name.clone()));
        let group = self.group_label(trip.group_id).await?;
        let label = trip.label();
        let subject = match winner.as_deref() {
            Some(place) => format!("🗳️ Vote closed: {label} is going to {place}"),
            None => format!("🗳️ Vote closed: {label}"),
        };
        let html = VoteClosedEmail {
            group: &group,
            trip: &label,
            winner: winner.as_deref(),
            tally,
            join_deadline: format_day(trip.join_deadline),
        }
        .render()?;
        let sent = self.deliver(recipients, subject, html).await?;
        info!(trip_id, winner = ?winner, sent, "vote close digest sent");
        Ok(sent)
    }
}

/// Drops the joiner from a recipient list, matching by user id and by email.
fn exclude_joiner(recipients: Vec<Recipient>, joiner: &Recipient) -> Vec<String> {
    let joiner_email = joiner.email.as_deref().map(|e| e.trim().to_lowercase());
    recipients
        .into_iter()
        .filter(|r| r.user_id != joiner.user_id)
        .filter_map(|r| r.email)
        .filter(|email| Some(email.trim().to_lowercase()) != joiner_email)
        .collect()
}
