use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use cucumber::{given, then, when, World as _};
use tempfile::TempDir;
use tripmate::{
    config::AppConfig,
    db::{init_pool, run_migrations},
    error::AppError,
    models::trip::{Milestone, NewTrip},
    services::{
        availability::DateRange,
        lifecycle::{ScanReport, VoteResolution},
        mailer::{MailError, Mailer, OutgoingEmail},
    },
    state::AppState,
};

/// Keeps every message in memory. Can be switched to fail every send, or
/// only sends whose subject mentions one of `failing_subjects`.
#[derive(Debug, Clone, Default)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    failing: Arc<AtomicBool>,
    failing_subjects: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let subject_fails = self
            .failing_subjects
            .lock()
            .unwrap()
            .iter()
            .any(|needle| email.subject.contains(needle.as_str()));
        if self.failing.load(Ordering::SeqCst) || subject_fails {
            return Err(MailError::SendFailed("mail relay unavailable".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

impl RecordingMailer {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

struct TestState {
    app: AppState,
    mailer: RecordingMailer,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new(scan_catch_up: bool) -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            scan_catch_up,
            ..AppConfig::default()
        };

        let db = init_pool(&config.database_url).await?;
        run_migrations(&db).await?;

        let mailer = RecordingMailer::default();
        let app = AppState::with_mailer(config, db, Arc::new(mailer.clone()));
        Ok(Self {
            app,
            mailer,
            _root: root,
        })
    }
}

#[derive(Debug, cucumber::World, Default)]
struct TripWorld {
    state: Option<TestState>,
    group_id: Option<i64>,
    join_code: Option<String>,
    trip_id: Option<i64>,
    trips: HashMap<String, i64>,
    last_report: Option<ScanReport>,
    last_resolution: Option<VoteResolution>,
    last_error: Option<String>,
}

impl TripWorld {
    fn state(&self) -> &TestState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
    }

    fn app(&self) -> &AppState {
        &self.state().app
    }

    fn mailer(&self) -> &RecordingMailer {
        &self.state().mailer
    }

    fn group_id(&self) -> i64 {
        self.group_id.expect("a group must exist first")
    }

    fn trip_id(&self) -> i64 {
        self.trip_id.expect("a trip must exist first")
    }

    fn trip_named(&self, name: &str) -> i64 {
        *self
            .trips
            .get(name)
            .unwrap_or_else(|| panic!("no trip named {name:?}"))
    }

    fn report(&self) -> &ScanReport {
        self.last_report.as_ref().expect("a scan must have run")
    }
}

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date in YYYY-MM-DD form")
}

fn names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn milestone(raw: &str) -> Milestone {
    match raw {
        "deadline" => Milestone::JoinDeadline,
        "start" => Milestone::TripStart,
        "vote" => Milestone::VoteClose,
        other => panic!("unknown milestone {other}"),
    }
}

fn email_of(user: &str) -> String {
    format!("{user}@example.com")
}

async fn create_trip(world: &mut TripWorld, new: NewTrip) {
    let name = new.trip_name.clone();
    let organiser = world
        .app()
        .store
        .group(new.group_id)
        .await
        .expect("load group")
        .expect("group exists")
        .created_by;
    let trip = world
        .app()
        .planner
        .create_trip(&organiser, new)
        .await
        .expect("create trip");
    world.trip_id = Some(trip.trip_id);
    world.trips.insert(name, trip.trip_id);
    world.mailer().clear();
}

// ── setup ─────────────────────────────────────────────────────

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut TripWorld) {
    *world = TripWorld {
        state: Some(TestState::new(false).await.expect("state")),
        ..TripWorld::default()
    };
}

#[given("a fresh application state with catch-up scanning")]
async fn given_fresh_catch_up_state(world: &mut TripWorld) {
    *world = TripWorld {
        state: Some(TestState::new(true).await.expect("state")),
        ..TripWorld::default()
    };
}

#[given(regex = r#"^a group "([^"]+)" with members "([^"]*)"$"#)]
async fn given_group(world: &mut TripWorld, group_name: String, members: String) {
    let members = names(&members);
    let store = &world.app().store;
    for member in &members {
        store
            .upsert_profile(member, Some(&email_of(member)), Some(member))
            .await
            .expect("profile");
    }
    let (organiser, rest) = members.split_first().expect("at least one member");
    let group = world
        .app()
        .groups
        .create_group(organiser, &group_name)
        .await
        .expect("create group");
    for member in rest {
        assert!(store
            .add_group_member(group.group_id, member)
            .await
            .expect("add member"));
    }
    world.group_id = Some(group.group_id);
    world.join_code = Some(group.join_code);
}

#[given(regex = r#"^a user "([^"]+)" outside the group$"#)]
async fn given_outsider(world: &mut TripWorld, user: String) {
    world
        .app()
        .store
        .upsert_profile(&user, Some(&email_of(&user)), Some(&user))
        .await
        .expect("profile");
}

#[given(
    regex = r#"^a trip "([^"]+)" to "([^"]+)" lasting (\d+) days? between "([^"]+)" and "([^"]+)" with join deadline "([^"]+)"$"#
)]
async fn given_fixed_trip(
    world: &mut TripWorld,
    name: String,
    location: String,
    num_days: i64,
    start: String,
    end: String,
    deadline: String,
) {
    let new = NewTrip {
        group_id: world.group_id(),
        trip_name: name,
        location: Some(location),
        budget_per_person: 3000,
        num_days,
        date_range_start: day(&start),
        date_range_end: day(&end),
        join_deadline: day(&deadline),
        vote_close_date: None,
        candidate_locations: Vec::new(),
    };
    create_trip(world, new).await;
}

#[given(
    regex = r#"^a vote trip "([^"]+)" lasting (\d+) days? between "([^"]+)" and "([^"]+)" with join deadline "([^"]+)" and voting until "([^"]+)" on "([^"]+)"$"#
)]
async fn given_vote_trip(
    world: &mut TripWorld,
    name: String,
    num_days: i64,
    start: String,
    end: String,
    deadline: String,
    vote_close: String,
    candidates: String,
) {
    let new = NewTrip {
        group_id: world.group_id(),
        trip_name: name,
        location: None,
        budget_per_person: 5000,
        num_days,
        date_range_start: day(&start),
        date_range_end: day(&end),
        join_deadline: day(&deadline),
        vote_close_date: Some(day(&vote_close)),
        candidate_locations: names(&candidates),
    };
    create_trip(world, new).await;
}

#[given(regex = r#"^"([^"]+)" is available from "([^"]+)" to "([^"]+)"$"#)]
async fn given_available(world: &mut TripWorld, user: String, start: String, end: String) {
    world
        .app()
        .store
        .set_member_availability(world.trip_id(), &user, day(&start), day(&end))
        .await
        .expect("store availability");
}

#[given(regex = r#"^"([^"]+)" has cancelled$"#)]
async fn given_cancelled(world: &mut TripWorld, user: String) {
    world
        .app()
        .store
        .set_member_status(
            world.trip_id(),
            &user,
            tripmate::models::member::MemberStatus::Cancelled,
            None,
        )
        .await
        .expect("cancel member");
}

#[given(regex = r#"^"([^"]+)" voted for "([^"]+)"$"#)]
async fn given_voted(world: &mut TripWorld, voters: String, location: String) {
    vote_for(world, voters, location).await;
}

#[when(regex = r#"^"([^"]+)" votes? for "([^"]+)"$"#)]
async fn when_vote(world: &mut TripWorld, voters: String, location: String) {
    vote_for(world, voters, location).await;
}

async fn vote_for(world: &mut TripWorld, voters: String, location: String) {
    let trip_id = world.trip_id();
    let store = &world.app().store;
    let location_id = store
        .locations(trip_id)
        .await
        .expect("locations")
        .into_iter()
        .find(|l| l.location_name == location)
        .expect("candidate location exists")
        .location_id;
    for voter in names(&voters) {
        store
            .upsert_vote(trip_id, &voter, location_id)
            .await
            .expect("store vote");
    }
}

#[given("the mailer is failing")]
async fn mailer_fails(world: &mut TripWorld) {
    world.mailer().failing.store(true, Ordering::SeqCst);
}

#[given(regex = r#"^the mailer fails for emails about "([^"]+)"$"#)]
async fn mailer_fails_for(world: &mut TripWorld, needle: String) {
    world.mailer().failing_subjects.lock().unwrap().push(needle);
}

#[given(regex = r#"^the location was already set to "([^"]+)"$"#)]
async fn given_location_set(world: &mut TripWorld, location: String) {
    assert!(world
        .app()
        .store
        .set_location_if_unset(world.trip_id(), &location)
        .await
        .expect("set location"));
}

#[when("the mailer recovers")]
async fn mailer_recovers(world: &mut TripWorld) {
    world.mailer().failing.store(false, Ordering::SeqCst);
}

// ── actions ───────────────────────────────────────────────────

#[when(regex = r#"^"([^"]+)" picks "([^"]+)" to "([^"]+)" on "([^"]+)"$"#)]
async fn when_picks(world: &mut TripWorld, user: String, start: String, end: String, today: String) {
    let result = world
        .app()
        .planner
        .submit_availability(world.trip_id(), &user, day(&start), day(&end), day(&today))
        .await;
    world.last_error = result.err().map(|err| err.to_string());
}

#[when(regex = r#"^"([^"]+)" joins the trip on "([^"]+)"$"#)]
async fn when_joins_trip(world: &mut TripWorld, user: String, today: String) {
    let result = world
        .app()
        .planner
        .join(world.trip_id(), &user, None, day(&today))
        .await;
    world.last_error = result.err().map(|err| err.to_string());
}

#[when(regex = r#"^"([^"]+)" cancels on "([^"]+)"$"#)]
async fn when_cancels(world: &mut TripWorld, user: String, today: String) {
    let result = world
        .app()
        .planner
        .cancel(world.trip_id(), &user, day(&today))
        .await;
    world.last_error = result.err().map(|err| err.to_string());
}

#[when(regex = r#"^"([^"]+)" casts a vote for "([^"]+)" on "([^"]+)"$"#)]
async fn when_casts_vote(world: &mut TripWorld, user: String, location: String, today: String) {
    let trip_id = world.trip_id();
    let location_id = world
        .app()
        .store
        .locations(trip_id)
        .await
        .expect("locations")
        .into_iter()
        .find(|l| l.location_name == location)
        .map(|l| l.location_id)
        .unwrap_or(-1);
    cast_vote(world, &user, location_id, &today).await;
}

#[when(regex = r#"^"([^"]+)" casts a vote for an unknown location on "([^"]+)"$"#)]
async fn when_casts_unknown_vote(world: &mut TripWorld, user: String, today: String) {
    cast_vote(world, &user, 9_999, &today).await;
}

async fn cast_vote(world: &mut TripWorld, user: &str, location_id: i64, today: &str) {
    let result = world
        .app()
        .planner
        .cast_vote(world.trip_id(), user, location_id, day(today))
        .await;
    world.last_error = result.err().map(|err| err.to_string());
}

#[when(regex = r#"^the lifecycle scan runs for "([^"]+)"$"#)]
async fn when_scan(world: &mut TripWorld, date: String) {
    let report = world.app().lifecycle.scan_and_notify(day(&date)).await;
    world.last_report = Some(report);
}

#[when(regex = r#"^the vote is resolved on "([^"]+)"$"#)]
async fn when_resolve(world: &mut TripWorld, date: String) {
    let resolution = world
        .app()
        .lifecycle
        .resolve_vote_if_closed(world.trip_id(), day(&date))
        .await
        .expect("resolve vote");
    world.last_resolution = Some(resolution);
}

#[when(regex = r#"^"([^"]+)" joins the group with (?:its|the) code$"#)]
async fn when_join_by_code(world: &mut TripWorld, user: String) {
    let code = world.join_code.clone().expect("group has a code");
    let result = world.app().groups.join_by_code(&code, &user).await;
    world.last_error = result.err().map(|err| err.to_string());
}

#[when(regex = r#"^"([^"]+)" joins the group with code "([^"]*)"$"#)]
async fn when_join_with_code(world: &mut TripWorld, user: String, code: String) {
    let result = world.app().groups.join_by_code(&code, &user).await;
    world.last_error = result.err().map(|err| match err {
        AppError::BadRequest(_) => "bad request".to_string(),
        AppError::NotFound => "not found".to_string(),
        AppError::Conflict(_) => "conflict".to_string(),
        other => other.to_string(),
    });
}

// ── assertions ────────────────────────────────────────────────

#[then(regex = r#"^the best dates are "([^"]+)" to "([^"]+)"$"#)]
async fn then_best_dates(world: &mut TripWorld, start: String, end: String) {
    let trip = world.app().store.require_trip(world.trip_id()).await.expect("trip");
    let best = world
        .app()
        .planner
        .best_dates(world.trip_id(), &trip.created_by)
        .await
        .expect("best dates");
    assert_eq!(
        best,
        Some(DateRange {
            start: day(&start),
            end: day(&end),
        })
    );
}

#[then("there are no best dates")]
async fn then_no_best_dates(world: &mut TripWorld) {
    let trip = world.app().store.require_trip(world.trip_id()).await.expect("trip");
    let best = world
        .app()
        .planner
        .best_dates(world.trip_id(), &trip.created_by)
        .await
        .expect("best dates");
    assert_eq!(best, None);
}

#[then(regex = r"^(\d+) emails? (?:was|were) sent$")]
async fn then_emails_sent(world: &mut TripWorld, expected: usize) {
    assert_eq!(world.mailer().sent().len(), expected, "{:#?}", world.mailer().sent());
}

#[then(regex = r#"^an email with subject containing "([^"]+)" went to "([^"]*)"$"#)]
async fn then_email_to(world: &mut TripWorld, needle: String, recipients: String) {
    let sent = world.mailer().sent();
    let email = sent
        .iter()
        .find(|email| email.subject.contains(&needle))
        .unwrap_or_else(|| panic!("no email with subject containing {needle:?} in {sent:#?}"));
    let mut to = email.to.clone();
    to.sort();
    let mut expected: Vec<String> = names(&recipients).iter().map(|n| email_of(n)).collect();
    expected.sort();
    assert_eq!(to, expected);
}

#[then(regex = r"^the scan sent (\d+) and failed (\d+)$")]
async fn then_scan_counts(world: &mut TripWorld, sent: usize, failed: usize) {
    let report = world.report();
    assert!(report.ok);
    assert_eq!(report.total_sent, sent, "{report:?}");
    assert_eq!(report.failed.total(), failed, "{report:?}");
}

#[then(regex = r"^the scan matched (\d+) (deadline|start|vote) trips?$")]
async fn then_scan_matched(world: &mut TripWorld, expected: usize, kind: String) {
    assert_eq!(world.report().scanned.get(milestone(&kind)), expected);
}

#[then(regex = r"^the (deadline|start|vote) flag is (set|unset)$")]
async fn then_flag(world: &mut TripWorld, kind: String, state: String) {
    let trip = world.app().store.require_trip(world.trip_id()).await.expect("trip");
    assert_eq!(milestone(&kind).is_notified(&trip), state == "set");
}

#[then(regex = r"^the (deadline|start|vote) ledger shows (\d+) completed attempts?$")]
async fn then_ledger_completed(world: &mut TripWorld, kind: String, attempts: i64) {
    check_ledger(world, &kind, attempts, None).await;
}

#[then(regex = r#"^the (deadline|start|vote) ledger shows (\d+) failed attempts? with "([^"]+)"$"#)]
async fn then_ledger_failed(world: &mut TripWorld, kind: String, attempts: i64, error: String) {
    check_ledger(world, &kind, attempts, Some(&error)).await;
}

async fn check_ledger(world: &TripWorld, kind: &str, attempts: i64, error: Option<&str>) {
    let attempt = world
        .app()
        .store
        .notification_attempt(world.trip_id(), milestone(kind))
        .await
        .expect("ledger")
        .expect("ledger row exists");
    assert_eq!(attempt.attempts, attempts);
    match error {
        None => {
            assert!(attempt.completed_at.is_some());
            assert!(attempt.last_error.is_none());
        }
        Some(error) => {
            assert!(attempt.completed_at.is_none());
            assert!(attempt
                .last_error
                .as_deref()
                .is_some_and(|last| last.contains(error)));
        }
    }
}

#[then(regex = r#"^the (deadline|start|vote) flag of "([^"]+)" is (set|unset)$"#)]
async fn then_flag_of(world: &mut TripWorld, kind: String, name: String, state: String) {
    let trip = world
        .app()
        .store
        .require_trip(world.trip_named(&name))
        .await
        .expect("trip");
    assert_eq!(milestone(&kind).is_notified(&trip), state == "set");
}

#[then(regex = r"^the scan notified (\d+) and failed (\d+) (deadline|start|vote) trips?$")]
async fn then_scan_outcome(world: &mut TripWorld, notified: usize, failed: usize, kind: String) {
    let report = world.report();
    let milestone = milestone(&kind);
    assert_eq!(report.notified.get(milestone), notified, "{report:?}");
    assert_eq!(report.failed.get(milestone), failed, "{report:?}");
}

#[then(regex = r#"^"([^"]+)" has (\d+) votes?$"#)]
async fn then_tally(world: &mut TripWorld, location: String, votes: i64) {
    let tally = world
        .app()
        .store
        .vote_tally(world.trip_id())
        .await
        .expect("tally");
    let entry = tally
        .iter()
        .find(|entry| entry.location_name == location)
        .unwrap_or_else(|| panic!("{location:?} missing from {tally:?}"));
    assert_eq!(entry.votes, votes);
}

#[then(regex = r#"^the trip location is "([^"]+)"$"#)]
async fn then_location(world: &mut TripWorld, expected: String) {
    let trip = world.app().store.require_trip(world.trip_id()).await.expect("trip");
    assert_eq!(trip.location.as_deref(), Some(expected.as_str()));
}

#[then(regex = r#"^the vote was already resolved to "([^"]+)"$"#)]
async fn then_already_resolved(world: &mut TripWorld, expected: String) {
    assert_eq!(
        world.last_resolution,
        Some(VoteResolution::AlreadyResolved { location: expected })
    );
}

#[then(regex = r#"^the request fails with "([^"]+)"$"#)]
async fn then_fails(world: &mut TripWorld, needle: String) {
    let error = world.last_error.as_deref().expect("an error was expected");
    assert!(error.contains(&needle), "{error:?} does not contain {needle:?}");
}

#[then("the request succeeds")]
async fn then_succeeds(world: &mut TripWorld) {
    assert_eq!(world.last_error, None);
}

#[then(regex = r#"^"([^"]+)" is a member of the group$"#)]
async fn then_group_member(world: &mut TripWorld, user: String) {
    assert!(world
        .app()
        .store
        .is_group_member(world.group_id(), &user)
        .await
        .expect("membership"));
}

#[tokio::main]
async fn main() {
    TripWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
