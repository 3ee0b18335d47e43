use std::sync::Arc;

use crate::{
    config::{AppConfig, MailBackend},
    db::DbPool,
    services::{
        groups::GroupService,
        lifecycle::LifecycleEngine,
        mailer::{LogMailer, Mailer, OutboxMailer},
        notifier::Notifier,
        planner::TripPlanner,
        store::TripStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: TripStore,
    pub notifier: Notifier,
    pub lifecycle: LifecycleEngine,
    pub planner: TripPlanner,
    pub groups: GroupService,
}

impl AppState {
    /// Wires the services around the mailer picked by the configuration.
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let mailer: Arc<dyn Mailer> = match config.mail_backend {
            MailBackend::Log => Arc::new(LogMailer::new(config.mail_from.clone())),
            MailBackend::Outbox => Arc::new(OutboxMailer::new(db.clone(), config.mail_from.clone())),
        };
        Self::with_mailer(config, db, mailer)
    }

    pub fn with_mailer(config: AppConfig, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let store = TripStore::new(db);
        let notifier = Notifier::new(store.clone(), mailer);
        let lifecycle = LifecycleEngine::new(store.clone(), notifier.clone(), config.scan_catch_up);
        let planner = TripPlanner::new(store.clone(), notifier.clone(), lifecycle.clone());
        let groups = GroupService::new(store.clone(), notifier.clone());
        Self {
            config,
            store,
            notifier,
            lifecycle,
            planner,
            groups,
        }
    }
}
