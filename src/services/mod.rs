pub mod availability;
pub mod groups;
pub mod lifecycle;
pub mod mailer;
pub mod notifier;
pub mod planner;
pub mod store;
