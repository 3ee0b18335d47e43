pub mod group;
pub mod member;
pub mod profile;
pub mod trip;
pub mod vote;
