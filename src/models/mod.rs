pub mod event;
pub mod tombstone;
pub mod user;
