pub mod pending_report;
pub mod sweeper;
