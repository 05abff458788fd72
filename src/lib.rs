pub mod app;
pub mod availability;
pub mod booking;
pub mod config;
pub mod flow;
pub mod forms;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod store;
pub mod wal;
