pub mod app;
pub mod config;
pub mod convert;
pub mod error;
pub mod launcher;
pub mod picture;
pub mod schedule;
pub mod status;
pub mod status_watch;
pub mod sync;
pub mod viewer;
pub mod viewport;
pub mod watch;
