pub mod api;
pub mod config;
pub mod database;
pub mod messages;
pub mod router;
pub mod supervisor;
pub mod telemetry;

/// Identity reported in telemetry resource attributes.
pub const SERVICE_NAME: &str = "mailroom";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
