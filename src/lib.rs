/// Toolshub Gateway
///
/// An API gateway for the Toolshub service: accounts are registered and
/// verified by one-time code, issued a single API key, and metered against
/// a per-account quota with a durable date-bucketed usage ledger.

pub mod account;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod executor;
pub mod mailer;
pub mod metrics;
pub mod quota;
pub mod server;
pub mod usage;
