//! Vigil collector: terminal liveness aggregation.
//!
//! Terminals report through `POST /update`; the registry keeps their last
//! telemetry, the sweeper turns silent ones stale, and every change is
//! pushed to observers as a snapshot merged with the expected roster.

pub mod activity_log;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod http;
pub mod hub;
pub mod merger;
pub mod models;
pub mod registry;
pub mod roster;
pub mod service;
pub mod state;
pub mod sweeper;
pub mod view;
pub mod ws;

pub use error::CollectorError;
pub use service::MonitorService;
