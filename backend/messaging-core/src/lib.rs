//! Messaging core for candidate/recruiter conversations.
//!
//! Owns the message log, the per-user inbox projection derived from it,
//! read state, paginated threads and templated system notifications. The
//! HTTP surface in [`routes`] is a thin actix-web layer over the services
//! bundled in [`state::AppState`].

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
