//! Inference service for the Tamil Nadu irrigation models.
//!
//! Model artifacts are loaded once at startup ([`state::AppState::load`]) and
//! shared read-only by every actix worker. Requests are validated against the
//! hardcoded feature contracts in [`artifact`] before any inference happens.

pub mod artifact;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod routes;
pub mod state;
