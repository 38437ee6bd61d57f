//! # DutyRelay Gateway
//!
//! Axum HTTP surface: inbound notify webhooks (`/make_call`, `/send_sms`),
//! directory sync and health/stats.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
