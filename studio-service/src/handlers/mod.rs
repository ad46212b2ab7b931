//! HTTP handlers for the studio service.

pub mod auth;
pub mod chat;
pub mod edit;
pub mod health;
pub mod metrics;
