//! HTTP server for container webhooks and the control API

pub mod handlers;
pub mod serve;
pub mod state;
