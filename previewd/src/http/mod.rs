//! Outbound HTTP clients

pub mod client;
pub mod notify;
pub mod routing;
pub mod scheduler;
