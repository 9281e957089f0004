//! Persistent storage

pub mod layout;
pub mod projects;
pub mod settings;
