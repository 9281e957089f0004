//! previewd library
//!
//! Core modules of the preview container orchestrator.

pub mod app;
pub mod backend;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
