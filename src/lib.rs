//! Design Assist: client core for a staged architectural design service.

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod repl;
pub mod session;
pub mod workflow;
