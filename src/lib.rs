//! SNIPER: signal-driven token acquisition agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod gateway;
pub mod signals;
pub mod notify;
pub mod engine;
pub mod storage;
pub mod dashboard;
