//! fleetprobe library
//!
//! Core modules for the fleetprobe collection agent.

pub mod app;
pub mod collector;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod registry;
pub mod server;
pub mod sink;
pub mod storage;
pub mod transport;
pub mod utils;
