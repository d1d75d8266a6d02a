//! Push-to-deploy engine
//!
//! Verifies and normalises repository webhooks, records deployments in a
//! ledger and drives each one through clone, build, package, publish and run.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhook;
pub mod workers;
