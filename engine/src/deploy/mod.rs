//! Deployment module

pub mod docker;
pub mod fsm;
pub mod git;
pub mod pipeline;
pub mod process;
