//! Record stores consumed by the pipeline

pub mod deployments;
pub mod projects;
