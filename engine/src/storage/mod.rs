//! On-disk layout and configuration

pub mod layout;
pub mod settings;
