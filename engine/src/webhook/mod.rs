//! Webhook ingestion: authenticity, normalisation, matching and dispatch

pub mod ingest;
pub mod normalize;
pub mod signature;
