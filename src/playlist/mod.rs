//! The local playlist and its cross-peer replication (spec §4.6, §4.7).

pub mod coordinator;
pub mod core;
