//! `MySQL` backend.
//!
//! The database is created on first contact (`CREATE DATABASE IF NOT
//! EXISTS`) and recorded by a marker file in the data directory, so later
//! processes skip the admin round trip.

mod pool;
mod store;

pub use pool::{ExecResult, NetworkedPool, PoolSettings, SqlRow};
pub use store::NetworkedStore;
