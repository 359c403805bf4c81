//! Floodgate - In-Process Admission Control
//!
//! This crate implements per-identifier rate limiting for use inside a single
//! process. Before performing a throttled action, a caller asks whether the
//! action may proceed for a given identifier (user id, IP address, API key —
//! identifiers are opaque strings). Two algorithms are provided: a token
//! bucket with burst allowance and a sliding window over actual request
//! timestamps. There is no distributed coordination and no persistence; all
//! tracked state lives in memory and is lost on restart.

pub mod config;
pub mod error;
pub mod ratelimit;
