//! Runtime mutation engine for cyclic workflows: live task pool and
//! lifecycle state machine, broadcast overrides, flow tracking and safe
//! definition reload.

pub mod config;
pub mod dsl;
pub mod error;
pub mod runtime;
