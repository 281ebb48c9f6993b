//! fixbuild library crate
//!
//! Receives failing-build webhooks, reproduces the branch in a scratch
//! workspace, lets a fixing agent repair it and pushes the result back to the
//! same branch.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod redact;
pub mod request;
pub mod runner;
pub mod server;
pub mod sync;
pub mod util;
pub mod workspace;
