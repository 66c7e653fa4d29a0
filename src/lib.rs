//! Wakegate - A reverse proxy that provisions per-user backends on demand
//!
//! This library provides an HTTP gateway that:
//! - Routes each authenticated user to their own backend workload
//! - Creates the workload in a cluster orchestrator the first time a user arrives
//! - Deduplicates concurrent cold-start triggers with a per-user debounce window
//! - Polls the orchestrator until the workload is reachable
//! - Pushes "starting"/"ready"/"failed" events to the waiting browser session
//! - Serves a static holding page while the backend is cold-starting

pub mod config;
pub mod debounce;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod provision;
pub mod readiness;
pub mod routing;
