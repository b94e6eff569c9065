//! Provider availability and job dispatch engine for the U-Engine ecosystem.
//!
//! Keeps a pool of service providers reachable (or not) according to manual
//! toggles, weekly schedules and heartbeat silence, and drives each immediate
//! job request through offer, fallback reassignment and expiry, penalizing
//! providers who let offers lapse.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `Provider`, `WeeklySchedule`, `JobRequest`,
//!   `Offer`, `CandidateCriteria`, `Notification`, `LiveEvent`
//! - **`store`**: Provider/job store contracts with compare-and-swap writes,
//!   plus in-memory implementations
//! - **`notify`**: Fire-and-forget notification, push and broadcast sinks
//! - **`availability`**: Availability state machine (manual toggle, schedule
//!   boundary, inactivity timeout, heartbeat)
//! - **`dispatching`**: Candidate selection: eligibility, ranking rules,
//!   nearest-within-radius geo capability, busy check
//! - **`orchestrator`**: Offer lifecycle of a job request
//! - **`penalty`**: Late marks, strikes and suspensions
//! - **`tickers`**: Periodic schedule, inactivity and dispatch scans
//! - **`config`**: `DispatchConfig` loaded from TOML and `DISPATCH_*` variables
//! - **`engine`**: `DispatchEngine`, wiring all of the above
//!
//! # Architecture
//!
//! Every state change that a ticker and a user action could race on is a
//! conditional write against the store. A lost race is a value
//! ([`store::CasResult::Mismatch`]), never a panic or a retry loop; the
//! next ticker cycle re-reads fresh state. Notification delivery never
//! feeds back into dispatch state.
//!
//! The crate installs no tracing subscriber and spawns no tasks on its own;
//! [`engine::DispatchEngine::spawn`] starts the tickers on the caller's
//! tokio runtime.

pub mod availability;
pub mod config;
pub mod dispatching;
pub mod engine;
pub mod error;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod penalty;
pub mod store;
pub mod tickers;

pub use config::DispatchConfig;
pub use engine::DispatchEngine;
pub use error::{DispatchError, Result};
