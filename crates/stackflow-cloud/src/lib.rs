//! Stackflow remote backend
//!
//! This crate defines the narrow interface through which Stackflow talks to
//! the system that actually provisions stacks, plus a file-backed
//! implementation for local development.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 stackflow-core                   │
//! │        (graph, plan, executor, launch)           │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Backend Abstraction              │   │
//! │  │  trait StackBackend { ... }               │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Poll/Backoff │  │  State Mgmt  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │ local backend │
//! │ (state.json)  │
//! └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod local;
pub mod provider;
pub mod state;
pub mod status;
pub mod waiter;

// Re-exports
pub use action::{ActionType, ApplyOutcome, UpdateOutcome};
pub use error::{BackendError, Result};
pub use local::LocalBackend;
pub use provider::{Deployment, PollConfig, StackBackend, TemplateSummary};
pub use state::{Ledger, LockGuard, StackRecord, StateStore};
pub use status::RemoteStatus;
pub use waiter::{PollState, wait_for_settled};
