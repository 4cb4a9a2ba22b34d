//! Vigil Harness
//!
//! Verification primitives for asynchronously provisioned, eventually
//! consistent resources: decide "did the system under test do the right
//! thing?" when the answer is not yet visible and must be judged by
//! pattern rather than exact equality.
//!
//! ```text
//!   scenario ──> invoke::ResourceInvoker ──> system under test
//!      │                                          │
//!      │         retry::poll_until                │ (effects become
//!      ├──────── queue::wait_for_message <────────┤  visible later)
//!      │         workflow::wait_for_status        │
//!      │         logs::wait_for_log_events        │
//!      │         activity::ActivityTask           │
//!      │                                          │
//!      └──> assert::evaluate / snapshot::compare <┘
//!                 (aggregated verdicts)
//! ```
//!
//! Remote boundaries are traits; the e2e crate provides an in-memory
//! implementation for conformance tests.

pub mod activity;
pub mod assert;
pub mod config;
pub mod error;
pub mod invoke;
pub mod logs;
pub mod queue;
pub mod retry;
pub mod snapshot;
pub mod stack;
pub mod workflow;

// Re-export commonly used types
pub use activity::{acquire_task, ActivityService, ActivityTask, TaskHandoff};
pub use assert::{evaluate, Assertion, AssertionFailure, EvaluationReport};
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use invoke::{ActionOutcome, InvocationKind, ResourceInvoker};
pub use logs::{wait_for_log_events, LogObserver};
pub use queue::{wait_for_message, MessageSource, QueueMessage, MAX_RECEIVE_WAIT};
pub use retry::{poll_until, RetryPolicy, Retryable};
pub use snapshot::{
    check_entity, compare, parse_fixture, Check, Diff, Expected, Mismatch, Variables,
    TEMPLATED_SUFFIX,
};
pub use stack::{require_output, StackLifecycle};
pub use workflow::{wait_for_status, ExecutionSnapshot, ExecutionStatus, WorkflowObserver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
