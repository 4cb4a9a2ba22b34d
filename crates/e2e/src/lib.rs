//! Vigil conformance suite
//!
//! Runs every harness primitive against a simulated cloud whose effects
//! become visible only after a configurable delay. Nothing here talks to a
//! real provider; the point is that the harness converges on, rather than
//! assumes, remote state.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                  Conformance Tests (tests/)                │
//! ├────────────────────────────────────────────────────────────┤
//! │  vigil-harness                                             │
//! │    ├── wait_for_message()    bounded long-poll chunks      │
//! │    ├── wait_for_status()     in-flight-aware retries       │
//! │    ├── wait_for_log_events() retry-everything polling      │
//! │    ├── acquire_task()        task-token protocol           │
//! │    ├── evaluate()            path assertions               │
//! │    └── check_entity()        pattern-aware snapshots       │
//! ├────────────────────────────────────────────────────────────┤
//! │  SimCloud                                                  │
//! │    ├── queues / workflows / logs / objects                 │
//! │    └── every effect delayed by `visibility_delay`          │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod sim;

pub use sim::{QueueInfo, SimCloud, SimConfig, SimQueue};

/// Install the test subscriber. Safe to call from every test; only the
/// first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
