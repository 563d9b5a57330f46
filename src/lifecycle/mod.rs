//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Registry built → spawn config reload task → spawn orphan sweeper
//!
//! Background (sweep.rs):
//!     Ticker → registry sweep_orphans → gauges updated
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → background tasks exit → join
//! ```
//!
//! # Design Decisions
//! - Background work never sits on the dispatch path
//! - Every long-running task selects on the shutdown broadcast
//! - The config watcher lives as long as the returned task handle set

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod sweep;

pub use shutdown::Shutdown;
pub use startup::{spawn_background, BackgroundTasks};
pub use sweep::OrphanSweeper;
