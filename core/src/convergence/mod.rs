//! Convergence engine: diffs the registry against the runtime and drives
//! the resulting tasks.
//!
//! The `planner` module derives the task set for a cycle, `executor` applies
//! single tasks, `cycle` sequences whole cycles and the next-cycle queue, and
//! `retry` paces and counts retries of recoverable failures.

pub mod cycle;
pub mod executor;
pub mod planner;
pub mod retry;

pub use cycle::{CyclePhase, CycleReport, CycleRunner, CycleStatus, ExecutedTask};
pub use executor::{TaskExecutor, TaskOutcome};
