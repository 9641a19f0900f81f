//! The cycle runner.
//!
//! One cycle walks `Collecting -> Sorting -> Executing -> Persist` and
//! returns to `Idle`. Tasks run one at a time in sort order. Anything a
//! task schedules, including its own retry, goes into the next-cycle queue
//! and is only seen by the following cycle's collecting phase.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::convergence::executor::{TaskExecutor, TaskOutcome};
use crate::convergence::planner;
use crate::data::InstallerSettings;
use crate::infrastructure::{FailureKind, ModuleRuntime};
use crate::registry::ResourceRegistry;
use crate::resource::StagingArea;
use crate::types::task::{Task, TaskKey, TaskSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Collecting,
    Sorting,
    Executing,
    Persist,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Nothing to do.
    Idle,
    /// Every task completed.
    Success,
    /// At least one task failed.
    PartialFailure,
    /// The runtime could not report its state; nothing ran.
    Skipped,
    /// A stop was requested before the cycle began.
    Stopped,
}

/// One executed task and what came of it.
#[derive(Debug, Clone)]
pub struct ExecutedTask {
    pub task: Task,
    pub outcome: TaskOutcome,
    pub cycle: u64,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    /// Tasks in the order they ran.
    pub executed: Vec<ExecutedTask>,
    /// Recoverable failures carried into the next cycle.
    pub requeued: Vec<Task>,
    /// Follow-ups scheduled for the next cycle.
    pub followups: Vec<Task>,
    /// Fatal failures and carried tasks that no longer apply.
    pub dropped: Vec<Task>,
    /// Retracted, never-installed resources removed from the registry.
    pub retired: usize,
    /// Entries removed by compaction.
    pub compacted: usize,
    /// Whether the registry file was written.
    pub persisted: bool,
    pub status: CycleStatus,
}

impl CycleReport {
    fn new(cycle: u64) -> Self {
        CycleReport {
            cycle,
            executed: Vec::new(),
            requeued: Vec::new(),
            followups: Vec::new(),
            dropped: Vec::new(),
            retired: 0,
            compacted: 0,
            persisted: false,
            status: CycleStatus::Idle,
        }
    }

    /// Descriptions of the executed tasks, in order.
    pub fn descriptions(&self) -> Vec<String> {
        self.executed.iter().map(|e| e.task.description()).collect()
    }

    /// Whether work was queued for the next cycle.
    pub fn has_pending(&self) -> bool {
        !self.followups.is_empty() || !self.requeued.is_empty()
    }

    /// True when the only queued work is retries; the caller should back
    /// off before running again.
    pub fn only_retries(&self) -> bool {
        self.followups.is_empty() && !self.requeued.is_empty()
    }
}

/// Drives cycles against one runtime.
pub struct CycleRunner<R: ModuleRuntime> {
    registry: Arc<ResourceRegistry>,
    staging: Arc<StagingArea>,
    runtime: R,
    executor: TaskExecutor,
    default_start_level: u32,
    next_cycle: TaskSet,
    /// Fatally failed removals, which the ignore mark does not cover;
    /// skipped while the planner keeps deriving them.
    blocked: HashSet<TaskKey>,
    cycle: u64,
    phase: CyclePhase,
    stop: Arc<AtomicBool>,
}

impl<R: ModuleRuntime> CycleRunner<R> {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        staging: Arc<StagingArea>,
        runtime: R,
        settings: &InstallerSettings,
    ) -> Self {
        CycleRunner {
            registry,
            staging,
            runtime,
            executor: TaskExecutor::new(settings.refresh_after_update),
            default_start_level: settings.default_start_level,
            next_cycle: TaskSet::new(),
            blocked: HashSet::new(),
            cycle: 0,
            phase: CyclePhase::Idle,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Tasks queued for the next cycle.
    pub fn pending(&self) -> &TaskSet {
        &self.next_cycle
    }

    /// Number of cycles started so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Flag that makes `run_cycle` return `Stopped` without starting.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(cycle = self.cycle, phase = ?phase, "cycle phase");
        self.phase = phase;
    }

    /// Run one full cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        if self.stop.load(Ordering::SeqCst) {
            let mut report = CycleReport::new(self.cycle);
            report.status = CycleStatus::Stopped;
            return report;
        }

        self.cycle += 1;
        let cycle = self.cycle;
        let mut report = CycleReport::new(cycle);

        // --- Collecting ---
        self.enter(CyclePhase::Collecting);
        let installed = match self.runtime.query_installed() {
            Ok(items) => items,
            Err(e) => {
                warn!(cycle, error = %e, "runtime query failed, skipping cycle");
                report.status = CycleStatus::Skipped;
                self.enter(CyclePhase::Idle);
                return report;
            }
        };
        self.registry.sync_installed(
            installed
                .iter()
                .map(|i| (i.entity_id.as_str(), i.digest.as_str())),
        );
        let snapshot = self.registry.snapshot();
        let requeued = self.next_cycle.take();
        let plan = planner::collect(&snapshot, &installed, requeued, self.default_start_level);

        for (entity, digest) in &plan.retire {
            if self.registry.drop_resource(entity, digest) {
                report.retired += 1;
            }
        }
        for task in plan.stale {
            debug!(cycle, task = %task, "dropping carried task that no longer applies");
            report.dropped.push(task);
        }
        self.blocked.retain(|k| plan.tasks.contains(k));

        // --- Sorting ---
        self.enter(CyclePhase::Sorting);
        let tasks = plan.tasks.into_sorted();

        // --- Executing ---
        self.enter(CyclePhase::Executing);
        let mut failed = false;
        for task in tasks {
            if self.blocked.contains(&task.key()) {
                continue;
            }
            let outcome = self.executor.execute(
                &task,
                cycle,
                &mut self.runtime,
                &self.registry,
                &self.staging,
            );
            match &outcome {
                TaskOutcome::Completed => {}
                TaskOutcome::CompletedWithFollowup(followup) => {
                    debug!(cycle, task = %task, followup = %followup, "follow-up queued");
                    self.next_cycle.insert_if_absent(followup.clone());
                    report.followups.push(followup.clone());
                }
                TaskOutcome::Failed(e) if e.kind == FailureKind::Recoverable => {
                    failed = true;
                    self.next_cycle.insert(task.clone());
                    report.requeued.push(task.clone());
                }
                TaskOutcome::Failed(e) => {
                    failed = true;
                    error!(cycle, task = %task, error = %e.message, "task failed fatally, dropping");
                    // Removals are never skipped by the ignore mark, so a
                    // fatal removal is blocked instead.
                    match &task.resource {
                        Some(r) if r.installable() => {
                            self.registry.mark_ignored(r.entity_id(), r.digest())
                        }
                        _ => {
                            self.blocked.insert(task.key());
                        }
                    }
                    report.dropped.push(task.clone());
                }
            }
            report.executed.push(ExecutedTask {
                task,
                outcome,
                cycle,
            });
        }
        let queued = &self.next_cycle;
        self.executor.ledger_mut().retain(|k| queued.contains(k));

        report.status = if failed {
            CycleStatus::PartialFailure
        } else if report.executed.is_empty() {
            CycleStatus::Idle
        } else {
            CycleStatus::Success
        };

        // --- Persist ---
        self.enter(CyclePhase::Persist);
        report.compacted = self.registry.compact();
        match self.registry.save() {
            Ok(written) => {
                report.persisted = written;
                if let Err(e) = self.staging.gc(&self.registry.live_digests()) {
                    warn!(cycle, error = %e, "staging cleanup failed");
                }
            }
            Err(e) => {
                error!(cycle, error = %e, "failed to persist registry, keeping in-memory state");
            }
        }
        self.enter(CyclePhase::Idle);

        if report.status != CycleStatus::Idle {
            info!(
                cycle,
                status = ?report.status,
                executed = report.executed.len(),
                requeued = report.requeued.len(),
                followups = report.followups.len(),
                dropped = report.dropped.len(),
                "cycle finished"
            );
        }
        report
    }

    /// Run cycles until one has nothing queued for the next, at most
    /// `max_cycles` times. Returns every report.
    pub fn run_until_settled(&mut self, max_cycles: usize) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        for _ in 0..max_cycles {
            let report = self.run_cycle();
            let done = !report.has_pending()
                || matches!(report.status, CycleStatus::Skipped | CycleStatus::Stopped);
            reports.push(report);
            if done {
                break;
            }
        }
        reports
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
