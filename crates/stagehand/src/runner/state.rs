//! Run state machine and per-manifest journal.
//!
//! A run moves through these states:
//! - `Idle` -> `PlanHooks(BeforeRun)`
//! - `RunningStage(i)` -> `StageHooks { stage: i, .. }` -> `RunningStage(i + 1)`
//! - after the last stage: `PlanHooks(AfterRun)` -> `PlanHooks(OnSuccess)` -> `Done`
//! - any stage boundary -> `Failed`

use crate::plan::{HookEvent, Plan};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    PlanHooks(HookEvent),
    RunningStage(usize),
    StageHooks {
        stage: usize,
        event: HookEvent,
    },
    Done,
    /// The run stopped. `stage` is the stage that failed, if any.
    Failed {
        stage: Option<usize>,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateHistory {
    current: RunState,
    visited: Vec<RunState>,
}

impl StateHistory {
    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn visited(&self) -> &[RunState] {
        &self.visited
    }

    pub(crate) fn transition(&mut self, next: RunState) {
        self.current = next;
        self.visited.push(next);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub manifest_id: String,
    pub stage_index: usize,
    pub stage_name: String,
    pub status: ManifestStatus,
    pub error: Option<String>,
    pub started_at_ms: Option<u64>,
    pub duration: Option<Duration>,
}

/// Outcome of every manifest a plan schedules, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJournal {
    pub records: Vec<ManifestRecord>,
}

impl RunJournal {
    /// Creates a journal with every scheduled manifest `Pending`.
    pub fn from_plan(plan: &Plan) -> Self {
        let records = plan
            .stages
            .iter()
            .enumerate()
            .flat_map(|(stage_index, stage)| {
                stage.manifests.iter().map(move |id| ManifestRecord {
                    manifest_id: id.clone(),
                    stage_index,
                    stage_name: stage.name.clone(),
                    status: ManifestStatus::Pending,
                    error: None,
                    started_at_ms: None,
                    duration: None,
                })
            })
            .collect();
        Self { records }
    }

    pub fn record(&self, id: &str) -> Option<&ManifestRecord> {
        self.records.iter().find(|r| r.manifest_id == id)
    }

    fn record_mut(&mut self, id: &str) -> Option<&mut ManifestRecord> {
        self.records.iter_mut().find(|r| r.manifest_id == id)
    }

    pub fn status(&self, id: &str) -> Option<ManifestStatus> {
        self.record(id).map(|r| r.status)
    }

    pub(crate) fn mark_running(&mut self, id: &str) {
        if let Some(record) = self.record_mut(id) {
            record.status = ManifestStatus::Running;
            record.started_at_ms = Some(current_timestamp_ms());
        }
    }

    pub(crate) fn mark_finished(&mut self, id: &str, duration: Duration, error: Option<String>) {
        if let Some(record) = self.record_mut(id) {
            record.status = if error.is_some() {
                ManifestStatus::Failed
            } else {
                ManifestStatus::Completed
            };
            record.error = error;
            record.duration = Some(duration);
        }
    }

    /// Marks everything still `Pending` as `Skipped`.
    pub(crate) fn skip_pending(&mut self) {
        for record in &mut self.records {
            if record.status == ManifestStatus::Pending {
                record.status = ManifestStatus::Skipped;
            }
        }
    }

    pub fn with_status(&self, status: ManifestStatus) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.manifest_id.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status == ManifestStatus::Failed)
    }
}

/// Milliseconds since the UNIX epoch, or 0 if the clock is before it.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
