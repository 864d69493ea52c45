//! Run bookkeeping: identifiers, timestamps and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::errors::BbResult;
use crate::spec::{EvaluationResult, OptimizerSpec};

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

/// Summary of one optimizer process, written as JSON when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub algorithm: String,
    pub num_design_vars: usize,
    pub max_evaluations: usize,
    pub state: RunState,
    pub result: Option<EvaluationResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn start(spec: &OptimizerSpec) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            algorithm: spec.algorithm_name.clone(),
            num_design_vars: spec.num_design_vars,
            max_evaluations: spec.max_evaluations,
            state: RunState::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mark_completed(&mut self, result: EvaluationResult) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Wall-clock duration, once finished.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, replacing any existing file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> BbResult<()> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
