use serde::Serialize;
use std::fmt;

use crate::provision::Outcome;

/// The three provisioning stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Credential,
    Collections,
    Indexes,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Credential, Stage::Collections, Stage::Indexes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Credential => "credential",
            Stage::Collections => "collections",
            Stage::Indexes => "indexes",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub target: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub steps: Vec<StepReport>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        StageReport {
            stage,
            status: StageStatus::Completed,
            steps: Vec::new(),
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        StageReport {
            stage,
            status: StageStatus::Skipped,
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, target: impl Into<String>, outcome: Outcome) {
        if matches!(outcome, Outcome::Failed { .. }) {
            self.status = StageStatus::Failed;
        }
        self.steps.push(StepReport {
            target: target.into(),
            outcome,
        });
    }
}

/// Per-step outcome of one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub database: String,
    pub stages: Vec<StageReport>,
}

impl BootstrapReport {
    pub fn new(database: &str) -> Self {
        BootstrapReport {
            database: database.to_string(),
            stages: Vec::new(),
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepReport> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.steps().filter(|step| predicate(&step.outcome)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| *o == Outcome::Created)
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| *o == Outcome::AlreadyExists)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status == StageStatus::Completed)
    }
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bootstrap report for database '{}'", self.database)?;
        for stage in &self.stages {
            let status = match stage.status {
                StageStatus::Completed => "completed",
                StageStatus::Failed => "FAILED",
                StageStatus::Skipped => "skipped",
            };
            writeln!(f, "  {}: {}", stage.stage, status)?;
            for step in &stage.steps {
                writeln!(f, "    {}: {}", step.target, step.outcome)?;
            }
        }
        write!(
            f,
            "{} created, {} already present, {} failed",
            self.created(),
            self.already_present(),
            self.failed()
        )
    }
}
