//! The bootstrap procedure.
//!
//! Stages run strictly in order: credential, collections, indexes. Anything
//! that is already provisioned counts as success. The first failure stops the
//! run; later stages are reported as skipped and nothing is rolled back, so
//! running again picks up where the failed run stopped.
//!
//! [`run_after_ping`] checks the server is reachable before the first stage.
use tracing::{error, info, instrument};

use crate::plan::BootstrapPlan;
use crate::provision::{FailureKind, Outcome, ProvisionError, Provisioned, Provisioner};
use crate::report::{BootstrapReport, Stage, StageReport};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("{stage} stage failed on '{target}'")]
    StageFailed {
        stage: Stage,
        target: String,
        #[source]
        source: ProvisionError,
        report: Box<BootstrapReport>,
    },
    #[error("database '{database}' is unreachable")]
    Unreachable {
        database: String,
        #[source]
        source: ProvisionError,
        report: Box<BootstrapReport>,
    },
}

impl BootstrapError {
    /// Outcomes of everything attempted before (and including) the failure.
    pub fn report(&self) -> &BootstrapReport {
        match self {
            BootstrapError::StageFailed { report, .. }
            | BootstrapError::Unreachable { report, .. } => report,
        }
    }

    /// The stage that failed, `None` if no stage was attempted.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BootstrapError::StageFailed { stage, .. } => Some(*stage),
            BootstrapError::Unreachable { .. } => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            BootstrapError::StageFailed { source, .. }
            | BootstrapError::Unreachable { source, .. } => source.kind,
        }
    }
}

fn record(
    stage: &mut StageReport,
    target: &str,
    result: Result<Provisioned, ProvisionError>,
) -> Result<(), ProvisionError> {
    let outcome = Outcome::from(&result);
    match &outcome {
        Outcome::Created => info!(stage = %stage.stage, step = target, "created"),
        Outcome::AlreadyExists => info!(stage = %stage.stage, step = target, "already exists"),
        Outcome::Failed { kind, detail } => {
            error!(stage = %stage.stage, step = target, %kind, %detail, "provisioning failed")
        }
    }
    stage.push(target, outcome);
    result.map(|_| ())
}

fn abort(
    mut report: BootstrapReport,
    failed: StageReport,
    target: &str,
    source: ProvisionError,
) -> BootstrapError {
    let stage = failed.stage;
    report.stages.push(failed);
    for later in Stage::ALL.iter().skip_while(|s| **s != stage).skip(1) {
        report.stages.push(StageReport::skipped(*later));
    }
    BootstrapError::StageFailed {
        stage,
        target: target.to_string(),
        source,
        report: Box::new(report),
    }
}

/// Apply `plan` through `provisioner`, once, in stage order.
#[instrument(skip_all, fields(database = provisioner.database_name()))]
pub async fn run<P>(plan: &BootstrapPlan, provisioner: &P) -> Result<BootstrapReport, BootstrapError>
where
    P: Provisioner + ?Sized,
{
    let mut report = BootstrapReport::new(provisioner.database_name());

    let credential = plan.credential();
    let mut stage = StageReport::new(Stage::Credential);
    let result = provisioner.create_user(credential).await;
    if let Err(e) = record(&mut stage, &credential.username, result) {
        return Err(abort(report, stage, &credential.username, e));
    }
    report.stages.push(stage);

    let mut stage = StageReport::new(Stage::Collections);
    for collection in plan.collections() {
        let result = provisioner.create_collection(collection).await;
        if let Err(e) = record(&mut stage, &collection.name, result) {
            return Err(abort(report, stage, &collection.name, e));
        }
    }
    report.stages.push(stage);

    let mut stage = StageReport::new(Stage::Indexes);
    for index in plan.indexes() {
        let target = index.to_string();
        let result = provisioner.create_index(index).await;
        if let Err(e) = record(&mut stage, &target, result) {
            return Err(abort(report, stage, &target, e));
        }
    }
    report.stages.push(stage);

    info!(
        created = report.created(),
        already_present = report.already_present(),
        "bootstrap completed successfully"
    );
    Ok(report)
}

/// Ping the server, then [`run`]. An unreachable server fails before any
/// provisioning call, with every stage reported as skipped.
pub async fn run_after_ping<P>(
    plan: &BootstrapPlan,
    provisioner: &P,
) -> Result<BootstrapReport, BootstrapError>
where
    P: Provisioner + ?Sized,
{
    if let Err(source) = provisioner.ping().await {
        let mut report = BootstrapReport::new(provisioner.database_name());
        report.stages = Stage::ALL.iter().map(|s| StageReport::skipped(*s)).collect();
        return Err(BootstrapError::Unreachable {
            database: provisioner.database_name().to_string(),
            source,
            report: Box::new(report),
        });
    }
    run(plan, provisioner).await
}
