use placementdb_init::bootstrap::{run, run_after_ping, BootstrapError};
use placementdb_init::plan::{
    BootstrapPlan, BsonType, CollectionSpec, CredentialSpec, IndexSpec, JsonSchema, PropertySchema,
    Role,
};
use placementdb_init::provision::{FailureKind, Outcome};
use placementdb_init::report::{BootstrapReport, Stage, StageStatus};
use placementdb_init::utils::testing::{FailurePoint, MemoryCatalog};
use placementdb_init::verify::verify_catalog;

fn small_plan() -> BootstrapPlan {
    let schema = JsonSchema {
        required: vec!["_id".to_string(), "_metadata".to_string()],
        properties: vec![
            PropertySchema::new("_id", BsonType::String, None),
            PropertySchema::new("_metadata", BsonType::Object, None),
        ],
    };
    BootstrapPlan::new(
        CredentialSpec::new("appuser", "apppassword", Role::ReadWrite, "placementdb"),
        vec![
            CollectionSpec::new("placements").with_validator(schema),
            CollectionSpec::new("users"),
            CollectionSpec::new("documents"),
        ],
        vec![
            IndexSpec::ascending("placements", &["status"]),
            IndexSpec::ascending("users", &["first_name", "last_name"]),
            IndexSpec::ascending("documents", &["name"]),
        ],
    )
    .unwrap()
}

fn outcomes(report: &BootstrapReport) -> Vec<Outcome> {
    report.steps().map(|s| s.outcome.clone()).collect()
}

#[tokio::test]
async fn test_second_run_is_all_already_exists() {
    let catalog = MemoryCatalog::new("placementdb");
    let plan = small_plan();

    let first = run(&plan, &catalog).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.created(), 7);
    assert!(outcomes(&first).iter().all(|o| *o == Outcome::Created));
    let after_first = catalog.snapshot();

    let second = run(&plan, &catalog).await.unwrap();
    assert!(second.is_success());
    assert_eq!(second.created(), 0);
    assert_eq!(second.already_present(), 7);
    assert!(outcomes(&second)
        .iter()
        .all(|o| *o == Outcome::AlreadyExists));

    assert_eq!(catalog.snapshot(), after_first);
}

#[tokio::test]
async fn test_steps_run_in_stage_order() {
    let catalog = MemoryCatalog::new("placementdb");
    run(&small_plan(), &catalog).await.unwrap();
    assert_eq!(
        catalog.calls(),
        vec![
            "create_user:appuser",
            "create_collection:placements",
            "create_collection:users",
            "create_collection:documents",
            "create_index:placements.status_1",
            "create_index:users.first_name_1_last_name_1",
            "create_index:documents.name_1",
        ]
    );
}

#[tokio::test]
async fn test_only_validated_collection_gets_a_validator() {
    let catalog = MemoryCatalog::new("placementdb");
    run(&small_plan(), &catalog).await.unwrap();

    let validator = catalog.validator("placements").unwrap();
    let schema = validator.get_document("$jsonSchema").unwrap();
    assert_eq!(schema.get_array("required").unwrap().len(), 2);
    assert!(catalog.validator("users").is_none());
    assert!(catalog.validator("documents").is_none());
}

#[tokio::test]
async fn test_existing_collection_keeps_its_schema() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.seed_collection("placements", None);

    let report = run(&small_plan(), &catalog).await.unwrap();
    let collections = report.stage(Stage::Collections).unwrap();
    assert_eq!(collections.steps[0].target, "placements");
    assert_eq!(collections.steps[0].outcome, Outcome::AlreadyExists);
    assert_eq!(collections.steps[1].outcome, Outcome::Created);
    assert!(catalog.validator("placements").is_none());
}

#[tokio::test]
async fn test_conflicting_account_skips_later_stages() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.seed_user("appuser", "placementdb", Role::Read);

    let err = run(&small_plan(), &catalog).await.unwrap_err();
    let BootstrapError::StageFailed {
        stage,
        target,
        source,
        ..
    } = &err
    else {
        panic!("unexpected error: {:?}", err);
    };
    assert_eq!(*stage, Stage::Credential);
    assert_eq!(target, "appuser");
    assert_eq!(source.kind, FailureKind::ValidationRejected);

    let report = err.report();
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.stages[0].status, StageStatus::Failed);
    assert!(matches!(
        report.stages[0].steps[0].outcome,
        Outcome::Failed {
            kind: FailureKind::ValidationRejected,
            ..
        }
    ));
    assert_eq!(report.stages[1].status, StageStatus::Skipped);
    assert!(report.stages[1].steps.is_empty());
    assert_eq!(report.stages[2].status, StageStatus::Skipped);

    assert_eq!(catalog.calls(), vec!["create_user:appuser"]);
}

#[tokio::test]
async fn test_existing_account_with_same_role_is_accepted() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.seed_user("appuser", "placementdb", Role::ReadWrite);

    let report = run(&small_plan(), &catalog).await.unwrap();
    let credential = report.stage(Stage::Credential).unwrap();
    assert_eq!(credential.steps[0].outcome, Outcome::AlreadyExists);
    assert_eq!(report.created(), 6);
}

#[tokio::test]
async fn test_collection_failure_aborts_remaining_steps() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.fail_on(
        FailurePoint::Collection("users".to_string()),
        FailureKind::PermissionDenied,
        "not authorized on placementdb to execute command create",
    );

    let err = run(&small_plan(), &catalog).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Collections));

    let report = err.report();
    assert_eq!(report.stages[0].status, StageStatus::Completed);
    let collections = &report.stages[1];
    assert_eq!(collections.status, StageStatus::Failed);
    assert_eq!(collections.steps.len(), 2);
    assert_eq!(collections.steps[0].outcome, Outcome::Created);
    assert!(matches!(
        collections.steps[1].outcome,
        Outcome::Failed {
            kind: FailureKind::PermissionDenied,
            ..
        }
    ));
    assert_eq!(report.stages[2].status, StageStatus::Skipped);
    assert!(!catalog
        .calls()
        .contains(&"create_collection:documents".to_string()));

    // nothing was rolled back, a re-run resumes
    catalog.clear_failures();
    let report = run(&small_plan(), &catalog).await.unwrap();
    let collections = report.stage(Stage::Collections).unwrap();
    assert_eq!(collections.steps[0].outcome, Outcome::AlreadyExists);
    assert_eq!(collections.steps[1].outcome, Outcome::Created);
    assert_eq!(collections.steps[2].outcome, Outcome::Created);
}

#[tokio::test]
async fn test_index_failure_reports_index_target() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.fail_on(
        FailurePoint::Index("users.first_name_1_last_name_1".to_string()),
        FailureKind::ConnectivityLost,
        "connection reset",
    );

    let err = run(&small_plan(), &catalog).await.unwrap_err();
    match &err {
        BootstrapError::StageFailed { stage, target, .. } => {
            assert_eq!(*stage, Stage::Indexes);
            assert_eq!(target, "users.first_name_1_last_name_1");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let indexes = err.report().stage(Stage::Indexes).unwrap();
    assert_eq!(indexes.steps.len(), 2);
    assert_eq!(err.report().created(), 5);
    assert_eq!(err.report().failed(), 1);
}

#[tokio::test]
async fn test_reference_plan_first_run() {
    let catalog = MemoryCatalog::new("placementdb");
    let plan = BootstrapPlan::reference("placementdb").unwrap();

    let report = run(&plan, &catalog).await.unwrap();
    assert_eq!(report.stage(Stage::Collections).unwrap().steps.len(), 16);
    // the _id index comes with the collection
    let indexes = report.stage(Stage::Indexes).unwrap();
    assert_eq!(indexes.steps[0].target, "placements._id_1");
    assert_eq!(indexes.steps[0].outcome, Outcome::AlreadyExists);
    assert!(indexes.steps[1..]
        .iter()
        .all(|s| s.outcome == Outcome::Created));
}

#[tokio::test]
async fn test_verify_before_and_after() {
    let catalog = MemoryCatalog::new("placementdb");
    let plan = small_plan();

    let status = verify_catalog(&plan, &catalog).await.unwrap();
    assert!(!status.is_complete());
    // account, three collections, three indexes
    assert_eq!(status.missing().len(), 7);
    assert!(catalog.calls().is_empty());

    run(&plan, &catalog).await.unwrap();
    let status = verify_catalog(&plan, &catalog).await.unwrap();
    assert!(status.is_complete(), "missing: {:?}", status.missing());
    assert!(status.collections[0].validator_present);
}

#[tokio::test]
async fn test_verify_flags_missing_validator() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.seed_collection("placements", None);
    let plan = small_plan();
    run(&plan, &catalog).await.unwrap();

    let status = verify_catalog(&plan, &catalog).await.unwrap();
    assert_eq!(status.missing(), vec!["validator on placements".to_string()]);
}

#[tokio::test]
async fn test_unreachable_server_fails_before_provisioning() {
    let catalog = MemoryCatalog::new("placementdb");
    catalog.fail_on(FailurePoint::Ping, FailureKind::ConnectivityLost, "no route");

    let err = run_after_ping(&small_plan(), &catalog).await.unwrap_err();
    assert!(matches!(err, BootstrapError::Unreachable { .. }));
    assert_eq!(err.kind(), FailureKind::ConnectivityLost);
    assert_eq!(err.stage(), None);
    assert!(err
        .report()
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Skipped && s.steps.is_empty()));

    assert_eq!(catalog.calls(), vec!["ping"]);
    assert_eq!(catalog.snapshot(), MemoryCatalog::new("placementdb").snapshot());
}

#[tokio::test]
async fn test_reachable_server_runs_every_stage() {
    let catalog = MemoryCatalog::new("placementdb");
    let report = run_after_ping(&small_plan(), &catalog).await.unwrap();
    assert_eq!(report.created(), 7);
    assert_eq!(catalog.calls()[0], "ping");
    assert_eq!(catalog.calls().len(), 8);
}
