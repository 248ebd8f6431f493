use placementdb_init::conf::{self, AppConfig, ConfError};
use placementdb_init::plan::{BootstrapPlan, IndexDirection, Role};
use placementdb_init::utils::testing::TEST_CONFIG_FILE;
use std::io::Write;

#[test]
fn test_load_config() {
    let config = conf::load_config(TEST_CONFIG_FILE).unwrap();
    assert_eq!(config.get_string("hello").unwrap(), "world");
}

#[test]
fn test_missing_config_file() {
    let err = conf::load_config("tests/does-not-exist.yaml").unwrap_err();
    assert!(matches!(err, ConfError::ConfigFileNotFound(_)));
}

#[test]
fn test_app_config_from_test_file() {
    let config = AppConfig::from_path(TEST_CONFIG_FILE).unwrap();

    assert_eq!(config.database.port, 27017);
    assert_eq!(config.database.max_pool_size, Some(10));
    assert!(config.database.username.is_none());
    assert!(!config.database.srv);

    let plan = &config.plan;
    let credential = plan.credential();
    assert_eq!(credential.username, "testapp");
    assert_eq!(credential.role, Role::ReadWrite);
    // defaults to the configured database
    assert_eq!(credential.database, config.database.name);

    let names: Vec<&str> = plan.collections().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["placements", "users", "documents"]);
    let validator = plan.collections()[0].validator.as_ref().unwrap();
    assert_eq!(validator.required, vec!["_id", "_metadata"]);
    assert_eq!(validator.properties.len(), 2);

    assert_eq!(plan.indexes().len(), 4);
    let compound = &plan.indexes()[2];
    assert_eq!(compound.collection, "users");
    assert_eq!(compound.keys[0].field, "first_name");
    assert_eq!(compound.keys[0].direction, IndexDirection::Ascending);
    assert_eq!(compound.keys[1].field, "last_name");
    assert_eq!(compound.keys[1].direction, IndexDirection::Descending);
    assert_eq!(plan.indexes()[1].keys[0].direction, IndexDirection::Ascending);
    assert_eq!(plan.indexes()[3].keys[0].direction, IndexDirection::Descending);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = AppConfig::from_path_or_default("tests/does-not-exist.yaml").unwrap();
    assert_eq!(config.database.name, "placementdb");
    assert_eq!(config.plan, BootstrapPlan::reference("placementdb").unwrap());
}

#[test]
fn test_invalid_plan_is_rejected_before_connecting() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r#"
database:
  name: placementdb
bootstrap:
  credential:
    username: app
    password: pw
  collections:
    - name: users
    - name: users
"#
    )
    .unwrap();

    let err = AppConfig::from_path(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfError::InvalidPlan(_)));
}

#[test]
fn test_unknown_role_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r#"
bootstrap:
  credential:
    username: app
    password: pw
    role: superuser
"#
    )
    .unwrap();

    let err = AppConfig::from_path(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfError::InvalidConfigError(_)));
}
