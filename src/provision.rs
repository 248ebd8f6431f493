//! The seam between the bootstrap procedure and the database.
//!
//! [`Provisioner`] exposes the three provisioning calls plus the catalog
//! probes needed to tell "created" apart from "already there".
//! [`MongoProvisioner`] implements it over a MongoDB database handle.
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    options::{CreateCollectionOptions, ValidationAction, ValidationLevel},
    Database, IndexModel,
};
use serde::Serialize;
use std::fmt;
use tracing::{info, instrument};

use crate::plan::{CollectionSpec, CredentialSpec, IndexSpec};
use crate::utils::db::{
    classify_error, is_already_exists, is_namespace_not_found, key_patterns_match,
};
use crate::utils::o11y::logging::as_error;

/// Why a provisioning call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationRejected,
    PermissionDenied,
    ConnectivityLost,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ValidationRejected => "validation rejected",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::ConnectivityLost => "connectivity lost",
            FailureKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct ProvisionError {
    pub kind: FailureKind,
    pub detail: String,
}

impl ProvisionError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        ProvisionError {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<mongodb::error::Error> for ProvisionError {
    fn from(error: mongodb::error::Error) -> Self {
        ProvisionError {
            kind: classify_error(&error),
            detail: error.to_string(),
        }
    }
}

/// Successful result of a provisioning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// What happened to one step of the procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    AlreadyExists,
    Failed { kind: FailureKind, detail: String },
}

impl From<&Result<Provisioned, ProvisionError>> for Outcome {
    fn from(result: &Result<Provisioned, ProvisionError>) -> Self {
        match result {
            Ok(Provisioned::Created) => Outcome::Created,
            Ok(Provisioned::AlreadyExists) => Outcome::AlreadyExists,
            Err(e) => Outcome::Failed {
                kind: e.kind,
                detail: e.detail.clone(),
            },
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => f.write_str("created"),
            Outcome::AlreadyExists => f.write_str("already exists"),
            Outcome::Failed { kind, detail } => write!(f, "failed ({}: {})", kind, detail),
        }
    }
}

/// A (role, database) grant held by an account.
pub type RoleGrant = (String, String);

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of the database the handle points at.
    fn database_name(&self) -> &str;

    async fn ping(&self) -> Result<(), ProvisionError>;

    async fn create_user(&self, credential: &CredentialSpec)
        -> Result<Provisioned, ProvisionError>;

    /// Create the collection, attaching its validator. An existing collection
    /// is left untouched.
    async fn create_collection(&self, spec: &CollectionSpec)
        -> Result<Provisioned, ProvisionError>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<Provisioned, ProvisionError>;

    /// Roles held by `username` in `database`, `None` if the account does not exist.
    async fn user_roles(
        &self,
        username: &str,
        database: &str,
    ) -> Result<Option<Vec<RoleGrant>>, ProvisionError>;

    async fn collection_names(&self) -> Result<Vec<String>, ProvisionError>;

    /// The validator attached to a collection, `None` if there is none
    /// (or the collection does not exist).
    async fn collection_validator(&self, name: &str) -> Result<Option<Document>, ProvisionError>;

    /// Key patterns of every index on the collection, empty if it does not exist.
    async fn index_key_patterns(&self, collection: &str) -> Result<Vec<Document>, ProvisionError>;
}

/// Check an existing account against the requested grant.
pub fn existing_user_outcome(
    credential: &CredentialSpec,
    roles: &[RoleGrant],
) -> Result<Provisioned, ProvisionError> {
    let wanted = (credential.role.as_str(), credential.database.as_str());
    if roles
        .iter()
        .any(|(role, db)| (role.as_str(), db.as_str()) == wanted)
    {
        Ok(Provisioned::AlreadyExists)
    } else {
        Err(ProvisionError::new(
            FailureKind::ValidationRejected,
            format!(
                "account '{}' already exists without role {} on {} (has: {})",
                credential.username,
                credential.role,
                credential.database,
                roles
                    .iter()
                    .map(|(role, db)| format!("{}@{}", role, db))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ))
    }
}

pub struct MongoProvisioner {
    db: Database,
}

impl MongoProvisioner {
    pub fn new(db: Database) -> Self {
        MongoProvisioner { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // accounts live in the database they authenticate against
    fn auth_database(&self, name: &str) -> Database {
        self.db.client().database(name)
    }
}

#[async_trait]
impl Provisioner for MongoProvisioner {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    #[instrument(skip_all, fields(database = self.db.name()))]
    async fn ping(&self) -> Result<(), ProvisionError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .inspect_err(as_error!("failed to ping database"))?;
        Ok(())
    }

    #[instrument(skip_all, fields(username = %credential.username, database = %credential.database), err)]
    async fn create_user(
        &self,
        credential: &CredentialSpec,
    ) -> Result<Provisioned, ProvisionError> {
        if let Some(roles) = self
            .user_roles(&credential.username, &credential.database)
            .await?
        {
            return existing_user_outcome(credential, &roles);
        }

        let command = doc! {
            "createUser": credential.username.as_str(),
            "pwd": credential.password.as_str(),
            "roles": [
                { "role": credential.role.as_str(), "db": credential.database.as_str() }
            ],
        };
        match self
            .auth_database(&credential.database)
            .run_command(command)
            .await
        {
            Ok(_) => Ok(Provisioned::Created),
            // lost a race with another writer, look again
            Err(e) if is_already_exists(&e) => {
                match self
                    .user_roles(&credential.username, &credential.database)
                    .await?
                {
                    Some(roles) => existing_user_outcome(credential, &roles),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(collection = %spec.name), err)]
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<Provisioned, ProvisionError> {
        if self.collection_names().await?.contains(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }

        let options = spec.validator.as_ref().map(|schema| {
            CreateCollectionOptions::builder()
                .validator(schema.to_validator())
                .validation_level(ValidationLevel::Strict)
                .validation_action(ValidationAction::Error)
                .build()
        });
        match self
            .db
            .create_collection(&spec.name)
            .with_options(options)
            .await
        {
            Ok(()) => Ok(Provisioned::Created),
            Err(e) if is_already_exists(&e) => Ok(Provisioned::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(collection = %spec.collection, index = %spec.name()), err)]
    async fn create_index(&self, spec: &IndexSpec) -> Result<Provisioned, ProvisionError> {
        let pattern = spec.key_pattern();
        let existing = self.index_key_patterns(&spec.collection).await?;
        if existing.iter().any(|keys| key_patterns_match(keys, &pattern)) {
            return Ok(Provisioned::AlreadyExists);
        }

        let index_model = IndexModel::builder().keys(pattern).build();
        let result = self
            .db
            .collection::<Document>(&spec.collection)
            .create_index(index_model)
            .await?;
        info!(name = %result.index_name, "index built");
        Ok(Provisioned::Created)
    }

    async fn user_roles(
        &self,
        username: &str,
        database: &str,
    ) -> Result<Option<Vec<RoleGrant>>, ProvisionError> {
        let reply = self
            .auth_database(database)
            .run_command(doc! { "usersInfo": { "user": username, "db": database } })
            .await?;
        let users = reply.get_array("users").map_err(|e| {
            ProvisionError::new(FailureKind::Unknown, format!("bad usersInfo reply: {}", e))
        })?;
        let Some(user) = users.iter().find_map(|u| u.as_document()) else {
            return Ok(None);
        };
        let roles: Vec<RoleGrant> = user
            .get_array("roles")
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| r.as_document())
                    .filter_map(|r| {
                        let role = r.get_str("role").ok()?;
                        let db = r.get_str("db").ok()?;
                        Some((role.to_string(), db.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(roles))
    }

    async fn collection_names(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(self.db.list_collection_names().await?)
    }

    async fn collection_validator(&self, name: &str) -> Result<Option<Document>, ProvisionError> {
        let specs: Vec<_> = self
            .db
            .list_collections()
            .filter(doc! { "name": name })
            .await?
            .try_collect()
            .await?;
        Ok(specs.into_iter().find_map(|spec| spec.options.validator))
    }

    async fn index_key_patterns(&self, collection: &str) -> Result<Vec<Document>, ProvisionError> {
        let cursor = match self
            .db
            .collection::<Document>(collection)
            .list_indexes()
            .await
        {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let indexes: Vec<IndexModel> = cursor.try_collect().await?;
        Ok(indexes.into_iter().map(|index| index.keys).collect())
    }
}
