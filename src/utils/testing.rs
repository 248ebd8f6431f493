// Utility for unit and integration tests
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::plan::{CollectionSpec, CredentialSpec, IndexSpec, Role};
use crate::provision::{
    existing_user_outcome, FailureKind, ProvisionError, Provisioned, Provisioner, RoleGrant,
};
use crate::utils::db::key_patterns_match;

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

// every collection carries this one from creation
fn id_index() -> Document {
    doc! { "_id": 1 }
}

/// Where an injected failure fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Ping,
    User(String),
    Collection(String),
    Index(String),
}

#[derive(Debug, Default, Clone)]
struct CatalogState {
    // keyed by (database, username)
    users: HashMap<(String, String), Vec<RoleGrant>>,
    collections: BTreeMap<String, Option<Document>>,
    indexes: HashMap<String, Vec<Document>>,
}

/// An in-memory stand-in for a database catalog.
///
/// It behaves like the server for the calls the bootstrap procedure makes:
/// repeated creations report `AlreadyExists`, existing collections keep their
/// validator, and an index on a missing collection creates it. Failures can be
/// injected per target, and every call is recorded in order.
pub struct MemoryCatalog {
    name: String,
    state: Mutex<CatalogState>,
    failures: Mutex<HashMap<FailurePoint, ProvisionError>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryCatalog {
    pub fn new(name: &str) -> Self {
        MemoryCatalog {
            name: name.to_string(),
            state: Mutex::new(CatalogState::default()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every call hitting `point` fail with `kind`.
    pub fn fail_on(&self, point: FailurePoint, kind: FailureKind, detail: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(point, ProvisionError::new(kind, detail));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn seed_user(&self, username: &str, database: &str, role: Role) {
        self.state.lock().unwrap().users.insert(
            (database.to_string(), username.to_string()),
            vec![(role.as_str().to_string(), database.to_string())],
        );
    }

    pub fn seed_collection(&self, name: &str, validator: Option<Document>) {
        self.state
            .lock()
            .unwrap()
            .collections
            .insert(name.to_string(), validator);
    }

    /// Provisioning calls made so far, e.g. `create_collection:users`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn validator(&self, collection: &str) -> Option<Document> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .cloned()
            .flatten()
    }

    /// Snapshot of the catalog: users, collections and index key patterns.
    pub fn snapshot(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut users: Vec<_> = state.users.iter().collect();
        users.sort_by(|a, b| a.0.cmp(b.0));
        let mut indexes: Vec<_> = state.indexes.iter().collect();
        indexes.sort_by(|a, b| a.0.cmp(b.0));
        format!("{:?} {:?} {:?}", users, state.collections, indexes)
    }

    fn enter(&self, call: String, point: FailurePoint) -> Result<(), ProvisionError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(&point) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provisioner for MemoryCatalog {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), ProvisionError> {
        self.enter("ping".to_string(), FailurePoint::Ping)
    }

    async fn create_user(
        &self,
        credential: &CredentialSpec,
    ) -> Result<Provisioned, ProvisionError> {
        self.enter(
            format!("create_user:{}", credential.username),
            FailurePoint::User(credential.username.clone()),
        )?;
        let mut state = self.state.lock().unwrap();
        let key = (credential.database.clone(), credential.username.clone());
        if let Some(roles) = state.users.get(&key) {
            return existing_user_outcome(credential, roles);
        }
        state.users.insert(
            key,
            vec![(
                credential.role.as_str().to_string(),
                credential.database.clone(),
            )],
        );
        Ok(Provisioned::Created)
    }

    async fn create_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<Provisioned, ProvisionError> {
        self.enter(
            format!("create_collection:{}", spec.name),
            FailurePoint::Collection(spec.name.clone()),
        )?;
        let mut state = self.state.lock().unwrap();
        if state.collections.contains_key(&spec.name) {
            return Ok(Provisioned::AlreadyExists);
        }
        let validator = spec.validator.as_ref().map(|schema| schema.to_validator());
        state.collections.insert(spec.name.clone(), validator);
        Ok(Provisioned::Created)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<Provisioned, ProvisionError> {
        self.enter(
            format!("create_index:{}", spec),
            FailurePoint::Index(spec.to_string()),
        )?;
        let mut state = self.state.lock().unwrap();
        state.collections.entry(spec.collection.clone()).or_insert(None);
        let pattern = spec.key_pattern();
        let indexes = state.indexes.entry(spec.collection.clone()).or_default();
        if key_patterns_match(&id_index(), &pattern)
            || indexes.iter().any(|keys| key_patterns_match(keys, &pattern))
        {
            return Ok(Provisioned::AlreadyExists);
        }
        indexes.push(pattern);
        Ok(Provisioned::Created)
    }

    async fn user_roles(
        &self,
        username: &str,
        database: &str,
    ) -> Result<Option<Vec<RoleGrant>>, ProvisionError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .get(&(database.to_string(), username.to_string()))
            .cloned())
    }

    async fn collection_names(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(self.state.lock().unwrap().collections.keys().cloned().collect())
    }

    async fn collection_validator(&self, name: &str) -> Result<Option<Document>, ProvisionError> {
        Ok(self.validator(name))
    }

    async fn index_key_patterns(&self, collection: &str) -> Result<Vec<Document>, ProvisionError> {
        let state = self.state.lock().unwrap();
        if !state.collections.contains_key(collection) {
            return Ok(Vec::new());
        }
        let mut patterns = vec![id_index()];
        patterns.extend(state.indexes.get(collection).cloned().unwrap_or_default());
        Ok(patterns)
    }
}
