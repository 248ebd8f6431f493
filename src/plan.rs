//! Typed description of what the bootstrap procedure provisions.
//!
//! A [`BootstrapPlan`] bundles the application credential, the collections
//! (optionally with a `$jsonSchema` validator) and the secondary indexes.
//! Plans are validated when they are built, so a malformed plan never
//! reaches the database.
use mongodb::bson::{doc, Bson, Document};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the database the reference plan targets.
pub const DEFAULT_DATABASE_NAME: &str = "placementdb";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("credential username must not be empty")]
    EmptyUsername,
    #[error("credential password must not be empty")]
    EmptyPassword,
    #[error("invalid database name '{name}': {reason}")]
    InvalidDatabaseName { name: String, reason: &'static str },
    #[error("invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: &'static str },
    #[error("collection '{0}' is declared more than once")]
    DuplicateCollection(String),
    #[error("validator for collection '{collection}' has an empty field name")]
    EmptySchemaField { collection: String },
    #[error("validator for collection '{collection}' declares property '{field}' more than once")]
    DuplicateSchemaProperty { collection: String, field: String },
    #[error("index on '{collection}' has no keys")]
    EmptyIndexKeys { collection: String },
    #[error("index on '{collection}' has an empty field name")]
    EmptyIndexField { collection: String },
    #[error("index on '{collection}' uses field '{field}' more than once")]
    DuplicateIndexField { collection: String, field: String },
    #[error("index {index} targets undeclared collection '{collection}'")]
    UnknownCollection { collection: String, index: String },
    #[error("index {index} on '{collection}' is declared more than once")]
    DuplicateIndex { collection: String, index: String },
}

/// Built-in roles the application account can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Read,
    ReadWrite,
    DbAdmin,
    DbOwner,
    UserAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::ReadWrite => "readWrite",
            Role::DbAdmin => "dbAdmin",
            Role::DbOwner => "dbOwner",
            Role::UserAdmin => "userAdmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application account, scoped to a single database.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSpec {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub database: String,
}

impl CredentialSpec {
    pub fn new(username: &str, password: &str, role: Role, database: &str) -> Self {
        CredentialSpec {
            username: username.to_string(),
            password: password.to_string(),
            role,
            database: database.to_string(),
        }
    }
}

// never print the password, this ends up in logs
impl fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSpec")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("role", &self.role)
            .field("database", &self.database)
            .finish()
    }
}

/// BSON types a validated property can be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BsonType {
    String,
    Object,
    Array,
    Int,
    Long,
    Double,
    Decimal,
    Bool,
    Date,
    ObjectId,
    Null,
}

impl BsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BsonType::String => "string",
            BsonType::Object => "object",
            BsonType::Array => "array",
            BsonType::Int => "int",
            BsonType::Long => "long",
            BsonType::Double => "double",
            BsonType::Decimal => "decimal",
            BsonType::Bool => "bool",
            BsonType::Date => "date",
            BsonType::ObjectId => "objectId",
            BsonType::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub bson_type: BsonType,
    #[serde(default)]
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn new(name: &str, bson_type: BsonType, description: Option<&str>) -> Self {
        PropertySchema {
            name: name.to_string(),
            bson_type,
            description: description.map(str::to_string),
        }
    }
}

/// A `$jsonSchema` validator over top-level document fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
}

impl JsonSchema {
    /// Render the validator document handed to `create`.
    pub fn to_validator(&self) -> Document {
        let mut properties = Document::new();
        for property in &self.properties {
            let mut schema = doc! { "bsonType": property.bson_type.as_str() };
            if let Some(description) = &property.description {
                schema.insert("description", description.as_str());
            }
            properties.insert(property.name.as_str(), schema);
        }
        let mut json_schema = doc! { "bsonType": "object" };
        if !self.required.is_empty() {
            json_schema.insert("required", self.required.clone());
        }
        if !properties.is_empty() {
            json_schema.insert("properties", properties);
        }
        doc! { "$jsonSchema": json_schema }
    }

    fn validate(&self, collection: &str) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for property in &self.properties {
            if property.name.is_empty() {
                return Err(PlanError::EmptySchemaField {
                    collection: collection.to_string(),
                });
            }
            if !seen.insert(property.name.as_str()) {
                return Err(PlanError::DuplicateSchemaProperty {
                    collection: collection.to_string(),
                    field: property.name.clone(),
                });
            }
        }
        if self.required.iter().any(|field| field.is_empty()) {
            return Err(PlanError::EmptySchemaField {
                collection: collection.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub validator: Option<JsonSchema>,
}

impl CollectionSpec {
    pub fn new(name: &str) -> Self {
        CollectionSpec {
            name: name.to_string(),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: JsonSchema) -> Self {
        self.validator = Some(validator);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            IndexDirection::Ascending => 1,
            IndexDirection::Descending => -1,
        }
    }
}

// accepts 1 / -1 as well as asc / desc
impl<'de> Deserialize<'de> for IndexDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(1) => Ok(IndexDirection::Ascending),
            Raw::Int(-1) => Ok(IndexDirection::Descending),
            Raw::Int(other) => Err(de::Error::custom(format!(
                "invalid index direction {}, expected 1 or -1",
                other
            ))),
            Raw::Str(s) => match s.to_ascii_lowercase().as_str() {
                "1" | "asc" | "ascending" => Ok(IndexDirection::Ascending),
                "-1" | "desc" | "descending" => Ok(IndexDirection::Descending),
                _ => Err(de::Error::custom(format!(
                    "invalid index direction '{}', expected asc or desc",
                    s
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default = "default_direction")]
    pub direction: IndexDirection,
}

fn default_direction() -> IndexDirection {
    IndexDirection::Ascending
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub keys: Vec<IndexKey>,
}

impl IndexSpec {
    pub fn new(collection: &str, keys: &[(&str, IndexDirection)]) -> Self {
        IndexSpec {
            collection: collection.to_string(),
            keys: keys
                .iter()
                .map(|(field, direction)| IndexKey {
                    field: field.to_string(),
                    direction: *direction,
                })
                .collect(),
        }
    }

    pub fn ascending(collection: &str, fields: &[&str]) -> Self {
        let keys: Vec<(&str, IndexDirection)> = fields
            .iter()
            .map(|field| (*field, IndexDirection::Ascending))
            .collect();
        IndexSpec::new(collection, &keys)
    }

    /// Key pattern in declaration order, e.g. `{ first_name: 1, last_name: 1 }`.
    pub fn key_pattern(&self) -> Document {
        let mut pattern = Document::new();
        for key in &self.keys {
            pattern.insert(key.field.as_str(), Bson::Int32(key.direction.as_i32()));
        }
        pattern
    }

    /// The name the server generates for this key pattern.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|key| format!("{}_{}", key.field, key.direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.keys.is_empty() {
            return Err(PlanError::EmptyIndexKeys {
                collection: self.collection.clone(),
            });
        }
        let mut seen = HashSet::new();
        for key in &self.keys {
            if key.field.is_empty() {
                return Err(PlanError::EmptyIndexField {
                    collection: self.collection.clone(),
                });
            }
            if !seen.insert(key.field.as_str()) {
                return Err(PlanError::DuplicateIndexField {
                    collection: self.collection.clone(),
                    field: key.field.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.name())
    }
}

/// The full provisioning plan: one credential, uniquely named collections and
/// indexes that only target declared collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    credential: CredentialSpec,
    collections: Vec<CollectionSpec>,
    indexes: Vec<IndexSpec>,
}

impl BootstrapPlan {
    pub fn new(
        credential: CredentialSpec,
        collections: Vec<CollectionSpec>,
        indexes: Vec<IndexSpec>,
    ) -> Result<Self, PlanError> {
        validate_credential(&credential)?;

        let mut names = HashSet::new();
        for collection in &collections {
            validate_collection_name(&collection.name)?;
            if !names.insert(collection.name.as_str()) {
                return Err(PlanError::DuplicateCollection(collection.name.clone()));
            }
            if let Some(validator) = &collection.validator {
                validator.validate(&collection.name)?;
            }
        }

        let mut declared = HashSet::new();
        for index in &indexes {
            index.validate()?;
            if !names.contains(index.collection.as_str()) {
                return Err(PlanError::UnknownCollection {
                    collection: index.collection.clone(),
                    index: index.name(),
                });
            }
            if !declared.insert((index.collection.as_str(), index.name())) {
                return Err(PlanError::DuplicateIndex {
                    collection: index.collection.clone(),
                    index: index.name(),
                });
            }
        }

        Ok(BootstrapPlan {
            credential,
            collections,
            indexes,
        })
    }

    /// The stock placement database layout.
    pub fn reference(database: &str) -> Result<Self, PlanError> {
        let credential = CredentialSpec::new("appuser", "apppassword", Role::ReadWrite, database);

        let placements = CollectionSpec::new("placements").with_validator(JsonSchema {
            required: vec!["_id".to_string(), "_metadata".to_string()],
            properties: vec![
                PropertySchema::new(
                    "_id",
                    BsonType::String,
                    Some("must be a string and is required"),
                ),
                PropertySchema::new(
                    "_metadata",
                    BsonType::Object,
                    Some("must be an object and is required"),
                ),
            ],
        });

        let mut collections = vec![placements];
        collections.extend(
            [
                "users",
                "documents",
                "programmes",
                "contracts",
                "sections",
                "risks",
                "limits",
                "premiums",
                "insureds",
                "branches",
                "brokerTeams",
                "underwriterPools",
                "metadata",
                "companies",
                "organizations",
            ]
            .iter()
            .map(|name| CollectionSpec::new(name)),
        );

        let indexes = vec![
            IndexSpec::ascending("placements", &["_id"]),
            IndexSpec::ascending("placements", &["user._xid"]),
            IndexSpec::ascending("placements", &["status"]),
            IndexSpec::ascending("placements", &["effective_year"]),
            IndexSpec::ascending("users", &["_xid"]),
            IndexSpec::ascending("users", &["first_name", "last_name"]),
            IndexSpec::ascending("documents", &["_xid"]),
            IndexSpec::ascending("documents", &["name"]),
        ];

        BootstrapPlan::new(credential, collections, indexes)
    }

    pub fn credential(&self) -> &CredentialSpec {
        &self.credential
    }

    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }
}

impl fmt::Display for BootstrapPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "credential: {} ({} on {})",
            self.credential.username, self.credential.role, self.credential.database
        )?;
        writeln!(f, "collections:")?;
        for collection in &self.collections {
            match &collection.validator {
                Some(validator) => writeln!(
                    f,
                    "  {} (validated, required: {})",
                    collection.name,
                    validator.required.join(", ")
                )?,
                None => writeln!(f, "  {}", collection.name)?,
            }
        }
        writeln!(f, "indexes:")?;
        for index in &self.indexes {
            writeln!(f, "  {} {}", index.collection, index.key_pattern())?;
        }
        Ok(())
    }
}

fn validate_credential(credential: &CredentialSpec) -> Result<(), PlanError> {
    if credential.username.is_empty() {
        return Err(PlanError::EmptyUsername);
    }
    if credential.password.is_empty() {
        return Err(PlanError::EmptyPassword);
    }
    validate_database_name(&credential.database)
}

pub fn validate_database_name(name: &str) -> Result<(), PlanError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > 63 {
        Some("must be shorter than 64 bytes")
    } else if name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$' | '*' | '<' | '>' | ':' | '|' | '?' | '\0'))
    {
        Some("contains a forbidden character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PlanError::InvalidDatabaseName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn validate_collection_name(name: &str) -> Result<(), PlanError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains('$') {
        Some("must not contain '$'")
    } else if name.contains('\0') {
        Some("must not contain the null character")
    } else if name.starts_with("system.") {
        Some("the 'system.' prefix is reserved")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PlanError::InvalidCollectionName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
