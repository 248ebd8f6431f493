//! Read-only comparison of the live catalog against a plan.
use serde::Serialize;
use std::fmt;
use tracing::instrument;

use crate::plan::BootstrapPlan;
use crate::provision::{existing_user_outcome, ProvisionError, Provisioner};
use crate::utils::db::key_patterns_match;

#[derive(thiserror::Error, Debug)]
#[error("failed to inspect the database catalog")]
pub struct VerifyError(#[from] ProvisionError);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub username: String,
    pub present: bool,
    pub role_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub present: bool,
    pub validator_expected: bool,
    pub validator_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub collection: String,
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStatus {
    pub database: String,
    pub account: AccountStatus,
    pub collections: Vec<CollectionStatus>,
    pub indexes: Vec<IndexStatus>,
}

impl CatalogStatus {
    /// Everything the plan names, described as `kind name`.
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if !self.account.present {
            missing.push(format!("account {}", self.account.username));
        } else if !self.account.role_granted {
            missing.push(format!("role grant for account {}", self.account.username));
        }
        for collection in &self.collections {
            if !collection.present {
                missing.push(format!("collection {}", collection.name));
            } else if collection.validator_expected && !collection.validator_present {
                missing.push(format!("validator on {}", collection.name));
            }
        }
        for index in self.indexes.iter().filter(|i| !i.present) {
            missing.push(format!("index {}.{}", index.collection, index.name));
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

impl fmt::Display for CatalogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |ok: bool| if ok { "ok" } else { "MISSING" };
        writeln!(f, "catalog of database '{}'", self.database)?;
        writeln!(
            f,
            "  account {}: {}",
            self.account.username,
            mark(self.account.present && self.account.role_granted)
        )?;
        for c in &self.collections {
            let ok = c.present && (!c.validator_expected || c.validator_present);
            writeln!(f, "  collection {}: {}", c.name, mark(ok))?;
        }
        for i in &self.indexes {
            writeln!(f, "  index {}.{}: {}", i.collection, i.name, mark(i.present))?;
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(database = provisioner.database_name()), err)]
pub async fn verify_catalog<P>(plan: &BootstrapPlan, provisioner: &P) -> Result<CatalogStatus, VerifyError>
where
    P: Provisioner + ?Sized,
{
    let credential = plan.credential();
    let account = match provisioner
        .user_roles(&credential.username, &credential.database)
        .await?
    {
        Some(roles) => AccountStatus {
            username: credential.username.clone(),
            present: true,
            role_granted: existing_user_outcome(credential, &roles).is_ok(),
        },
        None => AccountStatus {
            username: credential.username.clone(),
            present: false,
            role_granted: false,
        },
    };

    let names = provisioner.collection_names().await?;
    let mut collections = Vec::with_capacity(plan.collections().len());
    for spec in plan.collections() {
        let present = names.contains(&spec.name);
        let validator_present = present && provisioner.collection_validator(&spec.name).await?.is_some();
        collections.push(CollectionStatus {
            name: spec.name.clone(),
            present,
            validator_expected: spec.validator.is_some(),
            validator_present,
        });
    }

    let mut indexes = Vec::with_capacity(plan.indexes().len());
    for spec in plan.indexes() {
        let pattern = spec.key_pattern();
        let present = provisioner
            .index_key_patterns(&spec.collection)
            .await?
            .iter()
            .any(|keys| key_patterns_match(keys, &pattern));
        indexes.push(IndexStatus {
            collection: spec.collection.clone(),
            name: spec.name(),
            present,
        });
    }

    Ok(CatalogStatus {
        database: provisioner.database_name().to_string(),
        account,
        collections,
        indexes,
    })
}
