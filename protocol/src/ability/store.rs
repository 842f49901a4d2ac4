//! Persistent ability and delegation-origin sets, over the local
//! [`KeyValueStore`].

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Ability, AbilityMode};
use crate::config::{ABILITIES_STORE, DELEGATION_ORIGINS_STORE};
use crate::error::Result;
use crate::identity::principal::Principal;
use crate::storage::{KeyValueStore, StorageError};

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?)
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?)
}

/// Fields of an ability before it has an id.
#[derive(Debug, Clone)]
pub struct NewAbility {
    pub account_public_key: Principal,
    pub target_path: Option<Vec<String>>,
    pub target_uid: Option<String>,
    pub mode: AbilityMode,
    pub expiration: Option<u64>,
    pub recursive: bool,
    pub delegate_origin: String,
    pub identity_origin: String,
}

#[derive(Clone)]
pub struct AbilityStore {
    store: Arc<dyn KeyValueStore>,
}

impl AbilityStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist a newly approved ability under a fresh id.
    pub fn write_ability(&self, new: NewAbility) -> Result<Ability> {
        let ability = Ability {
            id: Uuid::new_v4().to_string(),
            account_uid: new.account_public_key.to_string(),
            account_public_key: new.account_public_key,
            target_path: new.target_path,
            target_uid: new.target_uid,
            mode: new.mode,
            expiration: new.expiration,
            recursive: new.recursive,
            delegate_origin: new.delegate_origin,
            identity_origin: new.identity_origin,
        };
        self.store.put(ABILITIES_STORE, &ability.id, &to_json(&ability)?)?;
        info!(id = %ability.id, origin = %ability.delegate_origin, "ability granted");
        Ok(ability)
    }

    pub fn list_abilities(&self) -> Result<Vec<Ability>> {
        let mut out = Vec::new();
        for key in self.store.list_keys(ABILITIES_STORE)? {
            if let Some(value) = self.store.get(ABILITIES_STORE, &key)? {
                out.push(from_json(value)?);
            }
        }
        Ok(out)
    }

    /// Abilities whose `delegateOrigin` is `origin`. This is the only set a
    /// provider ever shows to that origin.
    pub fn abilities_for_origin(&self, origin: &str) -> Result<Vec<Ability>> {
        self.store
            .list_by_index(ABILITIES_STORE, "delegateOrigin", &json!(origin))?
            .into_iter()
            .map(from_json::<Ability>)
            .collect()
    }

    pub fn delete_ability(&self, id: &str) -> Result<()> {
        self.store.delete(ABILITIES_STORE, id)?;
        debug!(id, "ability deleted");
        Ok(())
    }
}

/// Origins believed to hold a delegated identity for this context.
#[derive(Clone)]
pub struct KnownOrigins {
    store: Arc<dyn KeyValueStore>,
}

impl KnownOrigins {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn add(&self, origin: &str) -> Result<()> {
        self.store
            .put(DELEGATION_ORIGINS_STORE, origin, &json!({ "origin": origin }))?;
        Ok(())
    }

    pub fn remove(&self, origin: &str) -> Result<()> {
        self.store.delete(DELEGATION_ORIGINS_STORE, origin)?;
        info!(origin, "forgot delegation origin");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys(DELEGATION_ORIGINS_STORE)?)
    }

    pub fn contains(&self, origin: &str) -> Result<bool> {
        Ok(self.store.get(DELEGATION_ORIGINS_STORE, origin)?.is_some())
    }
}
