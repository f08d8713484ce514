//! AppDirectory in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use symphony_core::store::{AppDirectory, AppRecord, StoreError, UserProfile};

/// In-memory app and user identity directory.
#[derive(Default)]
pub struct InMemoryAppDirectory {
    apps: RwLock<HashMap<String, AppRecord>>,
    users: RwLock<HashMap<(String, String), UserProfile>>,
}

impl InMemoryAppDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppDirectory for InMemoryAppDirectory {
    async fn register_app(&self, name: &str, api_key: &str) -> Result<AppRecord, StoreError> {
        let mut apps = self
            .apps
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if apps.values().any(|app| app.api_key == api_key) {
            return Err(StoreError::Conflict("api key already in use".to_string()));
        }
        let record = AppRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            api_key: api_key.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        apps.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<AppRecord>, StoreError> {
        let apps = self
            .apps
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(apps.values().find(|app| app.api_key == api_key).cloned())
    }

    async fn set_active(&self, app_id: &str, active: bool) -> Result<(), StoreError> {
        let mut apps = self
            .apps
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let app = apps
            .get_mut(app_id)
            .ok_or_else(|| StoreError::NotFound(app_id.to_string()))?;
        app.active = active;
        Ok(())
    }

    async fn ensure_user(
        &self,
        app_id: &str,
        external_user_id: &str,
    ) -> Result<UserProfile, StoreError> {
        let mut users = self
            .users
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let key = (app_id.to_string(), external_user_id.to_string());
        if let Some(profile) = users.get(&key) {
            return Ok(profile.clone());
        }
        let profile = UserProfile {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            external_user_id: external_user_id.to_string(),
            created_at: Utc::now(),
        };
        users.insert(key, profile.clone());
        Ok(profile)
    }
}
