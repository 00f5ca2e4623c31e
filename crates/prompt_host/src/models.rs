//! Persisted model configurations.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use services::store::{load_or, save, KvStore};
use shared::config::{ModelConfig, DEFAULT_MODEL_ID};
use shared::error::AssistError;

const STORE_KEY: &str = "models";

pub struct ModelStore {
    store: Arc<dyn KvStore>,
    models: Vec<ModelConfig>,
}

impl ModelStore {
    pub async fn load(store: Arc<dyn KvStore>) -> Result<Self> {
        let models = load_or(store.as_ref(), STORE_KEY, || {
            vec![ModelConfig::builtin_default()]
        })
        .await?;
        Ok(Self { store, models })
    }

    pub fn all(&self) -> &[ModelConfig] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Look up by id, falling back to the built-in defaults for dangling
    /// references (e.g. an action whose model was deleted).
    pub fn resolve(&self, id: &str) -> ModelConfig {
        self.get(id)
            .cloned()
            .unwrap_or_else(ModelConfig::builtin_default)
    }

    pub async fn add(&mut self, mut model: ModelConfig) -> Result<()> {
        model.validate().map_err(AssistError::Validation)?;
        model.created_at = Utc::now();
        self.models.push(model);
        self.persist().await
    }

    /// Update by id; unknown ids are inserted (the form edits a copy).
    pub async fn update(&mut self, mut model: ModelConfig) -> Result<()> {
        model.validate().map_err(AssistError::Validation)?;
        model.updated_at = Utc::now();
        match self.models.iter().position(|m| m.id == model.id) {
            Some(index) => self.models[index] = model,
            None => self.models.push(model),
        }
        self.persist().await
    }

    /// Removing the reserved built-in entry resets it instead of deleting.
    pub async fn remove(&mut self, id: &str) -> Result<()> {
        if id == DEFAULT_MODEL_ID {
            match self.models.iter().position(|m| m.id == DEFAULT_MODEL_ID) {
                Some(index) => self.models[index] = ModelConfig::builtin_default(),
                None => self.models.push(ModelConfig::builtin_default()),
            }
        } else {
            self.models.retain(|m| m.id != id);
        }
        self.persist().await
    }

    /// Drop every custom model, keeping only the built-in entry.
    pub async fn clear(&mut self) -> Result<()> {
        let builtin = self
            .get(DEFAULT_MODEL_ID)
            .cloned()
            .unwrap_or_else(ModelConfig::builtin_default);
        self.models = vec![builtin];
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        save(self.store.as_ref(), STORE_KEY, &self.models).await
    }
}
