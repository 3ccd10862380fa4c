use crate::normalizer::NormalizationPolicy;
use crate::store::{load_blob, save_blob, StateStore, API_KEY_KEY, DOMAIN_ONLY_KEY};
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("API key must not be empty")]
    EmptyApiKey,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Process-wide settings backed by the state store.
///
/// Nothing is cached here: every getter goes back to the store so a change
/// made from another surface is picked up by the next check or submission.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn StateStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn policy(&self) -> Result<NormalizationPolicy> {
        let domain_only: Option<bool> = load_blob(self.store.as_ref(), DOMAIN_ONLY_KEY)?;
        Ok(domain_only
            .map(|domain_only| NormalizationPolicy { domain_only })
            .unwrap_or_default())
    }

    pub fn set_domain_only(&self, domain_only: bool) -> Result<()> {
        log::info!("Domain-only normalization set to {domain_only}");
        save_blob(self.store.as_ref(), DOMAIN_ONLY_KEY, &domain_only)
    }

    /// Stored credential, empty when none was saved.
    pub fn api_key(&self) -> Result<String> {
        let key: Option<String> = load_blob(self.store.as_ref(), API_KEY_KEY)?;
        Ok(key.unwrap_or_default())
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), SettingsError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SettingsError::EmptyApiKey);
        }
        save_blob(self.store.as_ref(), API_KEY_KEY, key)?;
        log::info!("API key updated");
        Ok(())
    }
}
