use crate::store::{load_blob, save_blob, StateStore, RULES_KEY};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A hostname pattern flagging a spoofing technique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusableRule {
    /// Regular expression source, searched anywhere in the hostname.
    pub pattern: String,
    #[serde(rename = "desc")]
    pub description: String,
    pub enabled: bool,
}

impl ConfusableRule {
    pub fn new(pattern: &str, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: description.to_string(),
            enabled: true,
        }
    }
}

/// The seed rule set, also what `reset` restores.
pub fn default_rules() -> Vec<ConfusableRule> {
    vec![
        ConfusableRule::new("rn", "rn → m confusion"),
        ConfusableRule::new("vv", "vv → w confusion"),
        ConfusableRule::new("[а-яА-Я]", "Cyrillic characters (IDN)"),
        ConfusableRule::new("[一-龥]", "Non-Latin CJK characters (IDN)"),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("No rule at index {0}")]
    IndexOutOfRange(usize),
    #[error("Rule {0} must not be empty")]
    EmptyField(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub fn validate_pattern(pattern: &str) -> Result<(), RuleError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Owner of the persisted rule collection.
#[derive(Clone)]
pub struct RuleStore {
    store: Arc<dyn StateStore>,
    write_lock: Arc<Mutex<()>>,
}

impl RuleStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current rules. Falls back to the seed when nothing has been saved.
    pub fn list(&self) -> Result<Vec<ConfusableRule>> {
        let saved: Option<Vec<ConfusableRule>> = load_blob(self.store.as_ref(), RULES_KEY)?;
        Ok(saved.unwrap_or_else(default_rules))
    }

    pub fn add(&self, pattern: &str, description: &str) -> Result<(), RuleError> {
        if pattern.is_empty() {
            return Err(RuleError::EmptyField("pattern"));
        }
        if description.is_empty() {
            return Err(RuleError::EmptyField("description"));
        }
        validate_pattern(pattern)?;

        self.modify(|rules| {
            rules.push(ConfusableRule::new(pattern, description));
            Ok(())
        })?;
        log::info!("Added confusable rule '{pattern}' ({description})");
        Ok(())
    }

    /// Replace the pattern and/or description of the rule at `index`.
    pub fn edit(
        &self,
        index: usize,
        pattern: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), RuleError> {
        if let Some(pattern) = pattern {
            if pattern.is_empty() {
                return Err(RuleError::EmptyField("pattern"));
            }
            validate_pattern(pattern)?;
        }
        if description.is_some_and(str::is_empty) {
            return Err(RuleError::EmptyField("description"));
        }

        self.modify(|rules| {
            let rule = rules
                .get_mut(index)
                .ok_or(RuleError::IndexOutOfRange(index))?;
            if let Some(pattern) = pattern {
                rule.pattern = pattern.to_string();
            }
            if let Some(description) = description {
                rule.description = description.to_string();
            }
            Ok(())
        })
    }

    pub fn set_enabled(&self, index: usize, enabled: bool) -> Result<(), RuleError> {
        self.modify(|rules| {
            let rule = rules
                .get_mut(index)
                .ok_or(RuleError::IndexOutOfRange(index))?;
            rule.enabled = enabled;
            Ok(())
        })
    }

    pub fn remove(&self, index: usize) -> Result<ConfusableRule, RuleError> {
        let mut removed = None;
        self.modify(|rules| {
            if index >= rules.len() {
                return Err(RuleError::IndexOutOfRange(index));
            }
            removed = Some(rules.remove(index));
            Ok(())
        })?;
        removed.ok_or(RuleError::IndexOutOfRange(index))
    }

    pub fn reset(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("rule store lock poisoned"))?;
        save_blob(self.store.as_ref(), RULES_KEY, &default_rules())?;
        log::info!("Confusable rules reset to defaults");
        Ok(())
    }

    fn modify<F>(&self, change: F) -> Result<(), RuleError>
    where
        F: FnOnce(&mut Vec<ConfusableRule>) -> Result<(), RuleError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("rule store lock poisoned"))?;
        let mut rules = self.list()?;
        change(&mut rules)?;
        save_blob(self.store.as_ref(), RULES_KEY, &rules)?;
        Ok(())
    }
}
