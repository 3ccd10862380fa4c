use crate::rules::ConfusableRule;
use regex::Regex;

/// A rule that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWarning {
    pub index: usize,
    pub pattern: String,
    pub reason: String,
}

/// Result of matching one hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusableScan {
    /// Descriptions of matching rules, in rule order.
    pub matches: Vec<String>,
    pub warnings: Vec<RuleWarning>,
}

impl ConfusableScan {
    pub fn is_suspicious(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Enabled rules compiled once, reusable across hostnames.
///
/// Matching is a plain regex search over the hostname as given. No IDN
/// decoding or case folding happens, so an IDN host parsed from a URL is
/// seen in its `xn--` form.
pub struct ConfusableMatcher {
    compiled: Vec<(Regex, String)>,
    warnings: Vec<RuleWarning>,
}

impl ConfusableMatcher {
    pub fn new(rules: &[ConfusableRule]) -> Self {
        let mut compiled = Vec::new();
        let mut warnings = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            if !rule.enabled {
                continue;
            }
            match Regex::new(&rule.pattern) {
                Ok(regex) => compiled.push((regex, rule.description.clone())),
                Err(e) => {
                    log::warn!(
                        "Skipping confusable rule {index} ('{}'): {e}",
                        rule.pattern
                    );
                    warnings.push(RuleWarning {
                        index,
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Self { compiled, warnings }
    }

    pub fn warnings(&self) -> &[RuleWarning] {
        &self.warnings
    }

    pub fn scan(&self, hostname: &str) -> ConfusableScan {
        let matches: Vec<String> = self
            .compiled
            .iter()
            .filter(|(regex, _)| regex.is_match(hostname))
            .map(|(_, description)| description.clone())
            .collect();

        if !matches.is_empty() {
            log::debug!("Confusable patterns in {hostname}: {matches:?}");
        }

        ConfusableScan {
            matches,
            warnings: self.warnings.clone(),
        }
    }
}

/// One-shot matching of `hostname` against `rules`.
pub fn detect(hostname: &str, rules: &[ConfusableRule]) -> ConfusableScan {
    ConfusableMatcher::new(rules).scan(hostname)
}
