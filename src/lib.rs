pub mod cache;
pub mod clock;
pub mod config;
pub mod confusable;
pub mod intel;
pub mod locality;
pub mod lookup;
pub mod normalizer;
pub mod rules;
pub mod session;
pub mod settings;
pub mod store;

pub use cache::{CacheEntry, VerdictCache};
pub use config::Config;
pub use confusable::{ConfusableMatcher, ConfusableScan};
pub use intel::{ThreatIntel, UrlhausClient};
pub use lookup::{CheckOutcome, LookupOrchestrator, SubmitOutcome};
pub use rules::{ConfusableRule, RuleStore};
pub use settings::Settings;
pub use store::{FileStore, MemoryStore, StateStore};
