//! Lookup orchestration.
//!
//! A check moves through [`CheckState`] by feeding it [`CheckInput`]s. The
//! transition function is pure; [`LookupOrchestrator`] is the driver that
//! reads settings and the cache, talks to the remote service and writes
//! verdicts back. Nothing here holds a lock across the network call, so
//! overlapping checks of the same key are allowed and the last one to
//! finish decides what is cached.

use crate::cache::{remaining_hours, CacheEntry, VerdictCache};
use crate::confusable::{detect, ConfusableScan};
use crate::intel::{IntelError, LookupResponse, ThreatIntel};
use crate::locality::is_non_public;
use crate::normalizer::{cache_key, hostname, is_web_url, NormalizationPolicy};
use crate::rules::RuleStore;
use crate::session::Trigger;
use crate::settings::Settings;
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// The URL being checked, reduced to what the rest of the flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub key: String,
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckState {
    Idle,
    Filtering { target: Target },
    CacheCheck { target: Target },
    CacheHitSafe { target: Target, remaining_hours: i64 },
    CacheHitMalicious { entry: CacheEntry, remaining_hours: i64 },
    QueryPending { target: Target },
    QuerySuccessSafe { entry: CacheEntry },
    QuerySuccessMalicious { entry: CacheEntry },
    QueryFailed { target: Target, error: IntelError },
    SkippedPrivate { target: Target },
}

#[derive(Debug, Clone)]
pub enum CheckInput {
    /// A raw URL from any trigger, with the policy in force right now.
    Trigger {
        raw_url: String,
        policy: NormalizationPolicy,
    },
    Classified { non_public: bool },
    CacheRead {
        entry: Option<CacheEntry>,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    },
    QueryResolved {
        result: Result<LookupResponse, IntelError>,
        now: DateTime<Utc>,
    },
}

impl CheckState {
    /// Advance by one input. Inputs that do not apply to the current state
    /// leave it unchanged.
    pub fn next(self, input: CheckInput) -> CheckState {
        match (self, input) {
            (CheckState::Idle, CheckInput::Trigger { raw_url, policy }) => {
                if !is_web_url(&raw_url) {
                    log::debug!("Not a web URL, nothing to check: {raw_url}");
                    return CheckState::Idle;
                }
                let key = cache_key(&raw_url, policy);
                let host = hostname(&raw_url);
                match (key, host) {
                    (Some(key), Some(hostname)) => CheckState::Filtering {
                        target: Target { key, hostname },
                    },
                    _ => {
                        log::debug!("Could not normalize {raw_url}");
                        CheckState::Idle
                    }
                }
            }
            (CheckState::Filtering { target }, CheckInput::Classified { non_public }) => {
                if non_public {
                    CheckState::SkippedPrivate { target }
                } else {
                    CheckState::CacheCheck { target }
                }
            }
            (CheckState::CacheCheck { target }, CheckInput::CacheRead { entry, now, ttl }) => {
                match entry {
                    Some(entry) if now - entry.observed_at < ttl => {
                        let remaining = remaining_hours(&entry, now, ttl);
                        if entry.verdict_safe {
                            CheckState::CacheHitSafe {
                                target,
                                remaining_hours: remaining,
                            }
                        } else {
                            CheckState::CacheHitMalicious {
                                entry,
                                remaining_hours: remaining,
                            }
                        }
                    }
                    _ => CheckState::QueryPending { target },
                }
            }
            (CheckState::QueryPending { target }, CheckInput::QueryResolved { result, now }) => {
                match result {
                    Ok(response) if response.is_listed() => CheckState::QuerySuccessMalicious {
                        entry: CacheEntry::malicious(
                            &target.key,
                            now,
                            response.threat,
                            response.tags.unwrap_or_default(),
                            response.url_status,
                        ),
                    },
                    Ok(_) => CheckState::QuerySuccessSafe {
                        entry: CacheEntry::safe(&target.key, now),
                    },
                    Err(error) => CheckState::QueryFailed { target, error },
                }
            }
            (state, input) => {
                log::debug!("Ignoring {input:?} in state {state:?}");
                state
            }
        }
    }

    /// States after which the driver returns to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckState::Idle
                | CheckState::CacheHitSafe { .. }
                | CheckState::CacheHitMalicious { .. }
                | CheckState::QuerySuccessSafe { .. }
                | CheckState::QuerySuccessMalicious { .. }
                | CheckState::QueryFailed { .. }
                | CheckState::SkippedPrivate { .. }
        )
    }
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Cache { remaining_hours: i64 },
    Live,
}

/// Everything the warning surface shows for a listed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaliciousReport {
    pub key: String,
    pub threat: Option<String>,
    pub tags: Vec<String>,
    pub url_status: Option<String>,
    pub source: VerdictSource,
    pub confusables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Unparseable or non-web URL. Nothing to report.
    NotCheckable,
    PrivateHost { key: String },
    Safe { key: String, source: VerdictSource },
    Malicious(MaliciousReport),
    Failed { key: String, error: IntelError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    NotCheckable,
    PrivateHost,
    AlreadySubmitted,
    AlreadyMalicious,
    EmptyComment,
}

impl std::fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            SubmitRejection::NotCheckable => "cannot determine the URL to submit",
            SubmitRejection::PrivateHost => "local or private addresses are never submitted",
            SubmitRejection::AlreadySubmitted => "this URL has already been submitted",
            SubmitRejection::AlreadyMalicious => "URLhaus already lists this URL as malicious",
            SubmitRejection::EmptyComment => "a comment is required",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// `cache_updated` is false when there was no cached verdict to mark.
    Submitted { key: String, cache_updated: bool },
    Rejected(SubmitRejection),
    Failed { key: String, error: IntelError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Check(CheckOutcome),
    Scan(ConfusableScan),
    Submit(SubmitOutcome),
}

/// Drives checks, submissions and page-load scans against shared state.
pub struct LookupOrchestrator<T: ThreatIntel> {
    settings: Settings,
    rules: RuleStore,
    cache: Arc<VerdictCache>,
    intel: T,
}

impl<T: ThreatIntel> LookupOrchestrator<T> {
    pub fn new(settings: Settings, rules: RuleStore, cache: Arc<VerdictCache>, intel: T) -> Self {
        Self {
            settings,
            rules,
            cache,
            intel,
        }
    }

    pub fn cache(&self) -> &VerdictCache {
        &self.cache
    }

    pub async fn handle(&self, trigger: Trigger) -> Result<TriggerOutcome> {
        match trigger {
            Trigger::Check { url } => Ok(TriggerOutcome::Check(self.check(&url).await?)),
            Trigger::PageLoad { url } => Ok(TriggerOutcome::Scan(self.scan_page(&url)?)),
            Trigger::Submit { url, comment } => {
                Ok(TriggerOutcome::Submit(self.submit(&url, &comment).await?))
            }
        }
    }

    /// Run a reputation check for `raw_url`.
    pub async fn check(&self, raw_url: &str) -> Result<CheckOutcome> {
        let policy = self.settings.policy()?;
        let mut state = CheckState::Idle.next(CheckInput::Trigger {
            raw_url: raw_url.to_string(),
            policy,
        });

        while !state.is_terminal() {
            state = match state {
                CheckState::Filtering { ref target } => {
                    let non_public = is_non_public(&target.key);
                    state.next(CheckInput::Classified { non_public })
                }
                CheckState::CacheCheck { ref target } => {
                    let entry = self.cache.get(&target.key)?;
                    let now = self.cache.now();
                    let ttl = self.cache.ttl();
                    state.next(CheckInput::CacheRead { entry, now, ttl })
                }
                CheckState::QueryPending { ref target } => {
                    let credential = self.settings.api_key()?;
                    log::info!("Querying URLhaus for {}", target.key);
                    let result = self.intel.lookup(&target.key, &credential).await;
                    let now = self.cache.now();
                    state.next(CheckInput::QueryResolved { result, now })
                }
                other => other,
            };
        }

        self.finish(state)
    }

    fn finish(&self, state: CheckState) -> Result<CheckOutcome> {
        let outcome = match state {
            CheckState::SkippedPrivate { target } => {
                log::info!("Local/private address, skipped: {}", target.key);
                CheckOutcome::PrivateHost { key: target.key }
            }
            CheckState::CacheHitSafe {
                target,
                remaining_hours,
            } => {
                log::info!(
                    "Cached verdict: {} is safe ({remaining_hours}h remaining)",
                    target.key
                );
                CheckOutcome::Safe {
                    key: target.key,
                    source: VerdictSource::Cache { remaining_hours },
                }
            }
            CheckState::CacheHitMalicious {
                entry,
                remaining_hours,
            } => {
                log::warn!("Cached verdict: {} is malicious", entry.key);
                CheckOutcome::Malicious(self.report(entry, VerdictSource::Cache { remaining_hours })?)
            }
            CheckState::QuerySuccessSafe { entry } => {
                log::info!("URLhaus has no record of {}", entry.key);
                let key = entry.key.clone();
                self.cache.put(entry)?;
                CheckOutcome::Safe {
                    key,
                    source: VerdictSource::Live,
                }
            }
            CheckState::QuerySuccessMalicious { entry } => {
                log::warn!(
                    "URLhaus lists {} ({})",
                    entry.key,
                    entry.threat.as_deref().unwrap_or("unknown threat")
                );
                self.cache.put(entry.clone())?;
                CheckOutcome::Malicious(self.report(entry, VerdictSource::Live)?)
            }
            CheckState::QueryFailed { target, error } => {
                log::warn!("URLhaus query for {} failed: {error}", target.key);
                CheckOutcome::Failed {
                    key: target.key,
                    error,
                }
            }
            _ => CheckOutcome::NotCheckable,
        };
        Ok(outcome)
    }

    fn report(&self, entry: CacheEntry, source: VerdictSource) -> Result<MaliciousReport> {
        let confusables = match hostname(&entry.key) {
            Some(host) => detect(&host, &self.rules.list()?).matches,
            None => Vec::new(),
        };
        Ok(MaliciousReport {
            key: entry.key,
            threat: entry.threat,
            tags: entry.tags,
            url_status: entry.url_status,
            source,
            confusables,
        })
    }

    /// Report `raw_url` to the service with a reviewer comment.
    pub async fn submit(&self, raw_url: &str, comment: &str) -> Result<SubmitOutcome> {
        let policy = self.settings.policy()?;
        let Some(key) = cache_key(raw_url, policy) else {
            return Ok(SubmitOutcome::Rejected(SubmitRejection::NotCheckable));
        };

        if is_non_public(&key) {
            return Ok(SubmitOutcome::Rejected(SubmitRejection::PrivateHost));
        }

        if let Some(cached) = self.cache.get(&key)? {
            if cached.submitted {
                return Ok(SubmitOutcome::Rejected(SubmitRejection::AlreadySubmitted));
            }
            if !cached.verdict_safe {
                return Ok(SubmitOutcome::Rejected(SubmitRejection::AlreadyMalicious));
            }
        }

        let comment = comment.trim();
        if comment.is_empty() {
            return Ok(SubmitOutcome::Rejected(SubmitRejection::EmptyComment));
        }

        let credential = self.settings.api_key()?;
        match self.intel.submit(&key, comment, &credential).await {
            Ok(()) => {
                let cache_updated = self.cache.mark_submitted(&key)?;
                log::info!("Submitted {key} to URLhaus");
                Ok(SubmitOutcome::Submitted { key, cache_updated })
            }
            Err(error) => {
                log::warn!("Submission of {key} failed: {error}");
                Ok(SubmitOutcome::Failed { key, error })
            }
        }
    }

    /// Confusable scan run on page load. Non-web, unparseable and
    /// non-public URLs produce an empty scan.
    pub fn scan_page(&self, raw_url: &str) -> Result<ConfusableScan> {
        if !is_web_url(raw_url) || is_non_public(raw_url) {
            return Ok(ConfusableScan::default());
        }
        let Some(host) = hostname(raw_url) else {
            return Ok(ConfusableScan::default());
        };
        Ok(detect(&host, &self.rules.list()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{MemoryStore, StateStore};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockIntel {
        response: Mutex<Option<Result<LookupResponse, IntelError>>>,
        submit_result: Mutex<Option<Result<(), IntelError>>>,
        lookups: AtomicUsize,
        submissions: AtomicUsize,
        last_request: Mutex<Option<(String, String)>>,
    }

    impl MockIntel {
        fn answering(response: Result<LookupResponse, IntelError>) -> Self {
            let mock = Self::default();
            *mock.response.lock().unwrap() = Some(response);
            mock
        }
    }

    impl ThreatIntel for MockIntel {
        async fn lookup(&self, url: &str, credential: &str) -> Result<LookupResponse, IntelError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some((url.to_string(), credential.to_string()));
            self.response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(LookupResponse::default()))
        }

        async fn submit(&self, url: &str, comment: &str, _credential: &str) -> Result<(), IntelError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some((url.to_string(), comment.to_string()));
            self.submit_result.lock().unwrap().clone().unwrap_or(Ok(()))
        }
    }

    fn listed() -> LookupResponse {
        LookupResponse {
            query_status: "ok".to_string(),
            threat: Some("malware_download".to_string()),
            tags: Some(vec!["mal".to_string()]),
            url_status: Some("online".to_string()),
        }
    }

    fn unlisted() -> LookupResponse {
        LookupResponse {
            query_status: "no_results".to_string(),
            ..Default::default()
        }
    }

    struct Fixture {
        orchestrator: LookupOrchestrator<MockIntel>,
        clock: Arc<ManualClock>,
        settings: Settings,
    }

    fn fixture(intel: MockIntel) -> Fixture {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        ));
        let settings = Settings::new(store.clone());
        // full-URL keys unless a test switches the policy
        settings.set_domain_only(false).unwrap();
        let cache = Arc::new(VerdictCache::new(store.clone(), clock.clone()));
        let orchestrator =
            LookupOrchestrator::new(settings.clone(), RuleStore::new(store), cache, intel);
        Fixture {
            orchestrator,
            clock,
            settings,
        }
    }

    fn target(key: &str, host: &str) -> Target {
        Target {
            key: key.to_string(),
            hostname: host.to_string(),
        }
    }

    #[test]
    fn test_transition_unparseable_stays_idle() {
        let state = CheckState::Idle.next(CheckInput::Trigger {
            raw_url: "not a url".to_string(),
            policy: NormalizationPolicy::default(),
        });
        assert_eq!(state, CheckState::Idle);

        let state = CheckState::Idle.next(CheckInput::Trigger {
            raw_url: "ftp://files.example/x".to_string(),
            policy: NormalizationPolicy::default(),
        });
        assert_eq!(state, CheckState::Idle);
    }

    #[test]
    fn test_transition_trigger_applies_policy() {
        let state = CheckState::Idle.next(CheckInput::Trigger {
            raw_url: "https://evil.example/a/b?c=d#e".to_string(),
            policy: NormalizationPolicy { domain_only: true },
        });
        assert_eq!(
            state,
            CheckState::Filtering {
                target: target("https://evil.example/", "evil.example")
            }
        );
    }

    #[test]
    fn test_transition_private_short_circuits() {
        let state = CheckState::Filtering {
            target: target("http://192.168.1.1/", "192.168.1.1"),
        }
        .next(CheckInput::Classified { non_public: true });
        assert!(matches!(state, CheckState::SkippedPrivate { .. }));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_transition_stale_entry_is_a_miss() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let stale = CacheEntry::safe("http://a.example/", now - TimeDelta::hours(24));
        let state = CheckState::CacheCheck {
            target: target("http://a.example/", "a.example"),
        }
        .next(CheckInput::CacheRead {
            entry: Some(stale),
            now,
            ttl: TimeDelta::hours(24),
        });
        assert!(matches!(state, CheckState::QueryPending { .. }));
    }

    #[test]
    fn test_transition_query_results() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let pending = || CheckState::QueryPending {
            target: target("http://a.example/", "a.example"),
        };

        match pending().next(CheckInput::QueryResolved {
            result: Ok(listed()),
            now,
        }) {
            CheckState::QuerySuccessMalicious { entry } => {
                assert!(!entry.verdict_safe);
                assert!(entry.submitted);
                assert_eq!(entry.observed_at, now);
            }
            other => panic!("unexpected state {other:?}"),
        }

        match pending().next(CheckInput::QueryResolved {
            result: Ok(unlisted()),
            now,
        }) {
            CheckState::QuerySuccessSafe { entry } => {
                assert!(entry.verdict_safe);
                assert!(!entry.submitted);
            }
            other => panic!("unexpected state {other:?}"),
        }

        let failed = pending().next(CheckInput::QueryResolved {
            result: Err(IntelError::Transport("connection reset".to_string())),
            now,
        });
        assert!(matches!(failed, CheckState::QueryFailed { .. }));
    }

    #[test]
    fn test_transition_ignores_mismatched_input() {
        let state = CheckState::Idle.next(CheckInput::Classified { non_public: false });
        assert_eq!(state, CheckState::Idle);
    }

    #[tokio::test]
    async fn test_end_to_end_malicious_then_cache_hit() {
        for domain_only in [false, true] {
            let f = fixture(MockIntel::answering(Ok(listed())));
            f.settings.set_domain_only(domain_only).unwrap();

            let first = f.orchestrator.check("http://evil.example/x").await.unwrap();
            let CheckOutcome::Malicious(report) = first else {
                panic!("expected malicious verdict");
            };
            assert_eq!(report.source, VerdictSource::Live);
            assert_eq!(report.threat.as_deref(), Some("malware_download"));
            assert_eq!(report.tags, vec!["mal".to_string()]);
            assert_eq!(report.url_status.as_deref(), Some("online"));
            assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 1);

            let entry = f.orchestrator.cache().get(&report.key).unwrap().unwrap();
            assert!(!entry.verdict_safe);
            assert!(entry.submitted);

            f.clock.advance(TimeDelta::hours(3));
            let second = f.orchestrator.check("http://evil.example/x").await.unwrap();
            let CheckOutcome::Malicious(report) = second else {
                panic!("expected cached malicious verdict");
            };
            let VerdictSource::Cache { remaining_hours } = report.source else {
                panic!("expected a cache hit");
            };
            assert!((1..=24).contains(&remaining_hours));
            assert_eq!(remaining_hours, 21);
            assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_key_sent_to_service_follows_policy() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));
        f.settings.set_api_key("secret").unwrap();

        f.orchestrator
            .check("https://shop.example/cart#top")
            .await
            .unwrap();
        assert_eq!(
            f.orchestrator.intel.last_request.lock().unwrap().clone(),
            Some(("https://shop.example/cart".to_string(), "secret".to_string()))
        );

        f.settings.set_domain_only(true).unwrap();
        f.orchestrator
            .check("https://shop.example/cart#top")
            .await
            .unwrap();
        assert_eq!(
            f.orchestrator.intel.last_request.lock().unwrap().clone(),
            Some(("https://shop.example/".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fresh_install_queries_domain_only() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        ));
        let cache = Arc::new(VerdictCache::new(store.clone(), clock));
        let orchestrator = LookupOrchestrator::new(
            Settings::new(store.clone()),
            RuleStore::new(store),
            cache,
            MockIntel::answering(Ok(unlisted())),
        );

        let outcome = orchestrator
            .check("https://evil.example/a/b?x=1")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::Safe {
                key: "https://evil.example/".to_string(),
                source: VerdictSource::Live
            }
        );
        assert_eq!(
            orchestrator.intel.last_request.lock().unwrap().clone(),
            Some(("https://evil.example/".to_string(), String::new()))
        );
    }

    #[tokio::test]
    async fn test_safe_verdict_cached() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));

        let first = f.orchestrator.check("https://example.com/").await.unwrap();
        assert_eq!(
            first,
            CheckOutcome::Safe {
                key: "https://example.com/".to_string(),
                source: VerdictSource::Live
            }
        );

        let second = f.orchestrator.check("https://example.com/").await.unwrap();
        assert_eq!(
            second,
            CheckOutcome::Safe {
                key: "https://example.com/".to_string(),
                source: VerdictSource::Cache {
                    remaining_hours: 24
                }
            }
        );
        assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 1);

        f.clock.advance(TimeDelta::hours(24));
        f.orchestrator.check("https://example.com/").await.unwrap();
        assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let f = fixture(MockIntel::answering(Err(IntelError::Parse(
            "expected value".to_string(),
        ))));

        let outcome = f.orchestrator.check("https://flaky.example/").await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Failed { .. }));
        assert!(f.orchestrator.cache().load().unwrap().is_empty());

        f.orchestrator.check("https://flaky.example/").await.unwrap();
        assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_private_and_unparseable_never_query() {
        let f = fixture(MockIntel::answering(Ok(listed())));

        let outcome = f.orchestrator.check("http://10.0.0.5/admin").await.unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::PrivateHost {
                key: "http://10.0.0.5/admin".to_string()
            }
        );
        assert_eq!(
            f.orchestrator.check("definitely not a url").await.unwrap(),
            CheckOutcome::NotCheckable
        );
        assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 0);
        assert!(f.orchestrator.cache().load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malicious_report_includes_confusables() {
        let f = fixture(MockIntel::answering(Ok(listed())));
        let outcome = f
            .orchestrator
            .check("https://secure-rnicrosoft.com/login")
            .await
            .unwrap();
        let CheckOutcome::Malicious(report) = outcome else {
            panic!("expected malicious verdict");
        };
        assert_eq!(report.confusables, vec!["rn → m confusion".to_string()]);
    }

    #[tokio::test]
    async fn test_submit_rejected_when_already_submitted() {
        let f = fixture(MockIntel::answering(Ok(listed())));
        f.orchestrator.check("http://evil.example/x").await.unwrap();

        let outcome = f
            .orchestrator
            .submit("http://evil.example/x", "phishing kit")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected(SubmitRejection::AlreadySubmitted)
        );
        assert_eq!(f.orchestrator.intel.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_rejected_when_known_malicious() {
        let f = fixture(MockIntel::default());
        let mut entry = CacheEntry::malicious(
            "https://bad.example/",
            f.clock.now(),
            None,
            Vec::new(),
            None,
        );
        entry.submitted = false;
        f.orchestrator.cache().put(entry).unwrap();

        let outcome = f
            .orchestrator
            .submit("https://bad.example/", "fake bank")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected(SubmitRejection::AlreadyMalicious)
        );
        assert_eq!(f.orchestrator.intel.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_guards() {
        let f = fixture(MockIntel::default());

        assert_eq!(
            f.orchestrator
                .submit("http://localhost:8080/", "test")
                .await
                .unwrap(),
            SubmitOutcome::Rejected(SubmitRejection::PrivateHost)
        );
        assert_eq!(
            f.orchestrator.submit("::nonsense::", "test").await.unwrap(),
            SubmitOutcome::Rejected(SubmitRejection::NotCheckable)
        );
        assert_eq!(
            f.orchestrator
                .submit("https://phish.example/", "   ")
                .await
                .unwrap(),
            SubmitOutcome::Rejected(SubmitRejection::EmptyComment)
        );
        assert_eq!(f.orchestrator.intel.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_marks_cached_entry() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));
        f.orchestrator.check("https://phish.example/").await.unwrap();

        f.clock.advance(TimeDelta::hours(10));
        let outcome = f
            .orchestrator
            .submit("https://phish.example/", "  fake login page ")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                key: "https://phish.example/".to_string(),
                cache_updated: true
            }
        );
        assert_eq!(
            f.orchestrator.intel.last_request.lock().unwrap().clone(),
            Some((
                "https://phish.example/".to_string(),
                "fake login page".to_string()
            ))
        );

        let entry = f
            .orchestrator
            .cache()
            .get("https://phish.example/")
            .unwrap()
            .unwrap();
        assert!(entry.submitted);
        assert_eq!(entry.observed_at, f.clock.now());

        let again = f
            .orchestrator
            .submit("https://phish.example/", "again")
            .await
            .unwrap();
        assert_eq!(again, SubmitOutcome::Rejected(SubmitRejection::AlreadySubmitted));
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_cache_alone() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));
        *f.orchestrator.intel.submit_result.lock().unwrap() =
            Some(Err(IntelError::Transport("timed out".to_string())));
        f.orchestrator.check("https://phish.example/").await.unwrap();

        let outcome = f
            .orchestrator
            .submit("https://phish.example/", "fake login")
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));

        let entry = f
            .orchestrator
            .cache()
            .get("https://phish.example/")
            .unwrap()
            .unwrap();
        assert!(!entry.submitted);
    }

    #[tokio::test]
    async fn test_submit_without_cached_entry() {
        let f = fixture(MockIntel::default());
        let outcome = f
            .orchestrator
            .submit("https://fresh.example/path", "typosquat")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                key: "https://fresh.example/path".to_string(),
                cache_updated: false
            }
        );
        assert!(f.orchestrator.cache().load().unwrap().is_empty());
    }

    #[test]
    fn test_scan_page() {
        let f = fixture(MockIntel::default());

        let scan = f
            .orchestrator
            .scan_page("https://secure-rnicrosoft.com/")
            .unwrap();
        assert_eq!(scan.matches, vec!["rn → m confusion".to_string()]);

        assert!(f
            .orchestrator
            .scan_page("https://example.com/")
            .unwrap()
            .matches
            .is_empty());
        assert!(f
            .orchestrator
            .scan_page("http://rnail.local/")
            .unwrap()
            .matches
            .is_empty());
        assert!(f
            .orchestrator
            .scan_page("ftp://rnail.example/")
            .unwrap()
            .matches
            .is_empty());
    }

    #[tokio::test]
    async fn test_handle_dispatches_triggers() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));

        let scan = f
            .orchestrator
            .handle(Trigger::PageLoad {
                url: "https://vvalmart.example/".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            scan,
            TriggerOutcome::Scan(ConfusableScan {
                matches: vec!["vv → w confusion".to_string()],
                warnings: Vec::new(),
            })
        );
        assert_eq!(f.orchestrator.intel.lookups.load(Ordering::SeqCst), 0);

        let check = f
            .orchestrator
            .handle(Trigger::Check {
                url: "https://vvalmart.example/".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(
            check,
            TriggerOutcome::Check(CheckOutcome::Safe { .. })
        ));

        let submit = f
            .orchestrator
            .handle(Trigger::Submit {
                url: "https://vvalmart.example/".to_string(),
                comment: "brand look-alike".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(
            submit,
            TriggerOutcome::Submit(SubmitOutcome::Submitted {
                cache_updated: true,
                ..
            })
        ));
    }

    #[test]
    fn test_overlapping_checks_last_write_wins() {
        let f = fixture(MockIntel::answering(Ok(unlisted())));
        let cache = f.orchestrator.cache();

        let pending = CheckState::QueryPending {
            target: target("https://race.example/", "race.example"),
        };
        let early = pending.clone().next(CheckInput::QueryResolved {
            result: Ok(listed()),
            now: f.clock.now(),
        });
        f.clock.advance(TimeDelta::seconds(2));
        let late = pending.next(CheckInput::QueryResolved {
            result: Ok(unlisted()),
            now: f.clock.now(),
        });

        // the later-started query completes first
        if let CheckState::QuerySuccessSafe { entry } = late {
            cache.put(entry).unwrap();
        }
        if let CheckState::QuerySuccessMalicious { entry } = early {
            cache.put(entry).unwrap();
        }

        let entries = cache.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].verdict_safe);
    }
}
