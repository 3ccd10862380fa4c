#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use urlhaus_guard::cache::VerdictCache;
use urlhaus_guard::clock::SystemClock;
use urlhaus_guard::lookup::{CheckOutcome, LookupOrchestrator};
use urlhaus_guard::rules::RuleStore;
use urlhaus_guard::settings::Settings;
use urlhaus_guard::store::{MemoryStore, StateStore};
use urlhaus_guard::UrlhausClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Testing REAL URLhaus lookups (not mock data)...");

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let settings = Settings::new(store.clone());
    if let Ok(key) = std::env::var("URLHAUS_API_KEY") {
        settings.set_api_key(&key)?;
    } else {
        println!("⚠ URLHAUS_API_KEY not set, querying without a credential");
    }

    let cache = Arc::new(VerdictCache::new(store.clone(), Arc::new(SystemClock)));
    let orchestrator = LookupOrchestrator::new(
        settings,
        RuleStore::new(store),
        cache,
        UrlhausClient::default(),
    );

    let test_urls = vec![
        "https://example.com/",
        "https://www.google.com/search?q=rust#results",
        "http://192.168.1.1/",
        "http://secure-rnicrosoft.com/login",
    ];

    for url in test_urls {
        println!("\n=== Checking: {} ===", url);
        match orchestrator.check(url).await {
            Ok(CheckOutcome::Malicious(report)) => {
                println!("🚨 Listed: {:?}", report);
            }
            Ok(outcome) => println!("Outcome: {:?}", outcome),
            Err(e) => println!("❌ Check failed: {}", e),
        }

        // second run must come from the cache
        match orchestrator.check(url).await {
            Ok(outcome) => println!("Repeat: {:?}", outcome),
            Err(e) => println!("❌ Repeat check failed: {}", e),
        }
    }

    println!("\n=== Cached verdicts ===");
    for entry in orchestrator.cache().load()? {
        println!(
            "  {} safe={} submitted={} ({}h left)",
            entry.key,
            entry.verdict_safe,
            entry.submitted,
            orchestrator.cache().remaining_hours(&entry)
        );
    }

    Ok(())
}
