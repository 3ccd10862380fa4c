use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use urlhaus_guard::cache::VerdictCache;
use urlhaus_guard::clock::SystemClock;
use urlhaus_guard::config::Config;
use urlhaus_guard::lookup::{
    CheckOutcome, LookupOrchestrator, SubmitOutcome, TriggerOutcome, VerdictSource,
};
use urlhaus_guard::rules::RuleStore;
use urlhaus_guard::session::{resolve_location, Trigger};
use urlhaus_guard::settings::Settings;
use urlhaus_guard::store::{FileStore, StateStore};
use urlhaus_guard::UrlhausClient;

const DEFAULT_CONFIG_PATH: &str = "/etc/urlhaus-guard.yaml";

fn original_url_arg() -> Arg {
    Arg::new("original-url")
        .long("original-url")
        .value_name("URL")
        .help("Page the user asked for when URL is a challenge interstitial")
}

fn index_arg() -> Arg {
    Arg::new("index")
        .value_name("INDEX")
        .help("Rule position as shown by `rules list`")
        .value_parser(clap::value_parser!(usize))
        .required(true)
}

fn cli() -> Command {
    Command::new("urlhaus-guard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Check URLs against URLhaus with a 24h local verdict cache and look-alike hostname detection")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .value_name("FILE")
                .help("State file holding cache, rules and settings (overrides config)"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("check")
                .about("Look up a URL (cache first, then URLhaus)")
                .arg(Arg::new("url").value_name("URL").required(true))
                .arg(original_url_arg()),
        )
        .subcommand(
            Command::new("scan")
                .about("Run the look-alike hostname scan for a URL")
                .arg(Arg::new("url").value_name("URL").required(true))
                .arg(original_url_arg()),
        )
        .subcommand(
            Command::new("submit")
                .about("Submit a URL to URLhaus")
                .arg(Arg::new("url").value_name("URL").required(true))
                .arg(original_url_arg())
                .arg(
                    Arg::new("comment")
                        .short('m')
                        .long("comment")
                        .value_name("TEXT")
                        .help("Why the URL is malicious (required)")
                        .default_value(""),
                ),
        )
        .subcommand(
            Command::new("rules")
                .about("Manage look-alike detection rules")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List rules"))
                .subcommand(
                    Command::new("add")
                        .about("Add a rule")
                        .arg(Arg::new("pattern").value_name("PATTERN").required(true))
                        .arg(Arg::new("description").value_name("DESC").required(true)),
                )
                .subcommand(
                    Command::new("edit")
                        .about("Change a rule's pattern or description")
                        .arg(index_arg())
                        .arg(Arg::new("pattern").long("pattern").value_name("PATTERN"))
                        .arg(
                            Arg::new("description")
                                .long("description")
                                .value_name("DESC"),
                        ),
                )
                .subcommand(Command::new("enable").about("Enable a rule").arg(index_arg()))
                .subcommand(Command::new("disable").about("Disable a rule").arg(index_arg()))
                .subcommand(Command::new("delete").about("Delete a rule").arg(index_arg()))
                .subcommand(Command::new("reset").about("Restore the default rules")),
        )
        .subcommand(
            Command::new("cache")
                .about("Inspect or prune cached verdicts")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List fresh verdicts"))
                .subcommand(
                    Command::new("delete")
                        .about("Delete the verdict for one key")
                        .arg(Arg::new("key").value_name("KEY").required(true)),
                )
                .subcommand(Command::new("clear").about("Delete all verdicts")),
        )
        .subcommand(
            Command::new("policy")
                .about("Show or set domain-only normalization")
                .arg(
                    Arg::new("domain-only")
                        .value_name("on|off")
                        .value_parser(["on", "off"]),
                ),
        )
        .subcommand(
            Command::new("api-key")
                .about("Store the URLhaus API key")
                .arg(Arg::new("key").value_name("KEY").required(true)),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let (mut config, found) = match load_config(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config.log_level()
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if !found {
        log::warn!("Configuration file '{config_path}' not found, using default configuration");
    }
    if let Some(state) = matches.get_one::<String>("state") {
        config.state_path = state.clone();
    }

    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(&config.state_path));
    log::debug!("Using state file {}", config.state_path);

    let code = match run(&matches, &config, store).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e}");
            1
        }
    };
    process::exit(code);
}

fn load_config(path: &str) -> anyhow::Result<(Config, bool)> {
    if std::path::Path::new(path).exists() {
        Ok((Config::from_file(path)?, true))
    } else {
        Ok((Config::default(), false))
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

async fn run(matches: &ArgMatches, config: &Config, store: Arc<dyn StateStore>) -> anyhow::Result<i32> {
    let settings = Settings::new(store.clone());
    let rules = RuleStore::new(store.clone());
    let cache = Arc::new(VerdictCache::with_ttl(
        store,
        Arc::new(SystemClock),
        config.cache_ttl()?,
    ));

    match matches.subcommand() {
        Some(("check", sub)) | Some(("scan", sub)) | Some(("submit", sub)) => {
            let location = required(sub, "url")?;
            let original = sub.get_one::<String>("original-url").map(String::as_str);
            let url = resolve_location(original, &location).ok_or_else(|| {
                anyhow::anyhow!("{location} is a challenge page; pass --original-url")
            })?;
            let trigger = match matches.subcommand_name() {
                Some("check") => Trigger::Check { url },
                Some("scan") => Trigger::PageLoad { url },
                _ => Trigger::Submit {
                    url,
                    comment: required(sub, "comment")?,
                },
            };

            let client = UrlhausClient::new(
                &config.urlhaus.lookup_endpoint,
                &config.urlhaus.submit_endpoint,
                &config.urlhaus.user_agent,
                config.urlhaus.timeout_seconds,
            )?;
            let orchestrator = LookupOrchestrator::new(settings, rules, cache, client);
            let outcome = orchestrator.handle(trigger).await?;
            Ok(print_outcome(&outcome))
        }
        Some(("rules", sub)) => {
            manage_rules(sub, &rules)?;
            Ok(0)
        }
        Some(("cache", sub)) => {
            manage_cache(sub, &cache)?;
            Ok(0)
        }
        Some(("policy", sub)) => {
            if let Some(value) = sub.get_one::<String>("domain-only") {
                settings.set_domain_only(value == "on")?;
            }
            let policy = settings.policy()?;
            println!(
                "Domain-only normalization: {}",
                if policy.domain_only { "on" } else { "off" }
            );
            Ok(0)
        }
        Some(("api-key", sub)) => {
            settings.set_api_key(&required(sub, "key")?)?;
            println!("✅ API key saved");
            Ok(0)
        }
        _ => {
            cli().print_help()?;
            println!();
            Ok(0)
        }
    }
}

fn required(matches: &ArgMatches, name: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing argument: {name}"))
}

fn print_outcome(outcome: &TriggerOutcome) -> i32 {
    match outcome {
        TriggerOutcome::Check(CheckOutcome::NotCheckable) => 0,
        TriggerOutcome::Check(CheckOutcome::PrivateHost { .. }) => {
            println!("🟢 Local/private address, not checked");
            0
        }
        TriggerOutcome::Check(CheckOutcome::Safe { source, .. }) => {
            match source {
                VerdictSource::Cache { remaining_hours } => {
                    println!("🟢 URLhaus cache: confirmed safe ({remaining_hours}h remaining)")
                }
                VerdictSource::Live => println!("🟢 URLhaus live query: no threat found"),
            }
            0
        }
        TriggerOutcome::Check(CheckOutcome::Malicious(report)) => {
            println!("🚨 MALICIOUS: {}", report.key);
            println!("═══════════════════════════════════════");
            match report.source {
                VerdictSource::Cache { remaining_hours } => {
                    println!("  Source: cache hit ({remaining_hours}h remaining)")
                }
                VerdictSource::Live => println!("  Source: live URLhaus query"),
            }
            println!("  Threat: {}", report.threat.as_deref().unwrap_or("unknown"));
            if report.tags.is_empty() {
                println!("  Tags:   none");
            } else {
                println!("  Tags:   {}", report.tags.join(", "));
            }
            println!(
                "  Status: {}",
                report.url_status.as_deref().unwrap_or("unknown")
            );
            if !report.confusables.is_empty() {
                println!("  ⚠ Look-alike patterns: {}", report.confusables.join(", "));
            }
            2
        }
        TriggerOutcome::Check(CheckOutcome::Failed { error, .. }) => {
            println!("❌ URLhaus query failed: {error}");
            1
        }
        TriggerOutcome::Scan(scan) => {
            for warning in &scan.warnings {
                println!(
                    "⚠ Rule {} ('{}') skipped: {}",
                    warning.index, warning.pattern, warning.reason
                );
            }
            if scan.is_suspicious() {
                println!("⚠ Suspicious look-alike patterns: {}", scan.matches.join(", "));
            } else {
                println!("✅ No look-alike patterns");
            }
            0
        }
        TriggerOutcome::Submit(SubmitOutcome::Submitted { key, .. }) => {
            println!("✅ Submitted to URLhaus: {key}");
            0
        }
        TriggerOutcome::Submit(SubmitOutcome::Rejected(reason)) => {
            println!("🚫 Not submitted: {reason}");
            0
        }
        TriggerOutcome::Submit(SubmitOutcome::Failed { error, .. }) => {
            println!("❌ Submission failed: {error}");
            1
        }
    }
}

fn manage_rules(matches: &ArgMatches, rules: &RuleStore) -> anyhow::Result<()> {
    let index = || {
        matches
            .subcommand()
            .and_then(|(_, sub)| sub.get_one::<usize>("index").copied())
            .ok_or_else(|| anyhow::anyhow!("missing argument: index"))
    };

    match matches.subcommand() {
        Some(("list", _)) => {
            for (i, rule) in rules.list()?.iter().enumerate() {
                let mark = if rule.enabled { "✔" } else { " " };
                println!("{i:>3} [{mark}] {:<24} {}", rule.pattern, rule.description);
            }
        }
        Some(("add", sub)) => {
            rules.add(&required(sub, "pattern")?, &required(sub, "description")?)?;
            println!("✅ Rule added");
        }
        Some(("edit", sub)) => {
            rules.edit(
                index()?,
                sub.get_one::<String>("pattern").map(String::as_str),
                sub.get_one::<String>("description").map(String::as_str),
            )?;
            println!("✅ Rule updated");
        }
        Some(("enable", _)) => {
            let position = index()?;
            rules.set_enabled(position, true)?;
            println!("✅ Rule {position} enabled");
        }
        Some(("disable", _)) => {
            let position = index()?;
            rules.set_enabled(position, false)?;
            println!("✅ Rule {position} disabled");
        }
        Some(("delete", _)) => {
            let removed = rules.remove(index()?)?;
            println!("🗑 Removed rule '{}' ({})", removed.pattern, removed.description);
        }
        Some(("reset", _)) => {
            rules.reset()?;
            println!("✅ Rules reset to defaults");
        }
        _ => {}
    }
    Ok(())
}

fn manage_cache(matches: &ArgMatches, cache: &VerdictCache) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => {
            let entries = cache.load()?;
            if entries.is_empty() {
                println!("📭 No cached verdicts");
                return Ok(());
            }
            println!(
                "{:<48} {:>4} {:<18} {:<20} {:>9} {:>5}",
                "URL", "Safe", "Threat", "Tags", "Submitted", "Left"
            );
            for entry in entries {
                println!(
                    "{:<48} {:>4} {:<18} {:<20} {:>9} {:>4}h",
                    truncate_string(&entry.key, 48),
                    if entry.verdict_safe { "🟢" } else { "🔴" },
                    truncate_string(entry.threat.as_deref().unwrap_or("-"), 18),
                    truncate_string(
                        &if entry.tags.is_empty() {
                            "-".to_string()
                        } else {
                            entry.tags.join(", ")
                        },
                        20
                    ),
                    if entry.submitted { "✔" } else { "" },
                    cache.remaining_hours(&entry)
                );
            }
        }
        Some(("delete", sub)) => {
            let key = required(sub, "key")?;
            if cache.remove(&key)? {
                println!("🗑 Removed {key}");
            } else {
                println!("No cached verdict for {key}");
            }
        }
        Some(("clear", _)) => {
            cache.clear()?;
            println!("✅ Cache cleared");
        }
        _ => {}
    }
    Ok(())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
