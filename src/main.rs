mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use scanward::ScanPipeline;
use scanward::config::Settings;
use scanward::events::{EventBus, serve_events};
use scanward::pipeline::FileScan;
use scanward::scan::{CacheStore, DenyListStore, Resolution};
use scanward::watch::{CancelToken, FolderWatchSupervisor};

use cli::{Cli, Command};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Arc::new(Settings::load(&cli.config)?);

    match cli.command {
        Command::Url { url } => {
            let pipeline = ScanPipeline::open(Arc::clone(&settings), Arc::new(EventBus::new()))?;
            match pipeline.scan_url(&url)? {
                Some(resolution) => print_resolution(&resolution, cli.json),
                None => println!("Scanning is disabled in {}", cli.config.display()),
            }
        }
        Command::File { path } => {
            let pipeline = ScanPipeline::open(Arc::clone(&settings), Arc::new(EventBus::new()))?;
            match pipeline.scan_file(&path)? {
                Some(scan) => print_file_scan(&scan, cli.json),
                None => println!("Scanning is disabled in {}", cli.config.display()),
            }
        }
        Command::Watch => watch(settings)?,
        Command::Purge { days } => {
            let cache = CacheStore::open(&settings.cache_db_path)
                .context("failed to open scan cache")?;
            let retention = match days {
                Some(days) => chrono::Duration::days(i64::from(days)),
                None => settings.cache_retention(),
            };
            let removed = cache.purge_older_than(retention)?;
            println!("Purged {} cached verdicts older than {} days", removed, retention.num_days());
        }
        Command::History { limit } => {
            let cache = CacheStore::open(&settings.cache_db_path)
                .context("failed to open scan cache")?;
            let entries = cache.list_recent(limit)?;
            if cli.json {
                print_json(&entries);
            } else {
                for entry in entries {
                    println!(
                        "{}  {:<6} {:>3} malicious {:>3} suspicious  {}",
                        entry.last_scanned.format("%Y-%m-%d %H:%M:%S"),
                        entry.key.kind.as_str(),
                        entry.verdict.counts.malicious,
                        entry.verdict.counts.suspicious,
                        entry.key.value
                    );
                }
            }
        }
        Command::Denylist { limit } => {
            let denylist = DenyListStore::open(&settings.denylist_db_path)
                .context("failed to open deny-list")?;
            let entries = denylist.list(limit)?;
            if cli.json {
                print_json(&entries);
            } else {
                for entry in entries {
                    println!("{}  {}", entry.added_at.format("%Y-%m-%d %H:%M:%S"), entry.sha256);
                }
            }
        }
    }

    Ok(())
}

fn watch(settings: Arc<Settings>) -> Result<()> {
    if !settings.scanning_enabled {
        log::warn!("Scanning is disabled; not starting folder watchers");
        return Ok(());
    }
    if settings.watch_folders.is_empty() {
        bail!("no watch_folders configured");
    }

    let bus = Arc::new(EventBus::new());
    let pipeline = Arc::new(ScanPipeline::open(Arc::clone(&settings), Arc::clone(&bus))?);

    match pipeline
        .resolver()
        .cache()
        .purge_older_than(settings.cache_retention())
    {
        Ok(0) => {}
        Ok(removed) => log::info!("Purged {} stale cached verdicts", removed),
        Err(e) => log::warn!("Cache purge failed: {}", e),
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("Received Ctrl+C, shutting down watchers...");
            cancel.cancel();
        })
        .context("failed to install Ctrl+C handler")?;
    }

    let server = match settings.events_addr {
        Some(ref addr) => Some(
            serve_events(addr.as_str(), Arc::clone(&bus), cancel.clone())
                .with_context(|| format!("failed to listen on {}", addr))?,
        ),
        None => None,
    };

    let supervisor = FolderWatchSupervisor::new(Arc::clone(&settings), pipeline);
    let threads = supervisor.spawn(&cancel);

    while cancel.sleep(Duration::from_secs(1)) {}

    for handle in threads {
        if handle.join().is_err() {
            log::error!("A watch thread panicked");
        }
    }
    if let Some(handle) = server {
        let _ = handle.join();
    }

    log::info!("All watchers stopped");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to encode output: {}", e),
    }
}

fn print_resolution(resolution: &Resolution, json: bool) {
    if json {
        print_json(resolution);
        return;
    }

    let verdict = &resolution.verdict;
    println!("Subject: {}", resolution.key.value);
    println!("Origin:  {}", resolution.origin);
    if let Some(ref reason) = resolution.degraded {
        println!("Note:    could not scan remotely ({})", reason);
    }
    if !verdict.has_data() {
        println!("No engine data available");
        return;
    }
    println!(
        "Engines: {} ({} malicious, {} suspicious, {} harmless, {} clean)",
        verdict.engine_count(),
        verdict.counts.malicious,
        verdict.counts.suspicious,
        verdict.counts.harmless,
        verdict.counts.clean
    );
    for (engine, category) in verdict.flagged_engines() {
        println!("  {:<24} {}", engine, category);
    }
}

fn print_file_scan(scan: &FileScan, json: bool) {
    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            digests: &'a scanward::scan::Digests,
            resolution: &'a Resolution,
        }
        print_json(&Output {
            digests: &scan.digests,
            resolution: &scan.resolution,
        });
        return;
    }

    println!("MD5:     {}", scan.digests.md5);
    println!("SHA256:  {}", scan.digests.sha256);
    print_resolution(&scan.resolution, false);
}
