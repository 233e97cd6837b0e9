use clap::{Arg, ArgAction, ArgMatches, Command};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rscscan::{
    config::{ScanConfig, ScanMode},
    output::{save_results, OutputConfig, OutputFormat, OutputManager},
    probe::HttpProber,
    scanner::{scan_targets_with, JobResult, ScanOrchestrator, ScanSummary},
    target::Target,
    utils::{read_targets, scan_project},
};

fn build_cli() -> Command {
    Command::new("rscscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent scanner for the React Server Components RCE vulnerability")
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Target URL to scan (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .value_name("FILE")
                .help("Read targets from file (plain text or JSON array)"),
        )
        .arg(
            Arg::new("local")
                .long("local")
                .value_name("PATH")
                .help("Read pinned versions from a project directory instead of scanning URLs")
                .conflicts_with_all(["url", "list"]),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Load configuration from TOML file"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_name("MODE")
                .help("Scan mode: version, safe, rce, comprehensive (safe and rce need a payload-capable prober)")
                .value_parser(["version", "safe", "rce", "comprehensive"]),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("Number of concurrent scan jobs")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECONDS")
                .help("Per-request timeout in seconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("insecure")
                .short('k')
                .long("insecure")
                .help("Skip TLS certificate verification (default)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verify-tls")
                .long("verify-tls")
                .help("Verify TLS certificates")
                .action(ArgAction::SetTrue)
                .conflicts_with("insecure"),
        )
        .arg(
            Arg::new("proxy")
                .long("proxy")
                .value_name("URL")
                .help("Proxy URL (http://host:port)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Save results to a JSON file"),
        )
        .arg(
            Arg::new("all-results")
                .long("all-results")
                .help("Save every result, not just vulnerable targets")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print one JSON object per result")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print vulnerable targets")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbose output")
                .action(ArgAction::SetTrue),
        )
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// File config (or `~/.rscscan.toml`) with command line overrides applied
fn resolve_config(matches: &ArgMatches) -> anyhow::Result<ScanConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => ScanConfig::load_default_config(),
    };

    if let Some(mode) = matches.get_one::<String>("mode") {
        config.mode = mode.parse::<ScanMode>().map_err(anyhow::Error::msg)?;
    }
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.workers = workers;
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_secs = timeout;
    }
    if let Some(proxy) = matches.get_one::<String>("proxy") {
        config.proxy = Some(proxy.clone());
    }
    if matches.get_flag("insecure") {
        config.verify_tls = false;
    } else if matches.get_flag("verify-tls") {
        config.verify_tls = true;
    }

    config.validate()?;
    Ok(config)
}

fn collect_targets(matches: &ArgMatches) -> anyhow::Result<Vec<Target>> {
    let mut targets = Vec::new();

    if let Some(urls) = matches.get_many::<String>("url") {
        for url in urls {
            match Target::parse(url) {
                Ok(target) => targets.push(target),
                Err(e) => eprintln!("{} {}", "[!]".bright_red(), e),
            }
        }
    }

    if let Some(path) = matches.get_one::<String>("list") {
        targets.extend(read_targets(path)?);
    }

    targets.sort();
    targets.dedup();
    Ok(targets)
}

fn print_banner(config: &ScanConfig, targets: usize) {
    println!("{}", "------------------------------------------------------".bright_blue());
    println!(
        "{} {}",
        ": rscscan".bright_blue(),
        env!("CARGO_PKG_VERSION").bright_cyan()
    );
    println!("{}", "------------------------------------------------------".bright_blue());
    println!(
        "[~] Scanning {} targets with {} workers (mode: {:?}, timeout: {}s)",
        targets.to_string().bright_yellow(),
        config.workers.to_string().bright_yellow(),
        config.mode,
        config.timeout_secs
    );
}

fn progress_bar(total: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// HTTP orchestrator for `config`, failing early when the mode needs
/// strategies the HTTP prober does not implement
fn build_orchestrator(config: &ScanConfig) -> anyhow::Result<Arc<ScanOrchestrator>> {
    let prober = HttpProber::new(&config.transport_options(), config.timeout_duration())?;
    let orchestrator = ScanOrchestrator::new(Arc::new(prober));
    orchestrator
        .check_policy(config.policy())
        .with_context(|| format!("Mode {:?} is not available for URL scans", config.mode))?;
    log::debug!("Using {} prober", orchestrator.prober_name());
    Ok(Arc::new(orchestrator))
}

fn output_manager(matches: &ArgMatches) -> OutputManager {
    OutputManager::new(OutputConfig {
        format: if matches.get_flag("json") { OutputFormat::Json } else { OutputFormat::Text },
        colored: !matches.get_flag("no-color"),
        verbose: matches.get_flag("verbose"),
        quiet: matches.get_flag("quiet"),
    })
}

fn write_results(
    matches: &ArgMatches,
    results: &[JobResult],
    summary: &ScanSummary,
) -> anyhow::Result<()> {
    if let Some(path) = matches.get_one::<String>("output") {
        let vulnerable_only = !matches.get_flag("all-results");
        let written = save_results(path, results, summary, vulnerable_only)
            .with_context(|| format!("Failed to write results to {}", path))?;
        if !matches.get_flag("json") {
            println!(
                "{} {} results saved to {}",
                "[+]".bright_green(),
                written,
                path.bright_cyan()
            );
        }
    }
    Ok(())
}

/// Classify the versions pinned in a project checkout, without network access
fn run_local(matches: &ArgMatches, path: &str) -> anyhow::Result<i32> {
    let output = output_manager(matches);
    let start_time = Instant::now();

    let results: Vec<JobResult> = scan_project(path)?
        .into_iter()
        .map(|verdict| JobResult {
            verdict,
            error: None,
        })
        .collect();
    if results.is_empty() {
        log::warn!("No framework version pinned under {}", path);
    }
    for result in &results {
        output.print_verdict(&result.verdict)?;
    }

    let mut summary = ScanSummary::from_results(&results);
    summary.set_duration(start_time.elapsed());
    output.print_summary(&summary);
    write_results(matches, &results, &summary)?;
    Ok(summary.exit_code())
}

async fn run(matches: ArgMatches) -> anyhow::Result<i32> {
    if let Some(path) = matches.get_one::<String>("local") {
        return run_local(&matches, path);
    }

    let config = resolve_config(&matches)?;
    let targets = collect_targets(&matches)?;
    if targets.is_empty() {
        bail!("No valid targets. Use -u <url>, -l <file> or --local <path>");
    }

    let json = matches.get_flag("json");
    let quiet = matches.get_flag("quiet");
    let output = output_manager(&matches);

    if !json && !quiet {
        print_banner(&config, targets.len());
    }

    let orchestrator = build_orchestrator(&config)?;

    let bar = progress_bar(targets.len(), json || quiet);
    let start_time = Instant::now();

    let results = scan_targets_with(
        orchestrator,
        targets,
        config.policy(),
        config.probe_options(),
        config.workers,
        |result| {
            bar.suspend(|| {
                if let Err(e) = output.print_verdict(&result.verdict) {
                    log::error!("Failed to print result: {}", e);
                }
            });
            if result.is_vulnerable() {
                bar.set_message(format!("last hit: {}", result.target()));
            }
            bar.inc(1);
        },
    )
    .await?;
    bar.finish_and_clear();

    let mut summary = ScanSummary::from_results(&results);
    summary.set_duration(start_time.elapsed());
    output.print_summary(&summary);
    write_results(&matches, &results, &summary)?;

    Ok(summary.exit_code())
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match run(matches).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "[!] ERROR:".bright_red(), e);
            process::exit(2);
        }
    }
}
