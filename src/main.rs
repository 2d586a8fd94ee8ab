mod browser;
mod checker;
mod config;
mod connectivity;
mod extract;
mod mail;
mod notifier;
mod retry;
mod scheduler;
mod signals;
mod state;
mod status;
mod template;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::browser::ChromeSessionFactory;
use crate::checker::{CheckResult, StatusChecker};
use crate::config::{CliOverrides, MonitorConfig};
use crate::connectivity::HttpProbe;
use crate::extract::CardRule;
use crate::mail::MailNotifier;
use crate::notifier::{AnyNotifier, Composer, LogNotifier};
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, Termination};
use crate::signals::ShutdownSignal;
use crate::status::StatusTracker;

/// Watches a booking page in a headless browser and sends a one-time
/// alert when bookings open, with periodic "still watching" emails.
#[derive(Parser, Debug)]
#[command(name = "slotwatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "slotwatch.toml")]
    config: PathBuf,

    /// Page to watch (overrides config and WEBSITE_URL)
    #[arg(long)]
    url: Option<String>,

    /// Minutes between checks (overrides config)
    #[arg(long, value_name = "MIN")]
    check_interval: Option<u64>,

    /// Minutes between status emails, 0 to disable (overrides config)
    #[arg(long, value_name = "MIN")]
    heartbeat_interval: Option<u64>,

    /// Attempts per check cycle (overrides config)
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Probe connectivity, run a single check, print the result and exit
    #[arg(long)]
    once: bool,

    /// Send a test email through the configured mail account and exit
    #[arg(long)]
    test_email: bool,

    /// Print the status of a running monitor and exit
    #[arg(long)]
    status: bool,

    /// Extra logging (attempt details, browser lifecycle)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            url: self.url.clone(),
            check_interval_mins: self.check_interval,
            heartbeat_interval_mins: self.heartbeat_interval,
            max_attempts: self.retries,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.status {
        return match status::read(&config.status.file) {
            Ok(contents) => {
                println!("{contents}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    if cli.dry_run {
        print_settings(&config, &cli.config);
        return ExitCode::SUCCESS;
    }

    let notifier = match build_notifier(&config) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up email");
            return ExitCode::FAILURE;
        }
    };

    if cli.test_email {
        return send_test_email(&notifier).await;
    }

    run_monitor(config, notifier, cli.once).await
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,slotwatch={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Defaults, then the config file, then the environment, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<MonitorConfig, config::ConfigError> {
    let mut config = MonitorConfig::load(&cli.config)?;
    config.apply_env()?;
    config.apply_cli(&cli.overrides());
    Ok(config)
}

fn build_notifier(config: &MonitorConfig) -> Result<AnyNotifier, notifier::NotifyError> {
    let composer = Composer::new(
        &config.target.url,
        &config.email.subject,
        &config.email.body,
        config.schedule.check_interval(),
    );
    if config.email.is_configured() {
        Ok(AnyNotifier::Mail(MailNotifier::new(&config.email, composer)?))
    } else {
        tracing::warn!(
            "email not configured (EMAIL_SERVER_USER, EMAIL_SERVER_PASSWORD, EMAIL_RECIPIENT); \
             alerts will only be logged"
        );
        Ok(AnyNotifier::Log(LogNotifier::new(composer)))
    }
}

async fn send_test_email(notifier: &AnyNotifier) -> ExitCode {
    let AnyNotifier::Mail(mailer) = notifier else {
        tracing::error!("cannot send a test email: email is not configured");
        return ExitCode::FAILURE;
    };
    match mailer.send_test().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "test email failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_monitor(config: MonitorConfig, notifier: AnyNotifier, once: bool) -> ExitCode {
    let shutdown = ShutdownSignal::new();
    if let Err(e) = shutdown.install() {
        tracing::error!(error = %e, "failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    let probe = match HttpProbe::new(&config.connectivity) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up connectivity check");
            return ExitCode::FAILURE;
        }
    };
    let rule = match CardRule::from_config(&config.target) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "invalid target selectors");
            return ExitCode::FAILURE;
        }
    };

    let checker = StatusChecker::new(
        ChromeSessionFactory::new(config.browser.clone()),
        rule,
        RetryPolicy::from_config(&config.retry),
        config.target.url.clone(),
        config.target.open_marker.clone(),
        shutdown.subscribe(),
    );
    let scheduler = Scheduler::new(
        probe,
        checker,
        notifier,
        &config.schedule,
        StatusTracker::new(config.status.file.clone(), &config.target.url),
        shutdown.subscribe(),
    );

    if once {
        return match scheduler.run_once().await {
            Ok(Some(result)) => {
                report_once(&result, shutdown.is_triggered());
                ExitCode::SUCCESS
            }
            Ok(None) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "connectivity check failed");
                ExitCode::FAILURE
            }
        };
    }

    match scheduler.run().await {
        Ok(summary) => {
            match summary.termination {
                Termination::BookingOpen { text, at } => {
                    tracing::info!(
                        text = %text,
                        at = %notifier::local_time(at),
                        total_checks = summary.state.total_checks,
                        "bookings are open, monitoring complete"
                    );
                }
                Termination::Shutdown => {
                    tracing::info!(
                        total_checks = summary.state.total_checks,
                        "monitor stopped by signal"
                    );
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "not starting the monitor");
            ExitCode::FAILURE
        }
    }
}

fn report_once(result: &CheckResult, interrupted: bool) {
    if interrupted {
        tracing::info!("check interrupted by signal");
    } else if result.is_open() {
        tracing::info!("bookings are open");
    }
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "failed to render check result"),
    }
}

fn print_settings(config: &MonitorConfig, path: &std::path::Path) {
    let heartbeat = match config.schedule.heartbeat_interval_mins {
        0 => "disabled".to_string(),
        n => format!("every {n} min"),
    };
    let email = if config.email.is_configured() {
        format!(
            "{} -> {} via {}:{}",
            config.email.username,
            config.email.recipient,
            config.email.smtp_host,
            config.email.smtp_port
        )
    } else {
        "not configured (log only)".to_string()
    };

    println!("slotwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file:     {}", path.display());
    println!("URL:             {}", config.target.url);
    println!(
        "Field:           {} / {} containing {:?}",
        config.target.card_selector, config.target.heading_selector, config.target.heading_marker
    );
    println!("Open marker:     {:?}", config.target.open_marker);
    println!(
        "Check interval:  every {} min",
        config.schedule.check_interval_mins
    );
    println!("Heartbeat:       {heartbeat}");
    println!(
        "Retries:         {} attempts, {}s backoff, +{}s after resource exhaustion",
        config.retry.max_attempts, config.retry.backoff_secs, config.retry.exhaustion_cooldown_secs
    );
    println!(
        "Browser:         {}",
        config
            .browser
            .executable
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "auto-detect".to_string())
    );
    println!("Email:           {email}");
    println!("Status file:     {}", config.status.file.display());
    println!("Dry run: config validated, not running.");
}
