//! # Recovery Configuration Validator
//!
//! Command-line tool for validating recovery engine configuration files.
//! Catches bad thresholds and retry strategies before the engine starts.

use clap::{Parser, Subcommand};
use recovery_core::config::{ConfigManager, RecoveryConfig};
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate recovery engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to RECOVERY_CONFIG_PATH.
    #[arg(short, long)]
    config: Option<String>,

    /// Ignore RECOVERY__* environment overrides
    #[arg(long)]
    no_env: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one section
    Component {
        /// Section name (circuit_breakers, retry, sweeps, retention, health, notifications, events)
        name: String,
    },

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|manager| match &cli.command {
        Some(Commands::All) | None => validate_all(&manager),
        Some(Commands::Component { name }) => validate_component(manager.config(), name),
        Some(Commands::Show) => show(&manager),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            println!("❌ {e}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>, Box<dyn std::error::Error>> {
    let manager = match (&cli.config, cli.no_env) {
        (Some(path), true) => ConfigManager::load_file_only(path)?,
        (Some(path), false) => ConfigManager::load_from_path(path)?,
        (None, _) => ConfigManager::load()?,
    };
    Ok(manager)
}

fn validate_all(manager: &ConfigManager) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Recovery Configuration");
    println!("Environment: {}", manager.environment());
    match manager.source() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: defaults + environment"),
    }
    println!();

    let config = manager.config();
    for section in SECTIONS {
        validate_component(config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 7] = [
    "circuit_breakers",
    "retry",
    "sweeps",
    "retention",
    "health",
    "notifications",
    "events",
];

fn validate_component(
    config: &RecoveryConfig,
    component_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match component_name.to_lowercase().replace('-', "_").as_str() {
        "circuit_breakers" => validate_circuit_breakers(config)?,
        "retry" => validate_retry(config)?,
        "sweeps" => {
            println!("🧹 Validating Sweeps Configuration...");
            println!(
                "   ✅ Retry sweep every {:?}, metrics sweep every {:?}",
                config.sweeps.retry_interval(),
                config.sweeps.metrics_interval()
            );
        }
        "retention" => {
            println!("🗃️  Validating Retention Configuration...");
            println!(
                "   ✅ Error records kept for {} days",
                config.retention.error_record_ttl_seconds / 86_400
            );
        }
        "health" => {
            println!("🩺 Validating Health Configuration...");
            println!(
                "   ✅ Unhealthy above {} open breakers or {:.0}% errors",
                config.health.unhealthy_open_breakers,
                config.health.unhealthy_error_rate * 100.0
            );
            println!(
                "   ✅ Degraded above {} open breakers or {:.0}% errors",
                config.health.degraded_open_breakers,
                config.health.degraded_error_rate * 100.0
            );
        }
        "notifications" => validate_notifications(config)?,
        "events" => {
            println!("📡 Validating Events Configuration...");
            println!("   ✅ Channel capacity: {}", config.events.channel_capacity);
        }
        _ => {
            return Err(format!("Unknown component: {component_name}").into());
        }
    }

    // Section checks share the whole-tree validation rules
    config.validate()?;
    Ok(())
}

fn validate_circuit_breakers(config: &RecoveryConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🛡️  Validating Circuit Breaker Configuration...");

    let breakers = &config.circuit_breakers;
    if !breakers.enabled {
        println!("   ℹ️  Circuit breakers disabled");
    }
    breakers.default_config.to_resilience_config().validate()?;
    println!(
        "   ✅ Default: open after {} failures, {} ms cooldown",
        breakers.default_config.failure_threshold, breakers.default_config.timeout_ms
    );

    let mut names: Vec<_> = breakers.component_configs.keys().collect();
    names.sort();
    for name in names {
        breakers.component_configs[name]
            .to_resilience_config()
            .validate()
            .map_err(|e| format!("circuit_breakers.component_configs.{name}: {e}"))?;
        println!("   ✅ Override: {name}");
    }
    Ok(())
}

fn validate_retry(config: &RecoveryConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔁 Validating Retry Configuration...");

    config.retry.default_strategy.validate()?;
    println!(
        "   ✅ Default strategy: {:?}, max {} retries",
        config.retry.default_strategy.strategy_type, config.retry.default_strategy.max_retries
    );
    for (category, strategy) in &config.retry.category_overrides {
        strategy
            .validate()
            .map_err(|e| format!("retry.category_overrides.{category}: {e}"))?;
        println!("   ✅ Override for {category}: {:?}", strategy.strategy_type);
    }
    Ok(())
}

fn validate_notifications(config: &RecoveryConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("📣 Validating Notification Configuration...");

    let notifications = &config.notifications;
    for level in 1..=4 {
        let recipients = notifications.escalation_recipients(level);
        if recipients.is_empty() {
            return Err(format!("escalation level {level} has no recipients").into());
        }
        println!("   ✅ Escalation level {level}: {} recipients", recipients.len());
    }
    if notifications.critical_recipients.is_empty() {
        println!("   ⚠️  No recipients for critical errors");
    }
    Ok(())
}

fn show(manager: &ConfigManager) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}
