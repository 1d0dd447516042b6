//! # Nudge CLI
//!
//! Personal notification and reminder daemon with pluggable delivery
//! channels and randomized send times.
//!
//! Usage:
//!   nudge service run                       # Start the daemon
//!   nudge channel list                      # Show configured channels
//!   nudge channel test -u ryan -m "ping"    # One-off delivery
//!   nudge schedule set -u ryan --category motivational plan.json
//!   nudge reschedule -u ryan --category motivational
//!   nudge status                            # Query the running daemon
//!   nudge init                              # First-time setup

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use nudge_channels::ChannelFactory;
use nudge_core::traits::Dispatch;
use nudge_core::types::{ChannelKind, OutboundMessage, ScheduleData};
use nudge_core::NudgeConfig;
use nudge_gateway::GatewayServer;
use nudge_orchestrator::{DeliveryOutcome, Monitor, Orchestrator, OrchestratorOptions, RetryPolicy};
use nudge_scheduler::{RescheduleBridge, ScheduleStore, SchedulerEngine};

#[derive(Parser)]
#[command(
    name = "nudge",
    version,
    about = "📨 Nudge — personal notification and reminder daemon",
    long_about = "Delivers scheduled nudges and task reminders over Telegram, SMTP email,\nand signed webhooks. One daemon, pluggable channels, randomized send times."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Manage delivery channels
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Manage sending schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Ask a running service to recompute one schedule
    Reschedule {
        /// User id from the config
        #[arg(short, long)]
        user: String,

        /// Category name
        #[arg(long)]
        category: String,
    },

    /// Show status of the running service
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// First-time setup
    Init,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Start channels, scheduler, monitor, and status gateway
    Run,
}

#[derive(Subcommand)]
enum ChannelAction {
    /// List configured channels
    List,
    /// Send a one-off message through the delivery pipeline
    Test {
        /// Target user id from the config
        #[arg(short, long)]
        user: String,

        /// Message body
        #[arg(short, long)]
        message: String,

        /// Category label on the message
        #[arg(long, default_value = "manual")]
        category: String,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Print a stored schedule
    Show {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        category: String,
    },
    /// Write a schedule from a JSON document and request a reschedule
    Set {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        category: String,
        /// Path to a schedule JSON file, or `-` for stdin
        file: String,
    },
    /// Enable a schedule
    Enable {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        category: String,
    },
    /// Disable a schedule
    Disable {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        category: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "nudge=debug,nudge_core=debug,nudge_channels=debug,nudge_orchestrator=debug,nudge_scheduler=debug,nudge_gateway=debug"
    } else {
        "nudge=info,nudge_channels=info,nudge_orchestrator=info,nudge_scheduler=info,nudge_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = if let Some(path) = &cli.config {
        NudgeConfig::load_from(std::path::Path::new(path))?
    } else {
        NudgeConfig::load()?
    };

    match cli.command {
        Commands::Service { action } => match action {
            ServiceAction::Run => run_service(config).await?,
        },

        Commands::Channel { action } => match action {
            ChannelAction::List => channel_list(&config),
            ChannelAction::Test {
                user,
                message,
                category,
            } => channel_test(config, &user, &category, &message).await?,
        },

        Commands::Schedule { action } => schedule_command(&config, action)?,

        Commands::Reschedule { user, category } => {
            let bridge = RescheduleBridge::new(config.data_dir());
            let path = bridge.write_marker(&user, &category)?;
            println!("✅ Reschedule requested for {user}/{category}");
            println!("   Marker: {}", path.display());
        }

        Commands::Status => status_command(&config).await?,

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let content = toml::to_string_pretty(&config)?;
                println!("{content}");
            }
            ConfigAction::Reset => {
                NudgeConfig::default().save()?;
                println!("✅ Configuration reset to defaults.");
            }
        },

        Commands::Init => init_command()?,
    }

    Ok(())
}

/// The long-running daemon: channels, orchestrator, monitor, scheduler,
/// and the status gateway, all stopped together via one token.
async fn run_service(config: NudgeConfig) -> Result<()> {
    println!("📨 Nudge v{} starting", env!("CARGO_PKG_VERSION"));

    let factory = ChannelFactory::from_config(&config.channels)?;
    let channels = factory.build_all();
    if channels.is_empty() {
        anyhow::bail!("No channels could be built; check [channels] in the config");
    }

    let token = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(
        channels,
        OrchestratorOptions {
            users: config.users.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            grace: Duration::from_secs(config.service.shutdown_grace_secs),
            token: token.clone(),
        },
    );
    orchestrator.start_all().await;

    let active = orchestrator.active_channels();
    if active.is_empty() {
        warn!("No channel came up at startup; messages will be held until one recovers");
    } else {
        let names: Vec<String> = active.iter().map(ToString::to_string).collect();
        println!("   Active channels: {}", names.join(", "));
    }

    let slots = orchestrator.slots();
    let board = orchestrator.board();
    let handle = orchestrator.handle();

    // Inbound events are logged and counted upstream; the merged queue
    // still has to be drained.
    if let Some(mut inbound) = orchestrator.take_inbound() {
        let drain_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_token.cancelled() => break,
                    event = inbound.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let monitor = Monitor::new(slots.clone(), config.monitor.clone(), token.clone());
    tokio::spawn(monitor.run());

    let engine = SchedulerEngine::new(
        config.data_dir(),
        Arc::new(handle.clone()),
        Duration::from_secs(config.service.poll_interval_secs),
        token.clone(),
    );
    let jobs = engine.jobs();

    let orchestrator_task = tokio::spawn(orchestrator.run());
    let engine_task = tokio::spawn(engine.run());

    let gateway_task = if config.gateway.enabled {
        let server = GatewayServer::new(config.gateway.clone(), board, slots, jobs);
        let gateway_token = token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(gateway_token).await {
                error!("Status gateway failed: {e}");
            }
        }))
    } else {
        None
    };

    println!("\nService is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    println!("\n👋 Stopping...");

    token.cancel();
    // Scheduler first so nothing new enters the pipeline, then the
    // orchestrator drains and stops the channels.
    let _ = engine_task.await;
    let _ = orchestrator_task.await;
    if let Some(task) = gateway_task {
        let _ = task.await;
    }
    println!("👋 Stopped.");
    Ok(())
}

fn channel_list(config: &NudgeConfig) {
    let enabled = match config.enabled_kinds() {
        Ok(kinds) => kinds,
        Err(e) => {
            println!("❌ {e}");
            return;
        }
    };
    let mark = |kind: ChannelKind, configured: bool| {
        if !enabled.contains(&kind) {
            "⬜"
        } else if configured {
            "✅"
        } else {
            "⚠️ "
        }
    };

    println!("Channels:");
    println!(
        "  {} telegram  — Bot API long-poll",
        mark(ChannelKind::Telegram, config.channels.telegram.is_some())
    );
    println!(
        "  {} email     — SMTP submission",
        mark(ChannelKind::Email, config.channels.email.is_some())
    );
    println!(
        "  {} webhook   — signed HTTP in/out",
        mark(ChannelKind::Webhook, true)
    );
    if enabled.is_empty() {
        println!("\nNo channels enabled. Add them under [channels] in the config.");
    }
}

/// Push one message through the real pipeline and report the verdict.
async fn channel_test(
    config: NudgeConfig,
    user: &str,
    category: &str,
    message: &str,
) -> Result<()> {
    let factory = ChannelFactory::from_config(&config.channels)?;
    let channels = factory.build_all();
    if channels.is_empty() {
        anyhow::bail!("No channels could be built; check [channels] in the config");
    }

    let token = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        channels,
        OrchestratorOptions {
            users: config.users.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            grace: Duration::from_secs(config.service.shutdown_grace_secs),
            token: token.clone(),
        },
    );
    orchestrator.start_all().await;
    if orchestrator.active_count() == 0 {
        anyhow::bail!("No channel is active; nothing to send through");
    }

    let handle = orchestrator.handle();
    let mut reports = handle.subscribe_reports();
    let pipeline = tokio::spawn(orchestrator.run());

    let outbound = OutboundMessage::new(user, category, message);
    let id = outbound.id;
    println!("📨 Sending test message {id} to {user}...");
    handle.submit(outbound).await?;

    let verdict = tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match reports.recv().await {
                Ok(report) if report.message.id == id => break Some(report),
                Ok(_) => continue,
                Err(_) => break None,
            }
        }
    })
    .await;

    match verdict {
        Ok(Some(report)) => match report.outcome {
            DeliveryOutcome::Delivered => {
                println!("✅ Delivered after {} attempt(s)", report.attempts.len());
            }
            DeliveryOutcome::Abandoned => {
                println!("❌ Abandoned after {} attempt(s)", report.attempts.len());
                for attempt in &report.attempts {
                    match &attempt.error {
                        Some(detail) => {
                            println!("   - {}: {} ({detail})", attempt.channel, attempt.outcome);
                        }
                        None => println!("   - {}: {}", attempt.channel, attempt.outcome),
                    }
                }
            }
        },
        Ok(None) => println!("❌ Delivery pipeline closed unexpectedly"),
        Err(_) => println!("⌛ No verdict within 120s (retries may still be running)"),
    }

    token.cancel();
    let _ = pipeline.await;
    Ok(())
}

fn schedule_command(config: &NudgeConfig, action: ScheduleAction) -> Result<()> {
    let data_dir = config.data_dir();
    let store = ScheduleStore::new(&data_dir);
    let bridge = RescheduleBridge::new(&data_dir);

    match action {
        ScheduleAction::Show { user, category } => {
            let data = store.load_schedule(&user, &category)?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        ScheduleAction::Set {
            user,
            category,
            file,
        } => {
            let content = if file == "-" {
                use std::io::Read;
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&file)?
            };
            let data: ScheduleData = serde_json::from_str(&content)?;
            store.save_schedule(&user, &category, &data)?;
            bridge.write_marker(&user, &category)?;
            println!("✅ Schedule saved for {user}/{category}; reschedule requested");
        }
        ScheduleAction::Enable { user, category } => {
            set_enabled(&store, &bridge, &user, &category, true)?;
        }
        ScheduleAction::Disable { user, category } => {
            set_enabled(&store, &bridge, &user, &category, false)?;
        }
    }
    Ok(())
}

fn set_enabled(
    store: &ScheduleStore,
    bridge: &RescheduleBridge,
    user: &str,
    category: &str,
    enabled: bool,
) -> Result<()> {
    let mut data = store.load_schedule(user, category)?;
    data.enabled = enabled;
    store.save_schedule(user, category, &data)?;
    bridge.write_marker(user, category)?;
    println!(
        "✅ Schedule for {user}/{category} {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Fetch and pretty-print the running service's status JSON.
async fn status_command(config: &NudgeConfig) -> Result<()> {
    let url = format!(
        "http://{}:{}/status",
        config.gateway.host, config.gateway.port
    );
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Is the service running? GET {url} failed: {e}"))?;
    let json: serde_json::Value = response.json().await?;

    println!("📨 Nudge v{}", json["version"].as_str().unwrap_or("?"));
    println!("   Uptime: {}s", json["uptime_secs"]);
    println!(
        "   Messages: {} delivered / {} abandoned / {} held / {} inbound",
        json["messages"]["delivered"],
        json["messages"]["abandoned"],
        json["messages"]["held"],
        json["messages"]["inbound"]
    );
    println!("   Jobs: {}", json["jobs"]["count"]);
    println!("   Channels:");
    if let Some(channels) = json["channels"].as_array() {
        for ch in channels {
            let state = ch["state"].as_str().unwrap_or("?");
            let mark = if state == "active" { "✅" } else { "❌" };
            println!("     {mark} {} — {state}", ch["kind"].as_str().unwrap_or("?"));
        }
    }
    Ok(())
}

fn init_command() -> Result<()> {
    println!("📨 Nudge — First-time Setup\n");

    let path = NudgeConfig::default_path();
    if path.exists() {
        println!("✅ Config already exists: {}", path.display());
    } else {
        NudgeConfig::default().save()?;
        println!("✅ Config saved to: {}", path.display());
    }

    let config = NudgeConfig::load()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(data_dir.join("schedules"))?;
    std::fs::create_dir_all(data_dir.join("tasks"))?;
    std::fs::create_dir_all(data_dir.join("reschedule"))?;
    println!("✅ Data directories created under {}", data_dir.display());

    println!("\n📋 Next steps:");
    println!("  1. Enable a channel: edit [channels] in {}", path.display());
    println!("  2. Add a user under [[users]] with a chat id or email");
    println!("  3. Create a schedule: nudge schedule set -u <id> --category <name> plan.json");
    println!("  4. Start the daemon: nudge service run");
    Ok(())
}
